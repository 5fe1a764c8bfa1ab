//! Discrete endpoint traffic sets
//!
//! A [`TrafficSet`] is a set of `(src, dst, connection)` tuples where
//! endpoints are indices into a fixed universe. It is what a rule matches on
//! one side, and what the redundancy analyzer accumulates over earlier rules.
//! Empty cells are never stored, so `is_empty` is a map check.

use std::collections::BTreeMap;

use crate::core::connection::ConnectionSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficSet {
    cells: BTreeMap<(usize, usize), ConnectionSet>,
}

impl TrafficSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cartesian product `srcs × dsts × conn`.
    pub fn product(srcs: &[usize], dsts: &[usize], conn: &ConnectionSet) -> Self {
        if conn.is_empty() {
            return Self::new();
        }
        let cells = srcs
            .iter()
            .flat_map(|&s| dsts.iter().map(move |&d| ((s, d), conn.clone())))
            .collect();
        Self { cells }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.union_with(other);
        merged
    }

    /// In-place union, for running accumulations.
    pub fn union_with(&mut self, other: &Self) {
        for (pair, conn) in &other.cells {
            self.cells
                .entry(*pair)
                .and_modify(|existing| *existing = existing.union(conn))
                .or_insert_with(|| conn.clone());
        }
    }

    /// Tuples present in both sets.
    pub fn intersect(&self, other: &Self) -> Self {
        let cells = self
            .cells
            .iter()
            .filter_map(|(pair, conn)| {
                let common = conn.intersect(other.cells.get(pair)?);
                (!common.is_empty()).then_some((*pair, common))
            })
            .collect();
        Self { cells }
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.cells.iter().any(|(pair, conn)| {
            other
                .cells
                .get(pair)
                .is_some_and(|theirs| conn.intersects(theirs))
        })
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.cells.iter().all(|(pair, conn)| {
            other
                .cells
                .get(pair)
                .is_some_and(|theirs| conn.is_subset(theirs))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::PortRange;

    fn smb() -> ConnectionSet {
        ConnectionSet::tcp(PortRange::single(445))
    }

    #[test]
    fn test_product_and_empty_conn() {
        let set = TrafficSet::product(&[0, 1], &[2], &smb());
        assert!(TrafficSet::product(&[1], &[2], &smb()).is_subset(&set));
        assert!(!TrafficSet::product(&[2], &[0], &smb()).is_subset(&set));
        assert!(TrafficSet::product(&[0], &[1], &ConnectionSet::none()).is_empty());
        assert!(TrafficSet::product(&[], &[1], &smb()).is_empty());
    }

    #[test]
    fn test_subset_needs_every_cell() {
        let small = TrafficSet::product(&[0], &[1], &smb());
        let wide = TrafficSet::product(&[0, 1], &[1], &ConnectionSet::all_tcp());
        assert!(small.is_subset(&wide));
        assert!(!wide.is_subset(&small));
        assert_eq!(small.intersect(&wide), small);
    }

    #[test]
    fn test_union_covers_split_coverage() {
        let rule = TrafficSet::product(&[0, 1], &[2], &smb());
        let first = TrafficSet::product(&[0], &[2], &ConnectionSet::all());
        let second = TrafficSet::product(&[1], &[2], &smb());
        assert!(!rule.is_subset(&first));
        assert!(rule.is_subset(&first.union(&second)));
        assert!(rule.intersects(&second));
        assert!(!second.intersects(&first));
    }

    #[test]
    fn test_intersect_drops_empty_cells() {
        let ssh = ConnectionSet::tcp(PortRange::single(22));
        let rule = TrafficSet::product(&[0, 1], &[2], &smb().union(&ssh));
        let other = TrafficSet::product(&[0], &[2], &ConnectionSet::all_tcp())
            .union(&TrafficSet::product(&[1], &[2], &ConnectionSet::all_udp()));
        assert_eq!(rule.intersect(&other), TrafficSet::product(&[0], &[2], &smb().union(&ssh)));
        assert!(rule.intersect(&TrafficSet::new()).is_empty());
    }
}
