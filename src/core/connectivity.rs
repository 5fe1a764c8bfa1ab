//! Connectivity map: per-pair verdicts and queries over them
//!
//! The map is built once per analysis (see [`crate::core::analyzer`]) and is
//! read-only afterwards. Iteration is always in endpoint-name order, so edge
//! lists, reports and fingerprints are deterministic.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::connection::ConnectionSet;
use crate::core::explanation::DetailedConnection;
use crate::core::firewall::{Endpoint, RuleId};

/// Answer to "is this traffic allowed, and which rules say so?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionExplanation {
    pub is_allowed: bool,
    pub ingress_rule_ids: Vec<RuleId>,
    pub egress_rule_ids: Vec<RuleId>,
}

/// One `(src, dst, permitted)` row of the map
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Edge<'a> {
    pub src: &'a Endpoint,
    pub dst: &'a Endpoint,
    pub conn: &'a ConnectionSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectivityMap {
    entries: BTreeMap<Endpoint, BTreeMap<Endpoint, DetailedConnection>>,
}

impl ConnectivityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, src: Endpoint, dst: Endpoint, connection: DetailedConnection) {
        self.entries.entry(src).or_default().insert(dst, connection);
    }

    /// Number of `(src, dst)` pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, &Endpoint, &DetailedConnection)> + '_ {
        self.entries
            .iter()
            .flat_map(|(src, row)| row.iter().map(move |(dst, conn)| (src, dst, conn)))
    }

    pub fn lookup(&self, src_name: &str, dst_name: &str) -> Option<&DetailedConnection> {
        self.entries
            .iter()
            .find(|(src, _)| src.name == src_name)
            .and_then(|(_, row)| row.iter().find(|(dst, _)| dst.name == dst_name))
            .map(|(_, conn)| conn)
    }

    /// Restricts the map to pairs whose endpoints are both named in `names`.
    pub fn filter<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let keep: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();
        let entries = self
            .entries
            .iter()
            .filter(|(src, _)| keep.contains(src.name.as_str()))
            .filter_map(|(src, row)| {
                let row: BTreeMap<_, _> = row
                    .iter()
                    .filter(|(dst, _)| keep.contains(dst.name.as_str()))
                    .map(|(dst, conn)| (dst.clone(), conn.clone()))
                    .collect();
                (!row.is_empty()).then(|| (src.clone(), row))
            })
            .collect();
        Self { entries }
    }

    /// Whether `query` is fully permitted from `src_name` to `dst_name`, and
    /// which rules' attributions touch it on each side, whatever their action.
    ///
    /// Returns `None` when the pair is not in the map.
    pub fn explain(
        &self,
        src_name: &str,
        dst_name: &str,
        query: &ConnectionSet,
    ) -> Option<ConnectionExplanation> {
        let entry = self.lookup(src_name, dst_name)?;
        let (ingress_rule_ids, egress_rule_ids) = entry.explanation.filtered(query).rule_ids();
        Some(ConnectionExplanation {
            is_allowed: query.is_subset(&entry.permitted),
            ingress_rule_ids,
            egress_rule_ids,
        })
    }

    /// Rule ids from `all_rule_ids` that no attribution in the map mentions,
    /// ascending.
    pub fn unused_rules(&self, all_rule_ids: &[RuleId]) -> Vec<RuleId> {
        let used: BTreeSet<RuleId> = self
            .iter()
            .flat_map(|(_, _, conn)| {
                let (ingress, egress) = conn.explanation.rule_ids();
                ingress.into_iter().chain(egress)
            })
            .collect();
        let unused: BTreeSet<RuleId> = all_rule_ids
            .iter()
            .copied()
            .filter(|id| !used.contains(id))
            .collect();
        unused.into_iter().collect()
    }

    /// Every pair with its permitted connections, in name order.
    pub fn to_edge_list(&self) -> Vec<Edge<'_>> {
        self.iter()
            .map(|(src, dst, conn)| Edge {
                src,
                dst,
                conn: &conn.permitted,
            })
            .collect()
    }

    /// `(allowed, denied)` disjoint explanation pieces for a pair.
    pub fn disjoint_explanations(
        &self,
        src_name: &str,
        dst_name: &str,
    ) -> Option<(Vec<DetailedConnection>, Vec<DetailedConnection>)> {
        self.lookup(src_name, dst_name)
            .map(DetailedConnection::disjoint_explanations)
    }

    /// SHA-256 hex digest of the sorted edge list.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for edge in self.to_edge_list() {
            hasher.update(format!("{}\t{}\t{}\n", edge.src, edge.dst, edge.conn).as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}
