//! Connection accumulator with per-rule attribution
//!
//! [`ConnectionsAndRules`] is the bucket the evaluator fills for each action:
//! the union of connections decided so far plus the ordered list of rule
//! partitions that contributed them. Values are immutable; every update
//! returns a new accumulator.

use serde::Serialize;

use crate::core::connection::ConnectionSet;
use crate::core::firewall::{Action, RuleId};

/// Slice of traffic attributed to one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleAttribution {
    pub rule_id: RuleId,
    pub action: Action,
    pub conn: ConnectionSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionsAndRules {
    accumulated: ConnectionSet,
    partitions: Vec<RuleAttribution>,
}

impl ConnectionsAndRules {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Accumulator holding `conn` with no attribution (undetermined residue).
    pub fn unattributed(conn: ConnectionSet) -> Self {
        Self {
            accumulated: conn,
            partitions: Vec::new(),
        }
    }

    pub fn accumulated(&self) -> &ConnectionSet {
        &self.accumulated
    }

    pub fn partitions(&self) -> &[RuleAttribution] {
        &self.partitions
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated.is_empty()
    }

    /// Records `added` as decided by `rule_id`.
    ///
    /// Only the part not already accumulated becomes the rule's partition.
    pub fn with_rule(mut self, rule_id: RuleId, action: Action, added: &ConnectionSet) -> Self {
        let partition = added.subtract(&self.accumulated);
        if !partition.is_empty() {
            self.partitions.push(RuleAttribution {
                rule_id,
                action,
                conn: partition,
            });
        }
        self.accumulated = self.accumulated.union(added);
        self
    }

    /// Appends `entry` as is, bypassing the partition invariants.
    #[cfg(test)]
    pub(crate) fn with_raw_partition(mut self, entry: RuleAttribution) -> Self {
        self.accumulated = self.accumulated.union(&entry.conn);
        self.partitions.push(entry);
        self
    }

    /// Removes `decided` from the accumulated set and from every partition,
    /// dropping partitions that become empty.
    pub fn without(&self, decided: &ConnectionSet) -> Self {
        Self {
            accumulated: self.accumulated.subtract(decided),
            partitions: self
                .partitions
                .iter()
                .filter_map(|p| {
                    let conn = p.conn.subtract(decided);
                    (!conn.is_empty()).then(|| RuleAttribution { conn, ..p.clone() })
                })
                .collect(),
        }
    }

    /// Union of both accumulators; partitions of `other` follow ours.
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            accumulated: self.accumulated.union(&other.accumulated),
            partitions: self
                .partitions
                .iter()
                .chain(&other.partitions)
                .cloned()
                .collect(),
        }
    }
}
