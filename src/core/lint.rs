//! Redundancy (shadowing) analysis
//!
//! Within each category, inbound and outbound effective rules are scanned
//! separately in priority order. A rule is shadowed on a side when every
//! `(src, dst, connection)` tuple it matches is already matched by earlier
//! rules of the same category; the earlier rule decides that traffic whatever
//! its action, so deleting the later rule changes nothing.
//!
//! Coverage is category-scoped: a jump-to-application verdict hands traffic
//! to a later category, so a rule in one category never shadows a rule in
//! another.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use strum::IntoEnumIterator;

use crate::core::firewall::{
    Category, CategoryKind, Direction, Endpoint, FirewallPolicy, IneffectiveRule, RuleId, Side,
};
use crate::core::traffic_set::TrafficSet;

/// A rule whose effect is fully produced by earlier rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedundantRule {
    pub rule_id: RuleId,
    pub category: CategoryKind,
    pub direction: Direction,
    /// Minimal set of earlier rules covering this one, ascending
    pub shadowing: Vec<RuleId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub redundant: Vec<RedundantRule>,
    pub ineffective: Vec<IneffectiveRule>,
}

impl LintReport {
    pub fn is_clean(&self) -> bool {
        self.redundant.is_empty() && self.ineffective.is_empty()
    }
}

/// Shadowed rules of one category on one side, keyed by rule id, each with
/// its minimal shadowing list.
fn shadowed_rules(
    category: &Category,
    side: Side,
    universe: &[Endpoint],
) -> BTreeMap<RuleId, Vec<RuleId>> {
    let index: HashMap<&str, usize> = universe
        .iter()
        .enumerate()
        .map(|(i, ep)| (ep.id.as_str(), i))
        .collect();
    let to_indices = |eps: Vec<&Endpoint>| -> Vec<usize> {
        eps.iter()
            .filter_map(|ep| index.get(ep.id.as_str()).copied())
            .collect()
    };

    let traffic: Vec<(RuleId, TrafficSet)> = category
        .effective_rules(side)
        .map(|rule| {
            let (src, dst) = rule.effective_endpoints(side, universe);
            (
                rule.id,
                TrafficSet::product(&to_indices(src), &to_indices(dst), &rule.conn),
            )
        })
        .collect();

    let mut shadowed = BTreeMap::new();
    let mut prior = TrafficSet::new();
    for (i, (rule_id, candidate)) in traffic.iter().enumerate() {
        if !candidate.is_empty() && candidate.is_subset(&prior) {
            shadowed.insert(*rule_id, minimal_shadowing(&traffic[..i], candidate));
        }
        prior.union_with(candidate);
    }
    shadowed
}

/// Greedy minimal cover of `candidate` by `earlier` rules, dropping the
/// latest coverers first. `candidate` must be covered by the union of
/// `earlier`.
///
/// Coverers are clipped to the candidate, and everything after the first
/// prefix that covers it would be dropped anyway, so only that prefix is
/// kept. A coverer is then dropped when the coverers before it together with
/// the later ones already kept still cover the candidate.
fn minimal_shadowing(earlier: &[(RuleId, TrafficSet)], candidate: &TrafficSet) -> Vec<RuleId> {
    let mut coverers: Vec<(RuleId, TrafficSet)> = Vec::new();
    // prefixes[k] is the union of coverers[..k]
    let mut prefixes: Vec<TrafficSet> = Vec::new();
    let mut running = TrafficSet::new();
    for (id, traffic) in earlier {
        if !traffic.intersects(candidate) {
            continue;
        }
        let clipped = traffic.intersect(candidate);
        prefixes.push(running.clone());
        running.union_with(&clipped);
        coverers.push((*id, clipped));
        if candidate.is_subset(&running) {
            break;
        }
    }

    let mut kept = TrafficSet::new();
    let mut ids = Vec::new();
    for ((id, clipped), prefix) in coverers.iter().zip(&prefixes).rev() {
        if !candidate.is_subset(&prefix.union(&kept)) {
            kept.union_with(clipped);
            ids.push(*id);
        }
    }
    ids.sort_unstable();
    ids
}

/// Redundant rules of every supported category, sorted by category then id.
pub fn redundant_rules(policy: &FirewallPolicy, universe: &[Endpoint]) -> Vec<RedundantRule> {
    let scans: Vec<(CategoryKind, Side)> = policy
        .categories()
        .iter()
        .filter(|c| c.kind.is_supported() && !c.is_empty())
        .flat_map(|c| Side::iter().map(move |side| (c.kind, side)))
        .collect();

    let results: HashMap<(CategoryKind, Side), BTreeMap<RuleId, Vec<RuleId>>> = scans
        .into_par_iter()
        .map(|(kind, side)| {
            (
                (kind, side),
                shadowed_rules(policy.category(kind), side, universe),
            )
        })
        .collect();

    let empty = BTreeMap::new();
    let mut report = Vec::new();
    for category in policy.categories().iter().filter(|c| c.kind.is_supported()) {
        let inbound = results.get(&(category.kind, Side::Ingress)).unwrap_or(&empty);
        let outbound = results.get(&(category.kind, Side::Egress)).unwrap_or(&empty);

        for rule in category.rules() {
            let shadowing = match rule.direction {
                Direction::In => inbound.get(&rule.id).cloned(),
                Direction::Out => outbound.get(&rule.id).cloned(),
                Direction::InOut => match (inbound.get(&rule.id), outbound.get(&rule.id)) {
                    (Some(ins), Some(outs)) => {
                        let mut ids: Vec<RuleId> = ins.iter().chain(outs).copied().collect();
                        ids.sort_unstable();
                        ids.dedup();
                        Some(ids)
                    }
                    _ => None,
                },
            };
            if let Some(shadowing) = shadowing {
                report.push(RedundantRule {
                    rule_id: rule.id,
                    category: category.kind,
                    direction: rule.direction,
                    shadowing,
                });
            }
        }
    }
    report
}

/// Full lint report: shadowed rules plus rules that can never match.
pub fn lint(policy: &FirewallPolicy, universe: &[Endpoint]) -> LintReport {
    LintReport {
        redundant: redundant_rules(policy, universe),
        ineffective: policy.ineffective_rules(universe),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::{ConnectionSet, PortRange};
    use crate::core::firewall::{Action, Rule, RuleEndpoints};

    fn universe() -> Vec<Endpoint> {
        vec![Endpoint::vm("A"), Endpoint::vm("B"), Endpoint::vm("C")]
    }

    fn tcp(port: u16) -> ConnectionSet {
        ConnectionSet::tcp(PortRange::single(port))
    }

    fn a_to_b(id: RuleId, action: Action, conn: ConnectionSet) -> Rule {
        Rule::new(id, action, conn, RuleEndpoints::of(["A"]), RuleEndpoints::of(["B"]))
    }

    #[test]
    fn test_action_does_not_matter_for_coverage() {
        let policy = FirewallPolicy::with_rules([
            a_to_b(1, Action::Deny, tcp(445)),
            a_to_b(2, Action::Allow, tcp(445)),
        ])
        .unwrap();
        let report = redundant_rules(&policy, &universe());
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].rule_id, 2);
        assert_eq!(report[0].shadowing, vec![1]);
    }

    #[test]
    fn test_shadowing_list_is_minimal() {
        let policy = FirewallPolicy::with_rules([
            a_to_b(1, Action::Allow, tcp(22)),
            a_to_b(2, Action::Allow, tcp(445)),
            a_to_b(3, Action::Allow, tcp(445).union(&tcp(22))),
            a_to_b(4, Action::Allow, tcp(445)),
        ])
        .unwrap();
        let report = redundant_rules(&policy, &universe());
        let rows: Vec<_> = report
            .iter()
            .map(|r| (r.rule_id, r.shadowing.clone()))
            .collect();
        // Rule 3 needs both 1 and 2; rule 4 only needs 2 once 3 is dropped.
        assert_eq!(rows, vec![(3, vec![1, 2]), (4, vec![2])]);
    }

    #[test]
    fn test_partial_coverage_is_not_redundant() {
        let policy = FirewallPolicy::with_rules([
            a_to_b(1, Action::Allow, tcp(445)),
            Rule::new(
                2,
                Action::Allow,
                tcp(445),
                RuleEndpoints::of(["A", "C"]),
                RuleEndpoints::of(["B"]),
            ),
        ])
        .unwrap();
        assert!(redundant_rules(&policy, &universe()).is_empty());
    }

    #[test]
    fn test_coverage_is_category_scoped() {
        let policy = FirewallPolicy::with_rules([
            a_to_b(1, Action::Allow, tcp(445)).in_category(CategoryKind::Environment),
            a_to_b(2, Action::Allow, tcp(445)),
        ])
        .unwrap();
        assert!(redundant_rules(&policy, &universe()).is_empty());
    }

    #[test]
    fn test_in_out_needs_both_sides() {
        let policy = FirewallPolicy::with_rules([
            a_to_b(1, Action::Allow, tcp(445)).with_direction(Direction::In),
            a_to_b(2, Action::Allow, tcp(445)),
        ])
        .unwrap();
        assert!(redundant_rules(&policy, &universe()).is_empty());
    }

    #[test]
    fn test_empty_traffic_rules_are_not_redundant() {
        let policy = FirewallPolicy::with_rules([
            a_to_b(1, Action::Allow, ConnectionSet::all()),
            Rule::new(
                2,
                Action::Allow,
                tcp(445),
                RuleEndpoints::of(["missing"]),
                RuleEndpoints::of(["B"]),
            ),
        ])
        .unwrap();
        let report = lint(&policy, &universe());
        assert!(report.redundant.is_empty());
        assert_eq!(report.ineffective.len(), 1);
        assert_eq!(report.ineffective[0].rule_id, 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_many_duplicate_rules_scan_quickly() {
        let universe: Vec<Endpoint> = (0..10).map(|i| Endpoint::vm(format!("vm-{i}"))).collect();
        let rules = (1..=300).map(|id| {
            Rule::new(
                id,
                Action::Allow,
                ConnectionSet::tcp(PortRange::new(1, 1000)),
                RuleEndpoints::any(),
                RuleEndpoints::any(),
            )
        });
        let policy = FirewallPolicy::with_rules(rules).unwrap();

        let started = std::time::Instant::now();
        let report = redundant_rules(&policy, &universe);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));

        assert_eq!(report.len(), 299);
        assert!(report.iter().all(|row| row.shadowing == vec![1]));
        assert_eq!(report[0].rule_id, 2);
    }
}
