//! Shared test utilities for core module tests
//!
//! Builders for endpoints, rules and policies so scenario tests read like the
//! rule tables they describe. This module is only compiled in test mode.

use crate::core::analyzer::Analyzer;
use crate::core::connection::{ConnectionSet, PortRange};
use crate::core::connectivity::ConnectivityMap;
use crate::core::diagnostics::CollectingSink;
use crate::core::firewall::{Action, Endpoint, FirewallPolicy, Rule, RuleEndpoints, RuleId};

/// VM endpoints whose ids equal their names.
pub fn vms(names: &[&str]) -> Vec<Endpoint> {
    names.iter().map(|name| Endpoint::vm(*name)).collect()
}

pub fn tcp(port: u16) -> ConnectionSet {
    ConnectionSet::tcp(PortRange::single(port))
}

pub fn udp(port: u16) -> ConnectionSet {
    ConnectionSet::udp(PortRange::single(port))
}

/// Selector over endpoint names; `["ANY"]` matches everything.
pub fn select(names: &[&str]) -> RuleEndpoints {
    if names == ["ANY"] {
        RuleEndpoints::any()
    } else {
        RuleEndpoints::of(names.iter().copied())
    }
}

/// IN_OUT Application rule from name lists.
pub fn rule(id: RuleId, action: Action, conn: ConnectionSet, src: &[&str], dst: &[&str]) -> Rule {
    Rule::new(id, action, conn, select(src), select(dst))
}

/// Builds a policy, panicking on duplicate ids.
pub fn policy(rules: impl IntoIterator<Item = Rule>) -> FirewallPolicy {
    FirewallPolicy::with_rules(rules).expect("test policy should be valid")
}

/// Connectivity map over `endpoints` with the diagnostics it produced.
pub fn analyze(
    policy: &FirewallPolicy,
    endpoints: &[Endpoint],
) -> (ConnectivityMap, CollectingSink) {
    let sink = CollectingSink::new();
    let map = Analyzer::with_sink(policy, &sink).build_connectivity_map(endpoints, None);
    (map, sink)
}
