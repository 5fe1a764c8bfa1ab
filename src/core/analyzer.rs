//! Analysis entry points
//!
//! [`Analyzer`] binds a read-only [`FirewallPolicy`] to a diagnostics sink and
//! exposes the per-pair verdict, the connectivity map and the lint report.
//!
//! # Example
//!
//! ```
//! use dfw_analyzer::core::analyzer::Analyzer;
//! use dfw_analyzer::core::connection::{ConnectionSet, PortRange};
//! use dfw_analyzer::core::diagnostics::NullSink;
//! use dfw_analyzer::core::firewall::{Action, Endpoint, FirewallPolicy, Rule, RuleEndpoints};
//!
//! let smb = ConnectionSet::tcp(PortRange::single(445));
//! let policy = FirewallPolicy::with_rules([
//!     Rule::new(
//!         1004,
//!         Action::Allow,
//!         smb.clone(),
//!         RuleEndpoints::of(["A"]),
//!         RuleEndpoints::of(["B"]),
//!     ),
//!     Rule::default_rule(1_000_000, Action::Deny),
//! ])
//! .unwrap();
//! let endpoints = vec![Endpoint::vm("A"), Endpoint::vm("B")];
//!
//! let sink = NullSink;
//! let map = Analyzer::with_sink(&policy, &sink).build_connectivity_map(&endpoints, None);
//! assert_eq!(map.lookup("A", "B").unwrap().permitted, smb);
//! assert!(map.lookup("B", "A").unwrap().permitted.is_empty());
//! ```

use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::info;

use crate::core::aggregate::{evaluate_side, is_unenforced};
use crate::core::connectivity::ConnectivityMap;
use crate::core::diagnostics::{Diagnostic, DiagnosticsSink, TracingSink};
use crate::core::explanation::DetailedConnection;
use crate::core::firewall::{Endpoint, FirewallPolicy, Side};
use crate::core::lint::{self, LintReport};

static TRACING_SINK: TracingSink = TracingSink;

#[derive(Clone, Copy)]
pub struct Analyzer<'a> {
    policy: &'a FirewallPolicy,
    sink: &'a dyn DiagnosticsSink,
}

impl<'a> Analyzer<'a> {
    /// Analyzer reporting diagnostics through `tracing`.
    pub fn new(policy: &'a FirewallPolicy) -> Self {
        Self {
            policy,
            sink: &TRACING_SINK,
        }
    }

    pub fn with_sink(policy: &'a FirewallPolicy, sink: &'a dyn DiagnosticsSink) -> Self {
        Self { policy, sink }
    }

    pub fn policy(&self) -> &'a FirewallPolicy {
        self.policy
    }

    /// Verdict for the flow `src -> dst`: traffic allowed on both the egress
    /// and the ingress side, with the attributions of both.
    pub fn allowed_connections(&self, src: &Endpoint, dst: &Endpoint) -> DetailedConnection {
        let ingress = evaluate_side(self.policy, src, dst, Side::Ingress, self.sink);
        let egress = evaluate_side(self.policy, src, dst, Side::Egress, self.sink);
        DetailedConnection::combine(src, dst, ingress, egress, self.sink)
    }

    /// Verdicts for every ordered pair of distinct endpoints whose names pass
    /// `filter` (all endpoints when `None`).
    ///
    /// Pairs between two external blocks are not enforced anywhere and are
    /// left out, as are pairs with one external endpoint where no rule decided
    /// anything on the enforced side.
    pub fn build_connectivity_map(
        &self,
        endpoints: &[Endpoint],
        filter: Option<&[String]>,
    ) -> ConnectivityMap {
        let keep: Option<BTreeSet<&str>> =
            filter.map(|names| names.iter().map(String::as_str).collect());
        let selected: Vec<&Endpoint> = endpoints
            .iter()
            .filter(|ep| keep.as_ref().is_none_or(|k| k.contains(ep.name.as_str())))
            .collect();

        let pairs: Vec<(&Endpoint, &Endpoint)> = selected
            .iter()
            .flat_map(|&src| selected.iter().map(move |&dst| (src, dst)))
            .filter(|(src, dst)| src != dst && !(src.is_external() && dst.is_external()))
            .collect();

        let results: Vec<_> = pairs
            .par_iter()
            .map(|&(src, dst)| (src, dst, self.allowed_connections(src, dst)))
            .collect();

        let mut map = ConnectivityMap::new();
        for (src, dst, conn) in results {
            if Self::undecided_external(src, dst, &conn) {
                continue;
            }
            map.insert(src.clone(), dst.clone(), conn);
        }
        info!(
            "Computed connectivity for {} pair(s) over {} endpoint(s)",
            map.len(),
            selected.len()
        );
        map
    }

    fn undecided_external(src: &Endpoint, dst: &Endpoint, conn: &DetailedConnection) -> bool {
        let enforced_undetermined = |side: Side| match side {
            Side::Ingress => conn.explanation.undetermined_ingress.is_all(),
            Side::Egress => conn.explanation.undetermined_egress.is_all(),
        };
        (src.is_external() || dst.is_external())
            && [Side::Ingress, Side::Egress]
                .into_iter()
                .filter(|&side| !is_unenforced(src, dst, side))
                .any(enforced_undetermined)
    }

    /// Shadowed and ineffective rules over `endpoints`.
    pub fn lint(&self, endpoints: &[Endpoint]) -> LintReport {
        let report = lint::lint(self.policy, endpoints);
        for rule in &report.ineffective {
            for reason in &rule.reasons {
                self.sink.report(Diagnostic::IneffectiveRule {
                    rule_id: rule.rule_id,
                    category: rule.category,
                    reason: reason.clone(),
                });
            }
        }
        info!(
            "Lint found {} redundant and {} ineffective rule(s)",
            report.redundant.len(),
            report.ineffective.len()
        );
        report
    }
}
