//! Cross-category aggregation for one side of a flow
//!
//! Categories are walked in priority order. Traffic finally allowed or denied
//! by a higher-priority category is removed from every bucket of the later
//! ones; jump-to-application traffic is not final and stays open for later
//! categories to decide.

use crate::core::accumulator::ConnectionsAndRules;
use crate::core::category_eval::{CategoryVerdict, evaluate_category};
use crate::core::connection::ConnectionSet;
use crate::core::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::core::firewall::{Endpoint, FirewallPolicy, Side};

/// Final verdict for one side of a pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideVerdict {
    pub allowed: ConnectionsAndRules,
    pub denied: ConnectionsAndRules,
    /// Traffic that received a jump-to-application verdict
    pub delegated: ConnectionsAndRules,
    /// Traffic no category decided
    pub undetermined: ConnectionSet,
}

impl SideVerdict {
    /// Side not enforced by the distributed firewall.
    pub fn unenforced() -> Self {
        Self {
            allowed: ConnectionsAndRules::unattributed(ConnectionSet::all()),
            ..Self::default()
        }
    }

    /// Connections finally allowed or denied.
    pub fn decided(&self) -> ConnectionSet {
        self.allowed.accumulated().union(self.denied.accumulated())
    }

    /// True when nothing is left for lower-priority categories to decide.
    pub fn is_closed(&self) -> bool {
        self.undetermined.is_empty() && self.decided().is_all()
    }

    /// Delegated traffic that no later category resolved.
    pub fn unresolved_delegated(&self) -> ConnectionSet {
        self.delegated.accumulated().subtract(&self.decided())
    }

    fn absorb(self, category: CategoryVerdict) -> Self {
        let decided = self.decided();
        let cat_allowed = category.allowed.without(&decided);
        let cat_denied = category.denied.without(&decided);
        let cat_jump = category.jump_to_app.without(&decided);
        let cat_undetermined = category.undetermined.without(&decided);

        let allowed = self.allowed.merged(&cat_allowed);
        let denied = self.denied.merged(&cat_denied);
        let delegated = self.delegated.merged(&cat_jump);
        let undetermined = self
            .undetermined
            .union(cat_undetermined.accumulated())
            .union(cat_jump.accumulated())
            .subtract(allowed.accumulated())
            .subtract(denied.accumulated());

        Self {
            allowed,
            denied,
            delegated,
            undetermined,
        }
    }
}

/// True when `side` of the flow `src -> dst` is not enforced: traffic leaving
/// an external source, or arriving at an external destination.
pub fn is_unenforced(src: &Endpoint, dst: &Endpoint, side: Side) -> bool {
    match side {
        Side::Egress => src.is_external(),
        Side::Ingress => dst.is_external(),
    }
}

/// Aggregates all supported categories of `policy` for `src -> dst` on `side`.
pub fn evaluate_side(
    policy: &FirewallPolicy,
    src: &Endpoint,
    dst: &Endpoint,
    side: Side,
    sink: &dyn DiagnosticsSink,
) -> SideVerdict {
    if is_unenforced(src, dst, side) {
        return SideVerdict::unenforced();
    }

    let categories: Vec<_> = policy
        .categories()
        .iter()
        .filter(|c| c.kind.is_supported())
        .collect();

    let mut verdict = SideVerdict::default();
    for (i, category) in categories.iter().enumerate() {
        if verdict.is_closed() {
            let skipped: Vec<_> = categories[i..]
                .iter()
                .filter(|c| c.effective_count(side) > 0)
                .collect();
            if !skipped.is_empty() {
                sink.report(Diagnostic::CategoriesSkipped {
                    src: src.name.clone(),
                    dst: dst.name.clone(),
                    side,
                    categories: skipped.iter().map(|c| c.kind).collect(),
                    rules: skipped.iter().map(|c| c.effective_count(side)).sum(),
                });
            }
            break;
        }
        verdict = verdict.absorb(evaluate_category(category, src, dst, side));
    }

    if !verdict.undetermined.is_empty() {
        sink.report(Diagnostic::ResidualUndetermined {
            src: src.name.clone(),
            dst: dst.name.clone(),
            side,
            conn: verdict.undetermined.clone(),
            external: src.is_external() || dst.is_external(),
        });
    }
    verdict
}
