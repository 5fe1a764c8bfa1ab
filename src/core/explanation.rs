//! Bidirectional verdicts and their explanations
//!
//! A flow is permitted only if both the egress side (at the source) and the
//! ingress side (at the destination) allow it. The [`Explanation`] keeps every
//! attribution of both sides, including deny and jump-to-application entries,
//! so callers can tell why traffic was blocked as well as why it passed.

use serde::Serialize;

use crate::core::accumulator::RuleAttribution;
use crate::core::aggregate::SideVerdict;
use crate::core::connection::ConnectionSet;
use crate::core::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::core::firewall::{Endpoint, RuleId, Side};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub ingress: Vec<RuleAttribution>,
    pub egress: Vec<RuleAttribution>,
    pub undetermined_ingress: ConnectionSet,
    pub undetermined_egress: ConnectionSet,
}

impl Explanation {
    pub fn attributions(&self, side: Side) -> &[RuleAttribution] {
        match side {
            Side::Ingress => &self.ingress,
            Side::Egress => &self.egress,
        }
    }

    /// Attributions intersecting `conn`, clipped to the intersection.
    pub fn filtered(&self, conn: &ConnectionSet) -> Explanation {
        let clip = |entries: &[RuleAttribution]| -> Vec<RuleAttribution> {
            entries
                .iter()
                .filter_map(|entry| {
                    let clipped = entry.conn.intersect(conn);
                    (!clipped.is_empty()).then(|| RuleAttribution {
                        conn: clipped,
                        ..entry.clone()
                    })
                })
                .collect()
        };
        Explanation {
            ingress: clip(&self.ingress),
            egress: clip(&self.egress),
            undetermined_ingress: self.undetermined_ingress.intersect(conn),
            undetermined_egress: self.undetermined_egress.intersect(conn),
        }
    }

    /// Ingress and egress rule ids, in attribution order without repeats.
    pub fn rule_ids(&self) -> (Vec<RuleId>, Vec<RuleId>) {
        (unique_ids(&self.ingress), unique_ids(&self.egress))
    }
}

fn unique_ids(entries: &[RuleAttribution]) -> Vec<RuleId> {
    let mut ids: Vec<RuleId> = Vec::with_capacity(entries.len());
    for entry in entries {
        if !ids.contains(&entry.rule_id) {
            ids.push(entry.rule_id);
        }
    }
    ids
}

/// Final verdict for an ordered `(src, dst)` pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetailedConnection {
    pub permitted: ConnectionSet,
    pub explanation: Explanation,
}

impl DetailedConnection {
    /// Combines the two sides of a flow.
    ///
    /// Empty attribution entries are dropped and reported; they carry no
    /// traffic, so the verdict is unaffected.
    pub fn combine(
        src: &Endpoint,
        dst: &Endpoint,
        ingress: SideVerdict,
        egress: SideVerdict,
        sink: &dyn DiagnosticsSink,
    ) -> Self {
        let permitted = ingress
            .allowed
            .accumulated()
            .intersect(egress.allowed.accumulated());

        let attributions = |verdict: &SideVerdict, side: Side| -> Vec<RuleAttribution> {
            verdict
                .allowed
                .partitions()
                .iter()
                .chain(verdict.denied.partitions())
                .chain(verdict.delegated.partitions())
                .filter(|entry| {
                    if entry.conn.is_empty() {
                        sink.report(Diagnostic::MalformedAttribution {
                            src: src.name.clone(),
                            dst: dst.name.clone(),
                            side,
                            rule_id: entry.rule_id,
                        });
                        false
                    } else {
                        true
                    }
                })
                .cloned()
                .collect()
        };

        let explanation = Explanation {
            ingress: attributions(&ingress, Side::Ingress),
            egress: attributions(&egress, Side::Egress),
            undetermined_ingress: ingress.undetermined,
            undetermined_egress: egress.undetermined,
        };

        Self {
            permitted,
            explanation,
        }
    }

    /// Splits the attributed traffic into pairwise-disjoint pieces, each
    /// either inside or outside every attribution, and returns
    /// `(allowed, denied)` pieces with the attributions that contain them.
    pub fn disjoint_explanations(&self) -> (Vec<DetailedConnection>, Vec<DetailedConnection>) {
        let mut pieces: Vec<ConnectionSet> = Vec::new();
        for entry in self.explanation.egress.iter().chain(&self.explanation.ingress) {
            let covered = ConnectionSet::union_all(&pieces);
            let mut refined: Vec<ConnectionSet> = Vec::with_capacity(pieces.len() + 1);
            for piece in &pieces {
                let inside = piece.intersect(&entry.conn);
                let outside = piece.subtract(&entry.conn);
                refined.extend([inside, outside].into_iter().filter(|c| !c.is_empty()));
            }
            let fresh = entry.conn.subtract(&covered);
            if !fresh.is_empty() {
                refined.push(fresh);
            }
            pieces = refined;
        }

        let containing = |entries: &[RuleAttribution], piece: &ConnectionSet| {
            entries
                .iter()
                .filter(|entry| piece.is_subset(&entry.conn))
                .cloned()
                .collect::<Vec<_>>()
        };

        let (allowed, denied): (Vec<_>, Vec<_>) = pieces
            .into_iter()
            .map(|piece| DetailedConnection {
                explanation: Explanation {
                    ingress: containing(&self.explanation.ingress, &piece),
                    egress: containing(&self.explanation.egress, &piece),
                    ..Explanation::default()
                },
                permitted: piece,
            })
            .partition(|d| d.permitted.is_subset(&self.permitted));
        (allowed, denied)
    }
}
