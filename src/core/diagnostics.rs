//! Non-fatal conditions raised while evaluating a policy
//!
//! The engine never logs directly. It hands [`Diagnostic`] values to an
//! injected [`DiagnosticsSink`]; the binary uses [`TracingSink`], tests use
//! [`CollectingSink`] to assert on what was reported.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, warn};

use crate::core::connection::ConnectionSet;
use crate::core::firewall::{CategoryKind, RuleId, Side};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// No category decided some traffic for the pair (no default rule)
    ResidualUndetermined {
        src: String,
        dst: String,
        side: Side,
        conn: ConnectionSet,
        /// Either endpoint is an external block
        external: bool,
    },
    /// Everything was decided before the listed categories were reached
    CategoriesSkipped {
        src: String,
        dst: String,
        side: Side,
        categories: Vec<CategoryKind>,
        rules: usize,
    },
    /// An attribution entry carried no connections and was dropped
    MalformedAttribution {
        src: String,
        dst: String,
        side: Side,
        rule_id: RuleId,
    },
    /// A rule can never match any endpoint pair
    IneffectiveRule {
        rule_id: RuleId,
        category: CategoryKind,
        reason: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ResidualUndetermined {
                src,
                dst,
                side,
                conn,
                ..
            } => write!(
                f,
                "no default rule: {side} traffic {src} -> {dst} left undecided: {conn}"
            ),
            Diagnostic::CategoriesSkipped {
                src,
                dst,
                side,
                categories,
                rules,
            } => {
                let names: Vec<String> = categories.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "{side} {src} -> {dst}: all traffic decided, skipped {rules} rule(s) in {}",
                    names.join(", ")
                )
            }
            Diagnostic::MalformedAttribution {
                src,
                dst,
                side,
                rule_id,
            } => write!(
                f,
                "dropped empty {side} attribution for rule {rule_id} on {src} -> {dst}"
            ),
            Diagnostic::IneffectiveRule {
                rule_id,
                category,
                reason,
            } => write!(f, "rule {rule_id} in category {category} is ineffective: {reason}"),
        }
    }
}

/// Receiver for engine diagnostics. Shared across evaluation threads.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::ResidualUndetermined { external: false, .. } => warn!("{diagnostic}"),
            Diagnostic::MalformedAttribution { .. } => error!("{diagnostic}"),
            Diagnostic::ResidualUndetermined { external: true, .. }
            | Diagnostic::CategoriesSkipped { .. }
            | Diagnostic::IneffectiveRule { .. } => debug!("{diagnostic}"),
        }
    }
}

/// Stores every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticsSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}

/// Discards every diagnostic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn report(&self, _diagnostic: Diagnostic) {}
}
