//! Single-category evaluation for one endpoint pair and one side
//!
//! Rules are scanned in ascending id order. Each capturing rule may only
//! claim connections that no earlier rule with a *different* action already
//! claimed, which gives first-match-wins per elementary connection without
//! tracking a winner per connection.

use crate::core::accumulator::ConnectionsAndRules;
use crate::core::connection::ConnectionSet;
use crate::core::firewall::{Action, Category, Endpoint, Rule, Side};

/// Outcome of one category for one pair and side.
///
/// The four accumulated sets are pairwise disjoint and cover the universe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryVerdict {
    pub allowed: ConnectionsAndRules,
    pub jump_to_app: ConnectionsAndRules,
    pub denied: ConnectionsAndRules,
    pub undetermined: ConnectionsAndRules,
}

impl CategoryVerdict {
    fn apply(self, rule: &Rule) -> Self {
        let Self {
            allowed,
            jump_to_app,
            denied,
            undetermined,
        } = self;

        match rule.action {
            Action::Allow => {
                let added = rule
                    .conn
                    .subtract(denied.accumulated())
                    .subtract(jump_to_app.accumulated());
                Self {
                    allowed: allowed.with_rule(rule.id, rule.action, &added),
                    jump_to_app,
                    denied,
                    undetermined,
                }
            }
            Action::Deny => {
                let added = rule
                    .conn
                    .subtract(allowed.accumulated())
                    .subtract(jump_to_app.accumulated());
                Self {
                    denied: denied.with_rule(rule.id, rule.action, &added),
                    allowed,
                    jump_to_app,
                    undetermined,
                }
            }
            Action::JumpToApp => {
                let added = rule
                    .conn
                    .subtract(allowed.accumulated())
                    .subtract(denied.accumulated());
                Self {
                    jump_to_app: jump_to_app.with_rule(rule.id, rule.action, &added),
                    allowed,
                    denied,
                    undetermined,
                }
            }
        }
    }

    fn finish(self) -> Self {
        let rest = ConnectionSet::all()
            .subtract(self.allowed.accumulated())
            .subtract(self.denied.accumulated())
            .subtract(self.jump_to_app.accumulated());
        Self {
            undetermined: ConnectionsAndRules::unattributed(rest),
            ..self
        }
    }
}

/// Classifies all traffic from `src` to `dst` on `side` into the category's
/// allow, jump-to-application, deny and undetermined buckets.
pub fn evaluate_category(
    category: &Category,
    src: &Endpoint,
    dst: &Endpoint,
    side: Side,
) -> CategoryVerdict {
    category
        .effective_rules(side)
        .filter(|rule| rule.captures(src, dst, side))
        .fold(CategoryVerdict::default(), CategoryVerdict::apply)
        .finish()
}
