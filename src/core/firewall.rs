//! Distributed-firewall rule model
//!
//! This module defines the resolved, read-only model the evaluation engine
//! works on:
//!
//! - [`Endpoint`]: a VM or an external IP block
//! - [`RuleEndpoints`]: resolved source/destination/scope membership, with an
//!   "all endpoints" flag and exclude semantics
//! - [`Rule`]: id, action, direction, connection set and endpoint selectors
//! - [`Category`]: a priority band of rules, split into inbound-effective and
//!   outbound-effective lists
//! - [`FirewallPolicy`]: all categories in fixed priority order
//!
//! Rule ids are unique across the policy; inside a category, lower ids are
//! evaluated first.
//!
//! # Limits
//!
//! Policies are limited to [`MAX_RULES`] rules.
//!
//! # Example
//!
//! ```
//! use dfw_analyzer::core::connection::{ConnectionSet, PortRange};
//! use dfw_analyzer::core::firewall::{
//!     Action, CategoryKind, Endpoint, FirewallPolicy, Rule, RuleEndpoints, Side,
//! };
//!
//! let a = Endpoint::vm("A");
//! let b = Endpoint::vm("B");
//!
//! let mut policy = FirewallPolicy::new();
//! policy
//!     .add_rule(Rule::new(
//!         1004,
//!         Action::Allow,
//!         ConnectionSet::tcp(PortRange::single(445)),
//!         RuleEndpoints::of(["A"]),
//!         RuleEndpoints::of(["B"]),
//!     ))
//!     .unwrap();
//!
//! let rule = policy.rule(1004).unwrap();
//! assert_eq!(rule.category, CategoryKind::Application);
//! assert!(rule.captures(&a, &b, Side::Ingress));
//! assert!(!rule.captures(&b, &a, Side::Ingress));
//! ```

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use strum::IntoEnumIterator;

use crate::core::connection::ConnectionSet;
use crate::core::error::{Error, Result};

/// Maximum number of rules allowed in a single policy
pub const MAX_RULES: usize = 10_000;

/// Rule identifier; unique across the policy, ascending = evaluated first
pub type RuleId = i64;

/// Endpoint kind tag
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum EndpointKind {
    /// Virtual machine protected by the distributed firewall
    #[default]
    #[strum(serialize = "vm")]
    Vm,
    /// IP block outside the distributed firewall
    #[strum(serialize = "external")]
    External,
}

/// A VM or an external IP block
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub kind: EndpointKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<IpNetwork>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Endpoint {
    /// Creates a VM endpoint whose id equals its name.
    pub fn vm(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            kind: EndpointKind::Vm,
            address: None,
            tags: Vec::new(),
        }
    }

    /// Creates an external endpoint covering `address`.
    pub fn external(name: impl Into<String>, address: IpNetwork) -> Self {
        Self {
            kind: EndpointKind::External,
            address: Some(address),
            ..Self::vm(name)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_external(&self) -> bool {
        self.kind == EndpointKind::External
    }
}

// Endpoints sort by display name so maps and reports come out in name order.
impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.id == other.id
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.name, &self.id).cmp(&(&other.name, &other.id))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Resolved applicability of a rule's source, destination or scope.
///
/// Membership is by endpoint id. With `exclude` set, the rule applies to
/// the complement of the selected endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleEndpoints {
    pub members: BTreeSet<String>,
    /// Group display names the members were resolved from
    pub groups: Vec<String>,
    pub any: bool,
    pub exclude: bool,
}

impl RuleEndpoints {
    /// Selector matching every endpoint
    pub fn any() -> Self {
        Self {
            any: true,
            ..Self::default()
        }
    }

    /// Selector matching the given endpoint ids
    pub fn of<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Inverts the selector.
    pub fn excluded(mut self) -> Self {
        self.exclude = true;
        self
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        (self.any || self.members.contains(&endpoint.id)) != self.exclude
    }

    /// True for a plain `ANY` selector.
    pub fn is_unrestricted(&self) -> bool {
        self.any && !self.exclude
    }

    /// Concrete endpoints of `universe` matched by this selector, in
    /// universe order.
    pub fn resolve<'u>(&self, universe: &'u [Endpoint]) -> Vec<&'u Endpoint> {
        universe.iter().filter(|ep| self.contains(ep)).collect()
    }
}

impl fmt::Display for RuleEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exclude {
            write!(f, "NOT ")?;
        }
        if self.any {
            write!(f, "ANY")
        } else if !self.groups.is_empty() {
            write!(f, "{}", self.groups.join(","))
        } else {
            let members: Vec<&str> = self.members.iter().map(String::as_str).collect();
            write!(f, "{}", members.join(","))
        }
    }
}

/// Rule verdict
///
/// Drop and reject both mean deny for reachability purposes.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Action {
    #[serde(rename = "ALLOW")]
    #[strum(to_string = "ALLOW")]
    Allow,
    #[serde(rename = "DENY", alias = "DROP", alias = "REJECT")]
    #[strum(to_string = "DENY", serialize = "DROP", serialize = "REJECT")]
    Deny,
    /// Defers the verdict to the Application category
    #[serde(rename = "JUMP_TO_APPLICATION")]
    #[strum(to_string = "JUMP_TO_APPLICATION")]
    JumpToApp,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::JumpToApp => "jump_to_application",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Action::Allow => "Allow",
            Action::Deny => "Deny",
            Action::JumpToApp => "Jump to Application",
        }
    }
}

/// Declared rule direction
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum Direction {
    #[strum(serialize = "IN")]
    In,
    #[strum(serialize = "OUT")]
    Out,
    #[default]
    #[strum(serialize = "IN_OUT")]
    InOut,
}

impl Direction {
    pub const fn applies_to(self, side: Side) -> bool {
        match (self, side) {
            (Direction::InOut, _) => true,
            (Direction::In, Side::Ingress) | (Direction::Out, Side::Egress) => true,
            (Direction::In, Side::Egress) | (Direction::Out, Side::Ingress) => false,
        }
    }
}

/// Evaluation side of a flow: ingress at the destination, egress at the source
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[strum(serialize = "ingress")]
    Ingress,
    #[strum(serialize = "egress")]
    Egress,
}

impl Side {
    /// Single-direction [`Direction`] matching this side
    pub const fn direction(self) -> Direction {
        match self {
            Side::Ingress => Direction::In,
            Side::Egress => Direction::Out,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Side::Ingress => "ingress",
            Side::Egress => "egress",
        }
    }
}

/// Rule category; declaration order is evaluation priority
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum CategoryKind {
    /// Layer-2 rules; not modelled
    Ethernet,
    Emergency,
    Infrastructure,
    Environment,
    #[default]
    Application,
}

impl CategoryKind {
    pub const fn is_supported(self) -> bool {
        !matches!(self, CategoryKind::Ethernet)
    }

    pub const fn rank(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub action: Action,
    pub direction: Direction,
    pub conn: ConnectionSet,
    pub src: RuleEndpoints,
    pub dst: RuleEndpoints,
    pub scope: RuleEndpoints,
    /// Security policy the rule was declared in
    pub policy_name: String,
    pub category: CategoryKind,
}

impl Rule {
    /// Creates an IN_OUT Application-category rule with unrestricted scope.
    pub fn new(
        id: RuleId,
        action: Action,
        conn: ConnectionSet,
        src: RuleEndpoints,
        dst: RuleEndpoints,
    ) -> Self {
        Self {
            id,
            name: String::new(),
            action,
            direction: Direction::InOut,
            conn,
            src,
            dst,
            scope: RuleEndpoints::any(),
            policy_name: String::new(),
            category: CategoryKind::Application,
        }
    }

    /// ANY → ANY catch-all rule over every connection.
    pub fn default_rule(id: RuleId, action: Action) -> Self {
        Self::new(
            id,
            action,
            ConnectionSet::all(),
            RuleEndpoints::any(),
            RuleEndpoints::any(),
        )
        .with_name("Default Layer3 Rule")
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_scope(mut self, scope: RuleEndpoints) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_policy_name(mut self, policy_name: impl Into<String>) -> Self {
        self.policy_name = policy_name.into();
        self
    }

    pub fn in_category(mut self, category: CategoryKind) -> Self {
        self.category = category;
        self
    }

    /// True when the rule matches `(src, dst)` on the given side.
    ///
    /// The scope narrows the destination on ingress and the source on egress.
    pub fn captures(&self, src: &Endpoint, dst: &Endpoint, side: Side) -> bool {
        let scoped = match side {
            Side::Ingress => dst,
            Side::Egress => src,
        };
        self.direction.applies_to(side)
            && self.src.contains(src)
            && self.dst.contains(dst)
            && self.scope.contains(scoped)
    }

    /// Catch-all rule: ANY → ANY, every connection, both directions.
    pub fn is_default(&self) -> bool {
        self.src.is_unrestricted()
            && self.dst.is_unrestricted()
            && self.scope.is_unrestricted()
            && self.direction == Direction::InOut
            && self.conn.is_all()
    }

    /// Source and destination endpoints the rule applies to on `side`, with
    /// the scope folded in.
    pub fn effective_endpoints<'u>(
        &self,
        side: Side,
        universe: &'u [Endpoint],
    ) -> (Vec<&'u Endpoint>, Vec<&'u Endpoint>) {
        if !self.direction.applies_to(side) {
            return (Vec::new(), Vec::new());
        }
        let (src, dst): (Vec<_>, Vec<_>) = match side {
            Side::Ingress => (
                self.src.resolve(universe),
                universe
                    .iter()
                    .filter(|ep| self.dst.contains(ep) && self.scope.contains(ep))
                    .collect(),
            ),
            Side::Egress => (
                universe
                    .iter()
                    .filter(|ep| self.src.contains(ep) && self.scope.contains(ep))
                    .collect(),
                self.dst.resolve(universe),
            ),
        };
        (src, dst)
    }

    /// Reasons this rule can never match anything in `universe`. Empty when
    /// every declared direction has an effective component.
    pub fn ineffective_reasons(&self, universe: &[Endpoint]) -> Vec<String> {
        if self.conn.is_empty() {
            return vec!["services resolve to no connections".to_string()];
        }
        if self.scope.resolve(universe).is_empty() {
            return vec!["scope resolves to no endpoints".to_string()];
        }

        let src_empty = self.src.resolve(universe).is_empty();
        let dst_empty = self.dst.resolve(universe).is_empty();
        let mut reasons = Vec::new();
        for side in Side::iter().filter(|s| self.direction.applies_to(*s)) {
            let label = match side {
                Side::Ingress => "inbound",
                Side::Egress => "outbound",
            };
            let (scoped_name, scoped_empty, other_name, other_empty) = match side {
                Side::Ingress => ("destination", dst_empty, "source", src_empty),
                Side::Egress => ("source", src_empty, "destination", dst_empty),
            };
            if scoped_empty {
                reasons.push(format!("{label}: {scoped_name} resolves to no endpoints"));
            } else if other_empty {
                reasons.push(format!("{label}: {other_name} resolves to no endpoints"));
            } else {
                let (src, dst) = self.effective_endpoints(side, universe);
                if src.is_empty() || dst.is_empty() {
                    reasons.push(format!("{label}: {scoped_name} and scope do not intersect"));
                }
            }
        }
        reasons
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule {} ({}): {} -> {} [{}] {} {}",
            self.id, self.action, self.src, self.dst, self.conn, self.direction, self.scope
        )
    }
}

/// One priority band of rules
#[derive(Debug, Clone)]
pub struct Category {
    pub kind: CategoryKind,
    rules: Vec<Rule>,
    inbound: Vec<usize>,
    outbound: Vec<usize>,
}

impl Category {
    pub fn new(kind: CategoryKind) -> Self {
        Self {
            kind,
            rules: Vec::new(),
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    /// All declared rules, ascending id.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules evaluated on `side`, ascending id.
    ///
    /// Ethernet rules and rules with an empty connection set are never
    /// evaluated.
    pub fn effective_rules(&self, side: Side) -> impl Iterator<Item = &Rule> + '_ {
        let indices = match side {
            Side::Ingress => &self.inbound,
            Side::Egress => &self.outbound,
        };
        indices.iter().map(|&i| &self.rules[i])
    }

    pub fn effective_count(&self, side: Side) -> usize {
        match side {
            Side::Ingress => self.inbound.len(),
            Side::Egress => self.outbound.len(),
        }
    }

    pub fn has_default_rule(&self) -> bool {
        self.rules.iter().any(Rule::is_default)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn insert(&mut self, rule: Rule) {
        let pos = self.rules.partition_point(|r| r.id < rule.id);
        self.rules.insert(pos, rule);
        self.reindex();
    }

    fn reindex(&mut self) {
        let evaluated = |side: Side| -> Vec<usize> {
            if !self.kind.is_supported() {
                return Vec::new();
            }
            self.rules
                .iter()
                .enumerate()
                .filter(|(_, r)| r.direction.applies_to(side) && !r.conn.is_empty())
                .map(|(i, _)| i)
                .collect()
        };
        let inbound = evaluated(Side::Ingress);
        let outbound = evaluated(Side::Egress);
        self.inbound = inbound;
        self.outbound = outbound;
    }
}

/// A rule that can never match, with the reasons why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IneffectiveRule {
    pub rule_id: RuleId,
    pub category: CategoryKind,
    pub reasons: Vec<String>,
}

/// The distributed firewall: every category in priority order
#[derive(Debug, Clone)]
pub struct FirewallPolicy {
    categories: Vec<Category>,
    ids: BTreeSet<RuleId>,
}

impl Default for FirewallPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl FirewallPolicy {
    pub fn new() -> Self {
        Self {
            categories: CategoryKind::iter().map(Category::new).collect(),
            ids: BTreeSet::new(),
        }
    }

    /// Builds a policy from rules in any order.
    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Result<Self> {
        let mut policy = Self::new();
        for rule in rules {
            policy.add_rule(rule)?;
        }
        Ok(policy)
    }

    /// Adds a rule to its category.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the id is already taken or the policy is full.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        if self.ids.len() >= MAX_RULES {
            return Err(Error::validation(
                "rules",
                format!("too many rules (max {MAX_RULES})"),
            ));
        }
        if !self.ids.insert(rule.id) {
            return Err(Error::DuplicateRuleId(rule.id));
        }
        let kind = rule.category;
        self.category_mut(kind).insert(rule);
        Ok(())
    }

    /// Categories in evaluation order.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, kind: CategoryKind) -> &Category {
        &self.categories[usize::from(kind.rank())]
    }

    fn category_mut(&mut self, kind: CategoryKind) -> &mut Category {
        &mut self.categories[usize::from(kind.rank())]
    }

    /// Every rule, in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.categories.iter().flat_map(|c| c.rules.iter())
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules().find(|r| r.id == id)
    }

    pub fn rule_count(&self) -> usize {
        self.ids.len()
    }

    /// All rule ids, ascending.
    pub fn all_rule_ids(&self) -> Vec<RuleId> {
        self.ids.iter().copied().collect()
    }

    pub fn effective_rule_count(&self, side: Side) -> usize {
        self.categories.iter().map(|c| c.effective_count(side)).sum()
    }

    /// Rules that resolve to nothing over `universe`, in evaluation order.
    pub fn ineffective_rules(&self, universe: &[Endpoint]) -> Vec<IneffectiveRule> {
        self.categories
            .iter()
            .filter(|c| c.kind.is_supported())
            .flat_map(|c| c.rules.iter())
            .filter_map(|rule| {
                let reasons = rule.ineffective_reasons(universe);
                (!reasons.is_empty()).then(|| IneffectiveRule {
                    rule_id: rule.id,
                    category: rule.category,
                    reasons,
                })
            })
            .collect()
    }
}
