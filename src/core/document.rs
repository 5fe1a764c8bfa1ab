//! Policy documents
//!
//! A policy document is a JSON file listing endpoints, optional named groups
//! of endpoints, and rules per category. Loading validates every field and
//! resolves names into a [`Model`], the read-only input of the analyzer.
//!
//! ```json
//! {
//!   "endpoints": [
//!     { "name": "A" },
//!     { "name": "B", "tags": ["db"] },
//!     { "name": "internet", "kind": "external", "address": "0.0.0.0/0" }
//!   ],
//!   "groups": [{ "name": "servers", "members": ["A", "B"] }],
//!   "categories": [
//!     {
//!       "category": "Application",
//!       "rules": [
//!         { "id": 1004, "action": "ALLOW", "source": ["A"], "destination": ["B"],
//!           "services": ["tcp/445"] },
//!         { "id": 1000000, "action": "DROP" }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Omitted `source`, `destination`, `scope` and `services` mean `ANY`;
//! omitted `direction` means `IN_OUT`.

use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::core::connection::ConnectionSet;
use crate::core::error::{Error, Result};
use crate::core::firewall::{
    Action, CategoryKind, Direction, Endpoint, EndpointKind, FirewallPolicy, MAX_RULES, Rule,
    RuleEndpoints, RuleId,
};
use crate::validators;

const ANY: &str = "ANY";

fn any_list() -> Vec<String> {
    vec![ANY.to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kind: EndpointKind,
    #[serde(default)]
    pub address: Option<IpNetwork>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub id: RuleId,
    #[serde(default)]
    pub name: String,
    /// Security policy the rule belongs to
    #[serde(default)]
    pub policy: String,
    pub action: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default = "any_list")]
    pub services: Vec<String>,
    #[serde(default = "any_list")]
    pub source: Vec<String>,
    #[serde(default)]
    pub source_exclude: bool,
    #[serde(default = "any_list")]
    pub destination: Vec<String>,
    #[serde(default)]
    pub destination_exclude: bool,
    #[serde(default = "any_list")]
    pub scope: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategorySpec {
    pub category: CategoryKind,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    pub endpoints: Vec<EndpointSpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub categories: Vec<CategorySpec>,
}

/// Resolved analysis input
#[derive(Debug, Clone)]
pub struct Model {
    pub endpoints: Vec<Endpoint>,
    pub policy: FirewallPolicy,
}

impl Model {
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|ep| ep.name == name)
    }

    /// Checks that every name refers to an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEndpoint`] for the first unknown name.
    pub fn check_names<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        match names.iter().find(|n| self.endpoint(n.as_ref()).is_none()) {
            Some(unknown) => Err(Error::UnknownEndpoint(unknown.as_ref().to_string())),
            None => Ok(()),
        }
    }

    /// Validates the two ends of a single-flow query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEndpoint`] for an unknown name and a
    /// validation error when both ends are the same endpoint, since the
    /// distributed firewall never sees traffic from an endpoint to itself.
    pub fn check_pair(&self, src: &str, dst: &str) -> Result<()> {
        self.check_names(&[src, dst])?;
        if src == dst {
            return Err(Error::validation(
                "dst",
                format!("source and destination are both {src}"),
            ));
        }
        Ok(())
    }
}

/// Name → endpoint ids lookup shared by all rules of a document
struct NameIndex {
    endpoints: BTreeMap<String, String>,
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl NameIndex {
    fn selector(&self, names: &[String], exclude: bool, field: &str) -> Result<RuleEndpoints> {
        if names.is_empty() {
            return Err(Error::validation(field, "empty list (use ANY for all endpoints)"));
        }
        let selector = if names.iter().any(|n| n.eq_ignore_ascii_case(ANY)) {
            RuleEndpoints::any()
        } else {
            let mut members = BTreeSet::new();
            let mut groups = Vec::new();
            for name in names {
                if let Some(id) = self.endpoints.get(name) {
                    members.insert(id.clone());
                } else if let Some(group) = self.groups.get(name) {
                    members.extend(group.iter().cloned());
                    groups.push(name.clone());
                } else {
                    return Err(Error::UnknownEndpoint(name.clone()));
                }
            }
            RuleEndpoints {
                members,
                groups,
                ..RuleEndpoints::default()
            }
        };
        Ok(if exclude { selector.excluded() } else { selector })
    }
}

impl PolicyDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validates the document and resolves it into a [`Model`].
    ///
    /// # Errors
    ///
    /// Returns `Err` on invalid or duplicate names, unknown endpoint or group
    /// references, unparsable actions, directions or services, duplicate rule
    /// ids, or more than [`MAX_RULES`] rules.
    pub fn into_model(self) -> Result<Model> {
        let endpoints = Self::build_endpoints(self.endpoints)?;
        let index = Self::build_index(&endpoints, self.groups)?;

        let rule_count: usize = self.categories.iter().map(|c| c.rules.len()).sum();
        if rule_count > MAX_RULES {
            return Err(Error::validation(
                "categories",
                format!("{rule_count} rules (max {MAX_RULES})"),
            ));
        }

        let mut policy = FirewallPolicy::new();
        for category in self.categories {
            for spec in category.rules {
                policy.add_rule(Self::build_rule(spec, category.category, &index)?)?;
            }
        }

        tracing::info!(
            "Loaded policy with {} endpoint(s) and {} rule(s)",
            endpoints.len(),
            policy.rule_count()
        );
        Ok(Model { endpoints, policy })
    }

    fn build_endpoints(specs: Vec<EndpointSpec>) -> Result<Vec<Endpoint>> {
        let mut names = BTreeSet::new();
        let mut ids = BTreeSet::new();
        let mut endpoints = Vec::with_capacity(specs.len());

        for (i, spec) in specs.into_iter().enumerate() {
            let field = format!("endpoints[{i}]");
            let name = validators::validate_endpoint_name(&spec.name)
                .map_err(|e| Error::validation(format!("{field}.name"), e))?;
            let id = spec.id.map_or_else(|| name.clone(), |id| validators::sanitize_name(&id));
            if !names.insert(name.clone()) {
                return Err(Error::validation(field, format!("duplicate endpoint name '{name}'")));
            }
            if !ids.insert(id.clone()) {
                return Err(Error::validation(field, format!("duplicate endpoint id '{id}'")));
            }

            let endpoint = match (spec.kind, spec.address) {
                (EndpointKind::External, Some(address)) => {
                    if let Some(warning) = validators::check_reserved_ip(address) {
                        tracing::warn!("Endpoint '{}': {}", name, warning);
                    }
                    Endpoint::external(name, address)
                }
                (EndpointKind::External, None) => {
                    return Err(Error::validation(
                        format!("{field}.address"),
                        "external endpoints need a CIDR address",
                    ));
                }
                (EndpointKind::Vm, address) => Endpoint {
                    address,
                    ..Endpoint::vm(name)
                },
            };
            let tags = spec.tags.iter().map(|t| validators::sanitize_name(t)).collect();
            endpoints.push(endpoint.with_id(id).with_tags(tags));
        }
        Ok(endpoints)
    }

    fn build_index(endpoints: &[Endpoint], groups: Vec<GroupSpec>) -> Result<NameIndex> {
        let endpoint_ids: BTreeMap<String, String> = endpoints
            .iter()
            .map(|ep| (ep.name.clone(), ep.id.clone()))
            .collect();

        let mut group_members = BTreeMap::new();
        for (i, group) in groups.into_iter().enumerate() {
            let field = format!("groups[{i}]");
            let name = validators::validate_endpoint_name(&group.name)
                .map_err(|e| Error::validation(format!("{field}.name"), e))?;
            if endpoint_ids.contains_key(&name) || group_members.contains_key(&name) {
                return Err(Error::validation(field, format!("name '{name}' is already taken")));
            }
            let members = group
                .members
                .iter()
                .map(|member| {
                    endpoint_ids
                        .get(member)
                        .cloned()
                        .ok_or_else(|| Error::UnknownEndpoint(member.clone()))
                })
                .collect::<Result<BTreeSet<_>>>()?;
            group_members.insert(name, members);
        }

        Ok(NameIndex {
            endpoints: endpoint_ids,
            groups: group_members,
        })
    }

    fn build_rule(spec: RuleSpec, category: CategoryKind, index: &NameIndex) -> Result<Rule> {
        let field = format!("rule {}", spec.id);
        let id = validators::validate_rule_id(spec.id)
            .map_err(|e| Error::validation(format!("{field}.id"), e))?;
        let action: Action = spec.action.parse().map_err(|_| {
            Error::validation(
                format!("{field}.action"),
                format!("unknown action '{}'", spec.action),
            )
        })?;
        let direction = match &spec.direction {
            Some(d) => d.parse::<Direction>().map_err(|_| {
                Error::validation(format!("{field}.direction"), format!("unknown direction '{d}'"))
            })?,
            None => Direction::InOut,
        };
        let conn = spec
            .services
            .iter()
            .map(|s| s.parse::<ConnectionSet>())
            .try_fold(ConnectionSet::none(), |acc, conn| Ok::<_, Error>(acc.union(&conn?)))?;

        let src = index.selector(&spec.source, spec.source_exclude, &format!("{field}.source"))?;
        let dst = index.selector(
            &spec.destination,
            spec.destination_exclude,
            &format!("{field}.destination"),
        )?;
        let scope = index.selector(&spec.scope, false, &format!("{field}.scope"))?;

        Ok(Rule::new(id, action, conn, src, dst)
            .with_direction(direction)
            .with_scope(scope)
            .with_name(validators::sanitize_name(&spec.name))
            .with_policy_name(validators::sanitize_name(&spec.policy))
            .in_category(category))
    }
}

/// Loads and validates a policy document.
///
/// When a `<file>.sha256` sidecar exists, a mismatching digest is logged but
/// does not fail the load (the document may have been edited by hand).
///
/// # Async
/// Uses `tokio::fs` for non-blocking file I/O.
pub async fn load_policy(path: &Path) -> Result<Model> {
    let json = tokio::fs::read_to_string(path).await?;

    let mut checksum_path = path.as_os_str().to_owned();
    checksum_path.push(".sha256");
    if let Ok(expected) = tokio::fs::read_to_string(&checksum_path).await {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        let actual = format!("{:x}", hasher.finalize());

        if expected.trim() != actual {
            tracing::warn!(
                "Policy {:?} checksum mismatch (expected: {}, got: {})",
                path,
                expected.trim(),
                actual
            );
        }
    }

    PolicyDocument::from_json(&json)?.into_model()
}
