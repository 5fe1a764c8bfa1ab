//! Text and JSON rendering of analysis results
//!
//! Every renderer returns a `String`; printing is left to the binary. Text
//! output is column-aligned and stable across runs. JSON output wraps the
//! payload in an envelope with a generation timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::core::connection::ConnectionSet;
use crate::core::connectivity::{ConnectionExplanation, ConnectivityMap, Edge};
use crate::core::explanation::DetailedConnection;
use crate::core::error::Result;
use crate::core::firewall::{CategoryKind, FirewallPolicy, RuleId, Side};
use crate::core::lint::LintReport;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub const NO_REDUNDANT_RULES: &str = "No redundant DFW rules found.";

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    payload: T,
}

fn to_json<T: Serialize>(payload: T) -> Result<String> {
    Ok(serde_json::to_string_pretty(&Envelope {
        generated_at: Utc::now(),
        payload,
    })?)
}

fn join_ids(ids: &[RuleId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Column-aligned table with a dashed rule under the header.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        padded.join(" | ").trim_end().to_string()
    };

    let mut out = String::new();
    out.push_str(&line(headers.to_vec()));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

#[derive(Serialize)]
struct ExplainedPiece {
    connection: ConnectionSet,
    ingress_rule_ids: Vec<RuleId>,
    egress_rule_ids: Vec<RuleId>,
}

#[derive(Serialize)]
struct PairExplanation<'a> {
    src: &'a str,
    dst: &'a str,
    allowed: Vec<ExplainedPiece>,
    denied: Vec<ExplainedPiece>,
}

fn pair_explanations(map: &ConnectivityMap) -> Vec<PairExplanation<'_>> {
    let pieces = |parts: Vec<DetailedConnection>| -> Vec<ExplainedPiece> {
        parts
            .into_iter()
            .map(|part| {
                let (ingress_rule_ids, egress_rule_ids) = part.explanation.rule_ids();
                ExplainedPiece {
                    connection: part.permitted,
                    ingress_rule_ids,
                    egress_rule_ids,
                }
            })
            .collect()
    };
    map.iter()
        .filter_map(|(src, dst, conn)| {
            let (allowed, denied) = conn.disjoint_explanations();
            (!allowed.is_empty() || !denied.is_empty()).then(|| PairExplanation {
                src: &src.name,
                dst: &dst.name,
                allowed: pieces(allowed),
                denied: pieces(denied),
            })
        })
        .collect()
}

#[derive(Serialize)]
struct EdgesPayload<'a> {
    fingerprint: String,
    edges: Vec<Edge<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    explanations: Vec<PairExplanation<'a>>,
}

/// Non-empty edges of the map, one `src => dst : connections` line each.
///
/// With `explain`, the allowed and denied parts of every pair follow, with
/// the rules responsible (an `explanations` array in JSON).
pub fn render_edges(
    map: &ConnectivityMap,
    format: OutputFormat,
    show_rule_ids: bool,
    explain: bool,
) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(EdgesPayload {
            fingerprint: map.fingerprint(),
            edges: map
                .to_edge_list()
                .into_iter()
                .filter(|edge| !edge.conn.is_empty())
                .collect(),
            explanations: if explain { pair_explanations(map) } else { Vec::new() },
        }),
        OutputFormat::Text => {
            let mut out = String::new();
            for (src, dst, conn) in map.iter().filter(|(_, _, c)| !c.permitted.is_empty()) {
                let _ = write!(out, "{src} => {dst} : {}", conn.permitted);
                if show_rule_ids {
                    let (ingress, egress) = conn.explanation.filtered(&conn.permitted).rule_ids();
                    let _ = write!(
                        out,
                        "  [ingress: {}; egress: {}]",
                        join_ids(&ingress),
                        join_ids(&egress)
                    );
                }
                out.push('\n');
            }
            if explain {
                out.push('\n');
                out.push_str(&render_explanations(map));
            }
            Ok(out)
        }
    }
}

/// Allowed and denied parts of every pair with the rules responsible.
pub fn render_explanations(map: &ConnectivityMap) -> String {
    let mut out = String::new();
    for pair in pair_explanations(map) {
        let _ = writeln!(out, "{} => {}:", pair.src, pair.dst);
        for (verdict, pieces) in [("allowed", pair.allowed), ("denied", pair.denied)] {
            for piece in pieces {
                let _ = writeln!(
                    out,
                    "  {verdict} {} (ingress rules: {}; egress rules: {})",
                    piece.connection,
                    join_ids(&piece.ingress_rule_ids),
                    join_ids(&piece.egress_rule_ids)
                );
            }
        }
    }
    out
}

#[derive(Serialize)]
struct QueryPayload<'a> {
    src: &'a str,
    dst: &'a str,
    connection: &'a ConnectionSet,
    #[serde(flatten)]
    explanation: &'a ConnectionExplanation,
}

/// Answer to a single `src → dst` connection query.
pub fn render_query(
    src: &str,
    dst: &str,
    query: &ConnectionSet,
    explanation: &ConnectionExplanation,
    format: OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(QueryPayload {
            src,
            dst,
            connection: query,
            explanation,
        }),
        OutputFormat::Text => {
            let verdict = if explanation.is_allowed { "allowed" } else { "denied" };
            Ok(format!(
                "{src} => {dst} ({query}): {verdict}\n  ingress rules: {}\n  egress rules: {}\n",
                join_ids(&explanation.ingress_rule_ids),
                join_ids(&explanation.egress_rule_ids)
            ))
        }
    }
}

/// Redundancy table followed by the ineffective-rule table.
pub fn render_lint(report: &LintReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return to_json(report);
    }

    let mut out = String::new();
    if report.redundant.is_empty() {
        out.push_str(NO_REDUNDANT_RULES);
        out.push('\n');
    } else {
        let rows: Vec<Vec<String>> = report
            .redundant
            .iter()
            .map(|r| {
                vec![
                    r.rule_id.to_string(),
                    r.category.to_string(),
                    r.direction.to_string(),
                    join_ids(&r.shadowing),
                ]
            })
            .collect();
        out.push_str(&table(
            &[
                "Potential shadowed DFW rule ID",
                "DFW Category",
                "Direction",
                "Shadowing rules IDs",
            ],
            &rows,
        ));
    }

    if !report.ineffective.is_empty() {
        out.push('\n');
        let rows: Vec<Vec<String>> = report
            .ineffective
            .iter()
            .map(|r| vec![r.rule_id.to_string(), r.reasons.join("; ")])
            .collect();
        out.push_str(&table(&["Ineffective DFW rule ID", "Description"], &rows));
    }
    Ok(out)
}

#[derive(Serialize)]
struct UnusedPayload<'a> {
    unused_rules: &'a [RuleId],
}

pub fn render_unused(ids: &[RuleId], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(UnusedPayload { unused_rules: ids }),
        OutputFormat::Text if ids.is_empty() => Ok("All rules are used.\n".to_string()),
        OutputFormat::Text => Ok(format!("Unused DFW rule IDs: {}\n", join_ids(ids))),
    }
}

#[derive(Serialize)]
struct EffectiveRules {
    category: CategoryKind,
    side: Side,
    rule_ids: Vec<RuleId>,
}

#[derive(Serialize)]
struct RulesPayload {
    effective_rules: Vec<EffectiveRules>,
}

/// Effective inbound and outbound rules of each non-empty category.
pub fn render_rules(policy: &FirewallPolicy, format: OutputFormat) -> Result<String> {
    let groups: Vec<EffectiveRules> = policy
        .categories()
        .iter()
        .filter(|c| c.kind.is_supported())
        .flat_map(|category| {
            [Side::Ingress, Side::Egress].map(|side| EffectiveRules {
                category: category.kind,
                side,
                rule_ids: category.effective_rules(side).map(|r| r.id).collect(),
            })
        })
        .filter(|g| !g.rule_ids.is_empty())
        .collect();

    if format == OutputFormat::Json {
        return to_json(RulesPayload {
            effective_rules: groups,
        });
    }

    let mut out = String::new();
    for group in &groups {
        let label = match group.side {
            Side::Ingress => "inbound",
            Side::Egress => "outbound",
        };
        let _ = writeln!(
            out,
            "{} {} ({} rule(s)):",
            group.category,
            label,
            group.rule_ids.len()
        );
        for id in &group.rule_ids {
            if let Some(rule) = policy.rule(*id) {
                let _ = writeln!(out, "  {rule}");
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analyzer::Analyzer;
    use crate::core::connection::PortRange;
    use crate::core::diagnostics::NullSink;
    use crate::core::firewall::{Action, Direction, Endpoint, IneffectiveRule, Rule, RuleEndpoints};
    use crate::core::lint::RedundantRule;

    fn smb() -> ConnectionSet {
        ConnectionSet::tcp(PortRange::single(445))
    }

    fn sample() -> (FirewallPolicy, Vec<Endpoint>) {
        let policy = FirewallPolicy::with_rules([
            Rule::new(
                1004,
                Action::Allow,
                smb(),
                RuleEndpoints::of(["A"]),
                RuleEndpoints::of(["B"]),
            ),
            Rule::default_rule(1_000_000, Action::Deny),
        ])
        .unwrap();
        (policy, vec![Endpoint::vm("A"), Endpoint::vm("B")])
    }

    #[test]
    fn test_edges_text_lists_nonempty_edges_only() {
        let (policy, endpoints) = sample();
        let sink = NullSink;
        let map = Analyzer::with_sink(&policy, &sink).build_connectivity_map(&endpoints, None);

        let text = render_edges(&map, OutputFormat::Text, false, false).unwrap();
        assert_eq!(text, "A => B : TCP 445\n");

        let with_ids = render_edges(&map, OutputFormat::Text, true, false).unwrap();
        assert_eq!(with_ids, "A => B : TCP 445  [ingress: 1004; egress: 1004]\n");
    }

    #[test]
    fn test_edges_json_has_envelope() {
        let (policy, endpoints) = sample();
        let sink = NullSink;
        let map = Analyzer::with_sink(&policy, &sink).build_connectivity_map(&endpoints, None);

        let json = render_edges(&map, OutputFormat::Json, false, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["generated_at"].is_string());
        assert_eq!(value["fingerprint"], map.fingerprint());
        assert_eq!(value["edges"].as_array().unwrap().len(), 1);
        assert_eq!(value["edges"][0]["conn"], "TCP 445");
        assert!(value.get("explanations").is_none());

        let explained = render_edges(&map, OutputFormat::Json, false, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&explained).unwrap();
        let pairs = value["explanations"].as_array().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0]["src"], "A");
        assert_eq!(pairs[0]["allowed"][0]["connection"], "TCP 445");
        assert_eq!(pairs[0]["allowed"][0]["ingress_rule_ids"][0], 1004);
        assert!(pairs[1]["allowed"].as_array().unwrap().is_empty());
        assert_eq!(pairs[1]["denied"][0]["egress_rule_ids"][0], 1_000_000);
    }

    #[test]
    fn test_explanations_split_allowed_and_denied() {
        let (policy, endpoints) = sample();
        let sink = NullSink;
        let map = Analyzer::with_sink(&policy, &sink).build_connectivity_map(&endpoints, None);

        let text = render_explanations(&map);
        assert!(
            text.contains("A => B:\n  allowed TCP 445 (ingress rules: 1004; egress rules: 1004)")
        );
        assert!(text.contains(
            "B => A:\n  denied All Connections (ingress rules: 1000000; egress rules: 1000000)"
        ));

        let analysis = render_edges(&map, OutputFormat::Text, false, true).unwrap();
        assert_eq!(analysis, format!("A => B : TCP 445\n\n{text}"));
    }

    #[test]
    fn test_query_text() {
        let explanation = ConnectionExplanation {
            is_allowed: false,
            ingress_rule_ids: vec![1000000],
            egress_rule_ids: vec![],
        };
        let text = render_query("B", "A", &smb(), &explanation, OutputFormat::Text).unwrap();
        assert_eq!(
            text,
            "B => A (TCP 445): denied\n  ingress rules: 1000000\n  egress rules: \n"
        );
    }

    #[test]
    fn test_lint_empty_and_tables() {
        let empty = render_lint(&LintReport::default(), OutputFormat::Text).unwrap();
        assert_eq!(empty, format!("{NO_REDUNDANT_RULES}\n"));

        let report = LintReport {
            redundant: vec![RedundantRule {
                rule_id: 3,
                category: CategoryKind::Application,
                direction: Direction::InOut,
                shadowing: vec![1, 2],
            }],
            ineffective: vec![IneffectiveRule {
                rule_id: 9,
                category: CategoryKind::Application,
                reasons: vec!["scope resolves to no endpoints".to_string()],
            }],
        };
        let text = render_lint(&report, OutputFormat::Text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("Potential shadowed DFW rule ID | DFW Category | Direction"));
        assert!(lines[2].starts_with("3 "));
        assert!(lines[2].contains("| Application  | IN_OUT    | 1, 2"));
        assert!(text.contains("Ineffective DFW rule ID | Description"));
        assert!(text.contains("9                       | scope resolves to no endpoints"));
    }

    #[test]
    fn test_unused_and_rules() {
        assert_eq!(
            render_unused(&[3, 7], OutputFormat::Text).unwrap(),
            "Unused DFW rule IDs: 3, 7\n"
        );
        assert_eq!(
            render_unused(&[], OutputFormat::Text).unwrap(),
            "All rules are used.\n"
        );

        let (policy, _) = sample();
        let text = render_rules(&policy, OutputFormat::Text).unwrap();
        assert!(text.starts_with("Application inbound (2 rule(s)):\n  rule 1004 (ALLOW)"));
        assert!(text.contains("Application outbound (2 rule(s)):"));
    }
}
