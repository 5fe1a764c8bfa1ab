//! Integration tests for dfw-analyzer
//!
//! These tests load policy documents from disk and run the full pipeline:
//! validation, connectivity map, explanations, lint and report rendering.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use dfw_analyzer::core::connection::{ConnectionSet, PortRange};
use dfw_analyzer::core::diagnostics::{CollectingSink, Diagnostic};
use dfw_analyzer::core::document::{Model, load_policy};
use dfw_analyzer::core::firewall::{CategoryKind, Direction};
use dfw_analyzer::report::{self, NO_REDUNDANT_RULES, OutputFormat};
use dfw_analyzer::{Analyzer, Error};

fn smb() -> ConnectionSet {
    ConnectionSet::tcp(PortRange::single(445))
}

/// Writes `json` to a temp dir and loads it.
async fn load(json: &str) -> Model {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    tokio::fs::write(&path, json).await.unwrap();
    load_policy(&path).await.unwrap()
}

const ALLOW_SMB: &str = r#"{
    "endpoints": [{ "name": "A" }, { "name": "B" }],
    "categories": [{
        "category": "Application",
        "rules": [
            { "id": 1004, "name": "smb", "action": "ALLOW",
              "source": ["A"], "destination": ["B"], "services": ["tcp/445"] },
            { "id": 1000000, "name": "default", "action": "DROP" }
        ]
    }]
}"#;

#[tokio::test]
async fn test_allow_with_default_deny() {
    let model = load(ALLOW_SMB).await;
    let sink = CollectingSink::new();
    let map = Analyzer::with_sink(&model.policy, &sink)
        .build_connectivity_map(&model.endpoints, None);

    assert_eq!(map.lookup("A", "B").unwrap().permitted, smb());
    assert!(map.lookup("B", "A").unwrap().permitted.is_empty());
    assert!(sink.is_empty());

    let explanation = map.explain("A", "B", &smb()).unwrap();
    assert!(explanation.is_allowed);
    assert_eq!(explanation.ingress_rule_ids, vec![1004]);
    assert_eq!(explanation.egress_rule_ids, vec![1004]);

    let udp = ConnectionSet::udp(PortRange::single(53));
    let denied = map.explain("A", "B", &udp).unwrap();
    assert!(!denied.is_allowed);
    assert_eq!(denied.ingress_rule_ids, vec![1_000_000]);
}

#[tokio::test]
async fn test_jump_to_application_delegation() {
    let model = load(
        r#"{
        "endpoints": [{ "name": "G" }, { "name": "H" }],
        "categories": [
            { "category": "Environment",
              "rules": [{ "id": 1, "action": "JUMP_TO_APPLICATION", "source": ["G"] }] },
            { "category": "Application",
              "rules": [{ "id": 2, "action": "DENY", "source": ["G"], "destination": ["H"] }] }
        ]
    }"#,
    )
    .await;
    let sink = CollectingSink::new();
    let map = Analyzer::with_sink(&model.policy, &sink)
        .build_connectivity_map(&model.endpoints, None);

    let g_to_h = map.lookup("G", "H").unwrap();
    assert!(g_to_h.permitted.is_empty());
    for ids in [g_to_h.explanation.rule_ids().0, g_to_h.explanation.rule_ids().1] {
        assert!(ids.contains(&1), "jump rule missing from {:?}", ids);
        assert!(ids.contains(&2), "deny rule missing from {:?}", ids);
    }
}

const DUPLICATE_SMB: &str = r#"{
    "endpoints": [{ "name": "A" }, { "name": "B" }],
    "categories": [{
        "category": "Application",
        "rules": [
            { "id": 1, "action": "ALLOW", "source": ["A"], "destination": ["B"],
              "services": ["tcp/445"] },
            { "id": 2, "action": "ALLOW", "source": ["A"], "destination": ["B"],
              "services": ["tcp/445"], "direction": "DIRECTION" },
            { "id": 3, "action": "DROP" }
        ]
    }]
}"#;

#[tokio::test]
async fn test_duplicate_rule_reported_with_direction() {
    for (direction, expected) in [("IN_OUT", Direction::InOut), ("IN", Direction::In)] {
        let model = load(&DUPLICATE_SMB.replace("DIRECTION", direction)).await;
        let report = Analyzer::new(&model.policy).lint(&model.endpoints);

        assert_eq!(report.redundant.len(), 1, "direction {}", direction);
        let row = &report.redundant[0];
        assert_eq!(row.rule_id, 2);
        assert_eq!(row.category, CategoryKind::Application);
        assert_eq!(row.direction, expected);
        assert_eq!(row.shadowing, vec![1]);

        let text = report::render_lint(&report, OutputFormat::Text).unwrap();
        assert!(text.contains(&format!("| {}", direction)));
    }
}

#[tokio::test]
async fn test_clean_policy_lint() {
    let model = load(ALLOW_SMB).await;
    let report = Analyzer::new(&model.policy).lint(&model.endpoints);
    assert!(report.is_clean());
    assert_eq!(
        report::render_lint(&report, OutputFormat::Text).unwrap(),
        format!("{}\n", NO_REDUNDANT_RULES)
    );
}

#[tokio::test]
async fn test_map_is_idempotent() {
    let model = load(
        r#"{
        "endpoints": [
            { "name": "web" }, { "name": "app" }, { "name": "db" },
            { "name": "internet", "kind": "external", "address": "0.0.0.0/0" }
        ],
        "groups": [{ "name": "tier", "members": ["web", "app"] }],
        "categories": [
            { "category": "Emergency",
              "rules": [{ "id": 5, "action": "DROP",
                          "source": ["internet"], "destination": ["db"] }] },
            { "category": "Application",
              "rules": [
                { "id": 10, "action": "ALLOW", "source": ["internet"], "destination": ["web"],
                  "services": ["tcp/80", "tcp/443"] },
                { "id": 20, "action": "ALLOW", "source": ["tier"], "destination": ["db"],
                  "services": ["tcp/5432"] },
                { "id": 30, "action": "ALLOW", "source": ["ANY"], "destination": ["ANY"],
                  "services": ["icmp/8"], "scope": ["tier"] },
                { "id": 1000, "action": "DROP" }
              ] }
        ]
    }"#,
    )
    .await;

    let analyzer = Analyzer::new(&model.policy);
    let first = analyzer.build_connectivity_map(&model.endpoints, None);
    let second = analyzer.build_connectivity_map(&model.endpoints, None);
    assert_eq!(first, second);
    assert_eq!(first.fingerprint(), second.fingerprint());

    // Rule 30 is scoped to the tier, so its ICMP reaches web but not db.
    let web_inbound = ConnectionSet::tcp(PortRange::single(80))
        .union(&ConnectionSet::tcp(PortRange::single(443)))
        .union(&ConnectionSet::icmp(8, None));
    assert_eq!(first.lookup("internet", "web").unwrap().permitted, web_inbound);
    assert!(first.lookup("internet", "db").unwrap().permitted.is_empty());
    assert_eq!(
        first.lookup("app", "db").unwrap().permitted,
        ConnectionSet::tcp(PortRange::single(5432))
    );
    assert_eq!(
        first.lookup("web", "app").unwrap().permitted,
        ConnectionSet::icmp(8, None)
    );
    // Egress from the external block is unenforced and attributed to no rule.
    assert!(first.lookup("internet", "web").unwrap().explanation.egress.is_empty());
}

#[tokio::test]
async fn test_external_pairs_without_decision_are_omitted() {
    let model = load(
        r#"{
        "endpoints": [
            { "name": "vm" },
            { "name": "net-a", "kind": "external", "address": "198.51.100.0/24" },
            { "name": "net-b", "kind": "external", "address": "203.0.113.0/24" }
        ],
        "categories": [{ "category": "Application",
            "rules": [{ "id": 1, "action": "ALLOW", "source": ["vm"], "destination": ["net-a"],
                        "services": ["udp/53"] }] }]
    }"#,
    )
    .await;
    let sink = CollectingSink::new();
    let map = Analyzer::with_sink(&model.policy, &sink)
        .build_connectivity_map(&model.endpoints, None);

    assert_eq!(
        map.lookup("vm", "net-a").unwrap().permitted,
        ConnectionSet::udp(PortRange::single(53))
    );
    assert!(map.lookup("vm", "net-b").is_none());
    assert!(map.lookup("net-a", "net-b").is_none());
    assert!(sink
        .diagnostics()
        .iter()
        .all(|d| matches!(d, Diagnostic::ResidualUndetermined { external: true, .. })));
}

#[tokio::test]
async fn test_filter_and_reports() {
    let model = load(ALLOW_SMB).await;
    let analyzer = Analyzer::new(&model.policy);
    let names = vec!["A".to_string(), "B".to_string()];
    let map = analyzer.build_connectivity_map(&model.endpoints, Some(names.as_slice()));

    let text = report::render_edges(&map, OutputFormat::Text, false, false).unwrap();
    assert_eq!(text, "A => B : TCP 445\n");
    assert!(report::render_explanations(&map).contains("allowed TCP 445"));

    let unused = map.unused_rules(&model.policy.all_rule_ids());
    assert!(unused.is_empty());
    assert_eq!(
        report::render_unused(&unused, OutputFormat::Text).unwrap(),
        "All rules are used.\n"
    );

    assert!(matches!(
        model.check_names(&["A", "nope"]),
        Err(Error::UnknownEndpoint(name)) if name == "nope"
    ));
}

#[tokio::test]
async fn test_invalid_documents_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cases = [
        (
            "unknown-endpoint.json",
            r#"{ "endpoints": [{ "name": "A" }],
                 "categories": [{ "category": "Application",
                    "rules": [{ "id": 1, "action": "ALLOW", "destination": ["Z"] }] }] }"#,
        ),
        (
            "bad-port.json",
            r#"{ "endpoints": [{ "name": "A" }],
                 "categories": [{ "category": "Application",
                    "rules": [{ "id": 1, "action": "ALLOW", "services": ["tcp/80-20"] }] }] }"#,
        ),
        ("not-json.json", "{ endpoints: "),
    ];

    for (file, json) in cases {
        let path = dir.path().join(file);
        tokio::fs::write(&path, json).await.unwrap();
        let result = load_policy(&path).await;
        assert!(result.is_err(), "{} should fail to load", file);
        let translation = result.unwrap_err().translate();
        assert!(!translation.user_message.is_empty());
    }
}
