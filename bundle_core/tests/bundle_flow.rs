//! End-to-end exercise of the kernel: order a bundle, resolve its
//! expressions against observed status, and judge drift after an apply.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use api::v1alpha1::{ResourceSpec, ResourceState, ResourceStatus, status_map};
use bundle_core::compare::{CompareMode, equal};
use bundle_core::extract::ExtractOptions;
use bundle_core::order::execution_order;
use bundle_core::resolve::resolve_value;

fn spec_doc(spec: &BTreeMap<String, Value>) -> Value {
    spec.iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect::<Map<_, _>>()
        .into()
}

#[test]
fn order_resolve_compare_round_trip() {
    let db = ResourceSpec {
        id: "db".into(),
        kind: "Database".into(),
        spec: BTreeMap::from([
            ("engine".to_string(), json!("postgres")),
            ("storage".to_string(), json!(10)),
        ]),
        ..Default::default()
    };
    let app = ResourceSpec {
        id: "app".into(),
        kind: "AppServer".into(),
        spec: BTreeMap::from([
            (
                "name".to_string(),
                json!("app-of-${resources.db.status.externalID}"),
            ),
            ("dbId".to_string(), json!("${resources.db.status.externalID}")),
            ("replicas".to_string(), json!(2)),
        ]),
        ready_when: vec!["resources.app.status.ready".into()],
        ..Default::default()
    };

    // The app references the database, so the database goes first.
    let order = execution_order(
        &[app.clone(), db.clone()],
        &ExtractOptions::default(),
    )
    .unwrap();
    assert_eq!(order, vec!["db", "app"]);

    // The database settles; its status feeds the app's expressions.
    let statuses = status_map(&[ResourceStatus {
        id: "db".into(),
        kind: "Database".into(),
        name: "db".into(),
        namespace: "default".into(),
        state: ResourceState::Synced,
        external_id: Some("123".into()),
        message: "created".into(),
        ready: true,
        skipped: false,
        extra: BTreeMap::new(),
    }]);
    let resolved = resolve_value(&spec_doc(&app.spec), &statuses).unwrap();
    assert_eq!(resolved["name"], json!("app-of-123"));
    assert_eq!(resolved["dbId"], json!("123"));
    assert_eq!(resolved["replicas"], json!(2));

    // After the apply, the API hands back widened numbers and a re-encoded
    // timestamp; that is not drift.
    let observed = json!({
        "name": "app-of-123",
        "dbId": "123",
        "replicas": 2.0,
    });
    assert!(equal(&resolved, &observed, CompareMode::Strict));

    // A changed field is drift.
    let drifted = json!({
        "name": "app-of-456",
        "dbId": "123",
        "replicas": 2.0,
    });
    assert!(!equal(&resolved, &drifted, CompareMode::Strict));
}

#[test]
fn skipped_resources_still_project() {
    let statuses = status_map(&[ResourceStatus {
        id: "migration".into(),
        kind: "Job".into(),
        state: ResourceState::Skipped,
        skipped: true,
        ..Default::default()
    }]);
    let doc = json!({"ran": "${resources.migration.status.skipped}"});
    let resolved = resolve_value(&doc, &statuses).unwrap();
    assert_eq!(resolved, json!({"ran": true}));
}
