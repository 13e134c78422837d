#![allow(missing_docs)]

use std::sync::Arc;

use qplan::query::ast::{AstNode, AstNodeType};
use qplan::query::{
    AccessMode, AstBuilder, ExecutionPlan, ExportOptions, InMemoryCatalog, PlanDocument,
    PlanError, Planner, PlannerConfig,
};
use qplan::types::{NodeId, VariableId};
use serde_json::{json, Value};

fn sample_plan() -> ExecutionPlan {
    let catalog = InMemoryCatalog::new()
        .with_collection("users", 1)
        .with_collection("archive", 2);
    let mut builder = AstBuilder::new();
    let u = builder.declare("u");
    let friends = builder.declare("friends");
    let f = builder.declare("f");
    builder
        .body()
        .for_collection(&u, "users")
        .filter(AstNode::binary(
            AstNodeType::BinaryGe,
            AstNode::attribute(AstNode::reference(&u), "age"),
            AstNode::value(18_i64),
        ))
        .let_subquery(&friends, |q| {
            q.for_in(&f, AstNode::attribute(AstNode::reference(&u), "friends"))
                .limit(0, 3)
                .return_(AstNode::reference(&f));
        })
        .insert(
            AstNode::object([("user", AstNode::reference(&u))]),
            "archive",
            Some(AstNode::object([("waitForSync", AstNode::value(true))])),
        );
    let mut ast = builder.build().expect("ast");
    Planner::new(PlannerConfig::default(), Arc::new(catalog))
        .plan(&mut ast)
        .expect("plan")
}

#[test]
fn export_lists_records_dependencies_first_with_nested_subquery() {
    let plan = sample_plan();
    let json = plan.to_json(&ExportOptions::default()).expect("export");
    let nodes = json["nodes"].as_array().expect("nodes");
    let types: Vec<&str> = nodes
        .iter()
        .map(|n| n["type"].as_str().expect("type"))
        .collect();
    assert_eq!(
        types,
        vec![
            "SingletonNode",
            "EnumerateCollectionNode",
            "CalculationNode",
            "FilterNode",
            "SubqueryNode",
            "CalculationNode",
            "InsertNode",
        ]
    );
    let root = nodes.last().expect("root");
    assert_eq!(root["id"].as_u64(), plan.root().map(|id| id.0));
    assert_eq!(root["options"]["waitForSync"], true);

    let subquery = &nodes[4];
    let nested: Vec<&str> = subquery["subquery"]["nodes"]
        .as_array()
        .expect("nested")
        .iter()
        .map(|n| n["type"].as_str().expect("type"))
        .collect();
    assert_eq!(
        nested,
        vec![
            "SingletonNode",
            "CalculationNode",
            "EnumerateListNode",
            "LimitNode",
            "ReturnNode",
        ]
    );
    assert!(nodes[0].get("varsValid").is_none());
    assert_eq!(
        json["collections"],
        json!([
            { "name": "archive", "type": "write" },
            { "name": "users", "type": "read" }
        ])
    );
}

#[test]
fn import_restores_an_isomorphic_plan() {
    let plan = sample_plan();
    let exported = plan.to_document(&ExportOptions::default()).expect("export");
    let text = serde_json::to_string(&exported).expect("encode");
    let value: Value = serde_json::from_str(&text).expect("decode");

    let imported = ExecutionPlan::from_json(&value).expect("import");
    assert_eq!(imported.node_ids(), plan.node_ids());
    assert_eq!(imported.root(), plan.root());
    assert_eq!(imported.collections().get("archive"), Some(AccessMode::Write));
    assert!(imported.var_usage_computed());
    assert!(imported.check_linkage().is_empty());
    assert_eq!(imported.show().expect("show"), plan.show().expect("show"));

    let again = imported
        .to_document(&ExportOptions::default())
        .expect("export again");
    assert_eq!(again, exported);
}

#[test]
fn verbose_export_carries_liveness_sets() {
    let plan = sample_plan();
    let verbose = plan
        .to_json(&ExportOptions { verbose: true })
        .expect("export");
    let root = verbose["nodes"]
        .as_array()
        .and_then(|nodes| nodes.last())
        .expect("root");
    assert_eq!(root["varsUsedLater"], json!([]));
    let valid: Vec<&str> = root["varsValid"]
        .as_array()
        .expect("valid")
        .iter()
        .map(|v| v["name"].as_str().expect("name"))
        .collect();
    assert!(valid.contains(&"u"));
    assert!(valid.contains(&"friends"));
    assert!(!valid.contains(&"f"));

    // Verbose fields are ignored on the way back in.
    let imported = ExecutionPlan::from_json(&verbose).expect("import");
    assert_eq!(imported.len(), plan.len());
}

#[test]
fn import_does_not_resolve_against_a_catalog() {
    let doc: PlanDocument = serde_json::from_value(json!({
        "nodes": [
            { "id": 1, "type": "SingletonNode" },
            { "id": 2, "type": "EnumerateCollectionNode", "dependencies": [1],
              "collection": "ghosts", "outVariable": { "id": 0, "name": "g" } },
            { "id": 3, "type": "ReturnNode", "dependencies": [2],
              "inVariable": { "id": 0, "name": "g" } }
        ],
        "collections": [ { "name": "ghosts", "type": "read" } ]
    }))
    .expect("document");
    let plan = ExecutionPlan::from_document(doc).expect("import");
    assert_eq!(plan.root(), Some(NodeId(3)));
    assert_eq!(plan.var_set_by(VariableId(0)), Some(NodeId(2)));
}

#[test]
fn import_rejects_disconnected_and_shared_nodes() {
    let disconnected = json!({ "nodes": [
        { "id": 1, "type": "SingletonNode" },
        { "id": 2, "type": "SingletonNode" },
        { "id": 3, "type": "LimitNode", "offset": 0, "limit": 1, "dependencies": [2] }
    ] });
    match ExecutionPlan::from_json(&disconnected) {
        Err(PlanError::Malformed { reason }) => assert!(reason.contains("not connected")),
        other => panic!("expected malformed, got {other:?}"),
    }

    let shared = json!({ "nodes": [
        { "id": 1, "type": "SingletonNode" },
        { "id": 2, "type": "LimitNode", "offset": 0, "limit": 1, "dependencies": [1] },
        { "id": 3, "type": "LimitNode", "offset": 0, "limit": 2, "dependencies": [1, 2] }
    ] });
    assert_eq!(
        ExecutionPlan::from_json(&shared).unwrap_err().code(),
        "Structural"
    );
}

#[test]
fn explain_hash_ignores_ids_but_not_literals() {
    let plan = sample_plan();
    let explain = plan.explain().expect("explain").expect("root");
    let text = explain.render_text(false);
    assert!(text.starts_with("InsertNode #"));
    assert!(text.contains("LimitNode #"));
    assert!(text.contains("subquery:"));
    let redacted = explain.render_text(true);
    assert!(redacted.contains("offset=?"));
    assert!(!redacted.contains("u.age >= 18"));
    assert!(text.contains("u.age >= 18"));

    let imported = ExecutionPlan::from_json(&plan.to_json(&ExportOptions::default()).expect("json"))
        .expect("import");
    let again = imported.explain().expect("explain").expect("root");
    assert_eq!(again.plan_hash, explain.plan_hash);

    let empty = ExecutionPlan::new();
    assert!(empty.explain().expect("explain").is_none());
    assert_eq!(empty.show().expect("show"), "");
}

#[test]
fn import_rejects_writes_to_collections_declared_read() {
    let document = |mode: &str| {
        json!({
            "nodes": [
                { "id": 1, "type": "SingletonNode" },
                { "id": 2, "type": "EnumerateCollectionNode", "dependencies": [1],
                  "collection": "users", "outVariable": { "id": 0, "name": "u" } },
                { "id": 3, "type": "RemoveNode", "dependencies": [2], "collection": "users",
                  "options": {}, "inVariable": { "id": 0, "name": "u" } }
            ],
            "collections": [ { "name": "users", "type": mode } ]
        })
    };
    match ExecutionPlan::from_json(&document("read")) {
        Err(PlanError::Malformed { reason }) => {
            assert!(reason.contains("'users' declared as read"), "{reason}")
        }
        other => panic!("expected malformed, got {other:?}"),
    }

    let plan = ExecutionPlan::from_json(&document("write")).expect("import");
    assert_eq!(plan.collections().get("users"), Some(AccessMode::Write));
    let exported = plan.to_json(&ExportOptions::default()).expect("export");
    assert_eq!(
        exported["collections"],
        json!([{ "name": "users", "type": "write" }])
    );
}
