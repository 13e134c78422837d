#![allow(missing_docs)]

use std::sync::{Arc, Once};

use qplan::query::ast::{AstNode, AstNodeType};
use qplan::query::node::ModificationOptions;
use qplan::query::{
    AccessMode, AstBuilder, ExecutionPlan, InMemoryCatalog, NodeKind, NodeType, PlanError,
    Planner, PlannerConfig,
};
use qplan::types::NodeId;

static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn planner() -> Planner {
    init_tracing();
    let catalog = InMemoryCatalog::new()
        .with_collection("users", 1)
        .with_collection("orders", 2)
        .with_read_only_collection("audit", 3);
    Planner::new(PlannerConfig::default(), Arc::new(catalog))
}

fn types_in_id_order(plan: &ExecutionPlan) -> Vec<NodeType> {
    plan.node_ids()
        .into_iter()
        .map(|id| plan.get_node(id).expect("node").node_type())
        .collect()
}

fn kind(plan: &ExecutionPlan, id: u64) -> &NodeKind {
    plan.get_node(NodeId(id)).expect("node").kind()
}

#[test]
fn for_filter_return_numbers_nodes_in_creation_order() {
    let mut builder = AstBuilder::new();
    let u = builder.declare("u");
    builder
        .body()
        .for_collection(&u, "users")
        .filter(AstNode::binary(
            AstNodeType::BinaryGt,
            AstNode::attribute(AstNode::reference(&u), "age"),
            AstNode::value(30_i64),
        ))
        .return_(AstNode::reference(&u));
    let mut ast = builder.build().expect("ast");
    let plan = planner().plan(&mut ast).expect("plan");

    assert_eq!(
        types_in_id_order(&plan),
        vec![
            NodeType::Singleton,
            NodeType::EnumerateCollection,
            NodeType::Calculation,
            NodeType::Filter,
            NodeType::Return,
        ]
    );
    assert_eq!(plan.root(), Some(NodeId(5)));
    for id in 2..=5 {
        assert_eq!(
            plan.get_node(NodeId(id)).expect("node").dependencies(),
            [NodeId(id - 1)]
        );
    }
    // The filter reads the hoisted temporary, the return reads `u` directly.
    let NodeKind::Calculation { out_variable, .. } = kind(&plan, 3) else {
        panic!("expected calculation");
    };
    assert!(!out_variable.is_user_defined());
    assert_eq!(
        kind(&plan, 4),
        &NodeKind::Filter {
            in_variable: out_variable.clone()
        }
    );
    assert_eq!(kind(&plan, 5), &NodeKind::Return { in_variable: u });
    assert_eq!(plan.collections().get("users"), Some(AccessMode::Read));
    assert!(plan.var_usage_computed());
}

#[test]
fn collect_lowers_to_stable_sort_then_aggregate() {
    let mut builder = AstBuilder::new();
    let u = builder.declare("u");
    let city = builder.declare("city");
    let groups = builder.declare("groups");
    builder
        .body()
        .for_collection(&u, "users")
        .collect(
            [(&city, AstNode::attribute(AstNode::reference(&u), "city"))],
            Some(&groups),
        )
        .return_(AstNode::reference(&city));
    let mut ast = builder.build().expect("ast");
    let plan = planner().plan(&mut ast).expect("plan");

    assert_eq!(
        types_in_id_order(&plan),
        vec![
            NodeType::Singleton,
            NodeType::EnumerateCollection,
            NodeType::Calculation,
            NodeType::Sort,
            NodeType::Aggregate,
            NodeType::Return,
        ]
    );
    let NodeKind::Calculation {
        out_variable: key, ..
    } = kind(&plan, 3)
    else {
        panic!("expected calculation");
    };
    let NodeKind::Sort { elements, stable } = kind(&plan, 4) else {
        panic!("expected sort");
    };
    assert!(*stable);
    assert_eq!(elements.len(), 1);
    assert_eq!(&elements[0].variable, key);
    assert!(elements[0].ascending);

    let NodeKind::Aggregate {
        aggregates,
        out_variable,
        keep_variables,
    } = kind(&plan, 5)
    else {
        panic!("expected aggregate");
    };
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].out_variable, city);
    assert_eq!(&aggregates[0].in_variable, key);
    assert_eq!(out_variable.as_ref(), Some(&groups));
    // Temporaries are never kept.
    assert_eq!(keep_variables, &vec![u, city, groups]);
}

#[test]
fn collect_without_into_keeps_nothing() {
    let mut builder = AstBuilder::new();
    let u = builder.declare("u");
    let city = builder.declare("city");
    builder
        .body()
        .for_collection(&u, "users")
        .collect([(&city, AstNode::attribute(AstNode::reference(&u), "city"))], None)
        .return_(AstNode::reference(&city));
    let mut ast = builder.build().expect("ast");
    let plan = planner().plan(&mut ast).expect("plan");
    let aggregate = plan
        .find_nodes_of_type(NodeType::Aggregate, false)
        .expect("search");
    assert_eq!(aggregate.len(), 1);
    let NodeKind::Aggregate {
        out_variable,
        keep_variables,
        ..
    } = plan.get_node(aggregate[0]).expect("node").kind()
    else {
        panic!("expected aggregate");
    };
    assert!(out_variable.is_none());
    assert!(keep_variables.is_empty());
}

#[test]
fn let_subquery_is_lowered_into_the_same_registry() {
    let mut builder = AstBuilder::new();
    let x = builder.declare("x");
    let sub = builder.declare("sub");
    builder
        .body()
        .let_subquery(&sub, |q| {
            q.for_in(
                &x,
                AstNode::list(vec![AstNode::value(1_i64), AstNode::value(2_i64)]),
            )
            .return_(AstNode::reference(&x));
        })
        .return_(AstNode::reference(&sub));
    let mut ast = builder.build().expect("ast");
    let plan = planner().plan(&mut ast).expect("plan");

    assert_eq!(plan.len(), 7);
    assert_eq!(plan.root(), Some(NodeId(7)));
    let NodeKind::Subquery {
        subquery,
        out_variable,
    } = kind(&plan, 6)
    else {
        panic!("expected subquery");
    };
    assert_eq!(*subquery, NodeId(5));
    assert_eq!(out_variable, &sub);
    assert_eq!(
        plan.get_node(NodeId(6)).expect("node").dependencies(),
        [NodeId(1)]
    );
    // The nested plan has its own singleton and no parent at its root.
    assert_eq!(kind(&plan, 2), &NodeKind::Singleton);
    assert_eq!(plan.get_node(NodeId(5)).expect("node").parent(), None);

    let outer = plan.find_nodes_of_type(NodeType::Return, false).expect("outer");
    let all = plan.find_nodes_of_type(NodeType::Return, true).expect("all");
    assert_eq!(outer, vec![NodeId(7)]);
    assert_eq!(all.len(), 2);
    assert_eq!(plan.var_set_by(x.id), Some(NodeId(4)));
}

#[test]
fn update_hoists_key_before_document() {
    let mut builder = AstBuilder::new();
    let u = builder.declare("u");
    builder.body().for_collection(&u, "users").update(
        AstNode::object([("done", AstNode::value(true))]),
        Some(AstNode::attribute(AstNode::reference(&u), "_key")),
        "users",
        Some(AstNode::object([
            ("ignoreErrors", AstNode::value(true)),
            ("keepNull", AstNode::value(false)),
        ])),
    );
    let mut ast = builder.build().expect("ast");
    let plan = planner().plan(&mut ast).expect("plan");

    let NodeKind::Calculation {
        expression: key_expr,
        out_variable: key_var,
    } = kind(&plan, 3)
    else {
        panic!("expected key calculation");
    };
    assert_eq!(key_expr.to_string(), "u._key");
    let NodeKind::Calculation {
        out_variable: doc_var,
        ..
    } = kind(&plan, 4)
    else {
        panic!("expected document calculation");
    };
    assert_eq!(
        kind(&plan, 5),
        &NodeKind::Update {
            collection: "users".into(),
            options: ModificationOptions {
                wait_for_sync: false,
                ignore_errors: true,
                null_means_remove: true,
            },
            in_doc_variable: doc_var.clone(),
            in_key_variable: Some(key_var.clone()),
        }
    );
    assert_eq!(plan.collections().get("users"), Some(AccessMode::Write));
}

#[test]
fn writes_to_read_only_collection_are_rejected() {
    let mut builder = AstBuilder::new();
    let u = builder.declare("u");
    builder
        .body()
        .for_collection(&u, "users")
        .insert(AstNode::reference(&u), "audit", None);
    let mut ast = builder.build().expect("ast");
    let err = planner().plan(&mut ast).unwrap_err();
    assert_eq!(
        err,
        PlanError::ReadOnlyCollection {
            name: "audit".into(),
            context: "InsertNode",
        }
    );
    assert!(err.to_string().contains("read-only"));
    assert!(!err.is_unresolved_reference());
}

#[test]
fn nop_statements_are_skipped_and_limit_is_kept() {
    let mut builder = AstBuilder::new();
    let o = builder.declare("o");
    builder
        .body()
        .nop()
        .for_collection(&o, "orders")
        .nop()
        .limit(7, 10)
        .return_(AstNode::reference(&o));
    let mut ast = builder.build().expect("ast");
    let plan = planner().plan(&mut ast).expect("plan");
    assert_eq!(plan.len(), 4);
    assert_eq!(
        kind(&plan, 3),
        &NodeKind::Limit {
            offset: 7,
            limit: 10
        }
    );
    assert_eq!(
        plan.show().expect("show"),
        "SingletonNode\nEnumerateCollectionNode\nLimitNode\nReturnNode\n"
    );
}

#[test]
fn sort_keeps_direction_and_hoists_each_key() {
    let mut builder = AstBuilder::new();
    let u = builder.declare("u");
    builder
        .body()
        .for_collection(&u, "users")
        .sort([
            (AstNode::attribute(AstNode::reference(&u), "age"), false),
            (AstNode::reference(&u), true),
        ])
        .return_(AstNode::reference(&u));
    let mut ast = builder.build().expect("ast");
    let plan = planner().plan(&mut ast).expect("plan");
    let NodeKind::Sort { elements, stable } = kind(&plan, 4) else {
        panic!("expected sort");
    };
    assert!(!*stable);
    assert_eq!(elements.len(), 2);
    assert!(!elements[0].ascending);
    assert!(elements[1].ascending);
    assert_eq!(elements[1].variable, u);
}
