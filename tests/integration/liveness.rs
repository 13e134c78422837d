#![allow(missing_docs)]

use std::sync::Arc;

use qplan::query::ast::{AstNode, AstNodeType};
use qplan::query::{
    AstBuilder, ExecutionPlan, InMemoryCatalog, NodeKind, NodeType, Planner, PlannerConfig,
    VariableRef,
};
use qplan::types::NodeId;

fn names(vars: Option<&std::collections::BTreeSet<VariableRef>>) -> Vec<String> {
    vars.map(|set| set.iter().map(|v| v.name.clone()).collect())
        .unwrap_or_default()
}

fn build(config: PlannerConfig, body: impl FnOnce(&mut AstBuilder)) -> ExecutionPlan {
    let catalog = InMemoryCatalog::new().with_collection("users", 1);
    let mut builder = AstBuilder::new();
    body(&mut builder);
    let mut ast = builder.build().expect("ast");
    Planner::new(config, Arc::new(catalog))
        .plan(&mut ast)
        .expect("plan")
}

#[test]
fn planner_stamps_every_reachable_node() {
    let plan = build(PlannerConfig::default(), |b| {
        let u = b.declare("u");
        let name = b.declare("name");
        b.body()
            .for_collection(&u, "users")
            .let_(&name, AstNode::attribute(AstNode::reference(&u), "name"))
            .return_(AstNode::reference(&name));
    });
    assert!(plan.var_usage_computed());
    for id in plan.reachable(true).expect("walk") {
        assert!(plan.get_node(id).expect("node").var_usage_valid(), "{id}");
    }
    let node = |id: u64| plan.get_node(NodeId(id)).expect("node");
    // 1 singleton, 2 scan, 3 let, 4 return
    assert_eq!(names(node(1).vars_used_later()), vec!["u", "name"]);
    assert_eq!(names(node(2).vars_used_later()), vec!["u", "name"]);
    assert_eq!(names(node(3).vars_used_later()), vec!["name"]);
    assert!(names(node(4).vars_used_later()).is_empty());
    assert_eq!(names(node(4).vars_valid()), vec!["u", "name"]);
}

#[test]
fn planner_can_skip_liveness() {
    let config = PlannerConfig {
        compute_var_usage: false,
        ..PlannerConfig::default()
    };
    let mut plan = build(config, |b| {
        let u = b.declare("u");
        b.body()
            .for_collection(&u, "users")
            .return_(AstNode::reference(&u));
    });
    assert!(!plan.var_usage_computed());
    assert!(plan.get_node(NodeId(3)).expect("node").vars_valid().is_none());
    plan.find_var_usage().expect("liveness");
    assert!(plan.var_usage_computed());
}

#[test]
fn subquery_results_do_not_leak_outward() {
    let plan = build(PlannerConfig::default(), |b| {
        let u = b.declare("u");
        let inner = b.declare("inner");
        let sub = b.declare("sub");
        b.body()
            .for_collection(&u, "users")
            .let_subquery(&sub, |q| {
                q.for_in(&inner, AstNode::attribute(AstNode::reference(&u), "tags"))
                    .return_(AstNode::binary(
                        AstNodeType::BinaryPlus,
                        AstNode::reference(&inner),
                        AstNode::value(1_i64),
                    ));
            })
            .return_(AstNode::reference(&sub));
    });
    let subquery = plan
        .find_nodes_of_type(NodeType::Subquery, false)
        .expect("search")[0];
    let NodeKind::Subquery {
        subquery: sub_root, ..
    } = plan.get_node(subquery).expect("node").kind()
    else {
        panic!("expected subquery");
    };
    let root = plan.root().expect("root");

    let used: Vec<String> = plan
        .variables_used_here(subquery)
        .expect("used")
        .iter()
        .map(|v| v.name.clone())
        .collect();
    assert_eq!(used, vec!["u"]);

    let outer_valid = names(plan.get_node(root).expect("root").vars_valid());
    assert_eq!(outer_valid, vec!["u", "sub"]);
    let inner_valid = names(plan.get_node(*sub_root).expect("inner root").vars_valid());
    assert!(inner_valid.contains(&"u".to_string()));
    assert!(inner_valid.contains(&"inner".to_string()));
    assert!(!inner_valid.contains(&"sub".to_string()));
    // Nested nodes start from an empty downstream set.
    let inner_used_later = names(plan.get_node(*sub_root).expect("inner root").vars_used_later());
    assert!(inner_used_later.is_empty());
}

#[test]
fn replace_keeps_liveness_of_untouched_nodes() {
    let mut plan = build(PlannerConfig::default(), |b| {
        let u = b.declare("u");
        b.body()
            .for_collection(&u, "users")
            .limit(0, 10)
            .return_(AstNode::attribute(AstNode::reference(&u), "name"));
    });
    // 1 singleton, 2 scan, 3 limit, 4 calc, 5 return
    let snapshot = |plan: &ExecutionPlan, id: u64| {
        let node = plan.get_node(NodeId(id)).expect("node");
        (names(node.vars_used_later()), names(node.vars_valid()))
    };
    let before: Vec<_> = [1, 2, 4, 5].iter().map(|&id| snapshot(&plan, id)).collect();

    let fresh = plan
        .create_node(NodeKind::Limit {
            offset: 5,
            limit: 5,
        })
        .expect("fresh");
    plan.replace_node(NodeId(3), fresh).expect("replace");
    assert!(!plan.var_usage_computed());
    plan.find_var_usage().expect("liveness");

    let after: Vec<_> = [1, 2, 4, 5].iter().map(|&id| snapshot(&plan, id)).collect();
    assert_eq!(after, before);
    let replaced = plan.get_node(fresh).expect("fresh");
    assert_eq!(replaced.dependencies(), [NodeId(2)]);
    assert_eq!(replaced.parent(), Some(NodeId(4)));
    // The detached node is no longer stamped.
    assert!(!plan.get_node(NodeId(3)).expect("old").var_usage_valid());
}

#[test]
fn clone_is_isolated_from_the_original() {
    let plan = build(PlannerConfig::default(), |b| {
        let u = b.declare("u");
        b.body()
            .for_collection(&u, "users")
            .limit(0, 10)
            .return_(AstNode::reference(&u));
    });
    let mut copy = plan.clone_plan().expect("clone");
    assert_eq!(copy.node_ids(), plan.node_ids());
    assert_eq!(copy.root(), plan.root());
    assert_eq!(copy.last_id(), plan.last_id());
    assert_eq!(copy.collections(), plan.collections());
    assert!(!copy.var_usage_computed());

    // 1 singleton, 2 scan, 3 limit, 4 return
    copy.unlink_node(NodeId(3)).expect("unlink");
    copy.unregister_node(NodeId(3)).expect("unregister");
    let fresh = copy
        .create_node(NodeKind::Limit {
            offset: 1,
            limit: 1,
        })
        .expect("fresh");
    assert_eq!(fresh, NodeId(5));

    assert_eq!(plan.len(), 4);
    assert_eq!(
        plan.get_node(NodeId(4)).expect("return").dependencies(),
        [NodeId(3)]
    );
    assert_eq!(
        copy.get_node(NodeId(4)).expect("return").dependencies(),
        [NodeId(2)]
    );
    assert!(plan.var_usage_computed());
}

#[test]
fn clone_drops_unreachable_nodes() {
    let mut plan = ExecutionPlan::new();
    let singleton = plan.create_node(NodeKind::Singleton).expect("singleton");
    let stray = plan.create_node(NodeKind::Singleton).expect("stray");
    plan.set_root(singleton).expect("root");
    let copy = plan.clone_plan().expect("clone");
    assert!(copy.contains(singleton));
    assert!(!copy.contains(stray));
    assert_eq!(copy.last_id(), stray);
}
