//! Depth-first traversal of a plan from a sink toward its sources.
//!
//! Each node is visited once: `before` fires on the way down, then every
//! dependency subtree is walked in order, then the nested plan of a subquery
//! node (if the worker enters it), and finally `after` fires on the way back.

use std::collections::HashSet;

use crate::query::errors::Result;
use crate::query::node::ExecutionNode;
use crate::query::plan::ExecutionPlan;
use crate::types::NodeId;

/// Callbacks invoked by [`walk`].
pub trait PlanWalker {
    /// Called before the node's dependencies are visited. Returning `true`
    /// aborts the whole walk.
    fn before(&mut self, _node: &ExecutionNode) -> bool {
        false
    }

    /// Called once all dependencies and any nested plan have been visited.
    fn after(&mut self, _node: &ExecutionNode) {}

    /// Decides whether the nested plan below `owner` is walked.
    fn enter_subquery(&mut self, _owner: &ExecutionNode, _sub_root: NodeId) -> bool {
        true
    }

    /// Called after a nested plan entered through `enter_subquery` is done.
    fn leave_subquery(&mut self, _owner: &ExecutionNode, _sub_root: NodeId) {}
}

/// Walks the tree rooted at `start`. Returns `Ok(true)` if a worker aborted.
pub fn walk<W>(plan: &ExecutionPlan, start: NodeId, worker: &mut W) -> Result<bool>
where
    W: PlanWalker + ?Sized,
{
    let mut done = HashSet::new();
    walk_node(plan, start, worker, &mut done)
}

fn walk_node<W>(
    plan: &ExecutionPlan,
    id: NodeId,
    worker: &mut W,
    done: &mut HashSet<NodeId>,
) -> Result<bool>
where
    W: PlanWalker + ?Sized,
{
    if !done.insert(id) {
        return Ok(false);
    }
    let node = plan.get_node(id)?;
    if worker.before(node) {
        return Ok(true);
    }
    for &dep in node.dependencies() {
        if walk_node(plan, dep, worker, done)? {
            return Ok(true);
        }
    }
    if let Some(sub_root) = node.kind().subquery() {
        if worker.enter_subquery(node, sub_root) {
            let aborted = walk_node(plan, sub_root, worker, done)?;
            worker.leave_subquery(node, sub_root);
            if aborted {
                return Ok(true);
            }
        }
    }
    worker.after(node);
    Ok(false)
}

/// Collects node ids in the order `before` sees them.
#[derive(Default)]
pub(crate) struct PreOrder {
    pub(crate) ids: Vec<NodeId>,
    pub(crate) enter_subqueries: bool,
}

impl PlanWalker for PreOrder {
    fn before(&mut self, node: &ExecutionNode) -> bool {
        self.ids.push(node.id());
        false
    }

    fn enter_subquery(&mut self, _owner: &ExecutionNode, _sub_root: NodeId) -> bool {
        self.enter_subqueries
    }
}
