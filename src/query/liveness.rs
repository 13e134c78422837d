//! Variable usage analysis.
//!
//! One walk from the root toward the sources. Going down, each node is
//! stamped with the variables read further downstream and then adds its own
//! reads; coming back up, each node adds the variables it defines and is
//! stamped with everything bound so far. Both accumulators are threaded by
//! value, so a subquery receives copies on entry and nothing it computes can
//! leak back into the outer walk.

use std::collections::{HashMap, HashSet};

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::query::errors::Result;
use crate::query::node::{VarSet, VarUsage};
use crate::query::plan::ExecutionPlan;
use crate::types::{NodeId, VariableId};

#[derive(Default)]
struct Analysis {
    usage: HashMap<NodeId, VarUsage>,
    set_by: FxHashMap<VariableId, NodeId>,
    visited: HashSet<NodeId>,
}

/// Accumulators flowing through the walk.
struct Flow {
    used_later: VarSet,
    valid: VarSet,
}

/// Recomputes the liveness annotations of every node reachable from the root
/// and the plan-wide map from variable to defining node.
///
/// Nodes not reachable from the root lose their annotations.
pub fn find_var_usage(plan: &mut ExecutionPlan) -> Result<()> {
    let mut analysis = Analysis::default();
    if let Some(root) = plan.root() {
        let start = Flow {
            used_later: VarSet::new(),
            valid: VarSet::new(),
        };
        visit(plan, root, start, &mut analysis)?;
    }
    let stamped = analysis.usage.len();
    plan.install_var_usage(analysis.usage, analysis.set_by);
    debug!(nodes = stamped, "plan.liveness.computed");
    Ok(())
}

fn visit(plan: &ExecutionPlan, id: NodeId, flow: Flow, analysis: &mut Analysis) -> Result<Flow> {
    if !analysis.visited.insert(id) {
        return Ok(flow);
    }
    let node = plan.get_node(id)?;
    let Flow {
        mut used_later,
        valid,
    } = flow;

    let stamped_used_later = used_later.clone();
    used_later.extend(plan.variables_used_here(id)?);

    let mut flow = Flow { used_later, valid };
    for &dep in node.dependencies() {
        flow = visit(plan, dep, flow, analysis)?;
    }

    if let Some(sub_root) = node.kind().subquery() {
        let inner = Flow {
            used_later: VarSet::new(),
            valid: flow.valid.clone(),
        };
        visit(plan, sub_root, inner, analysis)?;
    }

    for var in node.kind().variables_set_here() {
        analysis.set_by.entry(var.id).or_insert(id);
        flow.valid.insert(var);
    }
    trace!(
        id = %id,
        used_later = stamped_used_later.len(),
        valid = flow.valid.len(),
        "plan.liveness.stamp"
    );
    analysis.usage.insert(
        id,
        VarUsage {
            used_later: stamped_used_later,
            valid: flow.valid.clone(),
        },
    );
    Ok(flow)
}
