//! Execution plan: node registry, graph surgery, and cloning.
//!
//! Nodes live in a table keyed by [`NodeId`] and refer to each other by id.
//! Every edge change goes through the methods in this module, which validate
//! all preconditions before touching anything, so a failed call leaves the
//! graph exactly as it was. Any successful structural change clears the
//! liveness flag; callers recompute it with
//! [`ExecutionPlan::find_var_usage`] before trusting the annotations.

use std::collections::{HashMap, HashSet};
use std::fmt;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::query::errors::{PlanError, Result};
use crate::query::liveness;
use crate::query::metadata::UsedCollections;
use crate::query::node::{ExecutionNode, NodeKind, NodeType, VarSet, VarUsage};
use crate::query::variable::VariableRef;
use crate::query::walker::{self, PreOrder};
use crate::types::{NodeId, VariableId};

/// A compiled query pipeline and the sole owner of its nodes.
#[derive(Debug, Default)]
pub struct ExecutionPlan {
    nodes: FxHashMap<NodeId, ExecutionNode>,
    root: Option<NodeId>,
    next_id: u64,
    applied_rules: Vec<String>,
    var_set_by: FxHashMap<VariableId, NodeId>,
    var_usage_computed: bool,
    collections: UsedCollections,
    verify_linkage: bool,
}

/// Inconsistency reported by [`ExecutionPlan::check_linkage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkageViolation {
    /// `node` lists `dependency`, but `dependency` does not name `node` as parent.
    DependencyWithoutBackReference {
        /// Consuming node.
        node: NodeId,
        /// Listed dependency.
        dependency: NodeId,
    },
    /// `node` names `parent`, but `parent` does not list `node` as dependency.
    ParentWithoutDependency {
        /// Producing node.
        node: NodeId,
        /// Named parent.
        parent: NodeId,
    },
    /// `node` appears in the dependency lists of several nodes.
    MultipleParents {
        /// Shared node.
        node: NodeId,
        /// Every node listing it.
        claimed_by: Vec<NodeId>,
    },
    /// An edge points at an id missing from the registry.
    DanglingEdge {
        /// Node owning the edge.
        node: NodeId,
        /// Missing target.
        target: NodeId,
    },
}

impl fmt::Display for LinkageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkageViolation::DependencyWithoutBackReference { node, dependency } => write!(
                f,
                "dependency [{dependency}] of node [{node}] does not have it as a parent"
            ),
            LinkageViolation::ParentWithoutDependency { node, parent } => write!(
                f,
                "parent [{parent}] of node [{node}] does not have it as a dependency"
            ),
            LinkageViolation::MultipleParents { node, claimed_by } => {
                write!(f, "node [{node}] has more than one parent: {claimed_by:?}")
            }
            LinkageViolation::DanglingEdge { node, target } => {
                write!(f, "node [{node}] links to unregistered node [{target}]")
            }
        }
    }
}

impl ExecutionPlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables a linkage check after every structural change.
    pub fn set_verify_linkage(&mut self, enabled: bool) {
        self.verify_linkage = enabled;
    }

    /// Sink node of the plan.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Makes `id` the sink of the plan. The node must be registered and have
    /// no parent.
    pub fn set_root(&mut self, id: NodeId) -> Result<()> {
        let node = self.get_node(id)?;
        if let Some(parent) = node.parent() {
            return Err(PlanError::structural(format!(
                "node [{id}] has parent [{parent}] and cannot be the root"
            )));
        }
        self.root = Some(id);
        self.invalidate_var_usage();
        Ok(())
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Looks up a registered node.
    pub fn get_node(&self, id: NodeId) -> Result<&ExecutionNode> {
        self.nodes.get(&id).ok_or(PlanError::UnknownNode { id })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ExecutionNode> {
        self.nodes.get_mut(&id).ok_or(PlanError::UnknownNode { id })
    }

    /// Registered node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Highest id handed out so far.
    pub fn last_id(&self) -> NodeId {
        NodeId(self.next_id)
    }

    fn next_id(&mut self) -> NodeId {
        self.next_id += 1;
        NodeId(self.next_id)
    }

    pub(crate) fn bump_next_id(&mut self, seen: NodeId) {
        self.next_id = self.next_id.max(seen.0);
    }

    /// Creates and registers a node with the next free id.
    ///
    /// Capacity is reserved before the id is drawn, so a failure leaves both
    /// the registry and the id counter untouched.
    pub fn create_node(&mut self, kind: NodeKind) -> Result<NodeId> {
        self.reserve(1)?;
        let id = self.next_id();
        let node_type = kind.node_type();
        self.nodes.insert(id, ExecutionNode::new(id, kind));
        debug!(id = %id, node_type = %node_type, "plan.node.created");
        Ok(id)
    }

    /// Registers a node that already carries an id (import and cloning).
    pub fn register_node(&mut self, node: ExecutionNode) -> Result<NodeId> {
        let id = node.id();
        if !id.is_valid() {
            return Err(PlanError::structural("node id 0 is reserved"));
        }
        if self.nodes.contains_key(&id) {
            return Err(PlanError::DuplicateNode { id });
        }
        self.reserve(1)?;
        self.nodes.insert(id, node);
        self.bump_next_id(id);
        Ok(id)
    }

    /// Removes a detached node from the registry and hands it to the caller.
    pub fn unregister_node(&mut self, id: NodeId) -> Result<ExecutionNode> {
        let node = self.get_node(id)?;
        if self.root == Some(id) {
            return Err(PlanError::structural(format!(
                "cannot unregister root node [{id}]"
            )));
        }
        if !node.is_detached() {
            return Err(PlanError::structural(format!(
                "node [{id}] is still linked and cannot be unregistered"
            )));
        }
        if self.subquery_owner(id).is_some() {
            return Err(PlanError::structural(format!(
                "node [{id}] is the root of a subquery and cannot be unregistered"
            )));
        }
        let node = self.nodes.remove(&id).ok_or(PlanError::UnknownNode { id })?;
        debug!(id = %id, "plan.node.unregistered");
        Ok(node)
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        self.nodes
            .try_reserve(additional)
            .map_err(|_| PlanError::ResourceExhausted {
                what: "node registry",
            })
    }

    fn subquery_owner(&self, sub_root: NodeId) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| node.kind().subquery() == Some(sub_root))
            .map(ExecutionNode::id)
    }

    /// Payload of a node, for rules that rewrite it in place. Clears the
    /// liveness flag since read and write sets may change.
    pub fn node_kind_mut(&mut self, id: NodeId) -> Result<&mut NodeKind> {
        self.var_usage_computed = false;
        Ok(self.node_mut(id)?.kind_mut())
    }

    /// Appends `pred` to the dependencies of `node` and returns `node`.
    ///
    /// If the edge cannot be added and `node` is still detached, `node` is
    /// removed from the registry before the error is returned so that no
    /// orphan stays behind.
    pub fn add_dependency(&mut self, pred: NodeId, node: NodeId) -> Result<NodeId> {
        match self.check_add_dependency(pred, node) {
            Ok(()) => {
                self.node_mut(node)?.dependencies.push(pred);
                self.node_mut(pred)?.parent = Some(node);
                debug!(pred = %pred, node = %node, "plan.surgery.add_dependency");
                self.after_structural_change();
                Ok(node)
            }
            Err(err) => {
                self.release_if_orphaned(node);
                Err(err)
            }
        }
    }

    fn check_add_dependency(&self, pred: NodeId, node: NodeId) -> Result<()> {
        let pred_node = self.get_node(pred)?;
        self.get_node(node)?;
        if pred == node {
            return Err(PlanError::structural(format!(
                "node [{node}] cannot depend on itself"
            )));
        }
        if let Some(parent) = pred_node.parent() {
            return Err(PlanError::structural(format!(
                "node [{pred}] already has parent [{parent}]"
            )));
        }
        self.check_not_a_sink(pred)?;
        // `pred` has no parent, so it can only be upstream of `node` if `node`
        // reaches it by walking parents.
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == pred {
                return Err(PlanError::structural(format!(
                    "making [{pred}] a dependency of [{node}] would create a cycle"
                )));
            }
            cursor = self.get_node(current)?.parent();
        }
        Ok(())
    }

    /// Roots of the plan and of subqueries must stay parentless.
    fn check_not_a_sink(&self, id: NodeId) -> Result<()> {
        if self.root == Some(id) {
            return Err(PlanError::structural(format!(
                "root node [{id}] cannot gain a parent"
            )));
        }
        if let Some(owner) = self.subquery_owner(id) {
            return Err(PlanError::structural(format!(
                "node [{id}] is the root of subquery [{owner}] and cannot gain a parent"
            )));
        }
        Ok(())
    }

    fn release_if_orphaned(&mut self, id: NodeId) {
        let orphaned = self.root != Some(id)
            && self.nodes.get(&id).map_or(false, ExecutionNode::is_detached)
            && self.subquery_owner(id).is_none();
        if orphaned {
            self.nodes.remove(&id);
            debug!(id = %id, "plan.node.released");
        }
    }

    /// Splices `id` out of the pipeline.
    ///
    /// The former parent takes over the node's dependencies, in order, at the
    /// position the node occupied. The node stays registered but is fully
    /// detached; the caller decides whether to unregister it.
    pub fn unlink_node(&mut self, id: NodeId) -> Result<()> {
        let parent = self.check_unlink(id)?;
        let deps = std::mem::take(&mut self.node_mut(id)?.dependencies);
        self.node_mut(id)?.parent = None;
        let parent_node = self.node_mut(parent)?;
        let pos = parent_node
            .dependencies
            .iter()
            .position(|dep| *dep == id)
            .ok_or_else(|| PlanError::structural(format!("parent [{parent}] lost node [{id}]")))?;
        parent_node.dependencies.remove(pos);
        parent_node
            .dependencies
            .insert_many(pos, deps.iter().copied());
        for dep in deps {
            self.node_mut(dep)?.parent = Some(parent);
        }
        debug!(id = %id, parent = %parent, "plan.surgery.unlink");
        self.after_structural_change();
        Ok(())
    }

    fn check_unlink(&self, id: NodeId) -> Result<NodeId> {
        let node = self.get_node(id)?;
        let parent = node.parent().ok_or(PlanError::CannotUnlinkRoot { id })?;
        if !self.get_node(parent)?.dependencies().contains(&id) {
            return Err(PlanError::structural(format!(
                "parent [{parent}] does not list node [{id}] as a dependency"
            )));
        }
        for &dep in node.dependencies() {
            self.get_node(dep)?;
        }
        Ok(parent)
    }

    /// Unlinks every node in `ids`.
    ///
    /// All ids are validated first; if any of them is unknown or a root,
    /// nothing is modified.
    pub fn unlink_nodes(&mut self, ids: &[NodeId]) -> Result<()> {
        for &id in ids {
            self.check_unlink(id)?;
        }
        let mut seen = HashSet::with_capacity(ids.len());
        for &id in ids {
            if seen.insert(id) {
                self.unlink_node(id)?;
            }
        }
        Ok(())
    }

    /// Puts the registered, unlinked node `new` in the place of `old`.
    ///
    /// `new` receives all of `old`'s dependencies and `old`'s parent; `old`
    /// ends up detached but still registered.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        if old == new {
            return Err(PlanError::structural(format!(
                "cannot replace node [{old}] with itself"
            )));
        }
        let old_node = self.get_node(old)?;
        let new_node = self.get_node(new)?;
        if !new_node.is_detached() {
            return Err(PlanError::structural(format!(
                "replacement node [{new}] must not have dependencies or a parent"
            )));
        }
        self.check_not_a_sink(new)?;
        let parent = match old_node.parent() {
            Some(parent) if self.root != Some(old) => parent,
            _ => return Err(PlanError::CannotReplaceRoot { id: old }),
        };
        if !self.get_node(parent)?.dependencies().contains(&old) {
            return Err(PlanError::structural(
                "could not replace dependencies of an old node",
            ));
        }

        let deps = std::mem::take(&mut self.node_mut(old)?.dependencies);
        self.node_mut(old)?.parent = None;
        for &dep in &deps {
            self.node_mut(dep)?.parent = Some(new);
        }
        {
            let new_node = self.node_mut(new)?;
            new_node.dependencies = deps;
            new_node.parent = Some(parent);
        }
        self.node_mut(parent)?.replace_dependency(old, new);
        debug!(old = %old, new = %new, "plan.surgery.replace");
        self.after_structural_change();
        Ok(())
    }

    /// Inserts the registered, unlinked node `new` between `old` and its
    /// single dependency.
    pub fn insert_dependency(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        if old == new {
            return Err(PlanError::structural(format!(
                "cannot insert node [{old}] before itself"
            )));
        }
        let old_node = self.get_node(old)?;
        if old_node.dependencies().len() != 1 {
            return Err(PlanError::structural(format!(
                "node [{old}] must have exactly one dependency, has {}",
                old_node.dependencies().len()
            )));
        }
        let dep = old_node.dependencies()[0];
        if !self.get_node(new)?.is_detached() {
            return Err(PlanError::structural(format!(
                "inserted node [{new}] must not have dependencies or a parent"
            )));
        }
        self.check_not_a_sink(new)?;
        self.get_node(dep)?;

        self.node_mut(old)?.dependencies[0] = new;
        {
            let new_node = self.node_mut(new)?;
            new_node.dependencies.push(dep);
            new_node.parent = Some(old);
        }
        self.node_mut(dep)?.parent = Some(new);
        debug!(old = %old, new = %new, "plan.surgery.insert_dependency");
        self.after_structural_change();
        Ok(())
    }

    fn after_structural_change(&mut self) {
        self.invalidate_var_usage();
        if self.verify_linkage {
            self.check_linkage();
        }
    }

    /// Recomputes liveness annotations for every node reachable from the root.
    pub fn find_var_usage(&mut self) -> Result<()> {
        liveness::find_var_usage(self)
    }

    /// Marks the liveness annotations as stale.
    pub fn invalidate_var_usage(&mut self) {
        self.var_usage_computed = false;
    }

    /// Returns true when the liveness annotations match the current shape.
    pub fn var_usage_computed(&self) -> bool {
        self.var_usage_computed
    }

    /// Node defining `variable`, as of the last liveness computation.
    pub fn var_set_by(&self, variable: VariableId) -> Option<NodeId> {
        self.var_set_by.get(&variable).copied()
    }

    pub(crate) fn install_var_usage(
        &mut self,
        usage: HashMap<NodeId, VarUsage>,
        set_by: FxHashMap<VariableId, NodeId>,
    ) {
        for node in self.nodes.values_mut() {
            node.invalidate_var_usage();
        }
        for (id, annotations) in usage {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.set_var_usage(annotations);
            }
        }
        self.var_set_by = set_by;
        self.var_usage_computed = true;
    }

    /// Records that an optimizer rule changed the plan.
    pub fn add_applied_rule(&mut self, rule: impl Into<String>) {
        self.applied_rules.push(rule.into());
    }

    /// Names of applied rules, in application order.
    pub fn applied_rules(&self) -> &[String] {
        &self.applied_rules
    }

    /// Collections referenced by the plan.
    pub fn collections(&self) -> &UsedCollections {
        &self.collections
    }

    pub(crate) fn collections_mut(&mut self) -> &mut UsedCollections {
        &mut self.collections
    }

    /// Ids of nodes of type `node_type` reachable from the root, in
    /// pre-order; nested plans are searched when `enter_subqueries` is set.
    pub fn find_nodes_of_type(
        &self,
        node_type: NodeType,
        enter_subqueries: bool,
    ) -> Result<Vec<NodeId>> {
        let ids = self.reachable(enter_subqueries)?;
        let mut out = Vec::new();
        for id in ids {
            if self.get_node(id)?.node_type() == node_type {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Ids reachable from the root in pre-order.
    pub fn reachable(&self, enter_subqueries: bool) -> Result<Vec<NodeId>> {
        let Some(root) = self.root else {
            return Ok(Vec::new());
        };
        let mut order = PreOrder {
            ids: Vec::new(),
            enter_subqueries,
        };
        walker::walk(self, root, &mut order)?;
        Ok(order.ids)
    }

    /// Variables read by a node. For subquery nodes these are the variables
    /// read inside the nested plan that it does not define itself.
    pub fn variables_used_here(&self, id: NodeId) -> Result<Vec<VariableRef>> {
        let node = self.get_node(id)?;
        let Some(sub_root) = node.kind().subquery() else {
            return Ok(node.kind().variables_used_here());
        };
        let mut order = PreOrder {
            ids: Vec::new(),
            enter_subqueries: true,
        };
        walker::walk(self, sub_root, &mut order)?;
        let mut used: Vec<VariableRef> = Vec::new();
        let mut defined = VarSet::new();
        for inner in order.ids {
            let kind = self.get_node(inner)?.kind();
            for var in kind.variables_used_here() {
                if !used.contains(&var) {
                    used.push(var);
                }
            }
            defined.extend(kind.variables_set_here());
        }
        used.retain(|var| !defined.contains(var));
        Ok(used)
    }

    /// Variables defined by a node.
    pub fn variables_set_here(&self, id: NodeId) -> Result<Vec<VariableRef>> {
        Ok(self.get_node(id)?.kind().variables_set_here())
    }

    /// Verifies that dependency and parent links mirror each other.
    ///
    /// Violations are logged and returned; the plan is never modified.
    pub fn check_linkage(&self) -> Vec<LinkageViolation> {
        let mut violations = Vec::new();
        let Some(root) = self.root else {
            return violations;
        };
        let mut claimed: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for &dep in node.dependencies() {
                claimed.entry(dep).or_default().push(id);
                match self.nodes.get(&dep) {
                    None => violations.push(LinkageViolation::DanglingEdge {
                        node: id,
                        target: dep,
                    }),
                    Some(dep_node) => {
                        if dep_node.parent() != Some(id) {
                            violations.push(LinkageViolation::DependencyWithoutBackReference {
                                node: id,
                                dependency: dep,
                            });
                        }
                        stack.push(dep);
                    }
                }
            }
            if let Some(parent) = node.parent() {
                match self.nodes.get(&parent) {
                    None => violations.push(LinkageViolation::DanglingEdge {
                        node: id,
                        target: parent,
                    }),
                    Some(parent_node) if !parent_node.dependencies().contains(&id) => {
                        violations.push(LinkageViolation::ParentWithoutDependency {
                            node: id,
                            parent,
                        })
                    }
                    Some(_) => {}
                }
            }
            if let Some(sub_root) = node.kind().subquery() {
                if self.nodes.contains_key(&sub_root) {
                    stack.push(sub_root);
                } else {
                    violations.push(LinkageViolation::DanglingEdge {
                        node: id,
                        target: sub_root,
                    });
                }
            }
        }
        let mut shared: Vec<(NodeId, Vec<NodeId>)> = claimed
            .into_iter()
            .filter(|(_, owners)| owners.len() > 1)
            .collect();
        shared.sort_unstable_by_key(|(id, _)| *id);
        for (node, mut claimed_by) in shared {
            claimed_by.sort_unstable();
            violations.push(LinkageViolation::MultipleParents { node, claimed_by });
        }
        for violation in &violations {
            warn!(violation = %violation, "plan.linkage.violation");
        }
        violations
    }

    /// Deep-copies every node reachable from the root into a new plan.
    ///
    /// The copy keeps node ids, the id counter, the applied rules, and the
    /// referenced collections. Liveness is not computed on the copy.
    pub fn clone_plan(&self) -> Result<ExecutionPlan> {
        let mut plan = ExecutionPlan {
            next_id: self.next_id,
            applied_rules: self.applied_rules.clone(),
            collections: self.collections.clone(),
            verify_linkage: self.verify_linkage,
            ..ExecutionPlan::default()
        };
        let ids = self.reachable(true)?;
        plan.reserve(ids.len())?;
        for id in ids {
            plan.register_node(self.get_node(id)?.clone_node())?;
        }
        plan.root = self.root;
        debug!(nodes = plan.len(), "plan.cloned");
        Ok(plan)
    }
}
