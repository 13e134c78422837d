//! Plan documents: the JSON form used to ship plans between processes.
//!
//! A document lists node records dependencies-first; the last record of a
//! list is the root of that list. Subquery records embed the nested plan as
//! their own record list. Import runs in two passes per list: every node is
//! registered first, then the dependency edges are linked in record order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::query::errors::{PlanError, Result};
use crate::query::metadata::{AccessMode, UsedCollections};
use crate::query::node::{ExecutionNode, NodeKind, NodeType};
use crate::query::plan::ExecutionPlan;
use crate::query::variable::VariableRef;
use crate::query::walker::{self, PlanWalker};
use crate::types::NodeId;

/// Export switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Include the liveness sets of each node.
    pub verbose: bool,
}

/// Serialized plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    /// Top-level records, dependencies first, root last.
    pub nodes: Vec<NodeRecord>,
    /// Applied optimizer rules, in application order.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Collections the plan touches.
    #[serde(default)]
    pub collections: Vec<CollectionRecord>,
}

/// Nested record list of a subquery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubqueryDocument {
    /// Records of the nested plan, dependencies first, root last.
    pub nodes: Vec<NodeRecord>,
}

/// One serialized node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Node id.
    pub id: NodeId,
    /// Ids of the dependencies, in order.
    #[serde(default)]
    pub dependencies: Vec<NodeId>,
    /// Type tag and payload.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Nested plan, for subquery nodes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subquery: Option<SubqueryDocument>,
    /// Verbose export only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars_used_later: Option<Vec<VariableRef>>,
    /// Verbose export only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars_valid: Option<Vec<VariableRef>>,
}

/// Collection entry of a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    /// Collection name.
    pub name: String,
    /// Access intent.
    #[serde(rename = "type")]
    pub access: AccessMode,
}

/// Collects ids in dependency-first order without entering subqueries.
#[derive(Default)]
struct PostOrder {
    ids: Vec<NodeId>,
}

impl PlanWalker for PostOrder {
    fn after(&mut self, node: &ExecutionNode) {
        self.ids.push(node.id());
    }

    fn enter_subquery(&mut self, _owner: &ExecutionNode, _sub_root: NodeId) -> bool {
        false
    }
}

impl ExecutionPlan {
    /// Builds the document form of the plan.
    pub fn to_document(&self, options: &ExportOptions) -> Result<PlanDocument> {
        let nodes = match self.root() {
            Some(root) => self.export_list(root, options)?,
            None => Vec::new(),
        };
        let collections = self
            .collections()
            .iter()
            .map(|(name, access)| CollectionRecord {
                name: name.to_owned(),
                access,
            })
            .collect();
        debug!(nodes = nodes.len(), verbose = options.verbose, "plan.export.done");
        Ok(PlanDocument {
            nodes,
            rules: self.applied_rules().to_vec(),
            collections,
        })
    }

    /// Builds the JSON form of the plan.
    pub fn to_json(&self, options: &ExportOptions) -> Result<Value> {
        let document = self.to_document(options)?;
        serde_json::to_value(&document)
            .map_err(|err| PlanError::malformed(format!("cannot encode plan: {err}")))
    }

    fn export_list(&self, root: NodeId, options: &ExportOptions) -> Result<Vec<NodeRecord>> {
        let mut order = PostOrder::default();
        walker::walk(self, root, &mut order)?;
        let mut records = Vec::with_capacity(order.ids.len());
        for id in order.ids {
            let node = self.get_node(id)?;
            let subquery = match node.kind().subquery() {
                Some(sub_root) => Some(SubqueryDocument {
                    nodes: self.export_list(sub_root, options)?,
                }),
                None => None,
            };
            let verbose = options.verbose && node.var_usage_valid();
            records.push(NodeRecord {
                id,
                dependencies: node.dependencies().to_vec(),
                kind: node.kind().clone(),
                subquery,
                vars_used_later: verbose
                    .then(|| node.vars_used_later().map(|s| s.iter().cloned().collect()))
                    .flatten(),
                vars_valid: verbose
                    .then(|| node.vars_valid().map(|s| s.iter().cloned().collect()))
                    .flatten(),
            });
        }
        Ok(records)
    }

    /// Rebuilds a plan from its JSON form and computes liveness on it.
    pub fn from_json(value: &Value) -> Result<ExecutionPlan> {
        check_document_shape(value)?;
        let document: PlanDocument = serde_json::from_value(value.clone())
            .map_err(|err| PlanError::malformed(err.to_string()))?;
        Self::from_document(document)
    }

    /// Rebuilds a plan from a document and computes liveness on it.
    pub fn from_document(document: PlanDocument) -> Result<ExecutionPlan> {
        let mut plan = ExecutionPlan::new();
        for record in &document.collections {
            plan.collections_mut().add(record.name.clone(), record.access);
        }
        let root = import_list(&mut plan, document.nodes)?;
        plan.set_root(root)?;
        for rule in document.rules {
            plan.add_applied_rule(rule);
        }
        plan.find_var_usage()?;
        debug!(nodes = plan.len(), root = %root, "plan.import.done");
        Ok(plan)
    }
}

fn import_list(plan: &mut ExecutionPlan, records: Vec<NodeRecord>) -> Result<NodeId> {
    let root = records
        .last()
        .map(|record| record.id)
        .ok_or_else(|| PlanError::malformed("node list is empty"))?;
    let members: HashSet<NodeId> = records.iter().map(|record| record.id).collect();

    let mut edges = Vec::with_capacity(records.len());
    for record in records {
        let NodeRecord {
            id,
            dependencies,
            mut kind,
            subquery,
            ..
        } = record;
        let node_type = kind.node_type();
        if let Some(name) = kind.collection() {
            match plan.collections().get(name) {
                None => {
                    return Err(PlanError::UnknownCollection {
                        name: name.to_owned(),
                        context: "plan import",
                    })
                }
                Some(AccessMode::Read) if node_type.is_modification() => {
                    return Err(PlanError::malformed(format!(
                        "{node_type} [{id}] writes collection '{name}' declared as read"
                    )))
                }
                Some(_) => {}
            }
        }
        match (&mut kind, subquery) {
            (NodeKind::Subquery { subquery: slot, .. }, Some(nested)) => {
                *slot = import_list(plan, nested.nodes)?;
            }
            (NodeKind::Subquery { .. }, None) => {
                return Err(PlanError::malformed(format!(
                    "subquery node [{id}] has no nested plan"
                )));
            }
            (_, Some(_)) => {
                return Err(PlanError::malformed(format!(
                    "node [{id}] of type {node_type} carries a nested plan"
                )));
            }
            (_, None) => {}
        }
        plan.register_node(ExecutionNode::new(id, kind))?;
        edges.push((id, dependencies));
    }

    for (id, dependencies) in &edges {
        for dep in dependencies {
            if !members.contains(dep) {
                return Err(PlanError::malformed(format!(
                    "node [{id}] depends on unknown node [{dep}]"
                )));
            }
            plan.add_dependency(*dep, *id)?;
        }
    }

    for (id, _) in &edges {
        if *id != root && plan.get_node(*id)?.parent().is_none() {
            return Err(PlanError::malformed(format!(
                "node [{id}] is not connected to root [{root}]"
            )));
        }
    }
    if let Some(parent) = plan.get_node(root)?.parent() {
        return Err(PlanError::malformed(format!(
            "last node [{root}] of a list has parent [{parent}]"
        )));
    }
    Ok(root)
}

fn check_document_shape(value: &Value) -> Result<()> {
    let object = value
        .as_object()
        .ok_or_else(|| PlanError::malformed("document is not an object"))?;
    let nodes = object
        .get("nodes")
        .ok_or_else(|| PlanError::malformed("'nodes' is missing"))?;
    check_node_list(nodes)?;
    for key in ["rules", "collections"] {
        if let Some(entry) = object.get(key) {
            if !entry.is_array() {
                return Err(PlanError::malformed(format!("'{key}' is not a list")));
            }
        }
    }
    Ok(())
}

fn check_node_list(nodes: &Value) -> Result<()> {
    let list = nodes
        .as_array()
        .ok_or_else(|| PlanError::malformed("'nodes' is not a list"))?;
    for (idx, record) in list.iter().enumerate() {
        let object = record
            .as_object()
            .ok_or_else(|| PlanError::malformed(format!("node record {idx} is not an object")))?;
        let id = object
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| PlanError::malformed(format!("node record {idx} has no numeric 'id'")))?;
        let type_name = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| PlanError::malformed(format!("node [{id}] has no 'type'")))?;
        let node_type = NodeType::from_name(type_name).ok_or_else(|| {
            PlanError::malformed(format!("node [{id}] has unknown type '{type_name}'"))
        })?;
        if let Some(deps) = object.get("dependencies") {
            let numeric = deps
                .as_array()
                .map_or(false, |items| items.iter().all(Value::is_u64));
            if !numeric {
                return Err(PlanError::malformed(format!(
                    "node [{id}] has non-numeric dependencies"
                )));
            }
        }
        if node_type == NodeType::Subquery {
            let nested = object
                .get("subquery")
                .and_then(|sub| sub.get("nodes"))
                .ok_or_else(|| {
                    PlanError::malformed(format!("subquery node [{id}] has no nested plan"))
                })?;
            check_node_list(nested)?;
        }
    }
    Ok(())
}
