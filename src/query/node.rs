//! Execution nodes: the individual pipeline stages of a plan.
//!
//! A node owns its payload ([`NodeKind`]) and its edge lists, but edges are
//! only ever rewired by [`ExecutionPlan`](crate::query::plan::ExecutionPlan)
//! so that dependency and parent links stay mirror images of each other.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::query::expression::Expression;
use crate::query::variable::VariableRef;
use crate::types::NodeId;

/// Ordered set of variables, compared by id.
pub type VarSet = BTreeSet<VariableRef>;

/// Edge list; pipelines almost always have exactly one dependency.
pub type Dependencies = SmallVec<[NodeId; 1]>;

/// Type tag of an execution node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NodeType {
    /// Synthetic single empty row.
    Singleton,
    /// Full scan over a collection.
    EnumerateCollection,
    /// Iteration over a list-valued variable.
    EnumerateList,
    /// Row filter on a boolean variable.
    Filter,
    /// Expression materialized into a variable.
    Calculation,
    /// Nested plan bound to a variable.
    Subquery,
    /// Ordering stage.
    Sort,
    /// Grouping stage over sorted input.
    Aggregate,
    /// Offset/count window.
    Limit,
    /// Result emission.
    Return,
    /// Document removal.
    Remove,
    /// Document insertion.
    Insert,
    /// Partial document update.
    Update,
    /// Full document replacement.
    Replace,
}

impl NodeType {
    /// All node types, in declaration order.
    pub const ALL: [NodeType; 14] = [
        NodeType::Singleton,
        NodeType::EnumerateCollection,
        NodeType::EnumerateList,
        NodeType::Filter,
        NodeType::Calculation,
        NodeType::Subquery,
        NodeType::Sort,
        NodeType::Aggregate,
        NodeType::Limit,
        NodeType::Return,
        NodeType::Remove,
        NodeType::Insert,
        NodeType::Update,
        NodeType::Replace,
    ];

    /// Type string used in diagnostics and serialized documents.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Singleton => "SingletonNode",
            NodeType::EnumerateCollection => "EnumerateCollectionNode",
            NodeType::EnumerateList => "EnumerateListNode",
            NodeType::Filter => "FilterNode",
            NodeType::Calculation => "CalculationNode",
            NodeType::Subquery => "SubqueryNode",
            NodeType::Sort => "SortNode",
            NodeType::Aggregate => "AggregateNode",
            NodeType::Limit => "LimitNode",
            NodeType::Return => "ReturnNode",
            NodeType::Remove => "RemoveNode",
            NodeType::Insert => "InsertNode",
            NodeType::Update => "UpdateNode",
            NodeType::Replace => "ReplaceNode",
        }
    }

    /// Parses a type string produced by [`NodeType::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.as_str() == name)
    }

    /// Returns true for the data-modification stages.
    pub fn is_modification(self) -> bool {
        matches!(
            self,
            NodeType::Remove | NodeType::Insert | NodeType::Update | NodeType::Replace
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags attached to data-modification stages.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModificationOptions {
    /// Wait for the write to reach disk before reporting success.
    pub wait_for_sync: bool,
    /// Continue with the next row when a single write fails.
    pub ignore_errors: bool,
    /// Attributes set to null are removed instead of stored (inverse of `keepNull`).
    pub null_means_remove: bool,
}

/// One sort key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortElement {
    /// Variable holding the key.
    pub variable: VariableRef,
    /// Ascending when true.
    pub ascending: bool,
}

/// Group or aggregate output bound from an input variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateVariable {
    /// Variable produced by the aggregate stage.
    pub out_variable: VariableRef,
    /// Variable read from the incoming rows.
    pub in_variable: VariableRef,
}

/// Payload of an execution node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum NodeKind {
    /// Zero-column single-row source at the start of every pipeline.
    #[serde(rename = "SingletonNode")]
    Singleton,
    /// Produces one row per document of a collection.
    #[serde(rename = "EnumerateCollectionNode")]
    EnumerateCollection {
        /// Scanned collection.
        collection: String,
        /// Variable bound to each document.
        out_variable: VariableRef,
    },
    /// Produces one row per element of a list variable.
    #[serde(rename = "EnumerateListNode")]
    EnumerateList {
        /// List being iterated.
        in_variable: VariableRef,
        /// Variable bound to each element.
        out_variable: VariableRef,
    },
    /// Drops rows whose variable is falsy.
    #[serde(rename = "FilterNode")]
    Filter {
        /// Condition variable.
        in_variable: VariableRef,
    },
    /// Evaluates an expression into a variable.
    #[serde(rename = "CalculationNode")]
    Calculation {
        /// Expression to evaluate.
        expression: Expression,
        /// Variable receiving the result.
        out_variable: VariableRef,
    },
    /// Runs a nested plan per row and binds its result list.
    #[serde(rename = "SubqueryNode")]
    Subquery {
        /// Root of the nested plan, registered in the same plan.
        #[serde(skip)]
        subquery: NodeId,
        /// Variable receiving the nested result.
        out_variable: VariableRef,
    },
    /// Orders rows by one or more keys.
    #[serde(rename = "SortNode")]
    Sort {
        /// Keys, most significant first.
        elements: Vec<SortElement>,
        /// Ties keep their input order.
        stable: bool,
    },
    /// Groups sorted rows by equal key runs.
    #[serde(rename = "AggregateNode")]
    Aggregate {
        /// Group keys.
        aggregates: Vec<AggregateVariable>,
        /// Optional variable receiving each group's rows.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        out_variable: Option<VariableRef>,
        /// User variables captured into `out_variable`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keep_variables: Vec<VariableRef>,
    },
    /// Skips `offset` rows then passes at most `limit`.
    #[serde(rename = "LimitNode")]
    Limit {
        /// Rows to skip.
        offset: u64,
        /// Rows to pass.
        limit: u64,
    },
    /// Emits a variable as the query result.
    #[serde(rename = "ReturnNode")]
    Return {
        /// Variable to emit.
        in_variable: VariableRef,
    },
    /// Removes documents.
    #[serde(rename = "RemoveNode")]
    Remove {
        /// Target collection.
        collection: String,
        /// Write flags.
        options: ModificationOptions,
        /// Document or key to remove.
        in_variable: VariableRef,
    },
    /// Inserts documents.
    #[serde(rename = "InsertNode")]
    Insert {
        /// Target collection.
        collection: String,
        /// Write flags.
        options: ModificationOptions,
        /// Document to insert.
        in_variable: VariableRef,
    },
    /// Merges attributes into existing documents.
    #[serde(rename = "UpdateNode")]
    Update {
        /// Target collection.
        collection: String,
        /// Write flags.
        options: ModificationOptions,
        /// Document carrying the new attributes.
        in_doc_variable: VariableRef,
        /// Optional variable naming the document key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_key_variable: Option<VariableRef>,
    },
    /// Replaces existing documents.
    #[serde(rename = "ReplaceNode")]
    Replace {
        /// Target collection.
        collection: String,
        /// Write flags.
        options: ModificationOptions,
        /// Replacement document.
        in_doc_variable: VariableRef,
        /// Optional variable naming the document key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_key_variable: Option<VariableRef>,
    },
}

impl NodeKind {
    /// Type tag of the payload.
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Singleton => NodeType::Singleton,
            NodeKind::EnumerateCollection { .. } => NodeType::EnumerateCollection,
            NodeKind::EnumerateList { .. } => NodeType::EnumerateList,
            NodeKind::Filter { .. } => NodeType::Filter,
            NodeKind::Calculation { .. } => NodeType::Calculation,
            NodeKind::Subquery { .. } => NodeType::Subquery,
            NodeKind::Sort { .. } => NodeType::Sort,
            NodeKind::Aggregate { .. } => NodeType::Aggregate,
            NodeKind::Limit { .. } => NodeType::Limit,
            NodeKind::Return { .. } => NodeType::Return,
            NodeKind::Remove { .. } => NodeType::Remove,
            NodeKind::Insert { .. } => NodeType::Insert,
            NodeKind::Update { .. } => NodeType::Update,
            NodeKind::Replace { .. } => NodeType::Replace,
        }
    }

    /// Variables this stage reads.
    ///
    /// For subqueries this is empty: what a subquery reads depends on its
    /// nested nodes and is computed by the plan.
    pub fn variables_used_here(&self) -> Vec<VariableRef> {
        match self {
            NodeKind::Singleton
            | NodeKind::EnumerateCollection { .. }
            | NodeKind::Subquery { .. }
            | NodeKind::Limit { .. } => Vec::new(),
            NodeKind::EnumerateList { in_variable, .. }
            | NodeKind::Filter { in_variable }
            | NodeKind::Return { in_variable }
            | NodeKind::Remove { in_variable, .. }
            | NodeKind::Insert { in_variable, .. } => vec![VariableRef::clone(in_variable)],
            NodeKind::Calculation { expression, .. } => expression.variables(),
            NodeKind::Sort { elements, .. } => {
                let mut out: Vec<VariableRef> = Vec::with_capacity(elements.len());
                for element in elements {
                    if !out.contains(&element.variable) {
                        out.push(VariableRef::clone(&element.variable));
                    }
                }
                out
            }
            NodeKind::Aggregate { aggregates, .. } => {
                let mut out: Vec<VariableRef> = Vec::with_capacity(aggregates.len());
                for agg in aggregates {
                    if !out.contains(&agg.in_variable) {
                        out.push(VariableRef::clone(&agg.in_variable));
                    }
                }
                out
            }
            NodeKind::Update {
                in_doc_variable,
                in_key_variable,
                ..
            }
            | NodeKind::Replace {
                in_doc_variable,
                in_key_variable,
                ..
            } => {
                let mut out = vec![VariableRef::clone(in_doc_variable)];
                if let Some(key) = in_key_variable {
                    if key != in_doc_variable {
                        out.push(VariableRef::clone(key));
                    }
                }
                out
            }
        }
    }

    /// Variables this stage defines.
    pub fn variables_set_here(&self) -> Vec<VariableRef> {
        match self {
            NodeKind::EnumerateCollection { out_variable, .. }
            | NodeKind::EnumerateList { out_variable, .. }
            | NodeKind::Calculation { out_variable, .. }
            | NodeKind::Subquery { out_variable, .. } => vec![VariableRef::clone(out_variable)],
            NodeKind::Aggregate {
                aggregates,
                out_variable,
                ..
            } => {
                let mut out: Vec<VariableRef> = aggregates
                    .iter()
                    .map(|agg| VariableRef::clone(&agg.out_variable))
                    .collect();
                if let Some(var) = out_variable {
                    out.push(VariableRef::clone(var));
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Collection touched by this stage, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            NodeKind::EnumerateCollection { collection, .. }
            | NodeKind::Remove { collection, .. }
            | NodeKind::Insert { collection, .. }
            | NodeKind::Update { collection, .. }
            | NodeKind::Replace { collection, .. } => Some(collection),
            _ => None,
        }
    }

    /// Nested plan root for subquery stages.
    pub fn subquery(&self) -> Option<NodeId> {
        match self {
            NodeKind::Subquery { subquery, .. } => Some(*subquery),
            _ => None,
        }
    }
}

/// Liveness annotations stamped by the analysis.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VarUsage {
    /// Variables read by this node or any node downstream of it.
    pub used_later: VarSet,
    /// Variables bound at or before this node.
    pub valid: VarSet,
}

/// A pipeline stage registered in a plan.
#[derive(Clone, Debug)]
pub struct ExecutionNode {
    id: NodeId,
    kind: NodeKind,
    pub(crate) dependencies: Dependencies,
    pub(crate) parent: Option<NodeId>,
    usage: Option<VarUsage>,
}

impl ExecutionNode {
    /// Creates an unlinked node.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            dependencies: Dependencies::new(),
            parent: None,
            usage: None,
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Type tag.
    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Payload.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// Predecessors feeding rows into this node, in order.
    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    /// Successor consuming this node's rows.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns true when the node has neither dependencies nor a parent.
    pub fn is_detached(&self) -> bool {
        self.dependencies.is_empty() && self.parent.is_none()
    }

    /// Variables read downstream, if the analysis stamped this node.
    pub fn vars_used_later(&self) -> Option<&VarSet> {
        self.usage.as_ref().map(|usage| &usage.used_later)
    }

    /// Variables bound at or before this node, if the analysis stamped it.
    pub fn vars_valid(&self) -> Option<&VarSet> {
        self.usage.as_ref().map(|usage| &usage.valid)
    }

    /// Returns true when the liveness annotations are current.
    pub fn var_usage_valid(&self) -> bool {
        self.usage.is_some()
    }

    pub(crate) fn set_var_usage(&mut self, usage: VarUsage) {
        self.usage = Some(usage);
    }

    pub(crate) fn invalidate_var_usage(&mut self) {
        self.usage = None;
    }

    /// Copies the node with the same id and edges but without liveness
    /// annotations.
    pub fn clone_node(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind.clone(),
            dependencies: self.dependencies.clone(),
            parent: self.parent,
            usage: None,
        }
    }

    pub(crate) fn replace_dependency(&mut self, old: NodeId, new: NodeId) -> bool {
        match self.dependencies.iter_mut().find(|dep| **dep == old) {
            Some(slot) => {
                *slot = new;
                true
            }
            None => false,
        }
    }
}
