//! Human-readable views of a plan: the explain tree and the type dump.

use std::fmt::Write as _;
use std::hash::Hasher;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::query::errors::Result;
use crate::query::node::{ExecutionNode, ModificationOptions, NodeKind};
use crate::query::plan::ExecutionPlan;
use crate::query::variable::VariableRef;
use crate::query::walker::{self, PlanWalker};
use crate::types::NodeId;

/// Human-readable explain tree.
#[derive(Clone, Debug, Serialize)]
pub struct PlanExplain {
    /// Root node of the explain tree.
    pub root: ExplainNode,
    /// Deterministic hash over operators and properties; node ids are not
    /// part of it.
    pub plan_hash: u64,
}

/// Explain entry for one execution node.
#[derive(Clone, Debug, Serialize)]
pub struct ExplainNode {
    /// Plan node id.
    pub id: NodeId,
    /// Operator name.
    pub op: String,
    /// Additional properties describing the operator.
    pub props: Vec<ExplainProp>,
    /// Input operators.
    pub inputs: Vec<ExplainNode>,
    /// Nested plan of a subquery operator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subquery: Option<Box<ExplainNode>>,
}

impl ExplainNode {
    /// Creates a new explain node with the given operator name.
    pub fn new(id: NodeId, op: impl Into<String>) -> Self {
        Self {
            id,
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
            subquery: None,
        }
    }
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug, Serialize)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
    /// Whether this property contains literal data that may be redacted.
    pub redactable: bool,
}

impl ExplainProp {
    fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }
}

impl PlanExplain {
    /// Renders the tree one operator per line, inputs indented below their
    /// consumer. With `redact` set, literal data is replaced by `?`.
    pub fn render_text(&self, redact: bool) -> String {
        let mut out = String::new();
        render_node(&self.root, 0, redact, &mut out);
        out
    }
}

fn render_node(node: &ExplainNode, depth: usize, redact: bool, out: &mut String) {
    let indent = "  ".repeat(depth);
    let _ = write!(out, "{indent}{} #{}", node.op, node.id);
    if !node.props.is_empty() {
        let props: Vec<String> = node
            .props
            .iter()
            .map(|prop| {
                let value = if redact && prop.redactable {
                    "?"
                } else {
                    prop.value.as_str()
                };
                format!("{}={}", prop.key, value)
            })
            .collect();
        let _ = write!(out, " ({})", props.join(", "));
    }
    out.push('\n');
    if let Some(sub) = &node.subquery {
        let _ = writeln!(out, "{indent}  subquery:");
        render_node(sub, depth + 2, redact, out);
    }
    for input in &node.inputs {
        render_node(input, depth + 1, redact, out);
    }
}

impl ExecutionPlan {
    /// Builds the explain tree, or `None` for a plan without a root.
    pub fn explain(&self) -> Result<Option<PlanExplain>> {
        let Some(root) = self.root() else {
            return Ok(None);
        };
        let root = build_explain_tree(self, root)?;
        let mut hasher = Xxh64::new(0);
        hash_explain_node(&root, &mut hasher);
        Ok(Some(PlanExplain {
            root,
            plan_hash: hasher.finish(),
        }))
    }

    /// One line per node with its type string, sources first; nodes of a
    /// nested plan are indented by one space per nesting level.
    pub fn show(&self) -> Result<String> {
        let mut shower = Shower::default();
        if let Some(root) = self.root() {
            walker::walk(self, root, &mut shower)?;
        }
        Ok(shower.out)
    }
}

#[derive(Default)]
struct Shower {
    indent: usize,
    out: String,
}

impl PlanWalker for Shower {
    fn after(&mut self, node: &ExecutionNode) {
        for _ in 0..self.indent {
            self.out.push(' ');
        }
        self.out.push_str(node.node_type().as_str());
        self.out.push('\n');
    }

    fn enter_subquery(&mut self, _owner: &ExecutionNode, _sub_root: NodeId) -> bool {
        self.indent += 1;
        true
    }

    fn leave_subquery(&mut self, _owner: &ExecutionNode, _sub_root: NodeId) {
        self.indent -= 1;
    }
}

fn build_explain_tree(plan: &ExecutionPlan, id: NodeId) -> Result<ExplainNode> {
    let node = plan.get_node(id)?;
    let mut explain = ExplainNode::new(id, node.node_type().as_str());
    explain.props = node_props(node.kind());
    for &dep in node.dependencies() {
        explain.inputs.push(build_explain_tree(plan, dep)?);
    }
    if let Some(sub_root) = node.kind().subquery() {
        explain.subquery = Some(Box::new(build_explain_tree(plan, sub_root)?));
    }
    Ok(explain)
}

fn node_props(kind: &NodeKind) -> Vec<ExplainProp> {
    match kind {
        NodeKind::Singleton => Vec::new(),
        NodeKind::EnumerateCollection {
            collection,
            out_variable,
        } => vec![
            ExplainProp::plain("collection", collection.as_str()),
            ExplainProp::plain("out", var_name(out_variable)),
        ],
        NodeKind::EnumerateList {
            in_variable,
            out_variable,
        } => vec![
            ExplainProp::plain("in", var_name(in_variable)),
            ExplainProp::plain("out", var_name(out_variable)),
        ],
        NodeKind::Filter { in_variable } | NodeKind::Return { in_variable } => {
            vec![ExplainProp::plain("in", var_name(in_variable))]
        }
        NodeKind::Calculation {
            expression,
            out_variable,
        } => vec![
            ExplainProp::literal("expr", expression.to_string()),
            ExplainProp::plain("out", var_name(out_variable)),
        ],
        NodeKind::Subquery { out_variable, .. } => {
            vec![ExplainProp::plain("out", var_name(out_variable))]
        }
        NodeKind::Sort { elements, stable } => {
            let keys: Vec<String> = elements
                .iter()
                .map(|e| {
                    let dir = if e.ascending { "ASC" } else { "DESC" };
                    format!("{} {dir}", e.variable.name)
                })
                .collect();
            vec![
                ExplainProp::plain("keys", keys.join(", ")),
                ExplainProp::plain("stable", stable.to_string()),
            ]
        }
        NodeKind::Aggregate {
            aggregates,
            out_variable,
            keep_variables,
        } => {
            let groups: Vec<String> = aggregates
                .iter()
                .map(|a| format!("{} = {}", a.out_variable.name, a.in_variable.name))
                .collect();
            let mut props = vec![ExplainProp::plain("groups", groups.join(", "))];
            if let Some(into) = out_variable {
                props.push(ExplainProp::plain("into", var_name(into)));
            }
            if !keep_variables.is_empty() {
                props.push(ExplainProp::plain("keep", var_list(keep_variables)));
            }
            props
        }
        NodeKind::Limit { offset, limit } => vec![
            ExplainProp::literal("offset", offset.to_string()),
            ExplainProp::literal("limit", limit.to_string()),
        ],
        NodeKind::Remove {
            collection,
            options,
            in_variable,
        }
        | NodeKind::Insert {
            collection,
            options,
            in_variable,
        } => vec![
            ExplainProp::plain("collection", collection.as_str()),
            ExplainProp::plain("in", var_name(in_variable)),
            ExplainProp::plain("options", options_text(options)),
        ],
        NodeKind::Update {
            collection,
            options,
            in_doc_variable,
            in_key_variable,
        }
        | NodeKind::Replace {
            collection,
            options,
            in_doc_variable,
            in_key_variable,
        } => {
            let mut props = vec![
                ExplainProp::plain("collection", collection.as_str()),
                ExplainProp::plain("doc", var_name(in_doc_variable)),
            ];
            if let Some(key) = in_key_variable {
                props.push(ExplainProp::plain("key", var_name(key)));
            }
            props.push(ExplainProp::plain("options", options_text(options)));
            props
        }
    }
}

fn var_name(var: &VariableRef) -> String {
    var.name.clone()
}

fn var_list(vars: &[VariableRef]) -> String {
    vars.iter()
        .map(|v| v.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn options_text(options: &ModificationOptions) -> String {
    format!(
        "waitForSync={} ignoreErrors={} nullMeansRemove={}",
        options.wait_for_sync, options.ignore_errors, options.null_means_remove
    )
}

fn hash_explain_node(node: &ExplainNode, hasher: &mut Xxh64) {
    hasher.write(node.op.as_bytes());
    for prop in &node.props {
        hasher.write(prop.key.as_bytes());
        hasher.write(prop.value.as_bytes());
    }
    hasher.write_u64(node.inputs.len() as u64);
    for child in &node.inputs {
        hash_explain_node(child, hasher);
    }
    match &node.subquery {
        Some(sub) => {
            hasher.write_u8(1);
            hash_explain_node(sub, hasher);
        }
        None => hasher.write_u8(0),
    }
}
