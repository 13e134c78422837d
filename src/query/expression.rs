//! Expressions materialized by calculation nodes.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::ast::{AstNode, AstNodeType, Literal};
use crate::query::variable::VariableRef;
use crate::types::VariableId;

/// An AST subtree owned by a calculation node.
///
/// Evaluation happens elsewhere; the plan only needs to know which variables
/// the expression reads and how to print it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression {
    node: AstNode,
}

impl Expression {
    /// Wraps a copy of the given subtree.
    pub fn new(node: AstNode) -> Self {
        Self { node }
    }

    /// Underlying AST subtree.
    pub fn node(&self) -> &AstNode {
        &self.node
    }

    /// Distinct variables referenced anywhere in the expression, in
    /// first-occurrence order.
    pub fn variables(&self) -> Vec<VariableRef> {
        let mut seen: HashSet<VariableId> = HashSet::new();
        let mut out = Vec::new();
        collect_references(&self.node, &mut seen, &mut out);
        out
    }

    /// Returns true when the expression is a bare variable reference.
    pub fn is_reference(&self) -> bool {
        self.node.is_reference()
    }

    /// Returns true when the expression contains no variable reference.
    pub fn is_constant(&self) -> bool {
        self.node.is_constant()
    }
}

fn collect_references(node: &AstNode, seen: &mut HashSet<VariableId>, out: &mut Vec<VariableRef>) {
    if node.node_type == AstNodeType::Reference {
        if let Some(var) = &node.variable {
            if seen.insert(var.id) {
                out.push(VariableRef::clone(var));
            }
        }
    }
    for member in &node.members {
        collect_references(member, seen, out);
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(&self.node, f)
    }
}

fn render(node: &AstNode, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let ty = node.node_type;
    match ty {
        AstNodeType::Value => match &node.value {
            Some(lit) => write!(f, "{lit}"),
            None => f.write_str("null"),
        },
        AstNodeType::Reference | AstNodeType::Variable => match &node.variable {
            Some(var) => write!(f, "{}", var.name),
            None => f.write_str("?"),
        },
        AstNodeType::Collection => f.write_str(node.string_value().unwrap_or("?")),
        AstNodeType::AttributeAccess => {
            render_member(node, 0, f)?;
            write!(f, ".{}", node.string_value().unwrap_or("?"))
        }
        AstNodeType::IndexedAccess => {
            render_member(node, 0, f)?;
            f.write_str("[")?;
            render_member(node, 1, f)?;
            f.write_str("]")
        }
        AstNodeType::FunctionCall => {
            write!(f, "{}(", node.string_value().unwrap_or("?"))?;
            render_list(&node.members, f)?;
            f.write_str(")")
        }
        AstNodeType::List => {
            f.write_str("[")?;
            render_list(&node.members, f)?;
            f.write_str("]")
        }
        AstNodeType::Array => {
            f.write_str("{ ")?;
            for (idx, element) in node.members.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                render(element, f)?;
            }
            f.write_str(" }")
        }
        AstNodeType::ArrayElement => {
            let key = node.string_value().unwrap_or("?");
            write!(f, "{key:?} : ")?;
            render_member(node, 0, f)
        }
        AstNodeType::Range => {
            render_member(node, 0, f)?;
            f.write_str("..")?;
            render_member(node, 1, f)
        }
        AstNodeType::Ternary => {
            render_member(node, 0, f)?;
            f.write_str(" ? ")?;
            render_member(node, 1, f)?;
            f.write_str(" : ")?;
            render_member(node, 2, f)
        }
        _ if ty.is_unary_operator() => {
            f.write_str(ty.operator_symbol().unwrap_or("?"))?;
            render_member(node, 0, f)
        }
        _ if ty.is_binary_operator() => {
            render_member(node, 0, f)?;
            write!(f, " {} ", ty.operator_symbol().unwrap_or("?"))?;
            render_member(node, 1, f)
        }
        other => write!(f, "<{other}>"),
    }
}

fn render_member(node: &AstNode, idx: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match node.member(idx) {
        Some(member) if needs_parens(member) => {
            f.write_str("(")?;
            render(member, f)?;
            f.write_str(")")
        }
        Some(member) => render(member, f),
        None => write!(f, "{}", Literal::Null),
    }
}

fn render_list(items: &[AstNode], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        render(item, f)?;
    }
    Ok(())
}

fn needs_parens(node: &AstNode) -> bool {
    node.node_type.is_binary_operator() || node.node_type == AstNodeType::Ternary
}
