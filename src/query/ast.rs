//! Abstract syntax tree handed to the planner by the external parser.
//!
//! The tree is deliberately generic: every node carries a type tag, ordered
//! members, an optional literal payload, and an optional resolved variable
//! handle. Lowering validates the shape of each clause itself and reports
//! anything unexpected as an error instead of trusting the parser.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::variable::{VariableGenerator, VariableRef};

/// Type tag of an [`AstNode`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AstNodeType {
    /// Top-level query; members are statements.
    Root,
    /// `FOR var IN expr`.
    For,
    /// `LET var = expr`.
    Let,
    /// `FILTER expr`.
    Filter,
    /// `RETURN expr`.
    Return,
    /// `COLLECT assignments [INTO var]`.
    Collect,
    /// `SORT elements`.
    Sort,
    /// `LIMIT offset, count`.
    Limit,
    /// `REMOVE expr IN collection`.
    Remove,
    /// `INSERT expr IN collection`.
    Insert,
    /// `UPDATE [key WITH] expr IN collection`.
    Update,
    /// `REPLACE [key WITH] expr IN collection`.
    Replace,
    /// Placeholder that lowering skips.
    Nop,
    /// Nested query; members are statements.
    Subquery,
    /// Variable declaration site.
    Variable,
    /// `var = expr` inside COLLECT.
    Assign,
    /// Collection name.
    Collection,
    /// Reference to a previously declared variable.
    Reference,
    /// Constant literal.
    Value,
    /// List of members.
    List,
    /// Object literal; members are array elements.
    Array,
    /// Object attribute; value is the key, member 0 the value.
    ArrayElement,
    /// Sort key; value is the ascending flag, member 0 the expression.
    SortElement,
    /// `expr.name`.
    AttributeAccess,
    /// `expr[index]`.
    IndexedAccess,
    /// `NAME(args...)`; value is the function name.
    FunctionCall,
    /// `low..high`.
    Range,
    /// `cond ? a : b`.
    Ternary,
    /// `NOT expr`.
    UnaryNot,
    /// `-expr`.
    UnaryMinus,
    /// `+expr`.
    UnaryPlus,
    /// `a && b`.
    BinaryAnd,
    /// `a || b`.
    BinaryOr,
    /// `a == b`.
    BinaryEq,
    /// `a != b`.
    BinaryNe,
    /// `a < b`.
    BinaryLt,
    /// `a <= b`.
    BinaryLe,
    /// `a > b`.
    BinaryGt,
    /// `a >= b`.
    BinaryGe,
    /// `a IN b`.
    BinaryIn,
    /// `a NOT IN b`.
    BinaryNin,
    /// `a + b`.
    BinaryPlus,
    /// `a - b`.
    BinaryMinus,
    /// `a * b`.
    BinaryTimes,
    /// `a / b`.
    BinaryDiv,
    /// `a % b`.
    BinaryMod,
}

impl AstNodeType {
    /// Returns the snake-case tag used in diagnostics and serialized trees.
    pub fn as_str(self) -> &'static str {
        match self {
            AstNodeType::Root => "root",
            AstNodeType::For => "for",
            AstNodeType::Let => "let",
            AstNodeType::Filter => "filter",
            AstNodeType::Return => "return",
            AstNodeType::Collect => "collect",
            AstNodeType::Sort => "sort",
            AstNodeType::Limit => "limit",
            AstNodeType::Remove => "remove",
            AstNodeType::Insert => "insert",
            AstNodeType::Update => "update",
            AstNodeType::Replace => "replace",
            AstNodeType::Nop => "nop",
            AstNodeType::Subquery => "subquery",
            AstNodeType::Variable => "variable",
            AstNodeType::Assign => "assign",
            AstNodeType::Collection => "collection",
            AstNodeType::Reference => "reference",
            AstNodeType::Value => "value",
            AstNodeType::List => "list",
            AstNodeType::Array => "array",
            AstNodeType::ArrayElement => "array_element",
            AstNodeType::SortElement => "sort_element",
            AstNodeType::AttributeAccess => "attribute_access",
            AstNodeType::IndexedAccess => "indexed_access",
            AstNodeType::FunctionCall => "function_call",
            AstNodeType::Range => "range",
            AstNodeType::Ternary => "ternary",
            AstNodeType::UnaryNot => "unary_not",
            AstNodeType::UnaryMinus => "unary_minus",
            AstNodeType::UnaryPlus => "unary_plus",
            AstNodeType::BinaryAnd => "binary_and",
            AstNodeType::BinaryOr => "binary_or",
            AstNodeType::BinaryEq => "binary_eq",
            AstNodeType::BinaryNe => "binary_ne",
            AstNodeType::BinaryLt => "binary_lt",
            AstNodeType::BinaryLe => "binary_le",
            AstNodeType::BinaryGt => "binary_gt",
            AstNodeType::BinaryGe => "binary_ge",
            AstNodeType::BinaryIn => "binary_in",
            AstNodeType::BinaryNin => "binary_nin",
            AstNodeType::BinaryPlus => "binary_plus",
            AstNodeType::BinaryMinus => "binary_minus",
            AstNodeType::BinaryTimes => "binary_times",
            AstNodeType::BinaryDiv => "binary_div",
            AstNodeType::BinaryMod => "binary_mod",
        }
    }

    /// Infix symbol for unary and binary operators.
    pub fn operator_symbol(self) -> Option<&'static str> {
        let symbol = match self {
            AstNodeType::UnaryNot => "NOT ",
            AstNodeType::UnaryMinus | AstNodeType::BinaryMinus => "-",
            AstNodeType::UnaryPlus | AstNodeType::BinaryPlus => "+",
            AstNodeType::BinaryAnd => "&&",
            AstNodeType::BinaryOr => "||",
            AstNodeType::BinaryEq => "==",
            AstNodeType::BinaryNe => "!=",
            AstNodeType::BinaryLt => "<",
            AstNodeType::BinaryLe => "<=",
            AstNodeType::BinaryGt => ">",
            AstNodeType::BinaryGe => ">=",
            AstNodeType::BinaryIn => "IN",
            AstNodeType::BinaryNin => "NOT IN",
            AstNodeType::BinaryTimes => "*",
            AstNodeType::BinaryDiv => "/",
            AstNodeType::BinaryMod => "%",
            _ => return None,
        };
        Some(symbol)
    }

    /// Returns true for the unary operator tags.
    pub fn is_unary_operator(self) -> bool {
        matches!(
            self,
            AstNodeType::UnaryNot | AstNodeType::UnaryMinus | AstNodeType::UnaryPlus
        )
    }

    /// Returns true for the binary operator tags.
    pub fn is_binary_operator(self) -> bool {
        self.operator_symbol().is_some() && !self.is_unary_operator()
    }
}

impl fmt::Display for AstNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal values carried by value, collection, and keyed nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer value.
    Int(i64),
    /// 64-bit floating point value.
    Float(f64),
    /// String value.
    String(String),
}

impl Literal {
    /// Truthiness used for option flags: null is false, numbers are true when
    /// non-zero, strings when non-empty.
    pub fn to_boolean(&self) -> bool {
        match self {
            Literal::Null => false,
            Literal::Bool(v) => *v,
            Literal::Int(v) => *v != 0,
            Literal::Float(v) => *v != 0.0,
            Literal::String(v) => !v.is_empty(),
        }
    }

    /// Returns the integer payload, accepting integral floats.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(v) => Some(*v),
            Literal::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v}"),
            Literal::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Node of the parsed query tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    /// Type tag.
    #[serde(rename = "type")]
    pub node_type: AstNodeType,
    /// Ordered children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<AstNode>,
    /// Literal payload (values, names, flags).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Literal>,
    /// Resolved variable for declaration and reference nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<VariableRef>,
}

impl AstNode {
    /// Creates a node without members or payload.
    pub fn new(node_type: AstNodeType) -> Self {
        Self {
            node_type,
            members: Vec::new(),
            value: None,
            variable: None,
        }
    }

    /// Creates a node with the given members.
    pub fn with_members(node_type: AstNodeType, members: Vec<AstNode>) -> Self {
        Self {
            members,
            ..Self::new(node_type)
        }
    }

    /// Constant literal.
    pub fn value(literal: impl Into<Literal>) -> Self {
        Self {
            value: Some(literal.into()),
            ..Self::new(AstNodeType::Value)
        }
    }

    /// Reference to an existing variable.
    pub fn reference(var: &VariableRef) -> Self {
        Self {
            variable: Some(VariableRef::clone(var)),
            ..Self::new(AstNodeType::Reference)
        }
    }

    /// Declaration site for a variable.
    pub fn declaration(var: &VariableRef) -> Self {
        Self {
            variable: Some(VariableRef::clone(var)),
            ..Self::new(AstNodeType::Variable)
        }
    }

    /// Collection name.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            value: Some(Literal::String(name.into())),
            ..Self::new(AstNodeType::Collection)
        }
    }

    /// `object.name`.
    pub fn attribute(object: AstNode, name: impl Into<String>) -> Self {
        Self {
            value: Some(Literal::String(name.into())),
            ..Self::with_members(AstNodeType::AttributeAccess, vec![object])
        }
    }

    /// Binary operator application.
    pub fn binary(op: AstNodeType, lhs: AstNode, rhs: AstNode) -> Self {
        Self::with_members(op, vec![lhs, rhs])
    }

    /// Unary operator application.
    pub fn unary(op: AstNodeType, operand: AstNode) -> Self {
        Self::with_members(op, vec![operand])
    }

    /// Function call with positional arguments.
    pub fn function_call(name: impl Into<String>, args: Vec<AstNode>) -> Self {
        Self {
            value: Some(Literal::String(name.into())),
            ..Self::with_members(AstNodeType::FunctionCall, args)
        }
    }

    /// List literal.
    pub fn list(items: Vec<AstNode>) -> Self {
        Self::with_members(AstNodeType::List, items)
    }

    /// Object literal built from key/value pairs.
    pub fn object<K>(entries: impl IntoIterator<Item = (K, AstNode)>) -> Self
    where
        K: Into<String>,
    {
        let members = entries
            .into_iter()
            .map(|(key, value)| Self {
                value: Some(Literal::String(key.into())),
                ..Self::with_members(AstNodeType::ArrayElement, vec![value])
            })
            .collect();
        Self::with_members(AstNodeType::Array, members)
    }

    /// Number of members.
    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Member at `idx`, if present.
    pub fn member(&self, idx: usize) -> Option<&AstNode> {
        self.members.get(idx)
    }

    /// String payload, if any.
    pub fn string_value(&self) -> Option<&str> {
        self.value.as_ref().and_then(Literal::as_str)
    }

    /// Returns true when the node is a plain variable reference.
    pub fn is_reference(&self) -> bool {
        self.node_type == AstNodeType::Reference && self.variable.is_some()
    }

    /// Returns true when the node and all of its members are literals.
    pub fn is_constant(&self) -> bool {
        match self.node_type {
            AstNodeType::Value => true,
            AstNodeType::List | AstNodeType::Array | AstNodeType::ArrayElement => {
                self.members.iter().all(AstNode::is_constant)
            }
            _ => false,
        }
    }
}

/// Parsed query: the root statement list plus the variables it declared.
#[derive(Clone, Debug)]
pub struct Ast {
    /// Root node, of type [`AstNodeType::Root`].
    pub root: AstNode,
    /// Variable generator shared with lowering for temporaries.
    pub variables: VariableGenerator,
}

impl Ast {
    /// Wraps a root node and the generator that minted its variables.
    pub fn new(root: AstNode, variables: VariableGenerator) -> Self {
        Self { root, variables }
    }
}
