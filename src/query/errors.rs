#![forbid(unsafe_code)]

use std::fmt;

use thiserror::Error;

use crate::query::ast::AstNodeType;
use crate::types::NodeId;

/// Result alias used throughout plan construction and surgery.
pub type Result<T> = std::result::Result<T, PlanError>;

/// Structured errors emitted while building, rewriting, or importing a plan.
///
/// None of these are transient: a failed build or import yields no plan, and
/// everything allocated on the failing path has already been released when
/// the error reaches the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The collection catalog could not resolve a collection name.
    #[error("no collection '{name}' for {context}")]
    UnknownCollection {
        /// Collection name as written in the query or document.
        name: String,
        /// Clause or node kind that referenced it.
        context: &'static str,
    },
    /// A write was requested on a collection the catalog only allows reading.
    #[error("collection '{name}' is read-only and cannot be written by {context}")]
    ReadOnlyCollection {
        /// Collection name as written in the query.
        name: String,
        /// Clause or node kind that wanted to write it.
        context: &'static str,
    },
    /// A node id was not present in the plan's registry.
    #[error("node [{id}] wasn't found")]
    UnknownNode {
        /// Requested node id.
        id: NodeId,
    },
    /// Lowering met an AST member it has no translation rule for.
    #[error("type not handled: {node_type}")]
    TypeNotHandled {
        /// Type tag of the offending AST member.
        node_type: AstNodeType,
    },
    /// An AST node did not have the shape its clause requires.
    #[error("malformed {context} clause: {reason}")]
    MalformedAst {
        /// Clause being lowered.
        context: &'static str,
        /// What was wrong with it.
        reason: String,
    },
    /// The root node has no parent and therefore cannot be spliced out.
    #[error("cannot unlink root node [{id}] of plan")]
    CannotUnlinkRoot {
        /// Root node id.
        id: NodeId,
    },
    /// The root node cannot be substituted through `replace_node`.
    #[error("cannot replace root node [{id}] of plan")]
    CannotReplaceRoot {
        /// Root node id.
        id: NodeId,
    },
    /// A surgery precondition did not hold or linkage was found inconsistent.
    #[error("structural violation: {reason}")]
    Structural {
        /// Description of the violated precondition.
        reason: String,
    },
    /// A node id was registered twice.
    #[error("node [{id}] is already registered")]
    DuplicateNode {
        /// Conflicting node id.
        id: NodeId,
    },
    /// A serialized plan document did not have the required shape.
    #[error("malformed plan document: {reason}")]
    Malformed {
        /// Description of the missing or mistyped field.
        reason: String,
    },
    /// Memory for the node registry could not be reserved.
    #[error("out of memory while growing {what}")]
    ResourceExhausted {
        /// Structure that failed to grow.
        what: &'static str,
    },
}

impl PlanError {
    /// Builds a [`PlanError::Structural`] from any displayable reason.
    pub fn structural(reason: impl Into<String>) -> Self {
        PlanError::Structural {
            reason: reason.into(),
        }
    }

    /// Builds a [`PlanError::Malformed`] from any displayable reason.
    pub fn malformed(reason: impl Into<String>) -> Self {
        PlanError::Malformed {
            reason: reason.into(),
        }
    }

    /// Builds a [`PlanError::MalformedAst`] for a specific clause.
    pub fn malformed_ast(context: &'static str, reason: impl Into<String>) -> Self {
        PlanError::MalformedAst {
            context,
            reason: reason.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::UnknownCollection { .. } => "UnknownCollection",
            PlanError::ReadOnlyCollection { .. } => "ReadOnlyCollection",
            PlanError::UnknownNode { .. } => "UnknownNode",
            PlanError::TypeNotHandled { .. } => "TypeNotHandled",
            PlanError::MalformedAst { .. } => "MalformedAst",
            PlanError::CannotUnlinkRoot { .. } => "CannotUnlinkRoot",
            PlanError::CannotReplaceRoot { .. } => "CannotReplaceRoot",
            PlanError::Structural { .. } => "Structural",
            PlanError::DuplicateNode { .. } => "DuplicateNode",
            PlanError::Malformed { .. } => "Malformed",
            PlanError::ResourceExhausted { .. } => "ResourceExhausted",
        }
    }

    /// Returns true for errors caused by a name or id that could not be resolved.
    pub fn is_unresolved_reference(&self) -> bool {
        matches!(
            self,
            PlanError::UnknownCollection { .. }
                | PlanError::UnknownNode { .. }
                | PlanError::TypeNotHandled { .. }
        )
    }
}

/// Convenience wrapper that formats plan errors with their codes.
pub struct PlanErrorWithCode<'a>(pub &'a PlanError);

impl fmt::Display for PlanErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
