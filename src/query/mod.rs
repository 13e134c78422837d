#![forbid(unsafe_code)]

//! Execution plan construction and transformation.
//!
//! A parsed query tree is lowered into a graph of pipeline stages, analyzed
//! for variable liveness, rewritten through a small surgery API, and shipped
//! between processes as a JSON document.

/// Abstract syntax tree handed over by the parser.
pub mod ast;

/// Fluent builder for query trees.
pub mod builder;

/// Error taxonomy and result alias.
pub mod errors;

/// Explain trees and the indented type dump.
pub mod explain;

/// Expressions owned by calculation nodes.
pub mod expression;

/// Variable usage analysis.
pub mod liveness;

/// Collection catalog and per-plan collection usage.
pub mod metadata;

/// Execution nodes and their payloads.
pub mod node;

/// The plan: node registry, graph surgery, and cloning.
pub mod plan;

/// Lowering of query trees into plans.
pub mod planner;

/// JSON import and export of plans.
pub mod serialize;

/// Variables and the per-query generator.
pub mod variable;

/// Depth-first traversal over plan nodes.
pub mod walker;

pub use builder::{AstBuilder, StatementBuilder};
pub use errors::{PlanError, PlanErrorWithCode, Result};
pub use explain::{ExplainNode, ExplainProp, PlanExplain};
pub use metadata::{AccessMode, CollectionCatalog, InMemoryCatalog};
pub use node::{ExecutionNode, NodeKind, NodeType};
pub use plan::{ExecutionPlan, LinkageViolation};
pub use planner::{Planner, PlannerConfig};
pub use serialize::{ExportOptions, PlanDocument};
pub use variable::{Variable, VariableGenerator, VariableRef};
