//! Query execution plans: lowering, graph surgery, liveness, and shipping.
//!
//! [`query::Planner`] turns a parsed query into an [`query::ExecutionPlan`];
//! optimizer rules rewrite it through the plan's surgery methods and the
//! result travels as a [`query::PlanDocument`].

#![warn(missing_docs)]

pub mod query;
pub mod types;
