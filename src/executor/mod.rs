//! Query execution module
//!
//! Statements are bound and planned by [`Planner`], rewritten by the
//! [`HeuristicOptimizer`], and run by [`ExecutionEngine`] inside one
//! transaction.

pub mod executor;
pub mod planner;

pub mod optimizer;

mod aggregate;
mod ddl;
mod dml;
mod expr;
mod window;

pub use executor::{ExecutionEngine, QueryResult};
pub use expr::truth;
pub use optimizer::HeuristicOptimizer;
pub use planner::{LogicalPlan, Planner};
