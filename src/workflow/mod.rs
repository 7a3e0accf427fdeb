//! Typed step-pipeline engine
//!
//! This module handles:
//! - Data contracts checked at every node boundary
//! - Steps built from trait impls or async closures
//! - Sequential composition, maps, nested workflows
//! - Predicate branching with a required default
//! - Bounded-concurrency foreach with per-item failure slots
//!
//! # Example
//!
//! ```ignore
//! use dayflow::workflow::{create_step, create_workflow, partition, StepContext};
//!
//! let double = create_step("double", |ctx: StepContext<u64>| async move {
//!     Ok(*ctx.input() * 2)
//! });
//!
//! let workflow = create_workflow::<Vec<u64>>("sum-doubles")
//!     .foreach(double, 4)
//!     .map(|ctx| {
//!         let (values, _failed) = partition(ctx.input().clone());
//!         Ok(values.iter().sum::<u64>())
//!     })
//!     .commit()?;
//!
//! let report = workflow.run(vec![1, 2, 3]).await?;
//! assert_eq!(report.output, 12);
//! ```

mod branch;
mod builder;
mod context;
mod error;
mod foreach;
mod run;
mod schema;
mod state;
mod step;

pub use branch::Branch;
pub use builder::{NodeInfo, Workflow, WorkflowBuilder, create_workflow};
pub use context::StepContext;
pub use error::{BuildError, Boundary, DefinitionIssue, EngineError};
pub use foreach::{ForeachItemError, ItemResult, partition};
pub use schema::{Schema, SchemaViolation, Shape, validate};
pub use state::{NodeKind, NodeRecord, RunFailure, RunReport, RunStatus, WorkflowRun};
pub use step::{FnStep, Step, create_step};
