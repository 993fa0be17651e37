//! Deep write and delete planning for deepsql.
//!
//! `deepsql-plan` turns one client operation on a root entity, together
//! with a nested document of owned rows, into low-level statements that keep
//! every foreign key consistent.
//!
//! # Role In The Architecture
//!
//! - **Foreign-key resolution** derives propagation pairs from associations.
//! - **Key propagation** stamps and generates keys over payload rows.
//! - **Templates** describe which targets a deep operation touches.
//! - **Planners** build flattening plans, single-block programs and delete
//!   cascades, cached per entity and operation kind.
//! - **Execution** runs a plan against an `Executor` inside the caller's
//!   transaction.
//!
//! # Example
//!
//! ```ignore
//! let planner = DeepPlanner::new(schema, DeepConfig::default())?;
//! let mut ctx = planner.request_context();
//! if let Some(plan) = planner.plan_deep_write(&operation, &mut ctx)? {
//!     let rows = execute_plan(&cx, &executor, &plan, &mut ctx).await;
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod delete;
pub mod execute;
pub mod foreign_keys;
pub mod keygen;
pub mod operation;
pub mod planner;
pub mod process;
pub mod propagate;
pub mod read;
pub mod template;
pub mod write;

pub use cache::PlanCache;
pub use config::{DEFAULT_DEPTH_LIMIT, DeepConfig, WriteStrategy};
pub use context::{GeneratedKey, RequestContext};
pub use delete::{DeleteLink, DeleteStep, DeleteTemplate, build_delete_template, resolve_target};
pub use execute::execute_plan;
pub use foreign_keys::resolve as resolve_foreign_keys;
pub use keygen::{KeyGenerator, SequentialGenerator, UuidGenerator};
pub use operation::{Entries, Operation, OperationKind};
pub use planner::{BoundDelete, DeepPlanner, ExecutionPlan};
pub use process::{FieldVisit, MatchOptions, PathSegment, Visitor, locator, match_template};
pub use propagate::{Propagated, PropagationScope, fill_keys, propagate};
pub use read::read_deep;
pub use template::{
    Edge, EntryKind, Template, TargetInfo, TemplateEntry, WriteTemplate, build_write_template,
};
pub use write::{
    BlockAction, BlockProgram, BlockStep, BoundBlock, BoundFlat, FlatPlan, FlatStep, JsonPath,
    OrphanCheck, OrphanRule, is_deep,
};
