//! deepsql - deep writes and cascading deletes for composition-based entity models.
//!
//! deepsql takes one operation on a root entity together with a nested
//! document of owned rows and turns it into referentially consistent
//! low-level statements:
//!
//! - Foreign keys derived from managed associations and on-conditions
//! - Surrogate keys generated once per owned row
//! - Two interchangeable write strategies: flattening and single-block
//! - Cascading deletes with cycle detection and hierarchy depth limits
//! - Cached, introspectable plans
//!
//! # Quick Start
//!
//! ```ignore
//! use deepsql::prelude::*;
//!
//! let schema = Schema::builder()
//!     .entity(
//!         EntityDefinition::new("Orders")
//!             .element(Element::scalar("ID", SqlType::Integer).key())
//!             .element(Element::association(
//!                 "items",
//!                 Association::to_many("Items")
//!                     .composition()
//!                     .on(OnCondition::backlink("items", "order")),
//!             )),
//!     )
//!     .entity(
//!         EntityDefinition::new("Items")
//!             .element(Element::uuid_key("ID"))
//!             .element(Element::association("order", Association::to_one("Orders")))
//!             .element(Element::scalar("qty", SqlType::Integer)),
//!     )
//!     .build()?;
//!
//! let planner = Arc::new(DeepPlanner::new(Arc::new(schema), DeepConfig::default())?);
//! let session = DeepSession::new(executor, planner);
//! session.insert(&cx, "Orders", &json!({"ID": 1, "items": [{"qty": 5}]})).await;
//! ```

pub mod session;

pub use session::{DeepSession, SessionPlan, WriteResult};

pub use deepsql_core::{
    Association, Cardinality, Column, Connection, Cx, DeepError, DeepErrorKind, Delete, Dialect,
    Element, ElementKind, EntityDefinition, Error, Executor, Filter, ForeignKeyPropagation,
    Insert, JsonMap, KeyGeneration, OnCondition, Operand, Outcome, PreparedStatement, Projection,
    PropagationDirection, Result, Row, Schema, SchemaBuilder, SchemaError, Select, SqlExecutor,
    SqlType, Statement, Value,
};
pub use deepsql_plan::{
    BlockProgram, DeepConfig, DeepPlanner, DeleteTemplate, Entries, ExecutionPlan, FlatPlan,
    GeneratedKey, KeyGenerator, MatchOptions, Operation, OperationKind, RequestContext,
    SequentialGenerator, UuidGenerator, Visitor, WriteStrategy, WriteTemplate, execute_plan,
    match_template, read_deep,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use deepsql::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Association, Cx, DeepConfig, DeepPlanner, DeepSession, Element, EntityDefinition, Error,
        Executor, Filter, JsonMap, OnCondition, Operation, OperationKind, Outcome, Projection,
        Result, Schema, SqlType, Value, WriteResult, WriteStrategy,
    };
}
