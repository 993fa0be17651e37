//! Core types and traits for deepsql.
//!
//! This crate provides the foundations the deep planners build on:
//!
//! - `Schema` model: entities, elements, associations and compositions
//! - `Value` and `Row` for dynamically-typed data
//! - Typed low-level `Statement`s rendered per `Dialect`
//! - `Executor` trait for running statements inside the caller's transaction
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod association;
pub mod entity;
pub mod error;
pub mod executor;
pub mod identifiers;
pub mod row;
pub mod schema;
pub mod statement;
pub mod types;
pub mod value;

pub use association::{
    Association, Cardinality, ForeignKeyDescriptor, ForeignKeyDescriptorBuilder,
    ForeignKeyPropagation, OnCondition, Operand, PropagationDirection, SELF_REF,
};
pub use entity::{Element, ElementKind, EntityDefinition, KeyGeneration, Projection};
pub use error::{
    ConfigError, DeepError, DeepErrorKind, Error, QueryError, QueryErrorKind, Result, SchemaError,
    SchemaErrorKind,
};
pub use executor::{Connection, Executor, PreparedStatement, SqlExecutor};
pub use identifiers::{Dialect, is_valid_identifier, quote_ident, quote_ident_mysql};
pub use row::{ColumnInfo, Row};
pub use schema::{Column, Schema, SchemaBuilder};
pub use statement::{Delete, Filter, Insert, Select, Statement};
pub use types::SqlType;
pub use value::{Value, format_uuid, parse_uuid};

/// JSON object used for payload rows.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
