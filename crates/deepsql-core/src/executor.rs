//! Statement execution traits.
//!
//! This module defines the seams between the deep planners and a database:
//!
//! - [`Executor`] - Runs typed statements inside the caller's transaction
//! - [`Connection`] - Minimal prepare/run/stream SQL connection
//! - [`SqlExecutor`] - Adapts a [`Connection`] into an [`Executor`]
//! - [`PreparedStatement`] - Pre-compiled statement handle
//!
//! All operations integrate with asupersync's structured concurrency via `Cx`.

use crate::error::Error;
use crate::identifiers::Dialect;
use crate::row::Row;
use crate::statement::{Select, Statement};
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A prepared statement for repeated execution.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Unique identifier for this prepared statement (driver-specific)
    id: u64,
    /// The original SQL text
    sql: String,
    /// Number of expected parameters
    param_count: usize,
}

impl PreparedStatement {
    /// Create a new prepared statement.
    ///
    /// This is typically called by the driver, not by users directly.
    #[must_use]
    pub fn new(id: u64, sql: String, param_count: usize) -> Self {
        Self {
            id,
            sql,
            param_count,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub const fn param_count(&self) -> usize {
        self.param_count
    }

    /// Check if the provided parameters match the expected count.
    #[must_use]
    pub fn validate_params(&self, params: &[Value]) -> bool {
        params.len() == self.param_count
    }
}

/// Executes the low-level statements of a deep plan.
///
/// The engine never begins, commits or rolls back: every call runs inside
/// whatever transaction the caller has open on the underlying connection.
pub trait Executor: Send + Sync {
    /// Dialect used when statements are rendered to SQL.
    fn dialect(&self) -> Dialect;

    /// Whether the backend can run a deep write as one atomic block program.
    fn supports_single_block(&self) -> bool {
        false
    }

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        cx: &Cx,
        statement: &Statement,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Run an auxiliary select.
    fn query(&self, cx: &Cx, select: &Select)
    -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;
}

/// A SQL connection able to prepare, run and stream statements.
pub trait Connection: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Prepare a statement for execution.
    fn prepare(
        &self,
        cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<PreparedStatement, Error>> + Send;

    /// Run a prepared statement and return the number of affected rows.
    fn execute_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Run a prepared statement and return all rows.
    fn query_prepared(
        &self,
        cx: &Cx,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;
}

/// [`Executor`] over a SQL [`Connection`].
///
/// Statements are rendered with the connection's dialect, prepared, then run.
#[derive(Debug)]
pub struct SqlExecutor<C> {
    conn: C,
    single_block: bool,
}

impl<C: Connection> SqlExecutor<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            single_block: false,
        }
    }

    /// Advertise single-block capability for this backend.
    #[must_use]
    pub fn with_single_block(mut self, enabled: bool) -> Self {
        self.single_block = enabled;
        self
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C: Connection> Executor for SqlExecutor<C> {
    fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    fn supports_single_block(&self) -> bool {
        self.single_block
    }

    #[tracing::instrument(level = "trace", skip(self, cx, statement), fields(table = statement.table()))]
    async fn execute(&self, cx: &Cx, statement: &Statement) -> Outcome<u64, Error> {
        let (sql, params) = statement.to_sql(self.conn.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "executing statement");
        let prepared = match self.conn.prepare(cx, &sql).await {
            Outcome::Ok(p) => p,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        self.conn.execute_prepared(cx, &prepared, &params).await
    }

    #[tracing::instrument(level = "trace", skip(self, cx, select), fields(table = %select.table))]
    async fn query(&self, cx: &Cx, select: &Select) -> Outcome<Vec<Row>, Error> {
        let (sql, params) = select.to_sql(self.conn.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "running select");
        let prepared = match self.conn.prepare(cx, &sql).await {
            Outcome::Ok(p) => p,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        self.conn.query_prepared(cx, &prepared, &params).await
    }
}
