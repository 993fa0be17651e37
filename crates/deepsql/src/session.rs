//! Request-level API over a planner and an executor.
//!
//! A [`DeepSession`] plans each operation, falls back to plain single-table
//! statements when no deep handling applies, and runs the result inside the
//! caller's transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! let planner = Arc::new(DeepPlanner::new(schema, DeepConfig::default())?);
//! let session = DeepSession::new(executor, planner);
//!
//! let result = session.insert(&cx, "Orders", &json!({"ID": 1, "items": [{"qty": 5}]})).await;
//! let orders = session.read(&cx, "Orders", Some(&Filter::eq("ID", 1))).await;
//! ```

use deepsql_core::{
    Cx, DeepError, Error, Executor, Filter, Insert, JsonMap, Outcome, Result, SchemaError,
    Statement, Value,
};
use deepsql_plan::{
    DeepPlanner, Entries, ExecutionPlan, GeneratedKey, KeyGenerator, Operation, OperationKind,
    RequestContext, execute_plan, read_deep,
};
use std::sync::Arc;

/// Outcome of one write through a session.
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// Root rows written or deleted.
    pub rows: u64,
    context: RequestContext,
}

impl WriteResult {
    /// Keys generated while planning the write.
    pub fn generated_keys(&self) -> &[GeneratedKey] {
        self.context.generated_keys()
    }

    /// Rows touched in a table, owned rows and orphan deletes included.
    pub fn touched(&self, table: &str) -> u64 {
        self.context.touched(table)
    }

    pub fn into_context(self) -> RequestContext {
        self.context
    }
}

/// How a session runs one operation.
#[derive(Debug, Clone)]
pub enum SessionPlan {
    Deep(ExecutionPlan),
    /// Plain statements and the root row count they stand for.
    Generic { statements: Vec<Statement>, rows: u64 },
}

/// Deep operations against one executor.
#[derive(Debug)]
pub struct DeepSession<E: Executor> {
    executor: E,
    planner: Arc<DeepPlanner>,
    generator: Option<Arc<dyn KeyGenerator>>,
}

impl<E: Executor> DeepSession<E> {
    pub fn new(executor: E, planner: Arc<DeepPlanner>) -> Self {
        Self {
            executor,
            planner,
            generator: None,
        }
    }

    /// Use a specific key generator for every request (builder pattern).
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn planner(&self) -> &Arc<DeepPlanner> {
        &self.planner
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// A fresh request context matching this session's executor.
    pub fn request_context(&self) -> RequestContext {
        let ctx = self
            .planner
            .request_context()
            .single_block_capable(self.executor.supports_single_block());
        match &self.generator {
            Some(generator) => ctx.with_generator(Arc::clone(generator)),
            None => ctx,
        }
    }

    /// Plan an operation, deeply when possible.
    pub fn plan(&self, operation: &Operation, ctx: &mut RequestContext) -> Result<SessionPlan> {
        if let Some(plan) = self.planner.plan_deep_write(operation, ctx)? {
            return Ok(SessionPlan::Deep(plan));
        }
        let schema = self.planner.schema();
        let entity = schema.entity(&operation.entity)?;
        if entity.view().is_some() {
            return Err(SchemaError::invalid(format!(
                "'{}' is a projection; write its source entity instead",
                entity.name()
            ))
            .into());
        }
        match &operation.entries {
            Entries::Structured(_) => {
                let operation = operation.normalized()?;
                let rows = operation.rows().unwrap_or_default();
                let plan = self.planner.flat_plan(entity.name(), operation.kind)?;
                Ok(SessionPlan::Deep(ExecutionPlan::Flat(plan.bind(ctx, rows)?)))
            }
            Entries::Positional { columns, rows } => {
                let upsert = match operation.kind {
                    OperationKind::Insert => false,
                    OperationKind::Upsert => true,
                    other => {
                        return Err(DeepError::invalid_payload(
                            entity.name(),
                            format!("positional rows cannot be used for {}", other),
                        )
                        .into());
                    }
                };
                let table_columns = schema.columns(entity)?;
                let types = columns
                    .iter()
                    .map(|name| {
                        table_columns
                            .iter()
                            .find(|c| &c.name == name)
                            .map(|c| c.sql_type.clone())
                            .ok_or_else(|| SchemaError::element_not_found(entity.name(), name))
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let values: Vec<Vec<Value>> = rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .zip(&types)
                            .map(|(v, t)| Value::from_json(v, t))
                            .collect()
                    })
                    .collect();
                let count = values.len() as u64;
                let upsert_keys = if upsert {
                    Some(schema.key_columns(entity)?)
                } else {
                    None
                };
                Ok(SessionPlan::Generic {
                    statements: vec![Statement::Insert(Insert {
                        table: entity.name().to_string(),
                        columns: columns.clone(),
                        rows: values,
                        upsert_keys,
                    })],
                    rows: count,
                })
            }
        }
    }

    /// Plan and run one operation.
    #[tracing::instrument(level = "debug", skip(self, cx, operation), fields(entity = %operation.entity, kind = %operation.kind))]
    pub async fn run(&self, cx: &Cx, operation: &Operation) -> Outcome<WriteResult, Error> {
        let mut ctx = self.request_context();
        let plan = match self.plan(operation, &mut ctx) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::debug!(error = %e, "planning failed");
                return Outcome::Err(e);
            }
        };
        let rows = match &plan {
            SessionPlan::Deep(plan) => match execute_plan(cx, &self.executor, plan, &mut ctx).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            },
            SessionPlan::Generic { statements, rows } => {
                for statement in statements {
                    match self.executor.execute(cx, statement).await {
                        Outcome::Ok(n) => ctx.record_touched(statement.table(), n),
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                }
                *rows
            }
        };
        tracing::info!(rows = rows, "operation complete");
        Outcome::Ok(WriteResult { rows, context: ctx })
    }

    /// Insert one object or an array of objects.
    pub async fn insert(
        &self,
        cx: &Cx,
        entity: &str,
        payload: &serde_json::Value,
    ) -> Outcome<WriteResult, Error> {
        match Operation::from_json(OperationKind::Insert, entity, payload) {
            Ok(operation) => self.run(cx, &operation).await,
            Err(e) => Outcome::Err(e),
        }
    }

    /// Upsert one object or an array of objects, deleting orphaned children.
    pub async fn upsert(
        &self,
        cx: &Cx,
        entity: &str,
        payload: &serde_json::Value,
    ) -> Outcome<WriteResult, Error> {
        match Operation::from_json(OperationKind::Upsert, entity, payload) {
            Ok(operation) => self.run(cx, &operation).await,
            Err(e) => Outcome::Err(e),
        }
    }

    /// Update the row selected by a key predicate.
    pub async fn update(
        &self,
        cx: &Cx,
        entity: &str,
        filter: Filter,
        data: JsonMap,
    ) -> Outcome<WriteResult, Error> {
        self.run(cx, &Operation::update(entity, filter, data)).await
    }

    /// Delete matching rows and everything they own.
    pub async fn delete(
        &self,
        cx: &Cx,
        entity: &str,
        filter: Option<Filter>,
    ) -> Outcome<WriteResult, Error> {
        self.run(cx, &Operation::delete(entity, filter)).await
    }

    /// Read matching rows as nested documents.
    pub async fn read(
        &self,
        cx: &Cx,
        entity: &str,
        filter: Option<&Filter>,
    ) -> Outcome<Vec<JsonMap>, Error> {
        read_deep(cx, &self.executor, &self.planner, entity, filter).await
    }
}
