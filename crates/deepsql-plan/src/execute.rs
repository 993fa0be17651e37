//! Running execution plans against an [`Executor`].
//!
//! Every statement runs inside whatever transaction the caller has open.
//! The first failure is returned as is; the caller owns rollback.

use crate::context::RequestContext;
use crate::planner::ExecutionPlan;
use crate::write::{BlockAction, OrphanCheck, OrphanRule};
use deepsql_core::{Cx, Error, Executor, Outcome, Statement, Value};

/// Execute a plan and return the affected root row count.
///
/// Writes return the number of root-level rows in the payload; deletes
/// return the number of root rows deleted. Rows touched per table are
/// recorded on `ctx`.
#[tracing::instrument(level = "debug", skip(cx, executor, plan, ctx), fields(entity = plan.entity()))]
pub async fn execute_plan<E: Executor>(
    cx: &Cx,
    executor: &E,
    plan: &ExecutionPlan,
    ctx: &mut RequestContext,
) -> Outcome<u64, Error> {
    match plan {
        ExecutionPlan::Flat(bound) => {
            match run_orphan_checks(cx, executor, &bound.plan.orphans, &bound.orphan_checks, ctx).await
            {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            match run_statements(cx, executor, &bound.writes, ctx).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            tracing::debug!(rows = bound.root_rows, "deep write complete");
            Outcome::Ok(bound.root_rows)
        }
        ExecutionPlan::Block(bound) => {
            let actions = match bound.actions() {
                Ok(actions) => actions,
                Err(e) => return Outcome::Err(e),
            };
            let mut count = 0;
            for action in &actions {
                match action {
                    BlockAction::Orphans(checks) => {
                        match run_orphan_checks(cx, executor, &bound.program.orphans, checks, ctx).await
                        {
                            Outcome::Ok(()) => {}
                            Outcome::Err(e) => return Outcome::Err(e),
                            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                            Outcome::Panicked(p) => return Outcome::Panicked(p),
                        }
                    }
                    BlockAction::Write(statements) => {
                        match run_statements(cx, executor, statements, ctx).await {
                            Outcome::Ok(_) => {}
                            Outcome::Err(e) => return Outcome::Err(e),
                            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                            Outcome::Panicked(p) => return Outcome::Panicked(p),
                        }
                    }
                    BlockAction::Count(rows) => count = *rows,
                }
            }
            tracing::debug!(rows = count, "block program complete");
            Outcome::Ok(count)
        }
        ExecutionPlan::Delete(bound) => {
            let deleted = match run_statements(cx, executor, &bound.statements, ctx).await {
                Outcome::Ok(last) => last,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            tracing::debug!(rows = deleted, "deep delete complete");
            Outcome::Ok(deleted)
        }
    }
}

/// Run statements in order; returns the last statement's count.
async fn run_statements<E: Executor>(
    cx: &Cx,
    executor: &E,
    statements: &[Statement],
    ctx: &mut RequestContext,
) -> Outcome<u64, Error> {
    let mut last = 0;
    for statement in statements {
        match executor.execute(cx, statement).await {
            Outcome::Ok(n) => {
                ctx.record_touched(statement.table(), n);
                last = n;
            }
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }
    Outcome::Ok(last)
}

/// Delete persisted children the payload no longer submits.
async fn run_orphan_checks<E: Executor>(
    cx: &Cx,
    executor: &E,
    rules: &[OrphanRule],
    checks: &[OrphanCheck],
    ctx: &mut RequestContext,
) -> Outcome<(), Error> {
    for check in checks {
        let Some(rule) = rules.get(check.rule) else {
            continue;
        };
        let persisted: Vec<Vec<Value>> = match executor.query(cx, &check.select).await {
            Outcome::Ok(rows) => rows
                .iter()
                .map(|row| row.project(&check.select.columns))
                .collect(),
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let orphans = check.orphans(&persisted);
        if orphans.is_empty() {
            continue;
        }
        tracing::debug!(
            table = %check.select.table,
            field = %rule.field,
            orphans = orphans.len(),
            "deleting orphaned children"
        );
        let statements = check.delete_statements(rule, orphans);
        match run_statements(cx, executor, &statements, ctx).await {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }
    Outcome::Ok(())
}
