//! Deep read-back.
//!
//! Reads a root entity and everything its template reaches, then
//! reassembles the rows into nested documents shaped like deep write
//! payloads: structured elements become objects, compositions become
//! objects or arrays, and foreign-key columns stay flat.

use crate::delete::resolve_target;
use crate::planner::DeepPlanner;
use crate::template::{EntryKind, Template, TargetInfo, WriteTemplate};
use deepsql_core::{
    Cx, Error, Executor, Filter, ForeignKeyPropagation, JsonMap, Outcome, Row, Select, Value,
};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

type LevelFuture<'a> = Pin<Box<dyn Future<Output = Outcome<Vec<JsonMap>, Error>> + 'a>>;

/// Read the rows of `entity` matching `filter` as nested documents.
///
/// Projections are read through their persisted entity, in its shape.
#[tracing::instrument(level = "debug", skip(cx, executor, planner, filter))]
pub async fn read_deep<E: Executor>(
    cx: &Cx,
    executor: &E,
    planner: &DeepPlanner,
    entity: &str,
    filter: Option<&Filter>,
) -> Outcome<Vec<JsonMap>, Error> {
    let (target, filter) = match resolve_target(planner.schema(), entity, filter) {
        Ok(resolved) => resolved,
        Err(e) => return Outcome::Err(e),
    };
    let template = match planner.write_template(target.name()) {
        Ok(template) => template,
        Err(e) => return Outcome::Err(e),
    };
    let rows = match read_level(cx, executor, &template, &template.root, filter).await {
        Outcome::Ok(rows) => rows,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    tracing::debug!(rows = rows.len(), "deep read complete");
    Outcome::Ok(rows)
}

fn read_level<'a, E: Executor>(
    cx: &'a Cx,
    executor: &'a E,
    template: &'a WriteTemplate,
    node: &'a Template,
    filter: Option<Filter>,
) -> LevelFuture<'a> {
    Box::pin(async move {
        let info = template.target(node.target_index);
        let select = Select::new(info.table(), info.column_names()).filter(filter);
        let rows = match executor.query(cx, &select).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::trace!(table = info.table(), rows = rows.len(), "read level");

        let nested: HashSet<&str> = node
            .entries
            .iter()
            .filter_map(|e| match &e.kind {
                EntryKind::Element { columns } => Some(columns),
                _ => None,
            })
            .flatten()
            .map(|c| c.name.as_str())
            .collect();

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut object = JsonMap::new();
            for column in &info.columns {
                let Some(value) = row.get_by_name(&column.name) else {
                    continue;
                };
                if nested.contains(column.name.as_str()) {
                    insert_path(&mut object, &column.path, value.to_json());
                } else {
                    object.insert(column.name.clone(), value.to_json());
                }
            }

            for (entry, sub) in node.compositions() {
                let EntryKind::Composition {
                    to_many,
                    propagations,
                    ..
                } = &entry.kind
                else {
                    continue;
                };
                let child = template.target(sub.target_index);
                let children = match child_filter(row, propagations, child) {
                    Some(filter) => match read_level(cx, executor, template, sub, Some(filter)).await {
                        Outcome::Ok(children) => children,
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    },
                    None => Vec::new(),
                };
                let value = if *to_many {
                    serde_json::Value::Array(children.into_iter().map(serde_json::Value::Object).collect())
                } else {
                    children
                        .into_iter()
                        .next()
                        .map_or(serde_json::Value::Null, serde_json::Value::Object)
                };
                object.insert(entry.field.clone(), value);
            }
            out.push(object);
        }
        Outcome::Ok(out)
    })
}

/// Filter selecting the children of one parent row, or `None` when the
/// composition has no foreign-key pairs or the parent's values are null.
fn child_filter(row: &Row, propagations: &[ForeignKeyPropagation], child: &TargetInfo) -> Option<Filter> {
    let mut terms = Vec::new();
    let mut scoped = false;
    for propagation in propagations {
        if let Some((parent_column, child_column)) = propagation.pair() {
            let value = row.get_by_name(parent_column)?;
            if value.is_null() {
                return None;
            }
            terms.push(Filter::eq(child_column, value.clone()));
            scoped = true;
        } else if let (Some(column), Some(constant)) =
            (&propagation.child_element, &propagation.parent_field_value)
        {
            let sql_type = &child.column(column)?.sql_type;
            terms.push(Filter::eq(column.clone(), Value::from_json(constant, sql_type)));
        }
    }
    if !scoped {
        return None;
    }
    terms.into_iter().reduce(Filter::and)
}

fn insert_path(object: &mut JsonMap, path: &[String], value: serde_json::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = object;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| serde_json::Value::Object(JsonMap::new()));
        if !slot.is_object() {
            *slot = serde_json::Value::Object(JsonMap::new());
        }
        let serde_json::Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}
