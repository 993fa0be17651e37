//! Deep write planning.
//!
//! Both strategies share the statement shapes built here: per-target
//! insert/upsert batches and orphan rules for to-many compositions.

pub mod block;
pub mod flatten;

use crate::delete::DeleteTemplate;
use crate::template::{TargetInfo, WriteTemplate};
use deepsql_core::{
    Column, EntityDefinition, Filter, Insert, JsonMap, Result, Select, Statement, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use block::{BlockAction, BlockProgram, BlockStep, BoundBlock, JsonPath};
pub use flatten::{BoundFlat, FlatPlan, FlatStep};

/// Column values of one extracted row; `None` where the payload had no value.
pub type RowValues = Vec<Option<Value>>;

/// Project a payload row onto a target's columns.
pub fn row_values(columns: &[Column], row: &JsonMap) -> RowValues {
    columns
        .iter()
        .map(|c| c.read(row).map(|v| Value::from_json(v, &c.sql_type)))
        .collect()
}

/// Statements writing `rows` into a target.
///
/// Inserts bind `DEFAULT` for absent columns. Upserts only touch the
/// columns a row carries, so rows are grouped by their set of present
/// columns, one statement per group.
pub fn build_writes(target: &TargetInfo, rows: &[RowValues], upsert: bool) -> Vec<Statement> {
    if rows.is_empty() {
        return Vec::new();
    }
    let names = target.column_names();
    if !upsert {
        let rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| v.clone().unwrap_or(Value::Default))
                    .collect()
            })
            .collect();
        return vec![Statement::Insert(Insert {
            table: target.table().to_string(),
            columns: names,
            rows,
            upsert_keys: None,
        })];
    }

    let mut groups: BTreeMap<Vec<bool>, Vec<Vec<Value>>> = BTreeMap::new();
    let mut order = Vec::new();
    for row in rows {
        let mask: Vec<bool> = row.iter().map(Option::is_some).collect();
        let values = row.iter().flatten().cloned().collect();
        if !groups.contains_key(&mask) {
            order.push(mask.clone());
        }
        groups.entry(mask).or_default().push(values);
    }
    order
        .into_iter()
        .filter_map(|mask| {
            let rows = groups.remove(&mask)?;
            let columns = names
                .iter()
                .zip(&mask)
                .filter(|(_, present)| **present)
                .map(|(name, _)| name.clone())
                .collect();
            Some(Statement::Insert(Insert {
                table: target.table().to_string(),
                columns,
                rows,
                upsert_keys: Some(target.keys.clone()),
            }))
        })
        .collect()
}

/// Deletes persisted children a to-many composition no longer submits.
#[derive(Debug, Clone)]
pub struct OrphanRule {
    pub parent: usize,
    pub child: usize,
    pub field: String,
    /// `(parent column, child column)` pairs scoping children to a parent.
    pub pairs: Vec<(String, String)>,
    /// Constants every child of the composition carries.
    pub child_constants: Vec<(String, Value)>,
    /// Payload paths of the parent rows.
    pub parent_paths: Vec<String>,
    /// Cascade removing an orphan and everything it owns.
    pub cascade: Arc<DeleteTemplate>,
}

/// Orphan rules for every to-many composition of a template.
pub fn orphan_rules(
    template: &WriteTemplate,
    mut cascade: impl FnMut(&str) -> Result<Arc<DeleteTemplate>>,
) -> Result<Vec<OrphanRule>> {
    let mut rules = Vec::new();
    for edge in template.edges.iter().filter(|e| e.to_many) {
        let pairs: Vec<(String, String)> = edge
            .pairs()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        if pairs.is_empty() {
            tracing::warn!(
                parent = template.target(edge.parent).table(),
                field = %edge.field,
                "composition has no foreign-key pairs; orphans are not deleted"
            );
            continue;
        }
        let child = template.target(edge.child);
        let child_constants = edge
            .propagations
            .iter()
            .filter(|p| p.pair().is_none())
            .filter_map(|p| match (&p.child_element, &p.parent_field_value) {
                (Some(column), Some(value)) => {
                    let sql_type = child.column(column).map(|c| c.sql_type.clone())?;
                    Some((column.clone(), Value::from_json(value, &sql_type)))
                }
                _ => None,
            })
            .collect();
        rules.push(OrphanRule {
            parent: edge.parent,
            child: edge.child,
            field: edge.field.clone(),
            pairs,
            child_constants,
            parent_paths: edge.parent_paths.clone(),
            cascade: cascade(child.table())?,
        });
    }
    Ok(rules)
}

/// One parent row's orphan check: persisted children minus submitted ones.
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanCheck {
    /// Index into the plan's orphan rules.
    pub rule: usize,
    /// Persisted child keys of the parent.
    pub select: Select,
    /// Keys of the submitted children.
    pub submitted: Vec<Vec<Value>>,
}

impl OrphanCheck {
    /// Check a parent row, if it carries the composition at all.
    pub fn for_parent(
        index: usize,
        rule: &OrphanRule,
        template: &WriteTemplate,
        parent: &JsonMap,
    ) -> Option<Self> {
        let children = parent.get(&rule.field)?;
        let parent_info = template.target(rule.parent);
        let child_info = template.target(rule.child);

        let mut terms = Vec::with_capacity(rule.pairs.len() + rule.child_constants.len());
        for (parent_col, child_col) in &rule.pairs {
            let column = parent_info.column(parent_col)?;
            let value = column.read(parent)?;
            if value.is_null() {
                return None;
            }
            terms.push(Filter::eq(child_col.clone(), Value::from_json(value, &column.sql_type)));
        }
        for (column, value) in &rule.child_constants {
            terms.push(Filter::eq(column.clone(), value.clone()));
        }
        let filter = if terms.len() == 1 {
            terms.pop()
        } else {
            Some(Filter::And(terms))
        };

        let key_columns: Vec<&Column> = child_info
            .keys
            .iter()
            .filter_map(|k| child_info.column(k))
            .collect();
        let submitted = children
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_object)
                    .filter_map(|child| {
                        key_columns
                            .iter()
                            .map(|c| c.read(child).map(|v| Value::from_json(v, &c.sql_type)))
                            .collect::<Option<Vec<_>>>()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            rule: index,
            select: Select::new(child_info.table(), child_info.keys.clone()).filter(filter),
            submitted,
        })
    }

    /// Persisted keys that were not submitted.
    pub fn orphans(&self, persisted: &[Vec<Value>]) -> Vec<Vec<Value>> {
        persisted
            .iter()
            .filter(|key| {
                !self.submitted.iter().any(|s| {
                    s.len() == key.len() && s.iter().zip(key.iter()).all(|(a, b)| a.sql_eq(b))
                })
            })
            .cloned()
            .collect()
    }

    /// Cascade deleting the given orphan keys.
    pub fn delete_statements(&self, rule: &OrphanRule, orphans: Vec<Vec<Value>>) -> Vec<Statement> {
        let filter = Filter::InValues {
            columns: self.select.columns.clone(),
            rows: orphans,
        };
        rule.cascade.bind(Some(&filter))
    }
}

/// Is this entity a deep write target at all?
pub fn is_deep(entity: &EntityDefinition) -> bool {
    entity.has_compositions() && entity.view().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeepConfig;
    use crate::delete::build_delete_template;
    use crate::template::build_write_template;
    use deepsql_core::{Association, Element, OnCondition, Schema, SqlType};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntityDefinition::new("Orders")
                    .element(Element::scalar("ID", SqlType::Integer).key())
                    .element(Element::scalar("note", SqlType::Text))
                    .element(Element::association(
                        "items",
                        Association::to_many("Items")
                            .composition()
                            .on(OnCondition::backlink("items", "order")),
                    )),
            )
            .entity(
                EntityDefinition::new("Items")
                    .element(Element::scalar("ID", SqlType::Integer).key())
                    .element(Element::association("order", Association::to_one("Orders")))
                    .element(Element::scalar("qty", SqlType::Integer)),
            )
            .build()
            .unwrap()
    }

    fn obj(value: serde_json::Value) -> JsonMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn insert_defaults_absent_columns() {
        let schema = schema();
        let t = build_write_template(&schema, "Orders", &DeepConfig::default()).unwrap();
        let orders = t.target_by_name("Orders").unwrap();
        let rows = vec![row_values(&orders.columns, &obj(json!({"ID": 1})))];
        let stmts = build_writes(orders, &rows, false);
        assert_eq!(
            stmts,
            vec![Statement::Insert(Insert {
                table: "Orders".into(),
                columns: vec!["ID".into(), "note".into()],
                rows: vec![vec![Value::Int(1), Value::Default]],
                upsert_keys: None,
            })]
        );
    }

    #[test]
    fn upsert_groups_by_present_columns() {
        let schema = schema();
        let t = build_write_template(&schema, "Orders", &DeepConfig::default()).unwrap();
        let items = t.target_by_name("Items").unwrap();
        let rows: Vec<RowValues> = [
            json!({"ID": 1, "order_ID": 1, "qty": 2}),
            json!({"ID": 2, "order_ID": 1}),
            json!({"ID": 3, "order_ID": 1, "qty": 4}),
        ]
        .into_iter()
        .map(|r| row_values(&items.columns, &obj(r)))
        .collect();
        let stmts = build_writes(items, &rows, true);
        assert_eq!(stmts.len(), 2);
        let Statement::Insert(first) = &stmts[0] else {
            panic!("expected insert");
        };
        assert_eq!(first.columns, vec!["ID", "order_ID", "qty"]);
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.upsert_keys, Some(vec!["ID".to_string()]));
        let Statement::Insert(second) = &stmts[1] else {
            panic!("expected insert");
        };
        assert_eq!(second.columns, vec!["ID", "order_ID"]);
    }

    #[test]
    fn orphan_check_scopes_to_parent() {
        let schema = schema();
        let config = DeepConfig::default();
        let t = build_write_template(&schema, "Orders", &config).unwrap();
        let rules = orphan_rules(&t, |name| {
            build_delete_template(&schema, name, &config).map(Arc::new)
        })
        .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].pairs, vec![("ID".to_string(), "order_ID".to_string())]);

        let parent = obj(json!({"ID": 1, "items": [{"ID": 10}, {"qty": 1}]}));
        let check = OrphanCheck::for_parent(0, &rules[0], &t, &parent).unwrap();
        assert_eq!(
            check.select,
            Select::new("Items", vec!["ID".into()]).filter(Some(Filter::eq("order_ID", 1)))
        );
        assert_eq!(check.submitted, vec![vec![Value::Int(10)]]);

        let orphans = check.orphans(&[vec![Value::BigInt(10)], vec![Value::BigInt(11)]]);
        assert_eq!(orphans, vec![vec![Value::BigInt(11)]]);
        let stmts = check.delete_statements(&rules[0], orphans);
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].table(), "Items");

        // parents that do not carry the composition keep their children
        assert!(OrphanCheck::for_parent(0, &rules[0], &t, &obj(json!({"ID": 2}))).is_none());
    }
}
