//! Flattening strategy.
//!
//! One insert or upsert shape per touched target. Binding stamps keys over
//! the payload and lets the template processor collect each target's rows.

use super::{OrphanCheck, OrphanRule, RowValues, build_writes, row_values};
use crate::context::RequestContext;
use crate::operation::OperationKind;
use crate::process::{FieldVisit, MatchOptions, PathSegment, Visitor, match_template};
use crate::propagate::fill_keys;
use crate::template::{Template, WriteTemplate};
use deepsql_core::{JsonMap, Result, Statement};
use std::fmt;
use std::sync::Arc;

/// Write shape of one touched target.
#[derive(Debug, Clone)]
pub struct FlatStep {
    /// Index into the template's targets.
    pub target: usize,
    pub table: String,
    pub columns: Vec<String>,
}

/// Cached flattening plan of one entity and operation kind.
#[derive(Debug)]
pub struct FlatPlan {
    pub kind: OperationKind,
    pub template: Arc<WriteTemplate>,
    /// Steps in dependency order.
    pub steps: Vec<FlatStep>,
    pub orphans: Vec<OrphanRule>,
}

impl FlatPlan {
    pub fn new(kind: OperationKind, template: Arc<WriteTemplate>, orphans: Vec<OrphanRule>) -> Self {
        let steps = template
            .order
            .iter()
            .map(|&i| {
                let target = template.target(i);
                FlatStep {
                    target: i,
                    table: target.table().to_string(),
                    columns: target.column_names(),
                }
            })
            .collect();
        Self {
            kind,
            template,
            steps,
            orphans,
        }
    }

    pub fn entity(&self) -> &str {
        self.template.entity()
    }

    pub fn is_upsert(&self) -> bool {
        self.kind == OperationKind::Upsert
    }

    /// Stamp keys over `rows` and collect every target's row batch.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.entity(), rows = rows.len()))]
    pub fn bind(self: &Arc<Self>, ctx: &mut RequestContext, rows: &[JsonMap]) -> Result<BoundFlat> {
        let stamped = fill_keys(ctx, &self.template, rows)?;
        let mut collector = Collector {
            plan: self,
            batches: vec![Vec::new(); self.template.targets.len()],
            orphan_checks: Vec::new(),
            root_rows: 0,
        };
        match_template(&self.template.root, &stamped, &mut collector, MatchOptions::default())?;

        let Collector {
            batches,
            orphan_checks,
            root_rows,
            ..
        } = collector;
        let mut writes = Vec::new();
        for step in &self.steps {
            let target = self.template.target(step.target);
            writes.extend(build_writes(target, &batches[step.target], self.is_upsert()));
        }
        tracing::debug!(
            statements = writes.len(),
            orphan_checks = orphan_checks.len(),
            "bound flat plan"
        );
        Ok(BoundFlat {
            plan: Arc::clone(self),
            orphan_checks,
            writes,
            root_rows,
        })
    }
}

impl fmt::Display for FlatPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "flatten {} {}", self.entity(), self.kind)?;
        for rule in &self.orphans {
            writeln!(
                f,
                "  delete orphans {} of {}.{}",
                self.template.target(rule.child).table(),
                self.template.target(rule.parent).table(),
                rule.field
            )?;
        }
        for step in &self.steps {
            writeln!(f, "  {} {} ({})", self.kind, step.table, step.columns.join(", "))?;
        }
        Ok(())
    }
}

/// A flattening plan bound to one request's payload.
#[derive(Debug, Clone)]
pub struct BoundFlat {
    pub plan: Arc<FlatPlan>,
    /// Checks run before any write.
    pub orphan_checks: Vec<OrphanCheck>,
    pub writes: Vec<Statement>,
    /// Root-level rows in the payload.
    pub root_rows: u64,
}

struct Collector<'p> {
    plan: &'p FlatPlan,
    batches: Vec<Vec<RowValues>>,
    orphan_checks: Vec<OrphanCheck>,
    root_rows: u64,
}

impl Visitor for Collector<'_> {
    fn visit_field(&mut self, visit: &FieldVisit<'_>) -> Result<()> {
        if !visit.entry.is_composition() {
            return Ok(());
        }
        let parent = visit.template.target_index;
        let rule = self
            .plan
            .orphans
            .iter()
            .enumerate()
            .find(|(_, r)| r.parent == parent && r.field == visit.field);
        if let Some((index, rule)) = rule {
            if let Some(check) = OrphanCheck::for_parent(index, rule, &self.plan.template, visit.row) {
                self.orphan_checks.push(check);
            }
        }
        Ok(())
    }

    fn visit_row(
        &mut self,
        template: &Template,
        row: &JsonMap,
        is_root: bool,
        _path: &[PathSegment<'_>],
    ) -> Result<()> {
        let target = self.plan.template.target(template.target_index);
        self.batches[template.target_index].push(row_values(&target.columns, row));
        if is_root {
            self.root_rows += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeepConfig;
    use crate::keygen::SequentialGenerator;
    use crate::template::build_write_template;
    use deepsql_core::{
        Association, Element, EntityDefinition, Insert, OnCondition, Schema, SqlType, Value,
    };
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntityDefinition::new("Orders")
                    .element(Element::scalar("ID", SqlType::Integer).key())
                    .element(Element::association(
                        "items",
                        Association::to_many("Items")
                            .composition()
                            .on(OnCondition::backlink("items", "order")),
                    )),
            )
            .entity(
                EntityDefinition::new("Items")
                    .element(Element::uuid_key("ID"))
                    .element(Element::association("order", Association::to_one("Orders")))
                    .element(Element::scalar("qty", SqlType::Integer)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn binds_one_insert_per_target() {
        let schema = schema();
        let t = Arc::new(build_write_template(&schema, "Orders", &DeepConfig::default()).unwrap());
        let plan = Arc::new(FlatPlan::new(OperationKind::Insert, t, Vec::new()));
        let mut ctx = RequestContext::default().with_generator(Arc::new(SequentialGenerator::new()));
        let rows = vec![
            json!({"ID": 1, "items": [{"qty": 5}, {"qty": 2}]})
                .as_object()
                .unwrap()
                .clone(),
        ];
        let bound = plan.bind(&mut ctx, &rows).unwrap();
        assert_eq!(bound.root_rows, 1);
        assert_eq!(bound.writes.len(), 2);
        let Statement::Insert(Insert { table, rows, .. }) = &bound.writes[1] else {
            panic!("expected insert");
        };
        assert_eq!(table, "Items");
        assert_eq!(rows.len(), 2);
        // ID, order_ID, qty
        assert_eq!(rows[0][1], Value::Int(1));
        assert_eq!(rows[1][2], Value::Int(2));
        assert!(matches!(rows[0][0], Value::Uuid(_)));
        assert!(bound.orphan_checks.is_empty());
    }

    #[test]
    fn explains_steps() {
        let schema = schema();
        let t = Arc::new(build_write_template(&schema, "Orders", &DeepConfig::default()).unwrap());
        let plan = FlatPlan::new(OperationKind::Upsert, t, Vec::new());
        assert_eq!(
            plan.to_string(),
            "flatten Orders upsert\n  upsert Orders (ID)\n  upsert Items (ID, order_ID, qty)\n"
        );
    }
}
