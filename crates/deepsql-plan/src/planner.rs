//! Deep operation planning entry points.
//!
//! [`DeepPlanner`] owns the schema, the configuration and every plan cache.
//! Plans are immutable and shared: repeated requests against the same
//! entity and operation kind receive the identical `Arc`.

use crate::cache::PlanCache;
use crate::config::{DeepConfig, WriteStrategy};
use crate::context::RequestContext;
use crate::delete::{DeleteTemplate, build_delete_template, resolve_target};
use crate::operation::{Operation, OperationKind};
use crate::template::{WriteTemplate, build_write_template};
use crate::write::{
    BlockProgram, BoundBlock, BoundFlat, FlatPlan, OrphanRule, is_deep, orphan_rules,
};
use deepsql_core::{DeepError, Filter, Result, Schema, Statement};
use std::fmt;
use std::sync::Arc;

type PlanKey = (String, OperationKind);

/// Plans deep writes and deletes against one schema.
#[derive(Debug)]
pub struct DeepPlanner {
    schema: Arc<Schema>,
    config: DeepConfig,
    templates: PlanCache<String, WriteTemplate>,
    flat_plans: PlanCache<PlanKey, FlatPlan>,
    block_programs: PlanCache<PlanKey, BlockProgram>,
    delete_templates: PlanCache<String, DeleteTemplate>,
}

impl DeepPlanner {
    pub fn new(schema: Arc<Schema>, config: DeepConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            entities = schema.len(),
            strategy = ?config.strategy,
            depth_limit = config.default_depth_limit,
            "deep planner ready"
        );
        Ok(Self {
            schema,
            config,
            templates: PlanCache::new(),
            flat_plans: PlanCache::new(),
            block_programs: PlanCache::new(),
            delete_templates: PlanCache::new(),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &DeepConfig {
        &self.config
    }

    /// A fresh context for one request.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new(&self.config)
    }

    /// The cached write template of an entity.
    pub fn write_template(&self, entity: &str) -> Result<Arc<WriteTemplate>> {
        let name = self.schema.entity(entity)?.name().to_string();
        self.templates.get_or_try_insert_with(&name, || {
            build_write_template(&self.schema, &name, &self.config)
        })
    }

    /// The cached delete cascade of a persisted entity.
    pub fn delete_template(&self, entity: &str) -> Result<Arc<DeleteTemplate>> {
        let name = self.schema.entity(entity)?.name().to_string();
        self.delete_templates.get_or_try_insert_with(&name, || {
            build_delete_template(&self.schema, &name, &self.config)
        })
    }

    /// The cached flattening plan of an entity and write kind.
    pub fn flat_plan(&self, entity: &str, kind: OperationKind) -> Result<Arc<FlatPlan>> {
        let template = self.write_template(entity)?;
        let key = (template.entity().to_string(), kind);
        self.flat_plans.get_or_try_insert_with(&key, || {
            let orphans = self.orphan_rules(kind, &template)?;
            Ok(FlatPlan::new(kind, Arc::clone(&template), orphans))
        })
    }

    /// The cached single-block program of an entity and write kind.
    pub fn block_program(&self, entity: &str, kind: OperationKind) -> Result<Arc<BlockProgram>> {
        let template = self.write_template(entity)?;
        let key = (template.entity().to_string(), kind);
        self.block_programs.get_or_try_insert_with(&key, || {
            let orphans = self.orphan_rules(kind, &template)?;
            BlockProgram::new(kind, Arc::clone(&template), orphans)
        })
    }

    fn orphan_rules(&self, kind: OperationKind, template: &WriteTemplate) -> Result<Vec<OrphanRule>> {
        if kind != OperationKind::Upsert {
            return Ok(Vec::new());
        }
        orphan_rules(template, |name| self.delete_template(name))
    }

    /// Plan a deep write.
    ///
    /// Returns `None` when the operation should be handled generically: the
    /// target has no compositions, is a projection, or the payload is
    /// positional. Deletes are planned as deep deletes.
    #[tracing::instrument(level = "debug", skip(self, operation, ctx), fields(entity = %operation.entity, kind = %operation.kind))]
    pub fn plan_deep_write(
        &self,
        operation: &Operation,
        ctx: &mut RequestContext,
    ) -> Result<Option<ExecutionPlan>> {
        if operation.kind == OperationKind::Delete {
            return self.plan_deep_delete(operation).map(Some);
        }
        if operation.is_positional() {
            tracing::debug!("positional payload; handled generically");
            return Ok(None);
        }
        let entity = self.schema.entity(&operation.entity)?;
        if !is_deep(entity) {
            tracing::debug!("no compositions; handled generically");
            return Ok(None);
        }

        let operation = operation.normalized()?;
        let rows = operation.rows().unwrap_or_default();
        let plan = match self.config.strategy.resolve(ctx.supports_single_block()) {
            WriteStrategy::SingleBlock => {
                let program = self.block_program(entity.name(), operation.kind)?;
                ExecutionPlan::Block(program.bind(ctx, rows)?)
            }
            WriteStrategy::Flatten | WriteStrategy::Auto => {
                let plan = self.flat_plan(entity.name(), operation.kind)?;
                ExecutionPlan::Flat(plan.bind(ctx, rows)?)
            }
        };
        tracing::debug!(strategy = ?plan.strategy(), rows = rows.len(), "planned deep write");
        Ok(Some(plan))
    }

    /// Plan a cascading delete.
    #[tracing::instrument(level = "debug", skip(self, operation), fields(entity = %operation.entity))]
    pub fn plan_deep_delete(&self, operation: &Operation) -> Result<ExecutionPlan> {
        if operation.kind != OperationKind::Delete {
            return Err(DeepError::invalid_payload(
                &operation.entity,
                format!("cannot plan a {} as a delete", operation.kind),
            )
            .into());
        }
        let (target, filter) = resolve_target(&self.schema, &operation.entity, operation.filter.as_ref())?;
        let template = self.delete_template(target.name())?;
        let statements = template.bind(filter.as_ref());
        tracing::debug!(
            target = target.name(),
            statements = statements.len(),
            "planned deep delete"
        );
        Ok(ExecutionPlan::Delete(BoundDelete {
            template,
            filter,
            statements,
        }))
    }

    /// Drop every cached template and plan.
    pub fn clear_caches(&self) {
        self.templates.clear();
        self.flat_plans.clear();
        self.block_programs.clear();
        self.delete_templates.clear();
    }
}

/// A delete cascade bound to one root predicate.
#[derive(Debug, Clone)]
pub struct BoundDelete {
    pub template: Arc<DeleteTemplate>,
    /// Root predicate, remapped onto the persisted target.
    pub filter: Option<Filter>,
    /// Deletes in execution order; the last one removes the root rows.
    pub statements: Vec<Statement>,
}

/// A planned deep operation, ready for execution.
#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    Flat(BoundFlat),
    Block(BoundBlock),
    Delete(BoundDelete),
}

impl ExecutionPlan {
    pub fn entity(&self) -> &str {
        match self {
            ExecutionPlan::Flat(bound) => bound.plan.entity(),
            ExecutionPlan::Block(bound) => bound.program.entity(),
            ExecutionPlan::Delete(bound) => &bound.template.entity,
        }
    }

    /// Write strategy of a write plan.
    pub fn strategy(&self) -> Option<WriteStrategy> {
        match self {
            ExecutionPlan::Flat(_) => Some(WriteStrategy::Flatten),
            ExecutionPlan::Block(_) => Some(WriteStrategy::SingleBlock),
            ExecutionPlan::Delete(_) => None,
        }
    }

    pub fn flat_plan(&self) -> Option<&Arc<FlatPlan>> {
        match self {
            ExecutionPlan::Flat(bound) => Some(&bound.plan),
            _ => None,
        }
    }

    pub fn block_program(&self) -> Option<&Arc<BlockProgram>> {
        match self {
            ExecutionPlan::Block(bound) => Some(&bound.program),
            _ => None,
        }
    }

    pub fn delete_template(&self) -> Option<&Arc<DeleteTemplate>> {
        match self {
            ExecutionPlan::Delete(bound) => Some(&bound.template),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPlan::Flat(bound) => write!(f, "{}", bound.plan),
            ExecutionPlan::Block(bound) => write!(f, "{}", bound.program),
            ExecutionPlan::Delete(bound) => write!(f, "{}", bound.template),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::SequentialGenerator;
    use deepsql_core::{Association, Element, EntityDefinition, OnCondition, Projection, SqlType};
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        let schema = Schema::builder()
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
                    .element(Element::uuid_key("ID"))
                    .element(Element::association("order", Association::to_one("Orders")))
                    .element(Element::scalar("qty", SqlType::Integer)),
            )
            .entity(
                EntityDefinition::new("OrderHeaders")
                    .element(Element::scalar("ID", SqlType::Integer).key())
                    .element(Element::scalar("note", SqlType::Text))
                    .projection(Projection::of("Orders").identity(&["ID", "note"])),
            )
            .build()
            .unwrap();
        Arc::new(schema)
    }

    fn rows(value: serde_json::Value) -> Vec<deepsql_core::JsonMap> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn context() -> RequestContext {
        RequestContext::default().with_generator(Arc::new(SequentialGenerator::new()))
    }

    #[test]
    fn plans_are_cached_per_entity_and_kind() {
        let planner = DeepPlanner::new(schema(), DeepConfig::default()).unwrap();
        let op = Operation::insert("Orders", rows(json!([{"ID": 1, "items": [{"qty": 1}]}])));

        let first = planner.plan_deep_write(&op, &mut context()).unwrap().unwrap();
        let second = planner.plan_deep_write(&op, &mut context()).unwrap().unwrap();
        assert!(Arc::ptr_eq(
            first.flat_plan().unwrap(),
            second.flat_plan().unwrap()
        ));

        let upsert = Operation::upsert("Orders", rows(json!([{"ID": 1}])));
        let third = planner.plan_deep_write(&upsert, &mut context()).unwrap().unwrap();
        assert!(!Arc::ptr_eq(first.flat_plan().unwrap(), third.flat_plan().unwrap()));
        assert!(Arc::ptr_eq(
            &first.flat_plan().unwrap().template,
            &third.flat_plan().unwrap().template
        ));
    }

    #[test]
    fn generic_operations_are_not_planned() {
        let planner = DeepPlanner::new(schema(), DeepConfig::default()).unwrap();
        let flat = Operation::insert("Items", rows(json!([{"qty": 1}])));
        assert!(planner.plan_deep_write(&flat, &mut context()).unwrap().is_none());

        let positional = Operation::positional(
            OperationKind::Insert,
            "Orders",
            vec!["ID".into()],
            vec![vec![json!(1)]],
        );
        assert!(planner.plan_deep_write(&positional, &mut context()).unwrap().is_none());

        let view = Operation::insert("OrderHeaders", rows(json!([{"ID": 1}])));
        assert!(planner.plan_deep_write(&view, &mut context()).unwrap().is_none());
    }

    #[test]
    fn strategy_follows_executor_capability() {
        let planner = DeepPlanner::new(schema(), DeepConfig::default()).unwrap();
        let op = Operation::upsert("Orders", rows(json!([{"ID": 1, "items": []}])));

        let mut ctx = context().single_block_capable(true);
        let plan = planner.plan_deep_write(&op, &mut ctx).unwrap().unwrap();
        assert_eq!(plan.strategy(), Some(WriteStrategy::SingleBlock));

        let forced = DeepPlanner::new(schema(), DeepConfig::default().strategy(WriteStrategy::Flatten))
            .unwrap();
        let mut ctx = context().single_block_capable(true);
        let plan = forced.plan_deep_write(&op, &mut ctx).unwrap().unwrap();
        assert_eq!(plan.strategy(), Some(WriteStrategy::Flatten));
    }

    #[test]
    fn update_is_planned_as_upsert() {
        let planner = DeepPlanner::new(schema(), DeepConfig::default()).unwrap();
        let data = json!({"note": "x", "items": []}).as_object().unwrap().clone();
        let op = Operation::update("Orders", Filter::eq("ID", 4), data);
        let plan = planner.plan_deep_write(&op, &mut context()).unwrap().unwrap();
        let flat = plan.flat_plan().unwrap();
        assert_eq!(flat.kind, OperationKind::Upsert);
        assert_eq!(flat.orphans.len(), 1);
        let ExecutionPlan::Flat(bound) = plan else {
            panic!("expected flat plan");
        };
        assert_eq!(bound.orphan_checks.len(), 1);
    }

    #[test]
    fn deletes_resolve_projections() {
        let planner = DeepPlanner::new(schema(), DeepConfig::default()).unwrap();
        let op = Operation::delete("OrderHeaders", Some(Filter::eq("ID", 1)));
        let plan = planner.plan_deep_write(&op, &mut context()).unwrap().unwrap();
        assert_eq!(plan.entity(), "Orders");
        let ExecutionPlan::Delete(bound) = &plan else {
            panic!("expected delete plan");
        };
        assert_eq!(bound.template.tables(), vec!["Items", "Orders"]);
        assert_eq!(bound.filter, Some(Filter::eq("ID", 1)));
        assert!(planner.plan_deep_delete(&Operation::insert("Orders", Vec::new())).is_err());
    }

    #[test]
    fn rejects_invalid_config() {
        let err = DeepPlanner::new(schema(), DeepConfig::default().depth_limit(0)).unwrap_err();
        assert!(err.is_config_error());
    }
}
