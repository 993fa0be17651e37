//! Deep delete planning.
//!
//! A delete on a root entity cascades depth-first through its compositions.
//! Owned rows are always removed before the rows owning them, and every
//! owned table is reached through nested `IN (SELECT ..)` filters along its
//! composition chain, so the whole cascade is fixed before anything runs.

use crate::config::DeepConfig;
use crate::foreign_keys::resolve;
use deepsql_core::{
    Column, DeepError, Delete, Element, EntityDefinition, Filter, Projection, Result, Schema,
    SchemaError, Select, SqlType, Statement, Value,
};
use std::fmt;
use std::sync::Arc;

/// Projections pointing at projections deeper than this are rejected.
const MAX_PROJECTION_HOPS: usize = 8;

/// How an owned table is reached from its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteLink {
    /// Owning table.
    pub parent: String,
    /// `(parent column, child column)` pairs.
    pub pairs: Vec<(String, String)>,
    /// Constants the owned rows must carry.
    pub child_constants: Vec<(String, Value)>,
    /// Constants the owning rows must carry.
    pub parent_constants: Vec<(String, Value)>,
}

/// One delete of the cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStep {
    pub table: String,
    /// Links from the root down to `table`; empty for the root itself.
    pub links: Vec<DeleteLink>,
}

impl DeleteStep {
    /// Filter selecting this step's rows for a root predicate.
    pub fn filter(&self, root: Option<&Filter>) -> Option<Filter> {
        let mut filter = root.cloned();
        for link in &self.links {
            let parent_columns = link.pairs.iter().map(|(p, _)| p.clone()).collect();
            let child_columns = link.pairs.iter().map(|(_, c)| c.clone()).collect();
            let select = Select::new(link.parent.clone(), parent_columns)
                .filter(conjoin(filter, &link.parent_constants));
            filter = conjoin(
                Some(Filter::In {
                    columns: child_columns,
                    select: Box::new(select),
                }),
                &link.child_constants,
            );
        }
        filter
    }
}

/// The cached cascade shape of one persisted entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteTemplate {
    pub entity: String,
    /// Deletes in execution order, owned rows first.
    pub steps: Vec<DeleteStep>,
}

impl DeleteTemplate {
    /// Bind the cascade to a root predicate.
    pub fn bind(&self, filter: Option<&Filter>) -> Vec<Statement> {
        self.steps
            .iter()
            .map(|step| {
                Statement::Delete(Delete {
                    table: step.table.clone(),
                    filter: step.filter(filter),
                })
            })
            .collect()
    }

    pub fn tables(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.table.as_str()).collect()
    }
}

impl fmt::Display for DeleteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "delete {}", self.entity)?;
        for step in &self.steps {
            write!(f, "  {}", step.table)?;
            for link in step.links.iter().rev() {
                let pairs: Vec<String> = link
                    .pairs
                    .iter()
                    .map(|(p, c)| format!("{} = {}", c, p))
                    .collect();
                write!(f, " <- {}({})", link.parent, pairs.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Walk the compositions of a persisted entity into a delete cascade.
#[tracing::instrument(level = "debug", skip(schema, config))]
pub fn build_delete_template(
    schema: &Schema,
    entity: &str,
    config: &DeepConfig,
) -> Result<DeleteTemplate> {
    let root = schema.entity(entity)?;
    let mut cascade = Cascade {
        schema,
        config,
        chain: vec![(root.name().to_string(), None)],
        links: Vec::new(),
        steps: Vec::new(),
    };
    cascade.visit(root)?;
    tracing::debug!(entity = entity, steps = cascade.steps.len(), "built delete cascade");
    Ok(DeleteTemplate {
        entity: root.name().to_string(),
        steps: cascade.steps,
    })
}

/// Resolve a query target through projections onto its persisted entity,
/// remapping the predicate's columns on the way.
pub fn resolve_target<'s>(
    schema: &'s Schema,
    entity: &str,
    filter: Option<&Filter>,
) -> Result<(&'s Arc<EntityDefinition>, Option<Filter>)> {
    let mut current = schema.entity(entity)?;
    let mut filter = filter.cloned();
    let mut hops = 0;
    while let Some(view) = current.view() {
        hops += 1;
        if hops > MAX_PROJECTION_HOPS {
            return Err(SchemaError::invalid(format!(
                "projection chain of '{}' does not reach a persisted entity",
                entity
            ))
            .into());
        }
        let source = schema.entity(&view.source)?;
        if let Some(f) = &filter {
            let mapped = f
                .map_columns(&|column: &str| map_column(view, column))
                .map_err(|column| DeepError::missing_mapping(current.name(), source.name(), &column))?;
            filter = Some(mapped);
        }
        tracing::trace!(view = current.name(), source = source.name(), "resolved projection");
        current = source;
    }
    Ok((current, filter))
}

fn map_column(view: &Projection, column: &str) -> Option<String> {
    if let Some(source) = view.source_element(column) {
        return Some(source.to_string());
    }
    // foreign-key and structured leaves: map the owning element
    column.match_indices('_').find_map(|(i, _)| {
        view.source_element(&column[..i])
            .map(|source| format!("{}{}", source, &column[i..]))
    })
}

fn conjoin(filter: Option<Filter>, constants: &[(String, Value)]) -> Option<Filter> {
    constants.iter().fold(filter, |acc, (column, value)| {
        let term = Filter::eq(column.clone(), value.clone());
        Some(match acc {
            Some(f) => f.and(term),
            None => term,
        })
    })
}

struct Cascade<'s> {
    schema: &'s Schema,
    config: &'s DeepConfig,
    /// Entities on the current path with the composition that reached them.
    chain: Vec<(String, Option<(String, String)>)>,
    links: Vec<DeleteLink>,
    steps: Vec<DeleteStep>,
}

impl Cascade<'_> {
    fn visit(&mut self, entity: &EntityDefinition) -> Result<()> {
        let schema = self.schema;
        for (element, assoc) in entity.compositions() {
            let target = schema.entity(&assoc.target)?;
            if target.is_skipped() {
                tracing::trace!(owner = entity.name(), field = %element.name, "skipping persistence-skip child");
                continue;
            }
            let via = (entity.name().to_string(), element.name.clone());
            if target.name() == entity.name() {
                let limit = assoc.depth_limit.unwrap_or(self.config.default_depth_limit);
                let seen = self
                    .chain
                    .iter()
                    .filter(|(_, v)| v.as_ref() == Some(&via))
                    .count();
                if seen >= limit {
                    tracing::debug!(
                        owner = entity.name(),
                        field = %element.name,
                        limit = limit,
                        "hierarchy depth limit reached; cascade stops"
                    );
                    continue;
                }
            } else if self.chain.iter().any(|(name, _)| name == target.name()) {
                let mut names: Vec<String> = self.chain.iter().map(|(name, _)| name.clone()).collect();
                names.push(target.name().to_string());
                return Err(DeepError::circular(names).into());
            }

            let Some(link) = link(schema, entity, element, target)? else {
                tracing::warn!(
                    owner = entity.name(),
                    field = %element.name,
                    "composition has no foreign-key pairs; owned rows are not cascaded"
                );
                continue;
            };
            self.chain.push((target.name().to_string(), Some(via)));
            self.links.push(link);
            let result = self.visit(target);
            self.links.pop();
            self.chain.pop();
            result?;
        }
        self.steps.push(DeleteStep {
            table: entity.name().to_string(),
            links: self.links.clone(),
        });
        Ok(())
    }
}

fn link(
    schema: &Schema,
    owner: &EntityDefinition,
    element: &Element,
    child: &EntityDefinition,
) -> Result<Option<DeleteLink>> {
    let propagations = resolve(schema, owner, element)?;
    let parent_columns = schema.columns(owner)?;
    let child_columns = schema.columns(child)?;
    let mut link = DeleteLink {
        parent: owner.name().to_string(),
        pairs: Vec::new(),
        child_constants: Vec::new(),
        parent_constants: Vec::new(),
    };
    for prop in propagations.iter() {
        if let Some((parent, child)) = prop.pair() {
            link.pairs.push((parent.to_string(), child.to_string()));
        } else if let (Some(column), Some(value)) = (&prop.child_element, &prop.parent_field_value) {
            link.child_constants
                .push((column.clone(), typed(&child_columns, column, value)));
        } else if let (Some(column), Some(value)) = (&prop.parent_element, &prop.child_field_value) {
            link.parent_constants
                .push((column.clone(), typed(&parent_columns, column, value)));
        }
    }
    Ok((!link.pairs.is_empty()).then_some(link))
}

fn typed(columns: &[Column], name: &str, value: &serde_json::Value) -> Value {
    let sql_type = columns
        .iter()
        .find(|c| c.name == name)
        .map_or(&SqlType::Text, |c| &c.sql_type);
    Value::from_json(value, sql_type)
}
