//! The read-only schema model: entity lookup, validation and column layout.

use crate::association::{ForeignKeyDescriptor, ForeignKeyDescriptorBuilder};
use crate::entity::{Element, ElementKind, EntityDefinition};
use crate::error::{Error, Result, SchemaError, SchemaErrorKind};
use crate::identifiers::is_valid_identifier;
use crate::types::SqlType;
use std::collections::HashMap;
use std::sync::Arc;

/// Managed keys referencing managed keys deeper than this are rejected.
const MAX_KEY_NESTING: usize = 8;

/// A physical column of an entity's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub key: bool,
    pub generated: bool,
    /// Path of the value inside a nested payload row (`["customer", "ID"]`).
    pub path: Vec<String>,
}

impl Column {
    /// Read this column's value from a payload row.
    ///
    /// The flat column name wins over the nested path, so `customer_ID` and
    /// `customer: { ID }` are both accepted.
    pub fn read<'a>(
        &self,
        row: &'a serde_json::Map<String, serde_json::Value>,
    ) -> Option<&'a serde_json::Value> {
        if let Some(value) = row.get(&self.name) {
            return Some(value);
        }
        if self.path.len() < 2 {
            return None;
        }
        let mut current = row.get(&self.path[0])?;
        for segment in &self.path[1..] {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// All entity definitions of a loaded model.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: HashMap<String, Arc<EntityDefinition>>,
    order: Vec<String>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Look up an entity, failing with a schema error when it is unknown.
    pub fn entity(&self, name: &str) -> Result<&Arc<EntityDefinition>> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::Schema(SchemaError::entity_not_found(name)))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDefinition>> {
        self.entities.get(name)
    }

    /// Entities in definition order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDefinition>> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Flattened foreign keys of a managed association element.
    pub fn foreign_keys(
        &self,
        owner: &EntityDefinition,
        element: &Element,
    ) -> Result<Vec<ForeignKeyDescriptor>> {
        let Some(assoc) = element.as_association() else {
            return Err(SchemaError::invalid(format!(
                "element '{}.{}' is not an association",
                owner.name(),
                element.name
            ))
            .into());
        };
        let target = self.entity(&assoc.target)?;
        let builder = ForeignKeyDescriptorBuilder::new(&element.name, element.key, element.nullable);
        let keys: Vec<String> = match &assoc.keys {
            Some(keys) => keys.clone(),
            None => target.key_names().into_iter().map(str::to_string).collect(),
        };
        let mut out = Vec::new();
        for key in &keys {
            let leaf = target
                .get(key)
                .ok_or_else(|| SchemaError::element_not_found(target.name(), key))?;
            self.flatten_key(target, leaf, &builder.descend(key), 0, &mut out)?;
        }
        Ok(out)
    }

    fn flatten_key(
        &self,
        target: &EntityDefinition,
        leaf: &Element,
        builder: &ForeignKeyDescriptorBuilder,
        depth: usize,
        out: &mut Vec<ForeignKeyDescriptor>,
    ) -> Result<()> {
        if depth > MAX_KEY_NESTING {
            return Err(SchemaError::invalid(format!(
                "managed key of '{}' nests too deeply at '{}'",
                target.name(),
                builder.path().join(".")
            ))
            .into());
        }
        match &leaf.kind {
            ElementKind::Scalar(sql_type) => {
                out.push(builder.leaf(sql_type.clone(), leaf.is_generated_key()));
            }
            ElementKind::Structured(leaves) => {
                for inner in leaves {
                    self.flatten_key(target, inner, &builder.descend(&inner.name), depth + 1, out)?;
                }
            }
            ElementKind::Association(assoc) => {
                if !assoc.is_managed() {
                    return Err(SchemaError::invalid(format!(
                        "key '{}.{}' must be a managed association",
                        target.name(),
                        leaf.name
                    ))
                    .into());
                }
                let next = self.entity(&assoc.target)?;
                let keys: Vec<String> = match &assoc.keys {
                    Some(keys) => keys.clone(),
                    None => next.key_names().into_iter().map(str::to_string).collect(),
                };
                for key in &keys {
                    let inner = next
                        .get(key)
                        .ok_or_else(|| SchemaError::element_not_found(next.name(), key))?;
                    self.flatten_key(next, inner, &builder.descend(key), depth + 1, out)?;
                }
            }
        }
        Ok(())
    }

    /// Persisted columns of an entity in declaration order.
    ///
    /// Virtual, computed and to-many/unmanaged association elements are
    /// excluded. Structured elements and managed associations contribute one
    /// column per leaf.
    pub fn columns(&self, entity: &EntityDefinition) -> Result<Vec<Column>> {
        let mut out = Vec::new();
        for element in entity.elements() {
            if !element.is_persisted() {
                continue;
            }
            match &element.kind {
                ElementKind::Scalar(sql_type) => out.push(Column {
                    name: element.name.clone(),
                    sql_type: sql_type.clone(),
                    key: element.key,
                    generated: element.is_generated_key(),
                    path: vec![element.name.clone()],
                }),
                ElementKind::Structured(leaves) => {
                    structured_columns(element, leaves, element.key, &[], &mut out);
                }
                ElementKind::Association(assoc) => {
                    if !assoc.is_managed() || assoc.is_to_many() {
                        continue;
                    }
                    for fk in self.foreign_keys(entity, element)? {
                        let mut path = vec![fk.association.clone()];
                        path.extend(fk.target_path.iter().cloned());
                        out.push(Column {
                            name: fk.name,
                            sql_type: fk.sql_type,
                            key: fk.key,
                            generated: false,
                            path,
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Key column names of an entity (flattened).
    pub fn key_columns(&self, entity: &EntityDefinition) -> Result<Vec<String>> {
        Ok(self
            .columns(entity)?
            .into_iter()
            .filter(|c| c.key)
            .map(|c| c.name)
            .collect())
    }
}

fn structured_columns(
    element: &Element,
    leaves: &[Element],
    key: bool,
    prefix: &[String],
    out: &mut Vec<Column>,
) {
    let mut path = prefix.to_vec();
    path.push(element.name.clone());
    for leaf in leaves {
        if !leaf.is_persisted() {
            continue;
        }
        match &leaf.kind {
            ElementKind::Scalar(sql_type) => {
                let mut leaf_path = path.clone();
                leaf_path.push(leaf.name.clone());
                out.push(Column {
                    name: leaf_path.join("_"),
                    sql_type: sql_type.clone(),
                    key: key || leaf.key,
                    generated: false,
                    path: leaf_path,
                });
            }
            ElementKind::Structured(inner) => {
                structured_columns(leaf, inner, key || leaf.key, &path, out);
            }
            ElementKind::Association(_) => {}
        }
    }
}

/// Collects entity definitions and validates them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDefinition>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn entity(mut self, entity: EntityDefinition) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate and freeze the model.
    #[tracing::instrument(level = "debug", skip(self), fields(entities = self.entities.len()))]
    pub fn build(self) -> Result<Schema> {
        let mut schema = Schema::default();
        for entity in self.entities {
            let name = entity.name().to_string();
            if !is_valid_identifier(&name) {
                return Err(SchemaError::invalid(format!("invalid entity name '{}'", name)).into());
            }
            if schema.entities.contains_key(&name) {
                return Err(Error::Schema(SchemaError {
                    kind: SchemaErrorKind::DuplicateEntity,
                    message: format!("entity '{}' is defined twice", name),
                }));
            }
            schema.order.push(name.clone());
            schema.entities.insert(name, Arc::new(entity));
        }

        for entity in schema.entities() {
            validate_entity(&schema, entity)?;
        }
        tracing::debug!(entities = schema.len(), "schema validated");
        Ok(schema)
    }
}

fn validate_entity(schema: &Schema, entity: &EntityDefinition) -> Result<()> {
    for element in entity.elements() {
        if element.name.contains('.') || !is_valid_identifier(&element.name) {
            return Err(SchemaError::invalid(format!(
                "invalid element name '{}.{}'",
                entity.name(),
                element.name
            ))
            .into());
        }
        let Some(assoc) = element.as_association() else {
            continue;
        };
        schema.entity(&assoc.target)?;
        if assoc.is_to_many() && assoc.is_managed() {
            return Err(SchemaError::invalid(format!(
                "to-many association '{}.{}' needs an on-condition",
                entity.name(),
                element.name
            ))
            .into());
        }
        if assoc.depth_limit == Some(0) {
            return Err(SchemaError::invalid(format!(
                "depth limit of '{}.{}' must be positive",
                entity.name(),
                element.name
            ))
            .into());
        }
    }
    if let Some(view) = entity.view() {
        let source = schema.entity(&view.source)?;
        for (view_element, source_element) in &view.mapping {
            if source.get(source_element).is_none() {
                return Err(SchemaError::invalid(format!(
                    "projection '{}' maps '{}' onto unknown '{}.{}'",
                    entity.name(),
                    view_element,
                    source.name(),
                    source_element
                ))
                .into());
            }
        }
    }
    schema.columns(entity)?;
    Ok(())
}
