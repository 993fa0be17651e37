//! Key propagation.
//!
//! Applies resolved foreign-key propagations to concrete payload rows.
//! Rows handed in by callers are never modified; every public function
//! returns new rows.

use crate::context::RequestContext;
use crate::template::{EntryKind, Template, WriteTemplate};
use deepsql_core::{
    Column, DeepError, EntityDefinition, Error, ForeignKeyPropagation, JsonMap,
    PropagationDirection, Result,
};
use serde_json::Value as Json;

/// Where a propagation pass runs.
#[derive(Debug, Clone, Copy)]
pub struct PropagationScope<'a> {
    pub parent: &'a EntityDefinition,
    /// Child entity; `None` when the child is only a foreign-key object.
    pub child: Option<&'a EntityDefinition>,
    /// Parent field holding the association.
    pub field: &'a str,
    /// Physical ownership is in effect.
    pub composition: bool,
    /// Columns of the active child projection; `None` accepts any field.
    pub child_columns: Option<&'a [Column]>,
}

/// Rows produced by [`propagate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Propagated {
    pub parent: JsonMap,
    /// `None` when the nested value was null.
    pub child: Option<JsonMap>,
}

/// Apply `props` to a parent row and its nested child row.
///
/// A `None` child stands for an explicit null: every field-valued
/// `FillParent` target on the parent is nulled.
pub fn propagate(
    ctx: &mut RequestContext,
    parent: &JsonMap,
    child: Option<&JsonMap>,
    props: &[ForeignKeyPropagation],
    scope: &PropagationScope<'_>,
) -> Propagated {
    let mut parent = parent.clone();
    let mut child = child.cloned();
    apply(ctx, &mut parent, child.as_mut(), props, scope);
    Propagated { parent, child }
}

/// Read a field, falling back to one level of structural nesting:
/// `header_ID` is also found as `header: { ID }`.
pub fn read_field<'r>(row: &'r JsonMap, name: &str) -> Option<&'r Json> {
    if let Some(value) = row.get(name) {
        return Some(value);
    }
    name.match_indices('_')
        .find_map(|(i, _)| row.get(&name[..i])?.as_object()?.get(&name[i + 1..]))
}

/// Generate keys and stamp foreign keys over a nested payload, top-down.
///
/// Every row gets its absent generated keys first, then each composition
/// and managed to-one association object below it is stamped.
#[tracing::instrument(level = "debug", skip_all, fields(entity = template.entity(), rows = rows.len()))]
pub fn fill_keys(
    ctx: &mut RequestContext,
    template: &WriteTemplate,
    rows: &[JsonMap],
) -> Result<Vec<JsonMap>> {
    let mut stamper = Stamper { ctx, template };
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut row = row.clone();
        stamper.generate_own(&template.root, &mut row);
        stamper.stamp(&template.root, &mut row)?;
        out.push(row);
    }
    tracing::trace!(generated = stamper.ctx.generated_keys().len(), "stamped payload");
    Ok(out)
}

fn apply(
    ctx: &mut RequestContext,
    parent: &mut JsonMap,
    child: Option<&mut JsonMap>,
    props: &[ForeignKeyPropagation],
    scope: &PropagationScope<'_>,
) {
    match child {
        Some(child) => {
            for prop in props {
                match prop.direction {
                    PropagationDirection::FillChild => fill_child(ctx, parent, child, prop, scope),
                    PropagationDirection::FillParent => {
                        fill_parent(ctx, parent, child, prop, scope);
                    }
                }
            }
        }
        None => {
            for prop in props {
                if prop.direction != PropagationDirection::FillParent || prop.is_constant() {
                    continue;
                }
                if let Some(target) = &prop.parent_element {
                    parent.insert(target.clone(), Json::Null);
                }
            }
        }
    }
    if !scope.composition {
        parent.remove(scope.field);
    }
}

fn fill_child(
    ctx: &mut RequestContext,
    parent: &mut JsonMap,
    child: &mut JsonMap,
    prop: &ForeignKeyPropagation,
    scope: &PropagationScope<'_>,
) {
    let Some(column) = &prop.child_element else {
        return;
    };
    if let Some(columns) = scope.child_columns {
        if !columns.iter().any(|c| &c.name == column) {
            tracing::trace!(
                field = scope.field,
                column = %column,
                "child column not in projection; value dropped"
            );
            return;
        }
    }
    let value = match (&prop.parent_field_value, &prop.parent_element) {
        (Some(constant), _) => constant.clone(),
        (None, Some(source)) => {
            if prop.source_generated && scope.composition {
                ensure_key(ctx, scope.parent, parent, source);
            }
            match read_field(parent, source) {
                Some(value) => value.clone(),
                None => return,
            }
        }
        (None, None) => return,
    };
    child.insert(column.clone(), value);
}

fn fill_parent(
    ctx: &mut RequestContext,
    parent: &mut JsonMap,
    child: &mut JsonMap,
    prop: &ForeignKeyPropagation,
    scope: &PropagationScope<'_>,
) {
    let Some(target) = &prop.parent_element else {
        return;
    };
    let value = match (&prop.child_field_value, &prop.child_element) {
        (Some(constant), _) => constant.clone(),
        (None, Some(source)) => {
            if let Some(nested) = &prop.nested {
                resolve_nested(child, nested);
            }
            if prop.source_generated && scope.composition {
                if let Some(entity) = scope.child {
                    ensure_key(ctx, entity, child, source);
                }
            }
            match read_field(child, source) {
                Some(value) => value.clone(),
                None => return,
            }
        }
        (None, None) => return,
    };
    parent.insert(target.clone(), value);
}

/// Pull a key reached through a further association into `row`, deepest
/// link first.
fn resolve_nested(row: &mut JsonMap, prop: &ForeignKeyPropagation) {
    let (Some(association), Some(target), Some(source)) =
        (&prop.association, &prop.parent_element, &prop.child_element)
    else {
        return;
    };
    let value = {
        let Some(Json::Object(inner)) = row.get_mut(association.as_str()) else {
            return;
        };
        if let Some(deeper) = &prop.nested {
            resolve_nested(inner, deeper);
        }
        read_field(inner, source).cloned()
    };
    if let Some(value) = value {
        row.insert(target.clone(), value);
    }
}

/// Generate `column` on `row` if it is an absent generated key.
fn ensure_key(ctx: &mut RequestContext, entity: &EntityDefinition, row: &mut JsonMap, column: &str) {
    if !ctx.auto_generate_keys() || !matches!(row.get(column), None | Some(Json::Null)) {
        return;
    }
    let Some(generation) = entity
        .get(column)
        .filter(|e| e.is_generated_key())
        .and_then(|e| e.generated)
    else {
        return;
    };
    let value = ctx.generate_key(entity.name(), column, generation);
    row.insert(column.to_string(), value);
}

struct Stamper<'a, 'c> {
    ctx: &'c mut RequestContext,
    template: &'a WriteTemplate,
}

impl Stamper<'_, '_> {
    fn generate_own(&mut self, node: &Template, row: &mut JsonMap) {
        if !self.ctx.auto_generate_keys() {
            return;
        }
        let template = self.template;
        let info = template.target(node.target_index);
        for column in info.columns.iter().filter(|c| c.generated) {
            ensure_key(self.ctx, &info.entity, row, &column.name);
        }
    }

    fn stamp(&mut self, node: &Template, row: &mut JsonMap) -> Result<()> {
        let template = self.template;
        let info = template.target(node.target_index);
        for entry in &node.entries {
            match &entry.kind {
                EntryKind::Element { .. } => {}
                EntryKind::Association { propagations, .. } => {
                    let scope = PropagationScope {
                        parent: &info.entity,
                        child: None,
                        field: &entry.field,
                        composition: false,
                        child_columns: None,
                    };
                    match row.get(&entry.field).cloned() {
                        None => {}
                        Some(Json::Null) => apply(self.ctx, row, None, propagations, &scope),
                        Some(Json::Object(mut child)) => {
                            apply(self.ctx, row, Some(&mut child), propagations, &scope);
                        }
                        Some(other) => {
                            return Err(shape_error(info.table(), &entry.field, "an object", &other));
                        }
                    }
                }
                EntryKind::Composition { to_many, propagations, .. } => {
                    let Some(sub) = entry.subtemplate.as_ref().filter(|_| entry.picked) else {
                        continue;
                    };
                    let Some(value) = row.get_mut(&entry.field).map(Json::take) else {
                        continue;
                    };
                    let child_info = template.target(sub.target_index);
                    let scope = PropagationScope {
                        parent: &info.entity,
                        child: Some(child_info.entity.as_ref()),
                        field: &entry.field,
                        composition: true,
                        child_columns: Some(&child_info.columns),
                    };
                    let stamped = match (value, *to_many) {
                        (Json::Null, false) => {
                            apply(self.ctx, row, None, propagations, &scope);
                            Json::Null
                        }
                        (Json::Null, true) => Json::Null,
                        (Json::Object(mut child), false) => {
                            self.stamp_child(sub, row, &mut child, propagations, &scope)?;
                            Json::Object(child)
                        }
                        (Json::Array(items), true) => {
                            let mut out = Vec::with_capacity(items.len());
                            for item in items {
                                match item {
                                    Json::Object(mut child) => {
                                        self.stamp_child(sub, row, &mut child, propagations, &scope)?;
                                        out.push(Json::Object(child));
                                    }
                                    Json::Null => out.push(Json::Null),
                                    other => {
                                        return Err(shape_error(
                                            info.table(),
                                            &entry.field,
                                            "an array of objects",
                                            &other,
                                        ));
                                    }
                                }
                            }
                            Json::Array(out)
                        }
                        (other, to_many) => {
                            let expected = if to_many { "an array" } else { "an object" };
                            return Err(shape_error(info.table(), &entry.field, expected, &other));
                        }
                    };
                    row.insert(entry.field.clone(), stamped);
                }
            }
        }
        Ok(())
    }

    fn stamp_child(
        &mut self,
        sub: &Template,
        parent: &mut JsonMap,
        child: &mut JsonMap,
        props: &[ForeignKeyPropagation],
        scope: &PropagationScope<'_>,
    ) -> Result<()> {
        self.generate_own(sub, child);
        apply(self.ctx, parent, Some(child), props, scope);
        self.stamp(sub, child)
    }
}

fn shape_error(entity: &str, field: &str, expected: &str, found: &Json) -> Error {
    let found = match found {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    };
    DeepError::invalid_payload(
        entity,
        format!("field '{}.{}' must be {}, found {}", entity, field, expected, found),
    )
    .into()
}
