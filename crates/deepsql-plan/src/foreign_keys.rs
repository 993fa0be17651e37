//! Foreign-key resolution.
//!
//! Derives, for one association, the ordered list of field pairs and
//! constants that realize it. Results are memoized on the association.

use deepsql_core::{
    Element, EntityDefinition, ForeignKeyPropagation, OnCondition, Operand, Result, SELF_REF,
    Schema, SchemaError,
};
use std::sync::Arc;

/// Backlinks resolving through other backlinks stop after this many hops.
const MAX_BACKLINK_HOPS: usize = 4;

/// Resolve the propagations of an association element owned by `owner`.
///
/// The result is computed once per association and shared afterwards.
#[tracing::instrument(level = "trace", skip(schema, owner, element), fields(owner = owner.name(), element = %element.name))]
pub fn resolve(
    schema: &Schema,
    owner: &EntityDefinition,
    element: &Element,
) -> Result<Arc<[ForeignKeyPropagation]>> {
    let Some(assoc) = element.as_association() else {
        return Err(SchemaError::invalid(format!(
            "element '{}.{}' is not an association",
            owner.name(),
            element.name
        ))
        .into());
    };
    assoc.propagations_or_init(|| compute(schema, owner, element, 0))
}

fn compute(
    schema: &Schema,
    owner: &EntityDefinition,
    element: &Element,
    hops: usize,
) -> Result<Vec<ForeignKeyPropagation>> {
    let Some(assoc) = element.as_association() else {
        return Ok(Vec::new());
    };
    let target = schema.entity(&assoc.target)?;
    match &assoc.on {
        None => managed(schema, owner, element, target),
        Some(on) => {
            let mut terms = Vec::new();
            conjuncts(on, &mut terms);
            let resolver = TermResolver {
                schema,
                owner,
                target,
                element,
                to_many: assoc.is_to_many(),
                hops,
            };
            let mut out = Vec::new();
            for (lhs, rhs) in terms {
                resolver.term(lhs, rhs, &mut out)?;
            }
            Ok(out)
        }
    }
}

/// Managed association: one FillParent record per flattened key leaf.
fn managed(
    schema: &Schema,
    owner: &EntityDefinition,
    element: &Element,
    target: &EntityDefinition,
) -> Result<Vec<ForeignKeyPropagation>> {
    let mut out = Vec::new();
    for fk in schema.foreign_keys(owner, element)? {
        let child_column = fk.target_path.join("_");
        let mut prop = ForeignKeyPropagation::fill_parent(fk.name.clone(), child_column)
            .with_source_generated(fk.generated);
        if let Some(nested) = nested_key(schema, target, &fk.target_path, fk.generated) {
            prop = prop.with_nested(fk.target_path[0].clone(), nested);
        }
        out.push(prop);
    }
    Ok(out)
}

/// When the referenced key is itself reached through a managed association
/// of the target, the value lives one object further down.
fn nested_key(
    schema: &Schema,
    target: &EntityDefinition,
    path: &[String],
    generated: bool,
) -> Option<ForeignKeyPropagation> {
    if path.len() < 2 {
        return None;
    }
    let assoc = target.get(&path[0])?.as_association()?;
    if !assoc.is_managed() {
        return None;
    }
    let rest = &path[1..];
    let nested = ForeignKeyPropagation::fill_parent(path.join("_"), rest.join("_"))
        .with_source_generated(generated);
    let next = schema.get(&assoc.target)?;
    Some(match nested_key(schema, next, rest, generated) {
        Some(deeper) => nested.with_nested(rest[0].clone(), deeper),
        None => nested,
    })
}

/// Flatten a condition into its equality terms. `or` contributes nothing.
fn conjuncts<'a>(cond: &'a OnCondition, out: &mut Vec<(&'a Operand, &'a Operand)>) {
    match cond {
        OnCondition::Eq(lhs, rhs) => out.push((lhs, rhs)),
        OnCondition::And(terms) => {
            for term in terms {
                conjuncts(term, out);
            }
        }
        OnCondition::Or(_) => {
            tracing::debug!(
                condition = %cond,
                "disjunctive on-condition term yields no key propagation"
            );
        }
    }
}

/// Which side of the association an operand addresses.
#[derive(Debug)]
enum Side<'a> {
    Child(&'a [String]),
    Parent(&'a [String]),
    SelfRef,
    Literal(&'a serde_json::Value),
}

struct TermResolver<'a> {
    schema: &'a Schema,
    owner: &'a EntityDefinition,
    target: &'a EntityDefinition,
    element: &'a Element,
    to_many: bool,
    hops: usize,
}

impl<'a> TermResolver<'a> {
    fn side<'o>(&self, operand: &'o Operand) -> Side<'o> {
        match operand {
            Operand::Literal(v) => Side::Literal(v),
            Operand::Ref(path) => match path.first().map(String::as_str) {
                Some(SELF_REF) if path.len() == 1 => Side::SelfRef,
                Some(SELF_REF) => Side::Parent(&path[1..]),
                Some(first) if first == self.element.name => Side::Child(&path[1..]),
                _ => Side::Parent(path),
            },
        }
    }

    fn check_parent(&self, path: &[String]) -> Result<()> {
        match path.first() {
            Some(first) if self.owner.get(first).is_some() => Ok(()),
            Some(first) => Err(SchemaError::element_not_found(self.owner.name(), first).into()),
            None => Err(SchemaError::invalid(format!(
                "empty reference in on-condition of '{}.{}'",
                self.owner.name(),
                self.element.name
            ))
            .into()),
        }
    }

    fn check_child(&self, path: &[String]) -> Result<()> {
        match path.first() {
            Some(first) if self.target.get(first).is_some() => Ok(()),
            Some(first) => Err(SchemaError::element_not_found(self.target.name(), first).into()),
            None => Err(SchemaError::invalid(format!(
                "on-condition of '{}.{}' compares the association itself",
                self.owner.name(),
                self.element.name
            ))
            .into()),
        }
    }

    fn term(
        &self,
        lhs: &Operand,
        rhs: &Operand,
        out: &mut Vec<ForeignKeyPropagation>,
    ) -> Result<()> {
        match (self.side(lhs), self.side(rhs)) {
            (Side::Child(c), Side::Parent(p)) | (Side::Parent(p), Side::Child(c)) => {
                self.check_child(c)?;
                self.check_parent(p)?;
                out.push(self.pair(p, c));
            }
            (Side::Child(c), Side::Literal(v)) | (Side::Literal(v), Side::Child(c)) => {
                self.check_child(c)?;
                out.push(ForeignKeyPropagation::child_constant(c.join("_"), v.clone()));
            }
            (Side::Parent(p), Side::Literal(v)) | (Side::Literal(v), Side::Parent(p)) => {
                self.check_parent(p)?;
                out.push(ForeignKeyPropagation::parent_constant(p.join("_"), v.clone()));
            }
            (Side::Child(c), Side::SelfRef) | (Side::SelfRef, Side::Child(c)) => {
                self.check_child(c)?;
                self.backlink(c, out)?;
            }
            (l, r) => {
                tracing::debug!(
                    owner = self.owner.name(),
                    element = %self.element.name,
                    lhs = ?l,
                    rhs = ?r,
                    "on-condition term does not relate parent and child; skipped"
                );
            }
        }
        Ok(())
    }

    /// A field pair. To-many flows from the owning side; to-one flows towards
    /// the parent when the child side is the target's key and the parent side
    /// is not the owner's key.
    fn pair(&self, parent: &[String], child: &[String]) -> ForeignKeyPropagation {
        let parent_col = parent.join("_");
        let child_col = child.join("_");
        let child_is_key = self.target.is_key(&child[0]);
        let parent_is_key = self.owner.is_key(&parent[0]);
        if !self.to_many && child_is_key && !parent_is_key {
            let generated = self
                .target
                .get(&child[0])
                .is_some_and(Element::is_generated_key);
            ForeignKeyPropagation::fill_parent(parent_col, child_col).with_source_generated(generated)
        } else {
            let generated = self
                .owner
                .get(&parent[0])
                .is_some_and(Element::is_generated_key);
            ForeignKeyPropagation::fill_child(parent_col, child_col).with_source_generated(generated)
        }
    }

    /// `child.back = $self`: resolve `back` from the child's side and invert.
    fn backlink(&self, path: &[String], out: &mut Vec<ForeignKeyPropagation>) -> Result<()> {
        let back_name = &path[0];
        let Some(back) = self.target.get(back_name) else {
            return Ok(());
        };
        let Some(back_assoc) = back.as_association() else {
            return Err(SchemaError::invalid(format!(
                "backlink '{}.{}' is not an association",
                self.target.name(),
                back_name
            ))
            .into());
        };
        if back_assoc.target != self.owner.name() {
            tracing::debug!(
                backlink = %back_name,
                target = %back_assoc.target,
                owner = self.owner.name(),
                "backlink does not point at the owner; skipped"
            );
            return Ok(());
        }

        if back_assoc.is_managed() {
            for fk in self.schema.foreign_keys(self.target, back)? {
                out.push(
                    ForeignKeyPropagation::fill_child(fk.target_path.join("_"), fk.name)
                        .with_source_generated(fk.generated),
                );
            }
            return Ok(());
        }

        if self.hops >= MAX_BACKLINK_HOPS {
            tracing::debug!(
                backlink = %back_name,
                "backlink chain too long; no propagation derived"
            );
            return Ok(());
        }
        let reverse = compute(self.schema, self.target, back, self.hops + 1)?;
        out.extend(reverse.into_iter().filter_map(invert));
        Ok(())
    }
}

/// Turn a propagation seen from the child's backlink into one seen from the
/// owning composition. Value flow always starts at the owner.
fn invert(prop: ForeignKeyPropagation) -> Option<ForeignKeyPropagation> {
    let generated = prop.source_generated;
    match (prop.parent_element, prop.child_element) {
        (Some(theirs), Some(ours)) => {
            Some(ForeignKeyPropagation::fill_child(ours, theirs).with_source_generated(generated))
        }
        (None, Some(ours)) => prop
            .parent_field_value
            .map(|value| ForeignKeyPropagation::parent_constant(ours, value)),
        (Some(theirs), None) => prop
            .child_field_value
            .map(|value| ForeignKeyPropagation::child_constant(theirs, value)),
        (None, None) => None,
    }
}
