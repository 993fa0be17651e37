//! Association and composition metadata.
//!
//! An association is a typed reference from one entity to another. It is
//! either *managed* (an implicit foreign-key list, defaulting to the target's
//! keys) or *unmanaged* (an explicit `on`-condition). A composition is an
//! association that additionally denotes ownership: deep writes and deep
//! deletes only traverse compositions.

use crate::types::SqlType;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Prefix addressing the owning entity inside an on-condition.
pub const SELF_REF: &str = "$self";

/// How many target rows an association reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Cardinality {
    /// To-one: `Order.header`.
    #[default]
    One,
    /// To-many: `Order.items`.
    Many,
}

/// One side of an equality term in an on-condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A path such as `items.order`, `$self`, or `ID`.
    Ref(Vec<String>),
    /// A constant.
    Literal(serde_json::Value),
}

impl Operand {
    /// Parse a dotted reference path.
    pub fn path(path: &str) -> Self {
        Operand::Ref(path.split('.').map(str::to_string).collect())
    }

    /// A literal operand.
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Operand::Literal(value.into())
    }

    /// Reference to the owning entity itself.
    pub fn self_ref() -> Self {
        Operand::Ref(vec![SELF_REF.to_string()])
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Ref(path) => write!(f, "{}", path.join(".")),
            Operand::Literal(value) => write!(f, "{}", value),
        }
    }
}

/// An explicit association condition.
#[derive(Debug, Clone, PartialEq)]
pub enum OnCondition {
    Eq(Operand, Operand),
    And(Vec<OnCondition>),
    Or(Vec<OnCondition>),
}

impl OnCondition {
    /// `lhs = rhs` with both sides given as dotted paths.
    pub fn eq(lhs: &str, rhs: &str) -> Self {
        OnCondition::Eq(Operand::path(lhs), Operand::path(rhs))
    }

    /// `path = literal`.
    pub fn eq_literal(path: &str, value: impl Into<serde_json::Value>) -> Self {
        OnCondition::Eq(Operand::path(path), Operand::literal(value))
    }

    /// Backlink condition `<association>.<back> = $self`.
    pub fn backlink(association: &str, back: &str) -> Self {
        OnCondition::Eq(
            Operand::Ref(vec![association.to_string(), back.to_string()]),
            Operand::self_ref(),
        )
    }

    pub fn and(terms: Vec<OnCondition>) -> Self {
        OnCondition::And(terms)
    }

    pub fn or(terms: Vec<OnCondition>) -> Self {
        OnCondition::Or(terms)
    }
}

impl fmt::Display for OnCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnCondition::Eq(lhs, rhs) => write!(f, "{} = {}", lhs, rhs),
            OnCondition::And(terms) | OnCondition::Or(terms) => {
                let op = if matches!(self, OnCondition::And(_)) {
                    " and "
                } else {
                    " or "
                };
                let parts: Vec<String> = terms.iter().map(|t| format!("({})", t)).collect();
                write!(f, "{}", parts.join(op))
            }
        }
    }
}

/// Which side of a parent/child pair receives the propagated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationDirection {
    /// The parent supplies the value, the child row receives it.
    FillChild,
    /// The child supplies the value, the parent row receives it.
    FillParent,
}

/// One derived foreign-key pair (or constant) realizing an association.
///
/// A `FillChild` record always has `parent_element` or `parent_field_value`
/// as its source. `nested` points one level further down: the child value is
/// itself taken from the child's `association` target, resolved first.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyPropagation {
    pub direction: PropagationDirection,
    pub parent_element: Option<String>,
    pub child_element: Option<String>,
    pub parent_field_value: Option<serde_json::Value>,
    pub child_field_value: Option<serde_json::Value>,
    /// The source field is a generated-identifier key.
    pub source_generated: bool,
    /// Child-side association the nested record reaches through.
    pub association: Option<String>,
    pub nested: Option<Box<ForeignKeyPropagation>>,
}

impl ForeignKeyPropagation {
    /// A parent-to-child field pair.
    pub fn fill_child(parent_element: impl Into<String>, child_element: impl Into<String>) -> Self {
        Self {
            direction: PropagationDirection::FillChild,
            parent_element: Some(parent_element.into()),
            child_element: Some(child_element.into()),
            parent_field_value: None,
            child_field_value: None,
            source_generated: false,
            association: None,
            nested: None,
        }
    }

    /// A child-to-parent field pair.
    pub fn fill_parent(parent_element: impl Into<String>, child_element: impl Into<String>) -> Self {
        Self {
            direction: PropagationDirection::FillParent,
            ..Self::fill_child(parent_element, child_element)
        }
    }

    /// A constant written into the child.
    pub fn child_constant(child_element: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            direction: PropagationDirection::FillChild,
            parent_element: None,
            child_element: Some(child_element.into()),
            parent_field_value: Some(value),
            child_field_value: None,
            source_generated: false,
            association: None,
            nested: None,
        }
    }

    /// A constant written into the parent.
    pub fn parent_constant(parent_element: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            direction: PropagationDirection::FillParent,
            parent_element: Some(parent_element.into()),
            child_element: None,
            parent_field_value: None,
            child_field_value: Some(value),
            source_generated: false,
            association: None,
            nested: None,
        }
    }

    pub fn with_source_generated(mut self, generated: bool) -> Self {
        self.source_generated = generated;
        self
    }

    pub fn with_nested(mut self, association: impl Into<String>, nested: Self) -> Self {
        let mut nested = nested;
        nested.association = Some(association.into());
        self.nested = Some(Box::new(nested));
        self
    }

    /// Is this a constant (literal-valued) propagation?
    pub fn is_constant(&self) -> bool {
        self.parent_field_value.is_some() || self.child_field_value.is_some()
    }

    /// The field pair, when both sides are elements.
    pub fn pair(&self) -> Option<(&str, &str)> {
        Some((self.parent_element.as_deref()?, self.child_element.as_deref()?))
    }
}

/// A flattened managed foreign key.
///
/// Only the annotations the engine relies on are copied from the owning
/// association and the target key leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    /// Column name on the owning entity (`author_ID`).
    pub name: String,
    /// Owning association element.
    pub association: String,
    /// Path of the referenced key on the target (`["ID"]`).
    pub target_path: Vec<String>,
    pub sql_type: SqlType,
    /// The owning association is part of the owner's key.
    pub key: bool,
    pub nullable: bool,
    /// The referenced target key is generated.
    pub generated: bool,
}

/// Builds [`ForeignKeyDescriptor`]s for one managed association.
#[derive(Debug, Clone)]
pub struct ForeignKeyDescriptorBuilder {
    association: String,
    key: bool,
    nullable: bool,
    path: Vec<String>,
}

impl ForeignKeyDescriptorBuilder {
    /// Start from the owning association's annotations.
    pub fn new(association: impl Into<String>, key: bool, nullable: bool) -> Self {
        Self {
            association: association.into(),
            key,
            nullable,
            path: Vec::new(),
        }
    }

    /// Descend into a structured or associated target key.
    #[must_use]
    pub fn descend(&self, segment: &str) -> Self {
        let mut next = self.clone();
        next.path.push(segment.to_string());
        next
    }

    /// Current target path.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Finish at a scalar leaf of the target key.
    pub fn leaf(&self, sql_type: SqlType, generated: bool) -> ForeignKeyDescriptor {
        let mut name = self.association.clone();
        for segment in &self.path {
            name.push('_');
            name.push_str(segment);
        }
        ForeignKeyDescriptor {
            name,
            association: self.association.clone(),
            target_path: self.path.clone(),
            sql_type,
            key: self.key,
            nullable: self.nullable,
            generated,
        }
    }
}

/// Association or composition metadata, owned by its element.
#[derive(Debug, Clone)]
pub struct Association {
    pub target: String,
    pub cardinality: Cardinality,
    pub composition: bool,
    pub on: Option<OnCondition>,
    /// Explicit managed key refs; `None` means the target's keys.
    pub keys: Option<Vec<String>>,
    /// Maximum times this relationship repeats on one traversal chain.
    pub depth_limit: Option<usize>,
    propagations: OnceLock<Arc<[ForeignKeyPropagation]>>,
}

impl Association {
    /// A to-one association.
    pub fn to_one(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            cardinality: Cardinality::One,
            composition: false,
            on: None,
            keys: None,
            depth_limit: None,
            propagations: OnceLock::new(),
        }
    }

    /// A to-many association.
    pub fn to_many(target: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::to_one(target)
        }
    }

    /// Mark as composition (ownership).
    pub fn composition(mut self) -> Self {
        self.composition = true;
        self
    }

    /// Set an explicit on-condition.
    pub fn on(mut self, condition: OnCondition) -> Self {
        self.on = Some(condition);
        self
    }

    /// Set explicit managed foreign-key refs.
    pub fn keys(mut self, keys: &[&str]) -> Self {
        self.keys = Some(keys.iter().map(|k| (*k).to_string()).collect());
        self
    }

    /// Set the depth-limit annotation.
    pub fn depth_limit(mut self, limit: usize) -> Self {
        self.depth_limit = Some(limit);
        self
    }

    pub fn is_managed(&self) -> bool {
        self.on.is_none()
    }

    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Memoized propagations, computing them on first access.
    pub fn propagations_or_init<E>(
        &self,
        init: impl FnOnce() -> Result<Vec<ForeignKeyPropagation>, E>,
    ) -> Result<Arc<[ForeignKeyPropagation]>, E> {
        if let Some(cached) = self.propagations.get() {
            return Ok(Arc::clone(cached));
        }
        let computed: Arc<[ForeignKeyPropagation]> = init()?.into();
        Ok(Arc::clone(self.propagations.get_or_init(|| computed)))
    }

    /// Memoized propagations if already computed.
    pub fn cached_propagations(&self) -> Option<&Arc<[ForeignKeyPropagation]>> {
        self.propagations.get()
    }
}
