//! Entity definitions and their elements.

use crate::association::Association;
use crate::types::SqlType;
use std::collections::HashMap;

/// How a missing key value is synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGeneration {
    /// A fresh random UUID.
    Uuid,
}

/// The shape of an element.
#[derive(Debug, Clone)]
pub enum ElementKind {
    /// A plain column.
    Scalar(SqlType),
    /// A structured type whose leaves are stored as `<name>_<leaf>` columns.
    Structured(Vec<Element>),
    /// An association or composition.
    Association(Association),
}

/// One element (field) of an entity.
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    /// Part of the primary key.
    pub key: bool,
    /// Never persisted.
    pub is_virtual: bool,
    /// Computed by the database; never written.
    pub computed: bool,
    pub nullable: bool,
    pub generated: Option<KeyGeneration>,
}

impl Element {
    fn new(name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            kind,
            key: false,
            is_virtual: false,
            computed: false,
            nullable: true,
            generated: None,
        }
    }

    /// A scalar column.
    pub fn scalar(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self::new(name, ElementKind::Scalar(sql_type))
    }

    /// A structured element.
    pub fn structured(name: impl Into<String>, leaves: Vec<Element>) -> Self {
        Self::new(name, ElementKind::Structured(leaves))
    }

    /// An association or composition element.
    pub fn association(name: impl Into<String>, association: Association) -> Self {
        Self::new(name, ElementKind::Association(association))
    }

    /// A generated UUID primary key.
    pub fn uuid_key(name: impl Into<String>) -> Self {
        Self::scalar(name, SqlType::Uuid)
            .key()
            .generated(KeyGeneration::Uuid)
    }

    /// Mark as a key element (implies not null).
    pub fn key(mut self) -> Self {
        self.key = true;
        self.nullable = false;
        self
    }

    pub fn virtual_(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn generated(mut self, generation: KeyGeneration) -> Self {
        self.generated = Some(generation);
        self
    }

    /// Association metadata, if this element is an association.
    pub fn as_association(&self) -> Option<&Association> {
        match &self.kind {
            ElementKind::Association(assoc) => Some(assoc),
            _ => None,
        }
    }

    /// SQL type of a scalar element.
    pub fn sql_type(&self) -> Option<&SqlType> {
        match &self.kind {
            ElementKind::Scalar(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_composition(&self) -> bool {
        self.as_association().is_some_and(|a| a.composition)
    }

    /// Is this element written by the engine at all?
    pub fn is_persisted(&self) -> bool {
        !self.is_virtual && !self.computed
    }

    /// A generated-identifier key.
    pub fn is_generated_key(&self) -> bool {
        self.key && self.generated.is_some()
    }
}

/// A view indirection onto a persisted entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// The entity the view selects from.
    pub source: String,
    /// View element name -> source element name.
    pub mapping: HashMap<String, String>,
}

impl Projection {
    pub fn of(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mapping: HashMap::new(),
        }
    }

    /// Map a view element onto a source element.
    pub fn map(mut self, view_element: &str, source_element: &str) -> Self {
        self.mapping
            .insert(view_element.to_string(), source_element.to_string());
        self
    }

    /// Map each listed element onto the same name in the source.
    pub fn identity(mut self, elements: &[&str]) -> Self {
        for name in elements {
            self.mapping.insert((*name).to_string(), (*name).to_string());
        }
        self
    }

    pub fn source_element(&self, view_element: &str) -> Option<&str> {
        self.mapping.get(view_element).map(String::as_str)
    }
}

/// An immutable entity definition.
///
/// Elements keep their declaration order; lookups by name go through an
/// index built once at construction.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    name: String,
    elements: Vec<Element>,
    index: HashMap<String, usize>,
    skip_persistence: bool,
    projection: Option<Projection>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            elements: Vec::new(),
            index: HashMap::new(),
            skip_persistence: false,
            projection: None,
        }
    }

    /// Append an element. A later element with the same name replaces the
    /// earlier one in place.
    #[must_use]
    pub fn element(mut self, element: Element) -> Self {
        if let Some(&i) = self.index.get(&element.name) {
            self.elements[i] = element;
        } else {
            self.index.insert(element.name.clone(), self.elements.len());
            self.elements.push(element);
        }
        self
    }

    /// Exclude this entity from deep writes and cascades.
    #[must_use]
    pub fn skip_persistence(mut self) -> Self {
        self.skip_persistence = true;
        self
    }

    /// Declare this entity a view over another entity.
    #[must_use]
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn get(&self, name: &str) -> Option<&Element> {
        self.index.get(name).map(|&i| &self.elements[i])
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_persistence
    }

    pub fn view(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    /// Names of the key elements in declaration order.
    pub fn key_names(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter(|e| e.key)
            .map(|e| e.name.as_str())
            .collect()
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.key)
    }

    /// All association and composition elements.
    pub fn associations(&self) -> impl Iterator<Item = (&Element, &Association)> {
        self.elements
            .iter()
            .filter_map(|e| e.as_association().map(|a| (e, a)))
    }

    /// Composition elements only.
    pub fn compositions(&self) -> impl Iterator<Item = (&Element, &Association)> {
        self.associations().filter(|(_, a)| a.composition)
    }

    pub fn has_compositions(&self) -> bool {
        self.compositions().next().is_some()
    }
}
