//! Client operations addressed at a root entity.

use deepsql_core::{DeepError, Filter, JsonMap, Result, Value};
use std::fmt;

/// The kind of a client operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Upsert,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Insert => "insert",
            OperationKind::Upsert => "upsert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Payload of a write operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Entries {
    /// Keyed, possibly nested records.
    Structured(Vec<JsonMap>),
    /// Flat positional rows; never handled deeply.
    Positional {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
}

impl Entries {
    pub fn len(&self) -> usize {
        match self {
            Entries::Structured(rows) => rows.len(),
            Entries::Positional { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One client operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub entity: String,
    pub entries: Entries,
    /// Row predicate of updates and deletes.
    pub filter: Option<Filter>,
}

impl Operation {
    fn new(kind: OperationKind, entity: impl Into<String>, entries: Entries) -> Self {
        Self {
            kind,
            entity: entity.into(),
            entries,
            filter: None,
        }
    }

    pub fn insert(entity: impl Into<String>, rows: Vec<JsonMap>) -> Self {
        Self::new(OperationKind::Insert, entity, Entries::Structured(rows))
    }

    pub fn upsert(entity: impl Into<String>, rows: Vec<JsonMap>) -> Self {
        Self::new(OperationKind::Upsert, entity, Entries::Structured(rows))
    }

    /// Update the row selected by a key predicate with `data`.
    pub fn update(entity: impl Into<String>, filter: Filter, data: JsonMap) -> Self {
        Self {
            filter: Some(filter),
            ..Self::new(OperationKind::Update, entity, Entries::Structured(vec![data]))
        }
    }

    /// Delete the rows matching `filter`, or every row when it is `None`.
    pub fn delete(entity: impl Into<String>, filter: Option<Filter>) -> Self {
        Self {
            filter,
            ..Self::new(OperationKind::Delete, entity, Entries::Structured(Vec::new()))
        }
    }

    /// A write with positional rows.
    pub fn positional(
        kind: OperationKind,
        entity: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    ) -> Self {
        Self::new(kind, entity, Entries::Positional { columns, rows })
    }

    /// Build a write from a JSON object or array of objects.
    pub fn from_json(
        kind: OperationKind,
        entity: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Result<Self> {
        let entity = entity.into();
        let rows = match payload {
            serde_json::Value::Object(row) => vec![row.clone()],
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object().cloned().ok_or_else(|| {
                        DeepError::invalid_payload(&entity, "payload array must contain objects")
                    })
                })
                .collect::<std::result::Result<_, _>>()?,
            _ => {
                return Err(DeepError::invalid_payload(
                    &entity,
                    "payload must be an object or an array of objects",
                )
                .into());
            }
        };
        Ok(Self::new(kind, entity, Entries::Structured(rows)))
    }

    pub fn is_positional(&self) -> bool {
        matches!(self.entries, Entries::Positional { .. })
    }

    /// Structured rows, if any.
    pub fn rows(&self) -> Option<&[JsonMap]> {
        match &self.entries {
            Entries::Structured(rows) => Some(rows),
            Entries::Positional { .. } => None,
        }
    }

    /// Turn a structured update into an upsert whose data carries the key
    /// predicate. Other operations are returned unchanged.
    pub fn normalized(&self) -> Result<Operation> {
        let (OperationKind::Update, Entries::Structured(rows)) = (self.kind, &self.entries) else {
            return Ok(self.clone());
        };
        let mut keys = Vec::new();
        if let Some(filter) = &self.filter {
            key_terms(filter, &mut keys).map_err(|column| {
                DeepError::invalid_payload(
                    &self.entity,
                    format!(
                        "update predicate on '{}' must be a conjunction of key equalities",
                        column
                    ),
                )
            })?;
        }
        let rows = rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                for (column, value) in &keys {
                    row.insert((*column).to_string(), value.to_json());
                }
                row
            })
            .collect();
        Ok(Operation {
            kind: OperationKind::Upsert,
            entity: self.entity.clone(),
            entries: Entries::Structured(rows),
            filter: None,
        })
    }
}

fn key_terms<'f>(
    filter: &'f Filter,
    out: &mut Vec<(&'f str, &'f Value)>,
) -> std::result::Result<(), String> {
    match filter {
        Filter::Eq { column, value } => {
            out.push((column, value));
            Ok(())
        }
        Filter::And(terms) => terms.iter().try_for_each(|t| key_terms(t, out)),
        other => Err(other.columns().join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_becomes_upsert_with_key() {
        let data = json!({"qty": 3}).as_object().unwrap().clone();
        let op = Operation::update("Items", Filter::eq("ID", 7_i64), data);
        let norm = op.normalized().unwrap();
        assert_eq!(norm.kind, OperationKind::Upsert);
        assert!(norm.filter.is_none());
        assert_eq!(norm.rows().unwrap()[0], *json!({"ID": 7, "qty": 3}).as_object().unwrap());
    }

    #[test]
    fn update_needs_equalities() {
        let select = deepsql_core::Select::new("Orders", vec!["ID".into()]);
        let filter = Filter::In {
            columns: vec!["order_ID".into()],
            select: Box::new(select),
        };
        let op = Operation::update("Items", filter, JsonMap::new());
        let err = op.normalized().unwrap_err();
        assert!(err.to_string().contains("order_ID"));
    }

    #[test]
    fn from_json_accepts_object_or_array() {
        let one = Operation::from_json(OperationKind::Insert, "Orders", &json!({"ID": 1})).unwrap();
        assert_eq!(one.entries.len(), 1);
        let many =
            Operation::from_json(OperationKind::Insert, "Orders", &json!([{"ID": 1}, {"ID": 2}]))
                .unwrap();
        assert_eq!(many.entries.len(), 2);
        assert!(Operation::from_json(OperationKind::Insert, "Orders", &json!([1])).is_err());
        assert!(Operation::from_json(OperationKind::Insert, "Orders", &json!("x")).is_err());
    }

    #[test]
    fn non_updates_are_unchanged() {
        let op = Operation::positional(
            OperationKind::Insert,
            "Orders",
            vec!["ID".into()],
            vec![vec![json!(1)]],
        );
        assert!(op.is_positional());
        assert_eq!(op.normalized().unwrap(), op);
    }
}
