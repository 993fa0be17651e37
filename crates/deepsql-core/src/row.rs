//! Rows read back from an executor.

use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column layout of a result set, shared by its rows.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One row of a `Select`, addressed by column name.
#[derive(Debug, Clone)]
pub struct Row {
    layout: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_layout(Arc::new(ColumnInfo::new(names)), values)
    }

    /// A row sharing the layout of the rest of its result set.
    pub fn with_layout(layout: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { layout, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.values.get(self.layout.position(name)?)
    }

    /// Values of `names` in order; columns the row lacks read as `Null`.
    ///
    /// Orphan matching projects persisted child rows onto their key columns
    /// with this.
    pub fn project(&self, names: &[String]) -> Vec<Value> {
        names
            .iter()
            .map(|name| self.get_by_name(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// The row as a flat JSON object.
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.layout
            .names()
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_access_and_projection() {
        let row = Row::new(
            vec!["ID".to_string(), "qty".to_string()],
            vec![Value::BigInt(1), Value::Int(5)],
        );
        assert_eq!(row.len(), 2);
        assert_eq!(row.get_by_name("qty"), Some(&Value::Int(5)));
        assert_eq!(row.get_by_name("order_ID"), None);
        assert_eq!(
            row.project(&["qty".to_string(), "order_ID".to_string()]),
            vec![Value::Int(5), Value::Null]
        );
        assert_eq!(row.to_json()["ID"], serde_json::json!(1));
    }

    #[test]
    fn rows_share_a_layout() {
        let layout = Arc::new(ColumnInfo::new(vec!["ID".to_string()]));
        let a = Row::with_layout(Arc::clone(&layout), vec![Value::Int(1)]);
        let b = Row::with_layout(Arc::clone(&layout), vec![Value::Int(2)]);
        assert_eq!(a.get_by_name("ID"), Some(&Value::Int(1)));
        assert_eq!(b.get_by_name("ID"), Some(&Value::Int(2)));
        assert_eq!(Arc::strong_count(&layout), 3);
    }
}
