//! Shared fixtures: an in-memory executor and test schemas.

#![allow(dead_code)]

use asupersync::runtime::{Runtime, RuntimeBuilder};
use deepsql::{
    Association, Cx, DeepConfig, DeepPlanner, Dialect, Element, EntityDefinition, Error,
    Executor, Filter, JsonMap, OnCondition, Outcome, Projection, Row, Schema, Select, SqlType,
    Statement, Value,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Default)]
pub struct MemoryState {
    pub tables: BTreeMap<String, Vec<Record>>,
    pub executed: Vec<Statement>,
    pub queries: Vec<Select>,
}

/// Executor keeping tables in memory and evaluating filters structurally.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutor {
    pub state: Arc<Mutex<MemoryState>>,
    single_block: bool,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single_block() -> Self {
        Self {
            single_block: true,
            ..Self::default()
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .expect("lock poisoned")
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Rows of a table as JSON objects.
    pub fn json_rows(&self, table: &str) -> Vec<serde_json::Value> {
        self.rows(table)
            .into_iter()
            .map(|record| {
                serde_json::Value::Object(
                    record
                        .into_iter()
                        .map(|(k, v)| (k, v.to_json()))
                        .collect(),
                )
            })
            .collect()
    }

    pub fn executed(&self) -> Vec<Statement> {
        self.state.lock().expect("lock poisoned").executed.clone()
    }

    pub fn tables(&self) -> BTreeMap<String, Vec<Record>> {
        self.state.lock().expect("lock poisoned").tables.clone()
    }

    fn apply(&self, statement: &Statement) -> u64 {
        let mut state = self.state.lock().expect("lock poisoned");
        state.executed.push(statement.clone());
        match statement {
            Statement::Insert(insert) => {
                let mut count = 0;
                for values in &insert.rows {
                    let record: Record = insert
                        .columns
                        .iter()
                        .zip(values)
                        .map(|(c, v)| {
                            let v = if v.is_default() { Value::Null } else { v.clone() };
                            (c.clone(), v)
                        })
                        .collect();
                    let table = state.tables.entry(insert.table.clone()).or_default();
                    let existing = insert.upsert_keys.as_ref().and_then(|keys| {
                        table.iter().position(|row| {
                            keys.iter().all(|k| match (row.get(k), record.get(k)) {
                                (Some(a), Some(b)) => a.sql_eq(b),
                                _ => false,
                            })
                        })
                    });
                    match existing {
                        Some(i) => table[i].extend(record),
                        None => table.push(record),
                    }
                    count += 1;
                }
                count
            }
            Statement::Delete(delete) => {
                let Some(rows) = state.tables.get(&delete.table) else {
                    return 0;
                };
                let doomed: Vec<bool> = rows
                    .iter()
                    .map(|row| matches(&state, delete.filter.as_ref(), row))
                    .collect();
                let count = doomed.iter().filter(|d| **d).count() as u64;
                let mut flags = doomed.into_iter();
                if let Some(rows) = state.tables.get_mut(&delete.table) {
                    rows.retain(|_| !flags.next().unwrap_or(false));
                }
                count
            }
        }
    }
}

fn select_rows(state: &MemoryState, select: &Select) -> Vec<Vec<Value>> {
    state
        .tables
        .get(&select.table)
        .into_iter()
        .flatten()
        .filter(|row| matches(state, select.filter.as_ref(), row))
        .map(|row| {
            select
                .columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect()
}

fn tuple_matches(row: &Record, columns: &[String], values: &[Value]) -> bool {
    columns
        .iter()
        .zip(values)
        .all(|(c, v)| row.get(c).is_some_and(|x| x.sql_eq(v)))
}

fn matches(state: &MemoryState, filter: Option<&Filter>, row: &Record) -> bool {
    match filter {
        None => true,
        Some(Filter::Eq { column, value }) if value.is_null() => {
            row.get(column).is_none_or(Value::is_null)
        }
        Some(Filter::Eq { column, value }) => row.get(column).is_some_and(|v| v.sql_eq(value)),
        Some(Filter::And(terms)) => terms.iter().all(|t| matches(state, Some(t), row)),
        Some(Filter::In { columns, select }) => select_rows(state, select)
            .iter()
            .any(|values| tuple_matches(row, columns, values)),
        Some(Filter::InValues { columns, rows }) => {
            rows.iter().any(|values| tuple_matches(row, columns, values))
        }
    }
}

impl Executor for MemoryExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn supports_single_block(&self) -> bool {
        self.single_block
    }

    fn execute(
        &self,
        _cx: &Cx,
        statement: &Statement,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let count = self.apply(statement);
        async move { Outcome::Ok(count) }
    }

    fn query(
        &self,
        _cx: &Cx,
        select: &Select,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let rows = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.queries.push(select.clone());
            select_rows(&state, select)
                .into_iter()
                .map(|values| Row::new(select.columns.clone(), values))
                .collect()
        };
        async move { Outcome::Ok(rows) }
    }
}

pub fn runtime() -> Runtime {
    RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime")
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn obj(value: serde_json::Value) -> JsonMap {
    value.as_object().cloned().expect("object payload")
}

pub fn planner(schema: Schema) -> Arc<DeepPlanner> {
    Arc::new(DeepPlanner::new(Arc::new(schema), DeepConfig::default()).expect("valid config"))
}

/// Orders owning items (managed backlink), an invoice (managed to-one
/// composition) and comments (explicit equality plus a literal); items own
/// parts through an explicit equality.
pub fn shop() -> Schema {
    Schema::builder()
        .entity(
            EntityDefinition::new("Orders")
                .element(Element::scalar("ID", SqlType::Integer).key())
                .element(Element::scalar("note", SqlType::Text))
                .element(Element::structured(
                    "shipping",
                    vec![
                        Element::scalar("city", SqlType::Text),
                        Element::scalar("zip", SqlType::Text),
                    ],
                ))
                .element(Element::association(
                    "invoice",
                    Association::to_one("Invoices").composition(),
                ))
                .element(Element::association(
                    "items",
                    Association::to_many("Items")
                        .composition()
                        .on(OnCondition::backlink("items", "order")),
                ))
                .element(Element::association(
                    "comments",
                    Association::to_many("Comments").composition().on(OnCondition::and(vec![
                        OnCondition::eq("comments.owner_ID", "ID"),
                        OnCondition::eq_literal("comments.kind", "order"),
                    ])),
                )),
        )
        .entity(
            EntityDefinition::new("Invoices")
                .element(Element::uuid_key("ID"))
                .element(Element::scalar("total", SqlType::Integer)),
        )
        .entity(
            EntityDefinition::new("Items")
                .element(Element::uuid_key("ID"))
                .element(Element::association("order", Association::to_one("Orders")))
                .element(Element::scalar("qty", SqlType::Integer))
                .element(Element::association(
                    "parts",
                    Association::to_many("Parts")
                        .composition()
                        .on(OnCondition::eq("parts.item_ID", "ID")),
                )),
        )
        .entity(
            EntityDefinition::new("Parts")
                .element(Element::uuid_key("ID"))
                .element(Element::scalar("item_ID", SqlType::Uuid))
                .element(Element::scalar("name", SqlType::Text)),
        )
        .entity(
            EntityDefinition::new("Comments")
                .element(Element::uuid_key("ID"))
                .element(Element::scalar("owner_ID", SqlType::Integer))
                .element(Element::scalar("kind", SqlType::Text))
                .element(Element::scalar("text", SqlType::Text)),
        )
        .entity(
            EntityDefinition::new("OrderHeaders")
                .element(Element::scalar("ID", SqlType::Integer).key())
                .element(Element::scalar("remark", SqlType::Text))
                .projection(Projection::of("Orders").map("ID", "ID").map("remark", "note")),
        )
        .build()
        .expect("valid shop schema")
}

/// `Order{id}` owning `items: many OrderItem{id, order_id, qty}`.
pub fn order_items() -> Schema {
    Schema::builder()
        .entity(
            EntityDefinition::new("Order")
                .element(Element::scalar("id", SqlType::Integer).key())
                .element(Element::association(
                    "items",
                    Association::to_many("OrderItem")
                        .composition()
                        .on(OnCondition::backlink("items", "order")),
                )),
        )
        .entity(
            EntityDefinition::new("OrderItem")
                .element(Element::uuid_key("id"))
                .element(Element::association("order", Association::to_one("Order")))
                .element(Element::scalar("qty", SqlType::Integer)),
        )
        .build()
        .expect("valid order schema")
}

/// A self-referential hierarchy `Node.children: many Node`.
pub fn nodes() -> Schema {
    Schema::builder()
        .entity(
            EntityDefinition::new("Nodes")
                .element(Element::scalar("ID", SqlType::Integer).key())
                .element(Element::association("parent", Association::to_one("Nodes")))
                .element(Element::scalar("name", SqlType::Text))
                .element(Element::association(
                    "children",
                    Association::to_many("Nodes")
                        .composition()
                        .on(OnCondition::backlink("children", "parent")),
                )),
        )
        .build()
        .expect("valid node schema")
}

/// `A.bs -> B` and `B.as -> A` through distinct compositions.
pub fn cyclic() -> Schema {
    Schema::builder()
        .entity(
            EntityDefinition::new("A")
                .element(Element::scalar("ID", SqlType::Integer).key())
                .element(Element::association("b", Association::to_one("B")))
                .element(Element::association(
                    "bs",
                    Association::to_many("B")
                        .composition()
                        .on(OnCondition::backlink("bs", "a")),
                )),
        )
        .entity(
            EntityDefinition::new("B")
                .element(Element::scalar("ID", SqlType::Integer).key())
                .element(Element::association("a", Association::to_one("A")))
                .element(Element::association(
                    "as_",
                    Association::to_many("A")
                        .composition()
                        .on(OnCondition::backlink("as_", "b")),
                )),
        )
        .build()
        .expect("valid cyclic schema")
}
