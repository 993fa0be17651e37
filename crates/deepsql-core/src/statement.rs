//! Typed low-level statements emitted by the deep planners.
//!
//! Statements stay structured until an executor asks for SQL text, so plans
//! can be inspected and interpreted without a database.

use crate::identifiers::Dialect;
use crate::value::Value;
use std::fmt;

/// A row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value` (`IS NULL` for a null value).
    Eq { column: String, value: Value },
    /// Conjunction; an empty conjunction is true.
    And(Vec<Filter>),
    /// `(columns) IN (SELECT ...)`.
    In {
        columns: Vec<String>,
        select: Box<Select>,
    },
    /// `(columns) IN ((v, ..), ..)`; an empty list matches nothing.
    InValues {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut terms) => {
                terms.push(other);
                Filter::And(terms)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Column names referenced at this level (not inside subqueries).
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Filter::Eq { column, .. } => vec![column.as_str()],
            Filter::And(terms) => terms.iter().flat_map(Filter::columns).collect(),
            Filter::In { columns, .. } | Filter::InValues { columns, .. } => {
                columns.iter().map(String::as_str).collect()
            }
        }
    }

    /// Rename the columns referenced at this level.
    ///
    /// Returns the first column the mapping cannot resolve.
    pub fn map_columns<F>(&self, map: &F) -> std::result::Result<Filter, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rename = |cols: &[String]| -> std::result::Result<Vec<String>, String> {
            cols.iter()
                .map(|c| map(c).ok_or_else(|| c.clone()))
                .collect()
        };
        Ok(match self {
            Filter::Eq { column, value } => Filter::Eq {
                column: map(column).ok_or_else(|| column.clone())?,
                value: value.clone(),
            },
            Filter::And(terms) => Filter::And(
                terms
                    .iter()
                    .map(|t| t.map_columns(map))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Filter::In { columns, select } => Filter::In {
                columns: rename(columns)?,
                select: select.clone(),
            },
            Filter::InValues { columns, rows } => Filter::InValues {
                columns: rename(columns)?,
                rows: rows.clone(),
            },
        })
    }
}

/// `INSERT INTO table (columns) VALUES ...`, optionally an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Conflict keys; when set, existing rows are updated instead.
    pub upsert_keys: Option<Vec<String>>,
}

impl Insert {
    pub fn is_upsert(&self) -> bool {
        self.upsert_keys.is_some()
    }
}

/// `DELETE FROM table [WHERE filter]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Filter>,
}

/// `SELECT columns FROM table [WHERE filter]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub filter: Option<Filter>,
}

impl Select {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            filter: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut w = SqlWriter::new(dialect);
        w.select(self);
        w.finish()
    }
}

/// A statement an executor runs for its affected-row count.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert(Insert),
    Delete(Delete),
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert(i) => &i.table,
            Statement::Delete(d) => &d.table,
        }
    }

    /// Render SQL text and bound parameters for a dialect.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut w = SqlWriter::new(dialect);
        match self {
            Statement::Insert(insert) => w.insert(insert),
            Statement::Delete(delete) => {
                w.push("DELETE FROM ");
                w.ident(&delete.table);
                w.filter_clause(delete.filter.as_ref());
            }
        }
        w.finish()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sql, params) = self.to_sql(Dialect::Postgres);
        write!(f, "{sql}")?;
        if !params.is_empty() {
            write!(f, " -- {} params", params.len())?;
        }
        Ok(())
    }
}

struct SqlWriter {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn ident(&mut self, name: &str) {
        let quoted = self.dialect.quote_identifier(name);
        self.sql.push_str(&quoted);
    }

    fn ident_list(&mut self, names: &[String]) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name);
        }
    }

    fn bind(&mut self, value: &Value) {
        if value.is_default() {
            self.push("DEFAULT");
            return;
        }
        self.params.push(value.clone());
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn tuple(&mut self, names: &[String]) {
        if names.len() == 1 {
            self.ident(&names[0]);
        } else {
            self.push("(");
            self.ident_list(names);
            self.push(")");
        }
    }

    fn insert(&mut self, insert: &Insert) {
        // INSERT INTO "t" ("a", "b") VALUES ($1, $2), ($3, $4)
        self.push("INSERT INTO ");
        self.ident(&insert.table);
        self.push(" (");
        self.ident_list(&insert.columns);
        self.push(") VALUES ");
        for (i, row) in insert.rows.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push("(");
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    self.push(", ");
                }
                self.bind(value);
            }
            self.push(")");
        }

        let Some(keys) = &insert.upsert_keys else {
            return;
        };
        let updates: Vec<&String> = insert
            .columns
            .iter()
            .filter(|c| !keys.contains(c))
            .collect();
        match self.dialect {
            Dialect::Postgres | Dialect::Sqlite => {
                self.push(" ON CONFLICT (");
                self.ident_list(keys);
                if updates.is_empty() {
                    self.push(") DO NOTHING");
                    return;
                }
                self.push(") DO UPDATE SET ");
                for (i, col) in updates.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.ident(col);
                    self.push(" = EXCLUDED.");
                    self.ident(col);
                }
            }
            Dialect::Mysql => {
                self.push(" ON DUPLICATE KEY UPDATE ");
                let updates = if updates.is_empty() {
                    keys.iter().take(1).collect()
                } else {
                    updates
                };
                for (i, col) in updates.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.ident(col);
                    self.push(" = VALUES(");
                    self.ident(col);
                    self.push(")");
                }
            }
        }
    }

    fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        self.ident_list(&select.columns);
        self.push(" FROM ");
        self.ident(&select.table);
        self.filter_clause(select.filter.as_ref());
    }

    fn filter_clause(&mut self, filter: Option<&Filter>) {
        if let Some(filter) = filter {
            self.push(" WHERE ");
            self.filter(filter);
        }
    }

    fn filter(&mut self, filter: &Filter) {
        match filter {
            Filter::Eq { column, value } => {
                self.ident(column);
                if value.is_null() {
                    self.push(" IS NULL");
                } else {
                    self.push(" = ");
                    self.bind(value);
                }
            }
            Filter::And(terms) if terms.is_empty() => self.push("1 = 1"),
            Filter::And(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        self.push(" AND ");
                    }
                    let nested = matches!(term, Filter::And(t) if t.len() > 1);
                    if nested {
                        self.push("(");
                    }
                    self.filter(term);
                    if nested {
                        self.push(")");
                    }
                }
            }
            Filter::In { columns, select } => {
                self.tuple(columns);
                self.push(" IN (");
                self.select(select);
                self.push(")");
            }
            Filter::InValues { rows, .. } if rows.is_empty() => self.push("1 = 0"),
            Filter::InValues { columns, rows } => {
                self.tuple(columns);
                self.push(" IN (");
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    if row.len() == 1 {
                        self.bind(&row[0]);
                    } else {
                        self.push("(");
                        for (j, value) in row.iter().enumerate() {
                            if j > 0 {
                                self.push(", ");
                            }
                            self.bind(value);
                        }
                        self.push(")");
                    }
                }
                self.push(")");
            }
        }
    }
}
