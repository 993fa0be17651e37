//! Template processor.
//!
//! Matches a template tree against payload rows and reports every picked
//! field to a visitor, at every nesting level. The processor never mutates
//! rows, so one template can be matched against many row sets concurrently.

use crate::template::{Template, TemplateEntry};
use deepsql_core::{JsonMap, Result};
use std::fmt::Write as _;

/// One step of the path from the root row to the row being visited.
#[derive(Debug, Clone, Copy)]
pub struct PathSegment<'a> {
    /// Field that led here, or the entity name for a root row.
    pub key: &'a str,
    pub key_names: &'a [String],
    pub row: &'a JsonMap,
    pub template: &'a Template,
}

impl PathSegment<'_> {
    /// `items(ID=7)` style locator for this segment.
    pub fn locator(&self) -> String {
        let mut out = self.key.to_string();
        if self.key_names.is_empty() {
            return out;
        }
        out.push('(');
        for (i, name) in self.key_names.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let value = self
                .template
                .target_column(name)
                .and_then(|c| c.read(self.row))
                .or_else(|| self.row.get(name));
            match value {
                Some(serde_json::Value::String(s)) => {
                    let _ = write!(out, "{}={}", name, s);
                }
                Some(v) => {
                    let _ = write!(out, "{}={}", name, v);
                }
                None => {
                    let _ = write!(out, "{}=?", name);
                }
            }
        }
        out.push(')');
        out
    }
}

/// Join path segments into a stable locator such as
/// `Orders(ID=1)/items(ID=7)`.
pub fn locator(path: &[PathSegment<'_>]) -> String {
    path.iter()
        .map(PathSegment::locator)
        .collect::<Vec<_>>()
        .join("/")
}

/// A field matched by the processor.
#[derive(Debug, Clone, Copy)]
pub struct FieldVisit<'a> {
    pub row: &'a JsonMap,
    pub field: &'a str,
    pub entry: &'a TemplateEntry,
    pub template: &'a Template,
    pub is_root: bool,
    /// Path to `row`; empty unless key tracking is enabled.
    pub path: &'a [PathSegment<'a>],
}

impl FieldVisit<'_> {
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.row.get(self.field)
    }
}

/// Callbacks invoked by [`match_template`].
pub trait Visitor {
    /// Called once per picked field present on a row.
    fn visit_field(&mut self, visit: &FieldVisit<'_>) -> Result<()>;

    /// Called once per matched row before its fields.
    fn visit_row(
        &mut self,
        _template: &Template,
        _row: &JsonMap,
        _is_root: bool,
        _path: &[PathSegment<'_>],
    ) -> Result<()> {
        Ok(())
    }
}

/// Options for [`match_template`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Thread key-identifying path segments to the visitor.
    pub track_keys: bool,
}

/// Match `template` against `rows`, reporting to `visitor`.
pub fn match_template<V: Visitor + ?Sized>(
    template: &Template,
    rows: &[JsonMap],
    visitor: &mut V,
    options: MatchOptions,
) -> Result<()> {
    let mut path = Vec::new();
    for row in rows {
        walk(template, template.target.name(), row, true, visitor, options, &mut path)?;
    }
    Ok(())
}

fn walk<'a, V: Visitor + ?Sized>(
    template: &'a Template,
    key: &'a str,
    row: &'a JsonMap,
    is_root: bool,
    visitor: &mut V,
    options: MatchOptions,
    path: &mut Vec<PathSegment<'a>>,
) -> Result<()> {
    if options.track_keys {
        path.push(PathSegment {
            key,
            key_names: &template.keys,
            row,
            template,
        });
    }
    let result = visit(template, row, is_root, visitor, options, path);
    if options.track_keys {
        path.pop();
    }
    result
}

fn visit<'a, V: Visitor + ?Sized>(
    template: &'a Template,
    row: &'a JsonMap,
    is_root: bool,
    visitor: &mut V,
    options: MatchOptions,
    path: &mut Vec<PathSegment<'a>>,
) -> Result<()> {
    visitor.visit_row(template, row, is_root, path)?;
    for entry in &template.entries {
        if !entry.picked {
            continue;
        }
        let Some(value) = row.get(&entry.field) else {
            continue;
        };
        visitor.visit_field(&FieldVisit {
            row,
            field: &entry.field,
            entry,
            template,
            is_root,
            path,
        })?;

        let Some(sub) = &entry.subtemplate else {
            continue;
        };
        match value {
            serde_json::Value::Object(child) => {
                walk(sub, &entry.field, child, false, visitor, options, path)?;
            }
            serde_json::Value::Array(children) => {
                for child in children {
                    if let serde_json::Value::Object(child) = child {
                        walk(sub, &entry.field, child, false, visitor, options, path)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}
