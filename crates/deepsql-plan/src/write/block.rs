//! Single-block strategy.
//!
//! A block program is a typed list of steps over one serialized payload:
//! extract each target's rows by path, delete orphans, write in dependency
//! order, then count the root rows. The program is data, interpreted per
//! request, and printable for inspection.

use super::{OrphanCheck, OrphanRule, RowValues, build_writes, row_values};
use crate::context::RequestContext;
use crate::operation::OperationKind;
use crate::propagate::fill_keys;
use crate::template::WriteTemplate;
use deepsql_core::{JsonMap, Result, SchemaError, Statement};
use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.([A-Za-z_][A-Za-z0-9_]*)(\[\*\])?").expect("static path segment regex")
});

/// A payload path such as `$` or `$.items[*].parts[*]`.
///
/// `$` addresses the root rows; `field` descends into a to-one object and
/// `field[*]` into every element of a to-many array. Nulls are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    segments: Vec<(String, bool)>,
}

impl JsonPath {
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || SchemaError::invalid(format!("invalid payload path '{}'", path));
        let mut rest = path.strip_prefix('$').ok_or_else(invalid)?;
        let mut segments = Vec::new();
        while !rest.is_empty() {
            let caps = SEGMENT.captures(rest).ok_or_else(invalid)?;
            let (Some(whole), Some(field)) = (caps.get(0), caps.get(1)) else {
                return Err(invalid().into());
            };
            segments.push((field.as_str().to_string(), caps.get(2).is_some()));
            rest = &rest[whole.end()..];
        }
        Ok(Self {
            source: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Rows addressed by this path in a payload (an array of root rows).
    pub fn select<'a>(&self, payload: &'a serde_json::Value) -> Vec<&'a JsonMap> {
        let mut current: Vec<&JsonMap> = match payload {
            serde_json::Value::Array(items) => {
                items.iter().filter_map(serde_json::Value::as_object).collect()
            }
            serde_json::Value::Object(row) => vec![row],
            _ => Vec::new(),
        };
        for (field, many) in &self.segments {
            let mut next = Vec::new();
            for row in current {
                match (row.get(field), many) {
                    (Some(serde_json::Value::Array(items)), true) => {
                        next.extend(items.iter().filter_map(serde_json::Value::as_object));
                    }
                    (Some(serde_json::Value::Object(child)), false) => next.push(child),
                    _ => {}
                }
            }
            current = next;
        }
        current
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// One step of a block program.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStep {
    /// Extract a target's rows from every path it occurs at.
    Extract { target: usize, paths: Vec<JsonPath> },
    /// Delete the orphans of one to-many composition.
    DeleteOrphans { rule: usize, parents: Vec<JsonPath> },
    /// Write the rows extracted for a target.
    Write { target: usize },
    /// Count the rows at a path; the program's result.
    Count { path: JsonPath },
}

/// Cached single-block program of one entity and operation kind.
#[derive(Debug)]
pub struct BlockProgram {
    pub kind: OperationKind,
    pub template: Arc<WriteTemplate>,
    pub steps: Vec<BlockStep>,
    pub orphans: Vec<OrphanRule>,
}

impl BlockProgram {
    pub fn new(
        kind: OperationKind,
        template: Arc<WriteTemplate>,
        orphans: Vec<OrphanRule>,
    ) -> Result<Self> {
        let mut steps = Vec::new();
        for &target in &template.order {
            let paths = template
                .target(target)
                .paths
                .iter()
                .map(|p| JsonPath::parse(p))
                .collect::<Result<_>>()?;
            steps.push(BlockStep::Extract { target, paths });
        }
        for (rule, orphan) in orphans.iter().enumerate() {
            let parents = orphan
                .parent_paths
                .iter()
                .map(|p| JsonPath::parse(p))
                .collect::<Result<_>>()?;
            steps.push(BlockStep::DeleteOrphans { rule, parents });
        }
        for &target in &template.order {
            steps.push(BlockStep::Write { target });
        }
        steps.push(BlockStep::Count {
            path: JsonPath::parse("$")?,
        });
        Ok(Self {
            kind,
            template,
            steps,
            orphans,
        })
    }

    pub fn entity(&self) -> &str {
        self.template.entity()
    }

    /// Stamp keys over `rows` and serialize them as the program's payload.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.entity(), rows = rows.len()))]
    pub fn bind(self: &Arc<Self>, ctx: &mut RequestContext, rows: &[JsonMap]) -> Result<BoundBlock> {
        let stamped = fill_keys(ctx, &self.template, rows)?;
        let payload = serde_json::to_string(&stamped)?;
        tracing::trace!(bytes = payload.len(), "serialized block payload");
        Ok(BoundBlock {
            program: Arc::clone(self),
            payload,
        })
    }
}

impl fmt::Display for BlockProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "block {} {}", self.entity(), self.kind)?;
        for step in &self.steps {
            match step {
                BlockStep::Extract { target, paths } => {
                    let paths: Vec<&str> = paths.iter().map(JsonPath::as_str).collect();
                    writeln!(
                        f,
                        "  extract {} from {}",
                        self.template.target(*target).table(),
                        paths.join(", ")
                    )?;
                }
                BlockStep::DeleteOrphans { rule, parents } => {
                    let rule = &self.orphans[*rule];
                    let parents: Vec<&str> = parents.iter().map(JsonPath::as_str).collect();
                    writeln!(
                        f,
                        "  delete orphans {} of {}.{} at {}",
                        self.template.target(rule.child).table(),
                        self.template.target(rule.parent).table(),
                        rule.field,
                        parents.join(", ")
                    )?;
                }
                BlockStep::Write { target } => {
                    writeln!(f, "  {} {}", self.kind, self.template.target(*target).table())?;
                }
                BlockStep::Count { path } => writeln!(f, "  count {}", path)?,
            }
        }
        Ok(())
    }
}

/// What the interpreter asks the executor to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockAction {
    /// Query persisted children and delete the ones not submitted.
    Orphans(Vec<OrphanCheck>),
    Write(Vec<Statement>),
    /// Final result.
    Count(u64),
}

/// A block program bound to one serialized payload.
#[derive(Debug, Clone)]
pub struct BoundBlock {
    pub program: Arc<BlockProgram>,
    pub payload: String,
}

impl BoundBlock {
    /// Interpret the program over the payload.
    ///
    /// A target's rows are extracted path by path, so a hierarchy is written
    /// level by level rather than in payload order.
    ///
    /// Everything that can fail without a database fails here, before the
    /// first action runs.
    pub fn actions(&self) -> Result<Vec<BlockAction>> {
        let program = &self.program;
        let template = &program.template;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let upsert = program.kind == OperationKind::Upsert;

        let mut extracted: Vec<Vec<RowValues>> = vec![Vec::new(); template.targets.len()];
        let mut actions = Vec::new();
        for step in &program.steps {
            match step {
                BlockStep::Extract { target, paths } => {
                    let columns = &template.target(*target).columns;
                    for path in paths {
                        extracted[*target]
                            .extend(path.select(&payload).into_iter().map(|row| row_values(columns, row)));
                    }
                }
                BlockStep::DeleteOrphans { rule, parents } => {
                    let orphan = &program.orphans[*rule];
                    let checks: Vec<OrphanCheck> = parents
                        .iter()
                        .flat_map(|path| path.select(&payload))
                        .filter_map(|row| OrphanCheck::for_parent(*rule, orphan, template, row))
                        .collect();
                    if !checks.is_empty() {
                        actions.push(BlockAction::Orphans(checks));
                    }
                }
                BlockStep::Write { target } => {
                    let writes = build_writes(template.target(*target), &extracted[*target], upsert);
                    if !writes.is_empty() {
                        actions.push(BlockAction::Write(writes));
                    }
                }
                BlockStep::Count { path } => {
                    actions.push(BlockAction::Count(path.select(&payload).len() as u64));
                }
            }
        }
        Ok(actions)
    }
}
