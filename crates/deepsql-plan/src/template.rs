//! Composition walker and template builder.
//!
//! A template is a tree describing which fields and owned targets a deep
//! operation touches, independent of any payload. It is a pure function of
//! the schema and is built once per entity, then shared.

use crate::config::DeepConfig;
use crate::foreign_keys::resolve;
use deepsql_core::{
    Column, DeepError, ElementKind, EntityDefinition, ForeignKeyPropagation, PropagationDirection,
    Result, Schema,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a template entry stands for.
#[derive(Debug, Clone)]
pub enum EntryKind {
    /// A persisted scalar or structured element and its columns.
    Element { columns: Vec<Column> },
    /// A managed to-one association stored as foreign-key columns.
    Association {
        target: String,
        columns: Vec<Column>,
        propagations: Arc<[ForeignKeyPropagation]>,
    },
    /// A composition reaching owned rows.
    Composition {
        target: String,
        to_many: bool,
        propagations: Arc<[ForeignKeyPropagation]>,
    },
}

/// One field of a template node.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub field: String,
    /// Visited by the template processor.
    pub picked: bool,
    pub kind: EntryKind,
    pub subtemplate: Option<Arc<Template>>,
}

impl TemplateEntry {
    pub fn is_composition(&self) -> bool {
        matches!(self.kind, EntryKind::Composition { .. })
    }

    pub fn propagations(&self) -> Option<&Arc<[ForeignKeyPropagation]>> {
        match &self.kind {
            EntryKind::Association { propagations, .. }
            | EntryKind::Composition { propagations, .. } => Some(propagations),
            EntryKind::Element { .. } => None,
        }
    }
}

/// A template node: one target entity and its ordered entries.
#[derive(Debug, Clone)]
pub struct Template {
    pub target: Arc<EntityDefinition>,
    /// Index into [`WriteTemplate::targets`].
    pub target_index: usize,
    pub keys: Vec<String>,
    pub entries: Vec<TemplateEntry>,
}

impl Template {
    pub fn entry(&self, field: &str) -> Option<&TemplateEntry> {
        self.entries.iter().find(|e| e.field == field)
    }

    /// Composition entries that were not pruned.
    pub fn compositions(&self) -> impl Iterator<Item = (&TemplateEntry, &Arc<Template>)> {
        self.entries
            .iter()
            .filter(|e| e.is_composition() && e.picked)
            .filter_map(|e| e.subtemplate.as_ref().map(|sub| (e, sub)))
    }

    /// Column of this node's target by name.
    pub fn target_column(&self, name: &str) -> Option<&Column> {
        self.entries.iter().find_map(|e| match &e.kind {
            EntryKind::Element { columns } | EntryKind::Association { columns, .. } => {
                columns.iter().find(|c| c.name == name)
            }
            EntryKind::Composition { .. } => None,
        })
    }

    /// Nesting depth of this node's subtree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self
            .compositions()
            .map(|(_, sub)| sub.depth())
            .max()
            .unwrap_or(0)
    }
}

/// A touched target with everything the planners need about it.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub entity: Arc<EntityDefinition>,
    /// Extraction paths, `$` for the root, `$.items[*]` for owned rows.
    pub paths: Vec<String>,
    /// Flattened persisted columns.
    pub columns: Vec<Column>,
    pub keys: Vec<String>,
    /// Columns filled from owning parents, used for orphan matching.
    pub owning_keys: Vec<String>,
}

impl TargetInfo {
    pub fn table(&self) -> &str {
        self.entity.name()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A composition between two targets, with every parent path it occurs at.
#[derive(Debug, Clone)]
pub struct Edge {
    pub parent: usize,
    pub child: usize,
    pub field: String,
    pub to_many: bool,
    pub parent_paths: Vec<String>,
    pub propagations: Arc<[ForeignKeyPropagation]>,
}

impl Edge {
    /// Child columns equal to parent columns, as `(parent, child)`.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.propagations.iter().filter_map(ForeignKeyPropagation::pair)
    }

    /// Does the child need the parent written first?
    pub fn child_needs_parent(&self) -> bool {
        self.propagations
            .iter()
            .any(|p| p.direction == PropagationDirection::FillChild && p.pair().is_some())
    }

    /// Does the parent need the child written first?
    pub fn parent_needs_child(&self) -> bool {
        self.propagations
            .iter()
            .any(|p| p.direction == PropagationDirection::FillParent && p.pair().is_some())
    }
}

/// The cached result of walking an entity's composition graph.
#[derive(Debug, Clone)]
pub struct WriteTemplate {
    pub root: Arc<Template>,
    pub targets: Vec<TargetInfo>,
    pub edges: Vec<Edge>,
    /// Target indexes in dependency order.
    pub order: Vec<usize>,
}

impl WriteTemplate {
    pub fn entity(&self) -> &str {
        self.root.target.name()
    }

    pub fn target(&self, index: usize) -> &TargetInfo {
        &self.targets[index]
    }

    pub fn target_by_name(&self, name: &str) -> Option<&TargetInfo> {
        self.targets.iter().find(|t| t.table() == name)
    }
}

impl fmt::Display for WriteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "template {}", self.entity())?;
        for &i in &self.order {
            let t = &self.targets[i];
            writeln!(
                f,
                "  {} [{}] at {}",
                t.table(),
                t.column_names().join(", "),
                t.paths.join(" | ")
            )?;
        }
        Ok(())
    }
}

/// Walk the composition graph of `entity`.
#[tracing::instrument(level = "debug", skip(schema, config))]
pub fn build_write_template(
    schema: &Schema,
    entity: &str,
    config: &DeepConfig,
) -> Result<WriteTemplate> {
    let root = Arc::clone(schema.entity(entity)?);
    let mut walker = Walker {
        schema,
        config,
        root: root.name().to_string(),
        targets: Vec::new(),
        index: HashMap::new(),
        edges: Vec::new(),
    };
    let mut chain = vec![Link {
        entity: root.name().to_string(),
        via: None,
    }];
    let root = walker.walk(&root, "$", &mut chain)?;
    let order = dependency_order(walker.targets.len(), &walker.edges);
    tracing::debug!(
        entity = entity,
        targets = walker.targets.len(),
        depth = root.depth(),
        "built write template"
    );
    Ok(WriteTemplate {
        root,
        targets: walker.targets,
        edges: walker.edges,
        order,
    })
}

#[derive(Debug)]
struct Link {
    entity: String,
    /// `(owner, element)` of the composition that led here.
    via: Option<(String, String)>,
}

struct Walker<'s> {
    schema: &'s Schema,
    config: &'s DeepConfig,
    root: String,
    targets: Vec<TargetInfo>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
}

impl Walker<'_> {
    fn target_index(&mut self, entity: &Arc<EntityDefinition>) -> Result<usize> {
        if let Some(&i) = self.index.get(entity.name()) {
            return Ok(i);
        }
        let columns = self.schema.columns(entity)?;
        let keys = columns.iter().filter(|c| c.key).map(|c| c.name.clone()).collect();
        let i = self.targets.len();
        self.targets.push(TargetInfo {
            entity: Arc::clone(entity),
            paths: Vec::new(),
            columns,
            keys,
            owning_keys: Vec::new(),
        });
        self.index.insert(entity.name().to_string(), i);
        Ok(i)
    }

    fn walk(
        &mut self,
        entity: &Arc<EntityDefinition>,
        path: &str,
        chain: &mut Vec<Link>,
    ) -> Result<Arc<Template>> {
        let schema = self.schema;
        let index = self.target_index(entity)?;
        self.targets[index].paths.push(path.to_string());
        let columns = self.targets[index].columns.clone();
        let keys = self.targets[index].keys.clone();

        let mut entries = Vec::new();
        for element in entity.elements() {
            if !element.is_persisted() {
                continue;
            }
            let own_columns = || -> Vec<Column> {
                columns
                    .iter()
                    .filter(|c| c.path.first() == Some(&element.name))
                    .cloned()
                    .collect()
            };
            match &element.kind {
                ElementKind::Scalar(_) | ElementKind::Structured(_) => {
                    entries.push(TemplateEntry {
                        field: element.name.clone(),
                        picked: true,
                        kind: EntryKind::Element {
                            columns: own_columns(),
                        },
                        subtemplate: None,
                    });
                }
                ElementKind::Association(assoc) if !assoc.composition => {
                    if !assoc.is_managed() || assoc.is_to_many() {
                        continue;
                    }
                    entries.push(TemplateEntry {
                        field: element.name.clone(),
                        picked: true,
                        kind: EntryKind::Association {
                            target: assoc.target.clone(),
                            columns: own_columns(),
                            propagations: resolve(schema, entity, element)?,
                        },
                        subtemplate: None,
                    });
                }
                ElementKind::Association(assoc) => {
                    let target = schema.entity(&assoc.target)?;
                    if target.is_skipped() {
                        tracing::trace!(
                            owner = entity.name(),
                            field = %element.name,
                            "skipping persistence-skip composition"
                        );
                        continue;
                    }
                    let limit = assoc.depth_limit.unwrap_or(self.config.default_depth_limit);
                    let via = (entity.name().to_string(), element.name.clone());
                    let seen = chain.iter().filter(|l| l.via.as_ref() == Some(&via)).count();
                    let propagations = resolve(schema, entity, element)?;
                    let entry_kind = EntryKind::Composition {
                        target: target.name().to_string(),
                        to_many: assoc.is_to_many(),
                        propagations: Arc::clone(&propagations),
                    };
                    if seen >= limit {
                        tracing::debug!(
                            owner = entity.name(),
                            field = %element.name,
                            limit = limit,
                            "depth limit reached; branch pruned"
                        );
                        entries.push(TemplateEntry {
                            field: element.name.clone(),
                            picked: false,
                            kind: entry_kind,
                            subtemplate: None,
                        });
                        continue;
                    }

                    let revisit = chain.iter().any(|l| l.entity == target.name());
                    // re-entering through a composition already on the chain
                    // repeats a bounded loop; the depth counter above ends it
                    let bounded =
                        target.name() == self.root || target.name() == entity.name() || seen > 0;
                    if revisit && !bounded {
                        let mut names: Vec<String> = chain.iter().map(|l| l.entity.clone()).collect();
                        names.push(target.name().to_string());
                        return Err(DeepError::circular(names).into());
                    }

                    let child_path = if assoc.is_to_many() {
                        format!("{}.{}[*]", path, element.name)
                    } else {
                        format!("{}.{}", path, element.name)
                    };
                    chain.push(Link {
                        entity: target.name().to_string(),
                        via: Some(via),
                    });
                    let target = Arc::clone(target);
                    let sub = self.walk(&target, &child_path, chain);
                    chain.pop();
                    let sub = sub?;

                    self.record_edge(
                        index,
                        sub.target_index,
                        &element.name,
                        assoc.is_to_many(),
                        path,
                        &propagations,
                    );
                    entries.push(TemplateEntry {
                        field: element.name.clone(),
                        picked: true,
                        kind: entry_kind,
                        subtemplate: Some(sub),
                    });
                }
            }
        }

        Ok(Arc::new(Template {
            target: Arc::clone(entity),
            target_index: index,
            keys,
            entries,
        }))
    }

    fn record_edge(
        &mut self,
        parent: usize,
        child: usize,
        field: &str,
        to_many: bool,
        parent_path: &str,
        propagations: &Arc<[ForeignKeyPropagation]>,
    ) {
        for p in propagations.iter() {
            if p.direction != PropagationDirection::FillChild {
                continue;
            }
            if let Some(col) = &p.child_element {
                let owning = &mut self.targets[child].owning_keys;
                if !owning.contains(col) {
                    owning.push(col.clone());
                }
            }
        }
        if let Some(edge) = self
            .edges
            .iter_mut()
            .find(|e| e.parent == parent && e.child == child && e.field == field)
        {
            edge.parent_paths.push(parent_path.to_string());
            return;
        }
        self.edges.push(Edge {
            parent,
            child,
            field: field.to_string(),
            to_many,
            parent_paths: vec![parent_path.to_string()],
            propagations: Arc::clone(propagations),
        });
    }
}

/// Order targets so every row is written after the rows it takes values
/// from. Self edges are ignored; unresolvable cycles keep traversal order.
fn dependency_order(count: usize, edges: &[Edge]) -> Vec<usize> {
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); count];
    for edge in edges {
        if edge.parent == edge.child {
            continue;
        }
        if edge.child_needs_parent() {
            deps[edge.child].push(edge.parent);
        }
        if edge.parent_needs_child() {
            deps[edge.parent].push(edge.child);
        }
    }

    let mut placed = vec![false; count];
    let mut order = Vec::with_capacity(count);
    while order.len() < count {
        let next = (0..count)
            .find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d] || d == i));
        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                tracing::warn!("circular write dependency between targets; keeping traversal order");
                order.extend((0..count).filter(|&i| !placed[i]));
                break;
            }
        }
    }
    order
}
