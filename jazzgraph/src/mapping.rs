//! Declarative table-to-graph mapping document.
//!
//! The materializer knows nothing about albums or artists; everything it
//! writes is described here. Adding a node or relationship kind means adding
//! a gold table, a template and an entry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::errors::Result;

const DEFAULT_MAPPING: &str = include_str!("../config/graph_mapping.json");

pub const DEFAULT_BATCH_SIZE: usize = 2000;

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("mapping document is not valid: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("mapping '{mapping}' references unknown template '{template}'")]
    UnknownTemplate { mapping: String, template: String },

    #[error("mapping '{mapping}' is {kind:?} but template '{template}' is not a {expected} template")]
    KindMismatch {
        mapping: String,
        kind: MappingKind,
        template: String,
        expected: &'static str,
    },

    #[error("mapping '{mapping}' does not project column '{column}' read by its template")]
    ColumnNotProjected { mapping: String, column: String },

    #[error("mapping name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("batch_size must be greater than zero")]
    ZeroBatchSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingKind {
    Entity,
    Relation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub label: String,
    /// Unique key property; also the source column holding its value.
    pub key: String,
    #[serde(default)]
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub label: String,
    pub key: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTemplate {
    pub rel_type: String,
    pub from: Endpoint,
    pub to: Endpoint,
    /// Columns that, besides the endpoints, distinguish two edges.
    #[serde(default)]
    pub discriminators: Vec<String>,
    /// Rows must carry exactly these values to produce an edge.
    #[serde(default)]
    pub filter: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MergeTemplate {
    Node(NodeTemplate),
    Edge(EdgeTemplate),
}

impl MergeTemplate {
    /// Every source column the template reads.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            MergeTemplate::Node(node) => std::iter::once(node.key.as_str())
                .chain(node.properties.iter().map(String::as_str))
                .collect(),
            MergeTemplate::Edge(edge) => [edge.from.column.as_str(), edge.to.column.as_str()]
                .into_iter()
                .chain(edge.discriminators.iter().map(String::as_str))
                .chain(edge.filter.keys().map(String::as_str))
                .chain(edge.properties.iter().map(String::as_str))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MergeTemplate::Node(node) => &node.label,
            MergeTemplate::Edge(edge) => &edge.rel_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MappingKind,
    pub relevant_cols: Vec<String>,
    pub merge_template: String,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMapping {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub templates: IndexMap<String, MergeTemplate>,
    pub tables: IndexMap<String, Vec<MappingEntry>>,
}

/// One entry resolved against its source table and template.
#[derive(Debug, Clone, Copy)]
pub struct BoundMapping<'a> {
    pub table: &'a str,
    pub entry: &'a MappingEntry,
    pub template: &'a MergeTemplate,
}

impl GraphMapping {
    pub fn from_json(text: &str) -> std::result::Result<Self, MappingError> {
        let mapping: GraphMapping = serde_json::from_str(text)?;
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }

    /// The document shipped with the crate.
    pub fn default_config() -> Result<Self> {
        Ok(Self::from_json(DEFAULT_MAPPING)?)
    }

    pub fn validate(&self) -> std::result::Result<(), MappingError> {
        if self.batch_size == 0 {
            return Err(MappingError::ZeroBatchSize);
        }
        let mut names = HashSet::new();
        for entry in self.tables.values().flatten() {
            if !names.insert(entry.name.as_str()) {
                return Err(MappingError::DuplicateName(entry.name.clone()));
            }
            let template = self.templates.get(&entry.merge_template).ok_or_else(|| {
                MappingError::UnknownTemplate {
                    mapping: entry.name.clone(),
                    template: entry.merge_template.clone(),
                }
            })?;
            let expected = match (entry.kind, template) {
                (MappingKind::Entity, MergeTemplate::Node(_))
                | (MappingKind::Relation, MergeTemplate::Edge(_)) => None,
                (MappingKind::Entity, MergeTemplate::Edge(_)) => Some("node"),
                (MappingKind::Relation, MergeTemplate::Node(_)) => Some("edge"),
            };
            if let Some(expected) = expected {
                return Err(MappingError::KindMismatch {
                    mapping: entry.name.clone(),
                    kind: entry.kind,
                    template: entry.merge_template.clone(),
                    expected,
                });
            }
            if let Some(column) = template
                .columns()
                .into_iter()
                .find(|c| !entry.relevant_cols.iter().any(|rc| rc == c))
            {
                return Err(MappingError::ColumnNotProjected {
                    mapping: entry.name.clone(),
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Entries in application order: every Entity entry in document order,
    /// then every Relation entry in document order.
    pub fn ordered(&self) -> Vec<BoundMapping<'_>> {
        let bound: Vec<BoundMapping<'_>> = self
            .tables
            .iter()
            .flat_map(|(table, entries)| {
                entries.iter().filter_map(move |entry| {
                    self.templates
                        .get(&entry.merge_template)
                        .map(|template| BoundMapping {
                            table,
                            entry,
                            template,
                        })
                })
            })
            .collect();
        let (entities, relations): (Vec<_>, Vec<_>) = bound
            .into_iter()
            .partition(|m| m.entry.kind == MappingKind::Entity);
        entities.into_iter().chain(relations).collect()
    }

    /// `(label, key)` of every node template used by an Entity entry.
    pub fn entity_keys(&self) -> Vec<(String, String)> {
        let mut keys = Vec::new();
        for bound in self.ordered() {
            if let MergeTemplate::Node(node) = bound.template {
                let pair = (node.label.clone(), node.key.clone());
                if !keys.contains(&pair) {
                    keys.push(pair);
                }
            }
        }
        keys
    }
}
