//! Property graph storage.
//!
//! Both stores share one planner ([`plan::plan_batch`]) so merge semantics
//! cannot drift between the in-memory and the persistent implementation.

pub mod lmdb;
pub mod memory;
pub mod plan;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::mapping::MergeTemplate;
use crate::models::Row;

pub use lmdb::LmdbGraph;
pub use memory::MemoryGraph;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("no uniqueness constraint declared on {label}.{key}")]
    MissingConstraint { label: String, key: String },

    #[error("{rel_type} edge references a missing {label} node with {key}={value}")]
    MissingEndpoint {
        rel_type: String,
        label: String,
        key: String,
        value: String,
    },

    #[error("column '{column}' holds no usable key value")]
    InvalidKey { column: String },

    #[error("row is missing column '{0}'")]
    MissingColumn(String),

    #[error("a {label} node with {key}={value} already exists")]
    ConstraintViolation {
        label: String,
        key: String,
        value: String,
    },

    #[error("LMDB error: {0}")]
    Storage(#[from] heed3::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: Uuid,
    pub label: String,
    pub key: String,
    pub key_value: String,
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub id: Uuid,
    pub rel_type: String,
    pub from: Uuid,
    pub to: Uuid,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// What one applied batch did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub rows: usize,
    pub skipped: usize,
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
}

impl BatchStats {
    pub fn absorb(&mut self, other: &BatchStats) {
        self.rows += other.rows;
        self.skipped += other.skipped;
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.edges_created += other.edges_created;
        self.edges_updated += other.edges_updated;
    }
}

/// The graph boundary used by the materializer and the CLI.
pub trait GraphStore: Send + Sync {
    /// Declares `(label, key)` unique. Returns `true` if it was newly added.
    fn ensure_unique_constraint(&self, label: &str, key: &str) -> Result<bool, GraphError>;

    fn unique_constraints(&self) -> Result<Vec<(String, String)>, GraphError>;

    /// Merges every row of the batch, or nothing if any row fails.
    fn apply_batch(&self, template: &MergeTemplate, rows: &[Row]) -> Result<BatchStats, GraphError>;

    /// Creates a node without merging; an existing key is a violation.
    fn create_node(
        &self,
        label: &str,
        key: &str,
        key_value: &str,
        properties: Row,
    ) -> Result<NodeRecord, GraphError>;

    fn nodes(&self, label: Option<&str>) -> Result<Vec<NodeRecord>, GraphError>;

    fn edges(&self, rel_type: Option<&str>) -> Result<Vec<EdgeRecord>, GraphError>;

    fn node(&self, label: &str, key: &str, value: &str) -> Result<Option<NodeRecord>, GraphError>;

    fn node_count(&self) -> Result<usize, GraphError> {
        Ok(self.nodes(None)?.len())
    }

    fn edge_count(&self) -> Result<usize, GraphError> {
        Ok(self.edges(None)?.len())
    }

    /// Node and edge counts grouped by label and relationship type.
    fn stats(&self) -> Result<GraphStats, GraphError> {
        let mut stats = GraphStats::default();
        for node in self.nodes(None)? {
            *stats.nodes.entry(node.label).or_default() += 1;
        }
        for edge in self.edges(None)? {
            *stats.edges.entry(edge.rel_type).or_default() += 1;
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: BTreeMap<String, usize>,
    pub edges: BTreeMap<String, usize>,
}
