use heed3::types::Bytes;
use heed3::{Database, Env, EnvOpenOptions};
use std::path::Path;
use uuid::Uuid;

use super::plan::{GraphWrite, plan_batch};
use super::{BatchStats, EdgeRecord, GraphError, GraphStore, NodeRecord};
use crate::mapping::MergeTemplate;
use crate::models::Row;
use crate::utils::id::stable_node_id;

const DEFAULT_MAP_SIZE: usize = 1 << 30;

fn constraint_key(label: &str, key: &str) -> Vec<u8> {
    format!("{label}\u{1f}{key}").into_bytes()
}

fn split_constraint_key(raw: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(raw).ok()?;
    let (label, key) = text.split_once('\u{1f}')?;
    Some((label.to_string(), key.to_string()))
}

/// Persistent graph store on LMDB.
///
/// Nodes and edges are kept as JSON values keyed by their 16-byte UUID.
/// Every batch runs inside one write transaction.
pub struct LmdbGraph {
    env: Env,
    nodes: Database<Bytes, Bytes>,
    edges: Database<Bytes, Bytes>,
    constraints: Database<Bytes, Bytes>,
}

impl LmdbGraph {
    pub fn open(path: &Path) -> Result<Self, GraphError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: &Path, map_size: usize) -> Result<Self, GraphError> {
        std::fs::create_dir_all(path)?;
        // SAFETY: the environment directory is owned by this process and is
        // not opened twice; LMDB requires the caller to guarantee that.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(8)
                .open(path)?
        };
        let mut wtxn = env.write_txn()?;
        let nodes = env.create_database(&mut wtxn, Some("nodes"))?;
        let edges = env.create_database(&mut wtxn, Some("edges"))?;
        let constraints = env.create_database(&mut wtxn, Some("constraints"))?;
        wtxn.commit()?;
        log::debug!("Opened LMDB graph at {}", path.display());
        Ok(Self {
            env,
            nodes,
            edges,
            constraints,
        })
    }
}

fn decode_node(raw: &[u8]) -> Result<NodeRecord, GraphError> {
    Ok(serde_json::from_slice(raw)?)
}

fn decode_edge(raw: &[u8]) -> Result<EdgeRecord, GraphError> {
    Ok(serde_json::from_slice(raw)?)
}

impl GraphStore for LmdbGraph {
    fn ensure_unique_constraint(&self, label: &str, key: &str) -> Result<bool, GraphError> {
        let mut wtxn = self.env.write_txn()?;
        let k = constraint_key(label, key);
        if self.constraints.get(&wtxn, k.as_slice())?.is_some() {
            return Ok(false);
        }
        self.constraints.put(&mut wtxn, k.as_slice(), &[])?;
        wtxn.commit()?;
        log::info!("Declared unique constraint on {}.{}", label, key);
        Ok(true)
    }

    fn unique_constraints(&self) -> Result<Vec<(String, String)>, GraphError> {
        let rtxn = self.env.read_txn()?;
        let mut constraints = Vec::new();
        for entry in self.constraints.iter(&rtxn)? {
            let (raw, _) = entry?;
            if let Some(pair) = split_constraint_key(raw) {
                constraints.push(pair);
            }
        }
        Ok(constraints)
    }

    fn apply_batch(&self, template: &MergeTemplate, rows: &[Row]) -> Result<BatchStats, GraphError> {
        let mut wtxn = self.env.write_txn()?;
        let plan = {
            let txn = &wtxn;
            plan_batch(
                template,
                rows,
                |label, key| {
                    matches!(
                        self.constraints
                            .get(txn, constraint_key(label, key).as_slice()),
                        Ok(Some(_))
                    )
                },
                |id| {
                    self.nodes
                        .get(txn, id.as_bytes().as_slice())?
                        .map(decode_node)
                        .transpose()
                },
                |id| {
                    self.edges
                        .get(txn, id.as_bytes().as_slice())?
                        .map(decode_edge)
                        .transpose()
                },
            )?
        };

        for write in &plan.writes {
            match write {
                GraphWrite::Node(node) => {
                    let bytes = serde_json::to_vec(node)?;
                    self.nodes
                        .put(&mut wtxn, node.id.as_bytes().as_slice(), &bytes)?;
                }
                GraphWrite::Edge(edge) => {
                    let bytes = serde_json::to_vec(edge)?;
                    self.edges
                        .put(&mut wtxn, edge.id.as_bytes().as_slice(), &bytes)?;
                }
            }
        }
        wtxn.commit()?;
        Ok(plan.stats)
    }

    fn create_node(
        &self,
        label: &str,
        key: &str,
        key_value: &str,
        properties: Row,
    ) -> Result<NodeRecord, GraphError> {
        let mut wtxn = self.env.write_txn()?;
        if self
            .constraints
            .get(&wtxn, constraint_key(label, key).as_slice())?
            .is_none()
        {
            return Err(GraphError::MissingConstraint {
                label: label.to_string(),
                key: key.to_string(),
            });
        }
        let id = stable_node_id(label, key, key_value);
        if self.nodes.get(&wtxn, id.as_bytes().as_slice())?.is_some() {
            return Err(GraphError::ConstraintViolation {
                label: label.to_string(),
                key: key.to_string(),
                value: key_value.to_string(),
            });
        }
        let mut properties = properties;
        properties.insert(
            key.to_string(),
            serde_json::Value::String(key_value.to_string()),
        );
        let node = NodeRecord {
            id,
            label: label.to_string(),
            key: key.to_string(),
            key_value: key_value.to_string(),
            properties,
        };
        let bytes = serde_json::to_vec(&node)?;
        self.nodes
            .put(&mut wtxn, id.as_bytes().as_slice(), &bytes)?;
        wtxn.commit()?;
        Ok(node)
    }

    fn nodes(&self, label: Option<&str>) -> Result<Vec<NodeRecord>, GraphError> {
        let rtxn = self.env.read_txn()?;
        let mut nodes = Vec::new();
        for entry in self.nodes.iter(&rtxn)? {
            let (_, raw) = entry?;
            let node = decode_node(raw)?;
            if label.is_none_or(|l| node.label == l) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    fn edges(&self, rel_type: Option<&str>) -> Result<Vec<EdgeRecord>, GraphError> {
        let rtxn = self.env.read_txn()?;
        let mut edges = Vec::new();
        for entry in self.edges.iter(&rtxn)? {
            let (_, raw) = entry?;
            let edge = decode_edge(raw)?;
            if rel_type.is_none_or(|r| edge.rel_type == r) {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    fn node(&self, label: &str, key: &str, value: &str) -> Result<Option<NodeRecord>, GraphError> {
        let id: Uuid = stable_node_id(label, key, value);
        let rtxn = self.env.read_txn()?;
        self.nodes
            .get(&rtxn, id.as_bytes().as_slice())?
            .map(decode_node)
            .transpose()
    }

    fn node_count(&self) -> Result<usize, GraphError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.nodes.len(&rtxn)? as usize)
    }

    fn edge_count(&self) -> Result<usize, GraphError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.edges.len(&rtxn)? as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::NodeTemplate;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn failed_batch_leaves_no_partial_writes() {
        let dir = tempdir().unwrap();
        let graph = LmdbGraph::open(dir.path()).unwrap();
        graph.ensure_unique_constraint("Work", "work_id").unwrap();
        let template = MergeTemplate::Node(NodeTemplate {
            label: "Work".to_string(),
            key: "work_id".to_string(),
            properties: vec!["work_title".to_string()],
        });
        let rows: Vec<Row> = vec![
            serde_json::from_value(json!({"work_id": "w1", "work_title": "Footprints"})).unwrap(),
            serde_json::from_value(json!({"work_id": "", "work_title": "Broken"})).unwrap(),
        ];
        assert!(matches!(
            graph.apply_batch(&template, &rows),
            Err(GraphError::InvalidKey { .. })
        ));
        assert_eq!(graph.node_count().unwrap(), 0);
    }

    #[test]
    fn constraints_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let graph = LmdbGraph::open(dir.path()).unwrap();
            assert!(graph.ensure_unique_constraint("Label", "label_id").unwrap());
        }
        let graph = LmdbGraph::open(dir.path()).unwrap();
        assert!(!graph.ensure_unique_constraint("Label", "label_id").unwrap());
        assert_eq!(
            graph.unique_constraints().unwrap(),
            vec![("Label".to_string(), "label_id".to_string())]
        );
    }
}
