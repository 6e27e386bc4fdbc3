use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::plan::{GraphWrite, plan_batch};
use super::{BatchStats, EdgeRecord, GraphError, GraphStore, NodeRecord};
use crate::mapping::MergeTemplate;
use crate::models::Row;
use crate::utils::id::stable_node_id;

#[derive(Default)]
struct State {
    constraints: BTreeSet<(String, String)>,
    nodes: BTreeMap<Uuid, NodeRecord>,
    edges: BTreeMap<Uuid, EdgeRecord>,
}

/// Graph store held entirely in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryGraph {
    state: Mutex<State>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl GraphStore for MemoryGraph {
    fn ensure_unique_constraint(&self, label: &str, key: &str) -> Result<bool, GraphError> {
        Ok(self
            .state()
            .constraints
            .insert((label.to_string(), key.to_string())))
    }

    fn unique_constraints(&self) -> Result<Vec<(String, String)>, GraphError> {
        Ok(self.state().constraints.iter().cloned().collect())
    }

    fn apply_batch(&self, template: &MergeTemplate, rows: &[Row]) -> Result<BatchStats, GraphError> {
        let mut state = self.state();
        let plan = {
            let current = &*state;
            plan_batch(
                template,
                rows,
                |label, key| {
                    current
                        .constraints
                        .contains(&(label.to_string(), key.to_string()))
                },
                |id| Ok(current.nodes.get(id).cloned()),
                |id| Ok(current.edges.get(id).cloned()),
            )?
        };
        for write in plan.writes {
            match write {
                GraphWrite::Node(node) => {
                    state.nodes.insert(node.id, node);
                }
                GraphWrite::Edge(edge) => {
                    state.edges.insert(edge.id, edge);
                }
            }
        }
        Ok(plan.stats)
    }

    fn create_node(
        &self,
        label: &str,
        key: &str,
        key_value: &str,
        properties: Row,
    ) -> Result<NodeRecord, GraphError> {
        let mut state = self.state();
        if !state
            .constraints
            .contains(&(label.to_string(), key.to_string()))
        {
            return Err(GraphError::MissingConstraint {
                label: label.to_string(),
                key: key.to_string(),
            });
        }
        let id = stable_node_id(label, key, key_value);
        if state.nodes.contains_key(&id) {
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
        state.nodes.insert(id, node.clone());
        Ok(node)
    }

    fn nodes(&self, label: Option<&str>) -> Result<Vec<NodeRecord>, GraphError> {
        Ok(self
            .state()
            .nodes
            .values()
            .filter(|n| label.is_none_or(|l| n.label == l))
            .cloned()
            .collect())
    }

    fn edges(&self, rel_type: Option<&str>) -> Result<Vec<EdgeRecord>, GraphError> {
        Ok(self
            .state()
            .edges
            .values()
            .filter(|e| rel_type.is_none_or(|r| e.rel_type == r))
            .cloned()
            .collect())
    }

    fn node(&self, label: &str, key: &str, value: &str) -> Result<Option<NodeRecord>, GraphError> {
        let id = stable_node_id(label, key, value);
        Ok(self.state().nodes.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::NodeTemplate;
    use serde_json::json;

    fn artist_template() -> MergeTemplate {
        MergeTemplate::Node(NodeTemplate {
            label: "Artist".to_string(),
            key: "artist_id".to_string(),
            properties: vec!["name".to_string()],
        })
    }

    fn row(value: serde_json::Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn constraints_are_idempotent() {
        let graph = MemoryGraph::new();
        assert!(graph.ensure_unique_constraint("Artist", "artist_id").unwrap());
        assert!(!graph.ensure_unique_constraint("Artist", "artist_id").unwrap());
        assert_eq!(graph.unique_constraints().unwrap().len(), 1);
    }

    #[test]
    fn reapplying_a_batch_updates_instead_of_duplicating() {
        let graph = MemoryGraph::new();
        graph.ensure_unique_constraint("Artist", "artist_id").unwrap();
        let rows = vec![row(json!({"artist_id": "a1", "name": "Wayne Shorter"}))];

        let first = graph.apply_batch(&artist_template(), &rows).unwrap();
        let second = graph.apply_batch(&artist_template(), &rows).unwrap();
        assert_eq!(first.nodes_created, 1);
        assert_eq!(second.nodes_created, 0);
        assert_eq!(second.nodes_updated, 1);
        assert_eq!(graph.node_count().unwrap(), 1);
    }

    #[test]
    fn create_node_rejects_duplicate_keys() {
        let graph = MemoryGraph::new();
        assert!(matches!(
            graph.create_node("Album", "album_id", "1", Row::new()),
            Err(GraphError::MissingConstraint { .. })
        ));

        graph.ensure_unique_constraint("Album", "album_id").unwrap();
        graph
            .create_node("Album", "album_id", "1", row(json!({"title": "Speak No Evil"})))
            .unwrap();
        assert!(matches!(
            graph.create_node("Album", "album_id", "1", row(json!({"title": "Other"}))),
            Err(GraphError::ConstraintViolation { .. })
        ));
        let node = graph.node("Album", "album_id", "1").unwrap().unwrap();
        assert_eq!(node.properties["title"], json!("Speak No Evil"));
    }
}
