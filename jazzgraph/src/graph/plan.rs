use indexmap::IndexMap;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{BatchStats, EdgeRecord, GraphError, NodeRecord};
use crate::mapping::{EdgeTemplate, Endpoint, MergeTemplate, NodeTemplate};
use crate::models::Row;
use crate::utils::id::{stable_edge_id, stable_node_id};

/// Final state of one record after a batch, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphWrite {
    Node(NodeRecord),
    Edge(EdgeRecord),
}

#[derive(Debug, Default)]
pub struct BatchPlan {
    pub writes: Vec<GraphWrite>,
    pub stats: BatchStats,
}

/// Renders a key column as the string the node id is derived from.
pub fn key_string(row: &Row, column: &str) -> Result<String, GraphError> {
    match row.get(column) {
        None => Err(GraphError::MissingColumn(column.to_string())),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(GraphError::InvalidKey {
            column: column.to_string(),
        }),
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Overwrites supplied properties; a null removes the property.
fn merge_properties(
    target: &mut BTreeMap<String, serde_json::Value>,
    row: &Row,
    columns: &[String],
) -> Result<(), GraphError> {
    for column in columns {
        match row.get(column) {
            None => return Err(GraphError::MissingColumn(column.clone())),
            Some(serde_json::Value::Null) => {
                target.remove(column);
            }
            Some(value) => {
                target.insert(column.clone(), value.clone());
            }
        }
    }
    Ok(())
}

fn matches_filter(row: &Row, filter: &BTreeMap<String, serde_json::Value>) -> bool {
    filter
        .iter()
        .all(|(column, expected)| row.get(column) == Some(expected))
}

/// Computes the writes for one batch without touching the store.
///
/// `find_node` and `find_edge` look up committed state. Rows repeating an
/// id within the batch merge onto the pending record, so the last row wins.
pub fn plan_batch<C, N, E>(
    template: &MergeTemplate,
    rows: &[Row],
    has_constraint: C,
    find_node: N,
    find_edge: E,
) -> Result<BatchPlan, GraphError>
where
    C: Fn(&str, &str) -> bool,
    N: Fn(&Uuid) -> Result<Option<NodeRecord>, GraphError>,
    E: Fn(&Uuid) -> Result<Option<EdgeRecord>, GraphError>,
{
    match template {
        MergeTemplate::Node(node) => {
            if !has_constraint(&node.label, &node.key) {
                return Err(GraphError::MissingConstraint {
                    label: node.label.clone(),
                    key: node.key.clone(),
                });
            }
            plan_nodes(node, rows, find_node)
        }
        MergeTemplate::Edge(edge) => plan_edges(edge, rows, find_node, find_edge),
    }
}

fn plan_nodes<N>(template: &NodeTemplate, rows: &[Row], find_node: N) -> Result<BatchPlan, GraphError>
where
    N: Fn(&Uuid) -> Result<Option<NodeRecord>, GraphError>,
{
    let mut stats = BatchStats::default();
    let mut pending: IndexMap<Uuid, NodeRecord> = IndexMap::new();

    for row in rows {
        stats.rows += 1;
        let key_value = key_string(row, &template.key)?;
        let id = stable_node_id(&template.label, &template.key, &key_value);

        if let Some(record) = pending.get_mut(&id) {
            merge_properties(&mut record.properties, row, &template.properties)?;
            continue;
        }

        let mut record = match find_node(&id)? {
            Some(existing) => {
                stats.nodes_updated += 1;
                existing
            }
            None => {
                stats.nodes_created += 1;
                NodeRecord {
                    id,
                    label: template.label.clone(),
                    key: template.key.clone(),
                    key_value: key_value.clone(),
                    properties: BTreeMap::new(),
                }
            }
        };
        record.properties.insert(
            template.key.clone(),
            serde_json::Value::String(key_value),
        );
        merge_properties(&mut record.properties, row, &template.properties)?;
        pending.insert(id, record);
    }

    Ok(BatchPlan {
        writes: pending.into_values().map(GraphWrite::Node).collect(),
        stats,
    })
}

fn endpoint_id<N>(
    row: &Row,
    endpoint: &Endpoint,
    rel_type: &str,
    find_node: &N,
) -> Result<Uuid, GraphError>
where
    N: Fn(&Uuid) -> Result<Option<NodeRecord>, GraphError>,
{
    let value = key_string(row, &endpoint.column)?;
    let id = stable_node_id(&endpoint.label, &endpoint.key, &value);
    if find_node(&id)?.is_none() {
        return Err(GraphError::MissingEndpoint {
            rel_type: rel_type.to_string(),
            label: endpoint.label.clone(),
            key: endpoint.key.clone(),
            value,
        });
    }
    Ok(id)
}

fn plan_edges<N, E>(
    template: &EdgeTemplate,
    rows: &[Row],
    find_node: N,
    find_edge: E,
) -> Result<BatchPlan, GraphError>
where
    N: Fn(&Uuid) -> Result<Option<NodeRecord>, GraphError>,
    E: Fn(&Uuid) -> Result<Option<EdgeRecord>, GraphError>,
{
    let mut stats = BatchStats::default();
    let mut pending: IndexMap<Uuid, EdgeRecord> = IndexMap::new();

    for row in rows {
        stats.rows += 1;
        if !matches_filter(row, &template.filter) {
            stats.skipped += 1;
            continue;
        }

        let from = endpoint_id(row, &template.from, &template.rel_type, &find_node)?;
        let to = endpoint_id(row, &template.to, &template.rel_type, &find_node)?;

        let mut discriminators = Vec::with_capacity(template.discriminators.len());
        for column in &template.discriminators {
            let value = row
                .get(column)
                .ok_or_else(|| GraphError::MissingColumn(column.clone()))?;
            discriminators.push((column.as_str(), value_text(value)));
        }
        let pairs: Vec<(&str, &str)> = discriminators
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .collect();
        let id = stable_edge_id(&template.rel_type, &from, &to, &pairs);

        let mut record = match pending.swap_remove(&id) {
            Some(record) => record,
            None => match find_edge(&id)? {
                Some(existing) => {
                    stats.edges_updated += 1;
                    existing
                }
                None => {
                    stats.edges_created += 1;
                    EdgeRecord {
                        id,
                        rel_type: template.rel_type.clone(),
                        from,
                        to,
                        attributes: BTreeMap::new(),
                    }
                }
            },
        };
        merge_properties(&mut record.attributes, row, &template.discriminators)?;
        merge_properties(&mut record.attributes, row, &template.properties)?;
        pending.insert(id, record);
    }

    Ok(BatchPlan {
        writes: pending.into_values().map(GraphWrite::Edge).collect(),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn row(value: serde_json::Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    fn album_template() -> MergeTemplate {
        MergeTemplate::Node(NodeTemplate {
            label: "Album".to_string(),
            key: "album_id".to_string(),
            properties: vec!["title".to_string(), "year".to_string()],
        })
    }

    fn no_edges(_: &Uuid) -> Result<Option<EdgeRecord>, GraphError> {
        Ok(None)
    }

    #[test]
    fn node_rows_repeating_a_key_merge_into_one_write() {
        let rows = vec![
            row(json!({"album_id": "1", "title": "Kind of Blue", "year": 1959})),
            row(json!({"album_id": "1", "title": "Kind of Blue (Legacy)", "year": null})),
        ];
        let plan = plan_batch(&album_template(), &rows, |_, _| true, |_| Ok(None), no_edges).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.stats.nodes_created, 1);
        match &plan.writes[0] {
            GraphWrite::Node(node) => {
                assert_eq!(node.properties["title"], json!("Kind of Blue (Legacy)"));
                assert!(!node.properties.contains_key("year"));
                assert_eq!(node.properties["album_id"], json!("1"));
            }
            other => panic!("unexpected write: {other:?}"),
        }
    }

    #[test]
    fn node_merge_requires_a_constraint() {
        let rows = vec![row(json!({"album_id": "1", "title": "x", "year": 1}))];
        let err = plan_batch(&album_template(), &rows, |_, _| false, |_| Ok(None), no_edges)
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingConstraint { .. }));
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let rows = vec![row(json!({"album_id": null, "title": "x", "year": 1}))];
        let err = plan_batch(&album_template(), &rows, |_, _| true, |_| Ok(None), no_edges)
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidKey { .. }));
    }

    #[test]
    fn edges_need_both_endpoints_and_honour_filters() {
        let template = MergeTemplate::Edge(EdgeTemplate {
            rel_type: "LEADS".to_string(),
            from: Endpoint {
                label: "Artist".to_string(),
                key: "artist_id".to_string(),
                column: "artist_id".to_string(),
            },
            to: Endpoint {
                label: "Album".to_string(),
                key: "album_id".to_string(),
                column: "album_id".to_string(),
            },
            discriminators: vec![],
            filter: BTreeMap::from([("role".to_string(), json!("leader"))]),
            properties: vec![],
        });
        let artist = stable_node_id("Artist", "artist_id", "a1");
        let album = stable_node_id("Album", "album_id", "1");
        let existing: HashMap<Uuid, NodeRecord> = [artist, album]
            .into_iter()
            .map(|id| {
                (
                    id,
                    NodeRecord {
                        id,
                        label: String::new(),
                        key: String::new(),
                        key_value: String::new(),
                        properties: BTreeMap::new(),
                    },
                )
            })
            .collect();
        let find = |id: &Uuid| Ok(existing.get(id).cloned());

        let rows = vec![
            row(json!({"album_id": "1", "artist_id": "a1", "role": "leader"})),
            row(json!({"album_id": "1", "artist_id": "a1", "role": "leader"})),
            row(json!({"album_id": "1", "artist_id": "a9", "role": "musician"})),
        ];
        let plan = plan_batch(&template, &rows, |_, _| true, find, no_edges).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.stats.edges_created, 1);
        assert_eq!(plan.stats.skipped, 1);

        let dangling = vec![row(json!({"album_id": "2", "artist_id": "a1", "role": "leader"}))];
        let err = plan_batch(&template, &dangling, |_, _| true, find, no_edges).unwrap_err();
        match err {
            GraphError::MissingEndpoint { label, value, .. } => {
                assert_eq!(label, "Album");
                assert_eq!(value, "2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
