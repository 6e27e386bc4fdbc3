//! Generic interpreter from gold tables to the graph store.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::errors::{Result, StorageError};
use crate::graph::{BatchStats, GraphStore};
use crate::mapping::{BoundMapping, GraphMapping, MappingKind, MergeTemplate};
use crate::models::Row;

/// Where the materializer reads its rows from.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Reads `table` projected onto `columns`. Unknown tables and columns
    /// are errors.
    async fn read_projected(&self, table: &str, columns: &[String]) -> Result<Vec<Row>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingFailure {
    pub mapping: String,
    pub table: String,
    /// Index of the failing batch; `None` when no batch was attempted.
    pub batch_index: Option<usize>,
    pub error: String,
}

impl fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.batch_index {
            Some(index) => write!(
                f,
                "mapping '{}' (table '{}') failed at batch {}: {}",
                self.mapping, self.table, index, self.error
            ),
            None => write!(
                f,
                "mapping '{}' (table '{}') failed: {}",
                self.mapping, self.table, self.error
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingOutcome {
    pub mapping: String,
    pub table: String,
    pub kind: MappingKind,
    pub rows_read: usize,
    pub batches_applied: usize,
    pub stats: BatchStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterializeReport {
    pub constraints_added: usize,
    pub mappings: Vec<MappingOutcome>,
    pub failures: Vec<MappingFailure>,
}

impl MaterializeReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn totals(&self) -> BatchStats {
        let mut totals = BatchStats::default();
        for outcome in &self.mappings {
            totals.absorb(&outcome.stats);
        }
        totals
    }

    /// Turns recorded failures into an error.
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(StorageError::Materialization(self.failures))
        }
    }
}

pub struct GraphMaterializer {
    source: Arc<dyn TableSource>,
    graph: Arc<dyn GraphStore>,
    mapping: GraphMapping,
}

fn endpoint_labels(template: &MergeTemplate) -> Vec<&str> {
    match template {
        MergeTemplate::Node(node) => vec![node.label.as_str()],
        MergeTemplate::Edge(edge) => vec![edge.from.label.as_str(), edge.to.label.as_str()],
    }
}

impl GraphMaterializer {
    pub fn new(
        source: Arc<dyn TableSource>,
        graph: Arc<dyn GraphStore>,
        mapping: GraphMapping,
    ) -> Self {
        Self {
            source,
            graph,
            mapping,
        }
    }

    pub fn mapping(&self) -> &GraphMapping {
        &self.mapping
    }

    /// Applies every mapping entry.
    pub async fn run(&self) -> Result<MaterializeReport> {
        self.run_filtered(|_| true).await
    }

    /// Applies only the named entries, still in engine order.
    pub async fn run_selected(&self, names: &[&str]) -> Result<MaterializeReport> {
        self.run_filtered(|name| names.contains(&name)).await
    }

    async fn run_filtered(&self, selected: impl Fn(&str) -> bool) -> Result<MaterializeReport> {
        let mut report = MaterializeReport::default();

        for (label, key) in self.mapping.entity_keys() {
            if self.graph.ensure_unique_constraint(&label, &key)? {
                report.constraints_added += 1;
            }
        }

        let mut failed_labels: HashSet<String> = HashSet::new();
        for bound in self.mapping.ordered() {
            if !selected(bound.entry.name.as_str()) {
                continue;
            }
            match self.apply_mapping(bound, &failed_labels).await {
                Ok(outcome) => {
                    log::info!(
                        "Mapping '{}' applied {} row(s) in {} batch(es)",
                        outcome.mapping,
                        outcome.rows_read,
                        outcome.batches_applied
                    );
                    report.mappings.push(outcome);
                }
                Err(failure) => {
                    log::warn!("{}", failure);
                    if bound.entry.kind == MappingKind::Entity {
                        for label in endpoint_labels(bound.template) {
                            failed_labels.insert(label.to_string());
                        }
                    }
                    report.failures.push(failure);
                }
            }
        }
        Ok(report)
    }

    async fn apply_mapping(
        &self,
        bound: BoundMapping<'_>,
        failed_labels: &HashSet<String>,
    ) -> std::result::Result<MappingOutcome, MappingFailure> {
        let failure = |batch_index: Option<usize>, error: String| MappingFailure {
            mapping: bound.entry.name.clone(),
            table: bound.table.to_string(),
            batch_index,
            error,
        };

        if bound.entry.kind == MappingKind::Relation {
            if let Some(label) = endpoint_labels(bound.template)
                .into_iter()
                .find(|label| failed_labels.contains(*label))
            {
                return Err(failure(
                    None,
                    format!("dependency failed: entity mapping for '{label}' did not complete"),
                ));
            }
        }

        let rows = self
            .source
            .read_projected(bound.table, &bound.entry.relevant_cols)
            .await
            .map_err(|err| failure(None, err.to_string()))?;

        let mut outcome = MappingOutcome {
            mapping: bound.entry.name.clone(),
            table: bound.table.to_string(),
            kind: bound.entry.kind,
            rows_read: rows.len(),
            batches_applied: 0,
            stats: BatchStats::default(),
        };

        for (index, batch) in rows.chunks(self.mapping.batch_size.max(1)).enumerate() {
            // Store writes are blocking (LMDB commits).
            let graph = Arc::clone(&self.graph);
            let template = bound.template.clone();
            let batch = batch.to_vec();
            let stats = tokio::task::spawn_blocking(move || graph.apply_batch(&template, &batch))
                .await
                .map_err(|err| failure(Some(index), format!("graph batch task failed: {err}")))?
                .map_err(|err| failure(Some(index), err.to_string()))?;
            log::debug!(
                "Mapping '{}' batch {}: {} row(s), {} skipped",
                bound.entry.name,
                index,
                stats.rows,
                stats.skipped
            );
            outcome.stats.absorb(&stats);
            outcome.batches_applied += 1;
        }
        Ok(outcome)
    }
}
