//! The three batch stages and their bookkeeping in the catalog.

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::catalog::Catalog;
use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::graph::GraphStore;
use crate::intake::{self, ArchiveSummary};
use crate::lake::{Lake, WriteMode};
use crate::mapping::GraphMapping;
use crate::materialize::{GraphMaterializer, MaterializeReport, TableSource};
use crate::models::{FileStatus, NormalizedRelease, ResolutionChange};
use crate::normalize::normalize_json;
use crate::records::HistoryRecord;
use crate::tables::{self, RebuildSummary};

/// Resolution event kind recorded when leader inference fell back.
pub const LEADER_FALLBACK: &str = "leader_fallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Rebuild,
    Materialize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Rebuild => "rebuild",
            Stage::Materialize => "materialize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: StorageError,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub batch_id: i64,
    pub archive: ArchiveSummary,
    pub files_seen: usize,
    pub appended: usize,
    pub quarantined: usize,
    pub superseded: usize,
    pub leader_fallbacks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ingest: IngestReport,
    pub rebuild: RebuildSummary,
    pub materialize: MaterializeReport,
}

struct Accepted {
    file_name: String,
    release: NormalizedRelease,
}

pub struct Pipeline {
    config: StorageConfig,
    catalog: Arc<Catalog>,
    lake: Arc<Lake>,
    graph: Arc<dyn GraphStore>,
    mapping: GraphMapping,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Pipeline {
    pub fn new(
        config: StorageConfig,
        catalog: Arc<Catalog>,
        lake: Arc<Lake>,
        graph: Arc<dyn GraphStore>,
        mapping: GraphMapping,
    ) -> Self {
        Self {
            config,
            catalog,
            lake,
            graph,
            mapping,
        }
    }

    /// Runs `stage` as a catalog task, recording its outcome.
    async fn tracked<T, F, Fut>(&self, stage: Stage, run: F) -> Result<T>
    where
        T: Serialize,
        F: FnOnce(i64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let task_id = self.catalog.create_task_log(stage.as_str())?;
        log::info!("Starting {} stage (task {})", stage, task_id);
        match run(task_id).await {
            Ok(report) => {
                let details = serde_json::to_string(&report)?;
                self.catalog
                    .update_task_log_status(task_id, "SUCCESS", &details)?;
                log::info!("Finished {} stage (task {})", stage, task_id);
                Ok(report)
            }
            Err(err) => {
                if let Err(log_err) =
                    self.catalog
                        .update_task_log_status(task_id, "FAILED", &err.to_string())
                {
                    log::warn!("Could not record failure of task {}: {}", task_id, log_err);
                }
                Err(err)
            }
        }
    }

    /// Archives landing files and appends every new release to the history.
    pub async fn ingest(&self) -> Result<IngestReport> {
        self.tracked(Stage::Ingest, |batch_id| self.ingest_batch(batch_id))
            .await
    }

    async fn ingest_batch(&self, batch_id: i64) -> Result<IngestReport> {
        let mut report = IngestReport {
            batch_id,
            archive: intake::archive_landing(&self.config.landing_path, &self.config.raw_path)?,
            ..Default::default()
        };
        let pending = intake::pending_files(&self.config.raw_path, &self.catalog)?;
        report.files_seen = pending.len();

        let mut statuses: Vec<(String, FileStatus)> = Vec::with_capacity(pending.len());
        let mut accepted: IndexMap<String, Accepted> = IndexMap::new();

        for path in &pending {
            let name = display_name(path);
            let bytes = tokio::fs::read(path).await?;
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    let payload = String::from_utf8_lossy(err.as_bytes()).into_owned();
                    self.quarantine(&name, "file is not valid UTF-8", &payload, batch_id)?;
                    statuses.push((name, FileStatus::Quarantined));
                    continue;
                }
            };

            let release = match normalize_json(&text) {
                Ok(release) => release,
                Err(err) => {
                    self.quarantine(&name, &err.to_string(), &text, batch_id)?;
                    statuses.push((name, FileStatus::Quarantined));
                    continue;
                }
            };

            let album_id = release.album.album_id.clone();
            let incoming = Accepted {
                file_name: name,
                release,
            };
            if let Some(previous) = accepted.insert(album_id.clone(), incoming) {
                log::warn!(
                    "Album {} appears twice in batch {}; {} replaces {}",
                    album_id,
                    batch_id,
                    accepted[&album_id].file_name,
                    previous.file_name
                );
                statuses.push((previous.file_name, FileStatus::Superseded));
            }
        }
        report.quarantined = statuses
            .iter()
            .filter(|(_, s)| *s == FileStatus::Quarantined)
            .count();
        report.superseded = statuses.len() - report.quarantined;

        let ingested_at = Utc::now();
        let mut history = Vec::with_capacity(accepted.len());
        let mut changes = Vec::with_capacity(accepted.len());
        for (album_id, Accepted { file_name, release }) in accepted {
            if release.leader_fallback {
                log::warn!(
                    "No credit on album {} matched '{}'; attributed it as the sole leader",
                    album_id,
                    release.album.ensemble
                );
                changes.push(ResolutionChange::Record {
                    album_id,
                    kind: LEADER_FALLBACK.to_string(),
                    detail: release.album.ensemble.clone(),
                });
                report.leader_fallbacks += 1;
            } else {
                changes.push(ResolutionChange::Clear {
                    album_id,
                    kind: LEADER_FALLBACK.to_string(),
                });
            }
            history.push(HistoryRecord::from_release(
                release,
                &file_name,
                batch_id,
                ingested_at,
            ));
            statuses.push((file_name, FileStatus::Appended));
        }

        if !history.is_empty() {
            let version = self
                .lake
                .write_records(&history, WriteMode::Append)
                .await?;
            log::info!(
                "Appended {} release(s) to history at version {}",
                history.len(),
                version
            );
        }
        report.appended = history.len();

        // Only after the append: a failed write leaves both untouched.
        self.catalog.commit_ingest(&statuses, &changes, batch_id)?;
        Ok(report)
    }

    fn quarantine(&self, file: &str, reason: &str, payload: &str, batch_id: i64) -> Result<()> {
        log::warn!("Quarantined {}: {}", file, reason);
        self.catalog
            .record_quarantine(file, reason, payload, batch_id)?;
        Ok(())
    }

    /// Re-derives the gold tables from the history.
    pub async fn rebuild(&self) -> Result<RebuildSummary> {
        self.tracked(Stage::Rebuild, |_| tables::rebuild(&self.lake))
            .await
    }

    fn materializer(&self) -> GraphMaterializer {
        let source: Arc<dyn TableSource> = self.lake.clone();
        GraphMaterializer::new(source, Arc::clone(&self.graph), self.mapping.clone())
    }

    /// Projects the gold tables into the graph store.
    pub async fn materialize(&self) -> Result<MaterializeReport> {
        self.tracked(Stage::Materialize, |_| async {
            self.materializer().run().await?.into_result()
        })
        .await
    }

    /// Like [`Pipeline::materialize`], restricted to the named mapping entries.
    pub async fn materialize_selected(&self, names: &[&str]) -> Result<MaterializeReport> {
        self.tracked(Stage::Materialize, |_| async {
            self.materializer().run_selected(names).await?.into_result()
        })
        .await
    }

    /// Runs every stage in order. Each stage starts only after the previous
    /// one has completed; the first failure stops the run.
    pub async fn run(&self) -> std::result::Result<RunReport, PipelineError> {
        let ingest = self.ingest().await.map_err(|source| PipelineError {
            stage: Stage::Ingest,
            source,
        })?;
        let rebuild = self.rebuild().await.map_err(|source| PipelineError {
            stage: Stage::Rebuild,
            source,
        })?;
        let materialize = self.materialize().await.map_err(|source| PipelineError {
            stage: Stage::Materialize,
            source,
        })?;
        Ok(RunReport {
            ingest,
            rebuild,
            materialize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use serde_json::json;
    use tempfile::tempdir;

    async fn pipeline(base: &Path) -> (Pipeline, Arc<Catalog>, Arc<MemoryGraph>, StorageConfig) {
        let config = StorageConfig::new(base);
        let catalog = Arc::new(Catalog::new(&config).unwrap());
        catalog.initialize_schema().unwrap();
        let lake = Arc::new(Lake::new(config.clone()).await.unwrap());
        let graph = Arc::new(MemoryGraph::new());
        let pipeline = Pipeline::new(
            config.clone(),
            Arc::clone(&catalog),
            lake,
            graph.clone(),
            GraphMapping::default_config().unwrap(),
        );
        (pipeline, catalog, graph, config)
    }

    fn land(config: &StorageConfig, name: &str, body: &str) {
        std::fs::create_dir_all(&config.landing_path).unwrap();
        std::fs::write(config.landing_path.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn ingest_quarantines_and_dedups_within_a_batch() {
        let dir = tempdir().unwrap();
        let (pipeline, catalog, _graph, config) = pipeline(dir.path()).await;

        land(&config, "a.json", &json!({"id": 7, "artists": "Bill Evans Trio", "title": "Portrait in Jazz",
            "musicians": ["Bill Evans (piano)", "Scott LaFaro (bass)"]}).to_string());
        land(&config, "b.json", &json!({"id": "7", "artists": "Bill Evans Trio", "title": "Portrait In Jazz",
            "musicians": ["Bill Evans (piano)", "Paul Motian (drums)"]}).to_string());
        land(&config, "c.json", "[not json");

        let report = pipeline.ingest().await.unwrap();
        assert_eq!(report.files_seen, 3);
        assert_eq!(report.appended, 1);
        assert_eq!(report.quarantined, 1);
        assert_eq!(report.superseded, 1);

        let quarantined = catalog.list_quarantine().unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].source_file, "c.json");
        assert_eq!(quarantined[0].batch_id, report.batch_id);

        let files = catalog.ingested_files().unwrap();
        assert_eq!(
            files,
            vec![
                ("a.json".to_string(), "superseded".to_string()),
                ("b.json".to_string(), "appended".to_string()),
                ("c.json".to_string(), "quarantined".to_string()),
            ]
        );

        let again = pipeline.ingest().await.unwrap();
        assert_eq!(again.files_seen, 0);
        assert_eq!(again.appended, 0);
    }

    #[tokio::test]
    async fn failed_append_keeps_fallback_events_and_ledger() {
        use crate::config::HISTORY_TABLE;
        use deltalake::arrow::array::{Int64Array, StringArray};
        use deltalake::arrow::datatypes::{DataType, Field, Schema};
        use deltalake::arrow::record_batch::RecordBatch;

        let dir = tempdir().unwrap();
        let (pipeline, catalog, _graph, config) = pipeline(dir.path()).await;
        land(&config, "2.json", &json!({
            "id": 2, "artists": "The Modern Jazz Quartet", "title": "Django",
            "musicians": ["Milt Jackson (vibraphone)"]
        }).to_string());
        pipeline.ingest().await.unwrap();
        assert_eq!(catalog.list_resolution_events(Some(LEADER_FALLBACK)).unwrap().len(), 1);

        // A history whose `title` is numeric cannot take another append.
        let schema = Arc::new(Schema::new(vec![
            Field::new("album_id", DataType::Utf8, false),
            Field::new("title", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["2"])),
                Arc::new(Int64Array::from(vec![Some(1)])),
            ],
        )
        .unwrap();
        pipeline
            .lake
            .write_batches(HISTORY_TABLE, vec![batch], WriteMode::Overwrite)
            .await
            .unwrap();

        land(&config, "2-reissue.json", &json!({
            "id": 2, "artists": "Milt Jackson", "title": "Django",
            "musicians": ["Milt Jackson (vibraphone)"]
        }).to_string());
        assert!(pipeline.ingest().await.is_err());

        let fallbacks = catalog.list_resolution_events(Some(LEADER_FALLBACK)).unwrap();
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].album_id, "2");
        assert!(!catalog.is_ingested("2-reissue.json").unwrap());

        let tasks = catalog.list_tasks(1).unwrap();
        assert_eq!(tasks[0].status, "FAILED");
    }

    #[tokio::test]
    async fn run_reports_the_failing_stage() {
        let dir = tempdir().unwrap();
        let (pipeline, catalog, _graph, _config) = pipeline(dir.path()).await;

        // Nothing was ever ingested, so there is no history to rebuild from.
        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.stage, Stage::Rebuild);

        let tasks = catalog.list_tasks(10).unwrap();
        assert_eq!(tasks[0].task_name, "rebuild");
        assert_eq!(tasks[0].status, "FAILED");
        assert_eq!(tasks[1].task_name, "ingest");
        assert_eq!(tasks[1].status, "SUCCESS");
    }

    #[tokio::test]
    async fn full_run_materializes_the_graph() {
        let dir = tempdir().unwrap();
        let (pipeline, catalog, graph, config) = pipeline(dir.path()).await;
        land(&config, "1.json", &json!({
            "id": 1, "artists": "Miles Davis Quintet", "title": "Relaxin'", "year": "1958",
            "label": "Prestige", "tracklist": ["If I Were a Bell", "Oleo", "Oleo (alt. take)"],
            "musicians": ["Miles Davis (trumpet)", "John Coltrane (tenor sax)"]
        }).to_string());
        land(&config, "2.json", &json!({
            "id": 2, "artists": "The Modern Jazz Quartet", "title": "Django",
            "musicians": ["Milt Jackson (vibraphone)"]
        }).to_string());

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.ingest.appended, 2);
        assert_eq!(report.ingest.leader_fallbacks, 1);
        assert!(report.materialize.is_success());

        let stats = graph.stats().unwrap();
        assert_eq!(stats.nodes["Album"], 2);
        assert_eq!(stats.nodes["Work"], 2);
        assert_eq!(stats.nodes["Label"], 1);
        assert_eq!(stats.edges["LEADS"], 2);
        assert_eq!(stats.edges["PLAYS_IN"], 2);
        assert_eq!(stats.edges["CONTAINS"], 2);
        assert_eq!(stats.edges["RELEASED_BY"], 1);

        let fallbacks = catalog.list_resolution_events(Some(LEADER_FALLBACK)).unwrap();
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].album_id, "2");
    }
}
