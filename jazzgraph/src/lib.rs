pub mod catalog;
pub mod config;
pub mod errors;
pub mod graph;
pub mod intake;
pub mod lake;
pub mod mapping;
pub mod materialize;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod records;
pub mod tables;
pub mod utils;

use crate::catalog::Catalog;
use crate::config::StorageConfig;
use crate::errors::Result;
use crate::graph::{GraphStore, LmdbGraph};
use crate::lake::Lake;
use crate::mapping::GraphMapping;
use crate::pipeline::Pipeline;
use std::sync::Arc;

/// The main entry point for the `jazzgraph` library.
///
/// `JazzGraph` owns every store the release pipeline works against:
/// - a metadata database (`Catalog`) using SQLite for task logs, the
///   ingestion ledger, quarantined records and resolution events;
/// - a layered data lake (`Lake`) built with Delta Lake, holding the
///   append-only release history and the rebuilt gold tables;
/// - a persistent property graph (`LmdbGraph`) that the gold tables are
///   materialized into.
///
/// # Example
///
/// ```rust,no_run
/// use jazzgraph::{JazzGraph, config::StorageConfig, mapping::GraphMapping};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = StorageConfig::new("./data");
///     let jazz = JazzGraph::open(config, GraphMapping::default_config()?).await?;
///     let report = jazz.pipeline.run().await?;
///     println!("{} release(s) appended", report.ingest.appended);
///     Ok(())
/// }
/// ```
pub struct JazzGraph {
    pub config: StorageConfig,
    pub catalog: Arc<Catalog>,
    pub lake: Arc<Lake>,
    pub graph: Arc<dyn GraphStore>,
    pub pipeline: Pipeline,
}

impl JazzGraph {
    /// Opens (creating when absent) the catalog, the lake and the graph
    /// store under the configured paths.
    pub async fn open(config: StorageConfig, mapping: GraphMapping) -> Result<Self> {
        tokio::fs::create_dir_all(&config.landing_path).await?;
        tokio::fs::create_dir_all(&config.raw_path).await?;

        let catalog = Arc::new(Catalog::new(&config)?);
        catalog.initialize_schema()?;

        let lake = Arc::new(Lake::new(config.clone()).await?);
        let graph: Arc<dyn GraphStore> = Arc::new(LmdbGraph::open(&config.graph_path)?);

        let pipeline = Pipeline::new(
            config.clone(),
            Arc::clone(&catalog),
            Arc::clone(&lake),
            Arc::clone(&graph),
            mapping,
        );

        Ok(Self {
            config,
            catalog,
            lake,
            graph,
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_jazzgraph_initialization() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());

        let jazz = JazzGraph::open(config.clone(), GraphMapping::default_config().unwrap()).await;
        assert!(jazz.is_ok());

        assert!(config.landing_path.exists());
        assert!(config.raw_path.exists());
        assert!(config.lake_path.join("bronze").exists());
        assert!(config.lake_path.join("gold").exists());
        assert!(config.catalog_path.exists());
        assert!(config.graph_path.exists());
    }
}
