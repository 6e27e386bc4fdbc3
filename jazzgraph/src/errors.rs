use thiserror::Error;

use crate::graph::GraphError;
use crate::mapping::MappingError;
use crate::materialize::MappingFailure;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Delta table operation failed: {0}")]
    Delta(#[from] deltalake::DeltaTableError),

    #[error("Query engine error: {0}")]
    DataFusion(#[from] deltalake::datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] deltalake::arrow::error::ArrowError),

    #[error("Graph store operation failed: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid graph mapping: {0}")]
    Mapping(#[from] MappingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Incompatible table schema for '{table}': {detail}")]
    IncompatibleSchema { table: String, detail: String },

    #[error("Materialization failed for {} mapping(s): {}", .0.len(), summarize_failures(.0))]
    Materialization(Vec<MappingFailure>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn summarize_failures(failures: &[MappingFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, StorageError>;
