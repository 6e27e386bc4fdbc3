use serde::Deserialize;
use std::path::PathBuf;

use crate::errors::{Result, StorageError};

pub const HISTORY_TABLE: &str = "bronze/albums";

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// Where the external fetcher drops freshly downloaded release files.
    pub landing_path: PathBuf,
    /// Archive of intake files that have left the landing zone.
    pub raw_path: PathBuf,
    pub lake_path: PathBuf,
    pub catalog_path: PathBuf,
    pub graph_path: PathBuf,
}

impl StorageConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            landing_path: base_path.join("landing"),
            raw_path: base_path.join("raw").join("albums"),
            lake_path: base_path.join("lake"),
            catalog_path: base_path.join("catalog.sqlite"),
            graph_path: base_path.join("graph"),
        }
    }

    /// Reads `JAZZGRAPH_*` variables, loading a `.env` file first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = lookup("JAZZGRAPH_BASE_PATH").unwrap_or_else(|| ".".to_string());
        if base.trim().is_empty() {
            return Err(StorageError::Config(
                "JAZZGRAPH_BASE_PATH must not be empty".to_string(),
            ));
        }
        let mut config = Self::new(base);
        let overrides: [(&str, &mut PathBuf); 5] = [
            ("JAZZGRAPH_LANDING_PATH", &mut config.landing_path),
            ("JAZZGRAPH_RAW_PATH", &mut config.raw_path),
            ("JAZZGRAPH_LAKE_PATH", &mut config.lake_path),
            ("JAZZGRAPH_CATALOG_PATH", &mut config.catalog_path),
            ("JAZZGRAPH_GRAPH_PATH", &mut config.graph_path),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = PathBuf::from(value);
            }
        }
        Ok(config)
    }

    pub fn gold_table(name: &str) -> String {
        format!("gold/{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn new_derives_layout_under_base() {
        let config = StorageConfig::new("/data");
        assert_eq!(config.landing_path, PathBuf::from("/data/landing"));
        assert_eq!(config.raw_path, PathBuf::from("/data/raw/albums"));
        assert_eq!(config.lake_path, PathBuf::from("/data/lake"));
        assert_eq!(config.catalog_path, PathBuf::from("/data/catalog.sqlite"));
        assert_eq!(config.graph_path, PathBuf::from("/data/graph"));
    }

    #[test]
    fn lookup_applies_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("JAZZGRAPH_BASE_PATH", "/srv/jazz"),
            ("JAZZGRAPH_GRAPH_PATH", "/fast/graph"),
        ]);
        let config =
            StorageConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.lake_path, PathBuf::from("/srv/jazz/lake"));
        assert_eq!(config.graph_path, PathBuf::from("/fast/graph"));
    }

    #[test]
    fn lookup_rejects_blank_base() {
        let result = StorageConfig::from_lookup(|key| {
            (key == "JAZZGRAPH_BASE_PATH").then(|| "  ".to_string())
        });
        assert!(matches!(result, Err(StorageError::Config(_))));
    }
}
