use std::sync::Arc;

use jazzgraph::{
    catalog::Catalog, config::StorageConfig, graph::LmdbGraph, lake::Lake,
    mapping::GraphMapping, pipeline::Pipeline,
};
use tempfile::TempDir;

#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub config: StorageConfig,
    pub catalog: Arc<Catalog>,
    pub lake: Arc<Lake>,
    pub graph: Arc<LmdbGraph>,
    pub pipeline: Pipeline,
}

pub async fn init_test_context() -> anyhow::Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let config = StorageConfig::new(temp_dir.path());

    let catalog = Arc::new(Catalog::new(&config)?);
    catalog.initialize_schema()?;

    let lake = Arc::new(Lake::new(config.clone()).await?);
    let graph = Arc::new(LmdbGraph::open(&config.graph_path)?);

    let pipeline = Pipeline::new(
        config.clone(),
        Arc::clone(&catalog),
        Arc::clone(&lake),
        graph.clone(),
        GraphMapping::default_config()?,
    );

    Ok(TestContext {
        temp_dir,
        config,
        catalog,
        lake,
        graph,
        pipeline,
    })
}

impl TestContext {
    /// Drops a release document into the landing zone.
    #[allow(dead_code)]
    pub fn write_landing_file(&self, name: &str, body: &serde_json::Value) -> anyhow::Result<()> {
        self.write_landing_text(name, &body.to_string())
    }

    #[allow(dead_code)]
    pub fn write_landing_text(&self, name: &str, body: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config.landing_path)?;
        std::fs::write(self.config.landing_path.join(name), body)?;
        Ok(())
    }
}

/// Two leader-matched quintet sessions sharing a sideman, plus a fallback.
#[allow(dead_code)]
pub fn sample_releases() -> Vec<(&'static str, serde_json::Value)> {
    vec![
        (
            "1.json",
            serde_json::json!({
                "id": 1,
                "artists": "Miles Davis Quintet",
                "title": "Cookin'",
                "year": 1957,
                "label": "Prestige",
                "style": ["Hard Bop"],
                "tracklist": ["My Funny Valentine", "Blues by Five", "Airegin", "Tune Up"],
                "musicians": ["Miles Davis (trumpet)", "John Coltrane (tenor sax)", "Red Garland (piano)"]
            }),
        ),
        (
            "2.json",
            serde_json::json!({
                "id": "2",
                "artists": "John Coltrane",
                "title": "Blue Train",
                "year": "1958",
                "label": "Blue Note ",
                "style": "[\"Hard Bop\"]",
                "tracklist": "[\"Blue Train\", \"Moment's Notice\", \"Blue Train (alt. take)\"]",
                "musicians": ["John Coltrane (tenor sax)", "Lee Morgan (trumpet)"]
            }),
        ),
        (
            "3.json",
            serde_json::json!({
                "id": 3,
                "artists": "The Modern Jazz Quartet",
                "title": "Django",
                "label": "prestige",
                "tracklist": ["Django"],
                "musicians": ["Milt Jackson (vibraphone)", "John Lewis (piano)"]
            }),
        ),
    ]
}
