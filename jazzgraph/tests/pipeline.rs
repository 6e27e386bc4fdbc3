use jazzgraph::JazzGraph;
use jazzgraph::config::{HISTORY_TABLE, StorageConfig};
use jazzgraph::mapping::GraphMapping;
use jazzgraph::pipeline::LEADER_FALLBACK;

mod common;

#[tokio::test]
async fn end_to_end_run_through_the_facade() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = StorageConfig::new(dir.path());
    let jazz = JazzGraph::open(config.clone(), GraphMapping::default_config()?).await?;

    std::fs::create_dir_all(config.landing_path.join("batch-01"))?;
    for (name, body) in common::sample_releases() {
        std::fs::write(config.landing_path.join("batch-01").join(name), body.to_string())?;
    }
    std::fs::write(config.landing_path.join("broken.json"), "[not json")?;
    std::fs::write(config.landing_path.join("README.txt"), "not a release")?;

    let report = jazz.pipeline.run().await?;
    assert_eq!(report.ingest.archive.archived, 4);
    assert_eq!(report.ingest.appended, 3);
    assert_eq!(report.ingest.quarantined, 1);
    assert_eq!(report.ingest.leader_fallbacks, 1);
    assert!(report.materialize.is_success());
    assert!(config.landing_path.join("README.txt").exists());

    let quarantine = jazz.catalog.list_quarantine()?;
    assert_eq!(quarantine.len(), 1);
    assert_eq!(quarantine[0].source_file, "broken.json");
    assert_eq!(quarantine[0].payload, "[not json");

    let fallbacks = jazz.catalog.list_resolution_events(Some(LEADER_FALLBACK))?;
    assert_eq!(fallbacks.len(), 1);
    assert_eq!(fallbacks[0].album_id, "3");
    assert_eq!(fallbacks[0].detail, "The Modern Jazz Quartet");

    assert_eq!(jazz.graph.node_count()?, 19);
    assert_eq!(jazz.graph.edge_count()?, 18);

    let tasks = jazz.catalog.list_tasks(10)?;
    let names: Vec<&str> = tasks.iter().map(|t| t.task_name.as_str()).collect();
    assert_eq!(names, vec!["materialize", "rebuild", "ingest"]);
    assert!(tasks.iter().all(|t| t.status == "SUCCESS"));
    Ok(())
}

#[tokio::test]
async fn raw_files_are_appended_once() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    for (name, body) in common::sample_releases() {
        ctx.write_landing_file(name, &body)?;
    }
    ctx.pipeline.ingest().await?;
    assert_eq!(ctx.lake.row_count(HISTORY_TABLE).await?, 3);

    // Same name lands again; the archived copy wins and nothing is re-read.
    let releases = common::sample_releases();
    let (name, body) = &releases[0];
    ctx.write_landing_file(name, body)?;
    let second = ctx.pipeline.ingest().await?;
    assert_eq!(second.archive.archived, 0);
    assert_eq!(second.archive.skipped, vec![name.to_string()]);
    assert_eq!(second.files_seen, 0);
    assert_eq!(ctx.lake.row_count(HISTORY_TABLE).await?, 3);
    assert!(ctx.config.landing_path.join(name).exists());

    let ledger = ctx.catalog.ingested_files()?;
    assert_eq!(ledger.len(), 3);
    assert!(ledger.iter().all(|(_, status)| status == "appended"));
    Ok(())
}

#[tokio::test]
async fn text_encoded_lists_are_accepted_and_malformed_ones_quarantined() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    ctx.write_landing_file(
        "ok.json",
        &serde_json::json!({
            "id": 10, "artists": "Sonny Rollins", "title": "Saxophone Colossus",
            "tracklist": "[\"St. Thomas\", \"Moritat\"]",
            "musicians": "[\"Sonny Rollins (tenor sax)\", \"Max Roach (drums)\"]"
        }),
    )?;
    ctx.write_landing_file(
        "bad.json",
        &serde_json::json!({
            "id": 11, "artists": "Sonny Rollins", "title": "Way Out West",
            "tracklist": "[not json"
        }),
    )?;

    let report = ctx.pipeline.ingest().await?;
    assert_eq!(report.appended, 1);
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.leader_fallbacks, 0);

    let quarantine = ctx.catalog.list_quarantine()?;
    assert_eq!(quarantine[0].source_file, "bad.json");
    assert!(quarantine[0].reason.contains("schema"));
    Ok(())
}
