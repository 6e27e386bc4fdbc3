use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use jazzgraph::JazzGraph;
use jazzgraph::config::{HISTORY_TABLE, StorageConfig};
use jazzgraph::mapping::GraphMapping;
use jazzgraph::pipeline::LEADER_FALLBACK;
use jazzgraph::tables::GOLD_TABLES;
use log::LevelFilter;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "jazzgraph-cli",
    about = "Run the release pipeline and inspect the catalog, lake and graph of a jazzgraph deployment."
)]
struct Cli {
    /// Base path of the jazzgraph instance (directory containing landing/raw/lake/catalog/graph).
    #[arg(short, long, default_value = ".", value_hint = clap::ValueHint::DirPath)]
    base_path: PathBuf,

    /// Minimum log level to display.
    #[arg(long, default_value_t = LogLevelArg::Info, value_enum)]
    log_level: LogLevelArg,

    /// Graph mapping document replacing the built-in one.
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    mapping: Option<PathBuf>,

    /// Emit JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest, rebuild and materialize in order.
    Run,
    /// Archive landing files and append new releases to the history.
    Ingest,
    /// Rebuild the gold tables from the history.
    Rebuild,
    /// Project the gold tables into the graph store.
    Materialize {
        /// Only apply these mapping entries (comma separated).
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },
    /// List quarantined intake records.
    Quarantine,
    /// List albums whose leader had to be attributed by fallback.
    Fallbacks,
    /// Show row counts and versions of the lake tables.
    Tables,
    /// Inspect the graph store.
    Graph {
        #[command(subcommand)]
        command: GraphCommand,
    },
    /// Show recent stage runs.
    Tasks {
        /// Maximum number of runs to display.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum GraphCommand {
    /// Node and edge counts per label and relationship type.
    Stats,
    /// Look up one node by its unique key, e.g. `Album album_id=42`.
    Node {
        label: String,

        #[arg(value_parser = parse_key_value)]
        key: (String, String),
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LevelFilter {
    fn from(value: LogLevelArg) -> Self {
        match value {
            LogLevelArg::Error => LevelFilter::Error,
            LogLevelArg::Warn => LevelFilter::Warn,
            LogLevelArg::Info => LevelFilter::Info,
            LogLevelArg::Debug => LevelFilter::Debug,
            LogLevelArg::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Serialize)]
struct TableRow {
    table: String,
    rows: Option<usize>,
    version: Option<i64>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default());
    logger.filter_level(LevelFilter::from(cli.log_level));
    let _ = logger.try_init();

    let config = if cli.base_path == PathBuf::from(".") {
        StorageConfig::from_env().context("failed to read JAZZGRAPH_* settings")?
    } else {
        let base_path = if cli.base_path.is_absolute() {
            cli.base_path.clone()
        } else {
            std::env::current_dir()
                .context("failed to resolve current directory")?
                .join(&cli.base_path)
        };
        if !base_path.exists() {
            bail!("Base path '{}' does not exist", base_path.display());
        }
        StorageConfig::new(base_path)
    };

    let mapping = match &cli.mapping {
        Some(path) => GraphMapping::from_path(path)
            .with_context(|| format!("failed to load graph mapping '{}'", path.display()))?,
        None => GraphMapping::default_config().context("built-in graph mapping is invalid")?,
    };

    let jazz = JazzGraph::open(config, mapping)
        .await
        .context("failed to open jazzgraph instance")?;

    match cli.command {
        Commands::Run => {
            let report = jazz.pipeline.run().await?;
            if cli.json {
                return print_json(&report);
            }
            println!(
                "ingest: {} appended, {} quarantined, {} superseded",
                report.ingest.appended, report.ingest.quarantined, report.ingest.superseded
            );
            println!(
                "rebuild: {} history row(s) -> {} table(s)",
                report.rebuild.history_rows,
                report.rebuild.tables.len()
            );
            print_totals(&report.materialize);
            Ok(())
        }
        Commands::Ingest => {
            let report = jazz.pipeline.ingest().await.context("ingest failed")?;
            if cli.json {
                return print_json(&report);
            }
            println!(
                "batch {}: archived {}, seen {}, appended {}, quarantined {}, superseded {}, fallbacks {}",
                report.batch_id,
                report.archive.archived,
                report.files_seen,
                report.appended,
                report.quarantined,
                report.superseded,
                report.leader_fallbacks
            );
            Ok(())
        }
        Commands::Rebuild => {
            let summary = jazz.pipeline.rebuild().await.context("rebuild failed")?;
            if cli.json {
                return print_json(&summary);
            }
            println!("{:<24} {:>8} {:>8}", "TABLE", "ROWS", "VERSION");
            for write in &summary.tables {
                println!("{:<24} {:>8} {:>8}", write.table, write.rows, write.version);
            }
            Ok(())
        }
        Commands::Materialize { only } => {
            let report = if only.is_empty() {
                jazz.pipeline.materialize().await
            } else {
                let names: Vec<&str> = only.iter().map(String::as_str).collect();
                jazz.pipeline.materialize_selected(&names).await
            }
            .context("materialize failed")?;
            if cli.json {
                return print_json(&report);
            }
            for outcome in &report.mappings {
                println!(
                    "{:<16} {:<14} rows={:<6} batches={:<4} nodes+{} ~{} edges+{} ~{} skipped={}",
                    outcome.mapping,
                    outcome.table,
                    outcome.rows_read,
                    outcome.batches_applied,
                    outcome.stats.nodes_created,
                    outcome.stats.nodes_updated,
                    outcome.stats.edges_created,
                    outcome.stats.edges_updated,
                    outcome.stats.skipped
                );
            }
            print_totals(&report);
            Ok(())
        }
        Commands::Quarantine => {
            let records = jazz.catalog.list_quarantine()?;
            if cli.json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No quarantined records.");
            }
            for record in records {
                println!(
                    "#{} batch {} {}: {}",
                    record.record_id, record.batch_id, record.source_file, record.reason
                );
            }
            Ok(())
        }
        Commands::Fallbacks => {
            let events = jazz.catalog.list_resolution_events(Some(LEADER_FALLBACK))?;
            if cli.json {
                return print_json(&events);
            }
            if events.is_empty() {
                println!("No leader fallbacks recorded.");
            }
            for event in events {
                println!(
                    "album {} (batch {}): leader set to '{}'",
                    event.album_id, event.batch_id, event.detail
                );
            }
            Ok(())
        }
        Commands::Tables => {
            let mut tables = vec![HISTORY_TABLE.to_string()];
            tables.extend(GOLD_TABLES.iter().map(|t| StorageConfig::gold_table(t)));
            let mut rows = Vec::with_capacity(tables.len());
            for table in tables {
                let (count, version) = if jazz.lake.table_exists(&table) {
                    let count = jazz
                        .lake
                        .row_count(&table)
                        .await
                        .with_context(|| format!("failed to count rows for '{table}'"))?;
                    (Some(count), jazz.lake.version(&table).await?)
                } else {
                    (None, None)
                };
                rows.push(TableRow {
                    table,
                    rows: count,
                    version,
                });
            }
            if cli.json {
                return print_json(&rows);
            }
            println!("{:<24} {:>8} {:>8}", "TABLE", "ROWS", "VERSION");
            for row in rows {
                println!(
                    "{:<24} {:>8} {:>8}",
                    row.table,
                    row.rows.map_or("-".to_string(), |r| r.to_string()),
                    row.version.map_or("-".to_string(), |v| v.to_string())
                );
            }
            Ok(())
        }
        Commands::Graph { command } => match command {
            GraphCommand::Stats => {
                let stats = jazz.graph.stats()?;
                if cli.json {
                    return print_json(&stats);
                }
                println!("NODES");
                for (label, count) in &stats.nodes {
                    println!("  {:<20} {}", label, count);
                }
                println!("EDGES");
                for (rel_type, count) in &stats.edges {
                    println!("  {:<20} {}", rel_type, count);
                }
                Ok(())
            }
            GraphCommand::Node { label, key } => {
                let (key, value) = key;
                let Some(node) = jazz.graph.node(&label, &key, &value)? else {
                    bail!("No {label} node with {key}={value}");
                };
                if cli.json {
                    return print_json(&node);
                }
                println!("{} {} ({}={})", node.label, node.id, node.key, node.key_value);
                for (name, value) in &node.properties {
                    println!("  {:<16} {}", name, value);
                }
                Ok(())
            }
        },
        Commands::Tasks { limit } => {
            let tasks = jazz.catalog.list_tasks(limit)?;
            if cli.json {
                return print_json(&tasks);
            }
            println!("{:<6} {:<12} {:<8} {:>12} DETAILS", "ID", "TASK", "STATUS", "STARTED");
            for task in tasks {
                println!(
                    "{:<6} {:<12} {:<8} {:>12} {}",
                    task.task_id,
                    task.task_name,
                    task.status,
                    task.start_time,
                    task.details.unwrap_or_default()
                );
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_totals(report: &jazzgraph::materialize::MaterializeReport) {
    let totals = report.totals();
    println!(
        "materialize: {} constraint(s) added, nodes +{} ~{}, edges +{} ~{}",
        report.constraints_added,
        totals.nodes_created,
        totals.nodes_updated,
        totals.edges_created,
        totals.edges_updated
    );
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| "expected KEY=VALUE".to_string())?;
    if key.is_empty() {
        return Err("key must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_value_splits_pairs() {
        let pair = parse_key_value("album_id=42").unwrap();
        assert_eq!(pair.0, "album_id");
        assert_eq!(pair.1, "42");
    }

    #[test]
    fn parse_key_value_rejects_missing_equals() {
        assert!(parse_key_value("abc").is_err());
        assert!(parse_key_value("=missing").is_err());
    }

    #[test]
    fn cli_parses_graph_node_lookup() {
        let cli = Cli::try_parse_from(["jazzgraph-cli", "--json", "graph", "node", "Album", "album_id=7"])
            .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Graph {
                command: GraphCommand::Node { label, key },
            } => {
                assert_eq!(label, "Album");
                assert_eq!(key, ("album_id".to_string(), "7".to_string()));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
