//! Moves fetched release files from the landing zone into the raw archive.

use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::Catalog;
use crate::errors::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ArchiveSummary {
    pub archived: usize,
    /// Names already present in the archive; these stay in landing.
    pub skipped: Vec<String>,
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn collect_json(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json(&path, found)?;
        } else if is_json(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    // rename fails across filesystems
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

/// Archives every `*.json` file found under `landing` into `raw`.
pub fn archive_landing(landing: &Path, raw: &Path) -> Result<ArchiveSummary> {
    fs::create_dir_all(raw)?;
    let mut summary = ArchiveSummary::default();
    if !landing.is_dir() {
        return Ok(summary);
    }

    let mut files = Vec::new();
    collect_json(landing, &mut files)?;
    files.sort();

    for path in files {
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = raw.join(name);
        if target.exists() {
            log::warn!(
                "{} already archived; leaving it in landing",
                name.to_string_lossy()
            );
            summary.skipped.push(name.to_string_lossy().into_owned());
            continue;
        }
        move_file(&path, &target)?;
        summary.archived += 1;
    }
    log::info!("Archived {} landing file(s)", summary.archived);
    Ok(summary)
}

/// Raw files not yet recorded in the ingestion ledger, sorted by name.
pub fn pending_files(raw: &Path, catalog: &Catalog) -> Result<Vec<PathBuf>> {
    if !raw.is_dir() {
        return Ok(Vec::new());
    }
    let mut pending = Vec::new();
    for entry in fs::read_dir(raw)? {
        let path = entry?.path();
        if !path.is_file() || !is_json(&path) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !catalog.is_ingested(name)? {
            pending.push(path);
        }
    }
    pending.sort();
    Ok(pending)
}
