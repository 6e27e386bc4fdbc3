//! Gold table derivation from the append-only release history.

use futures::future::{BoxFuture, FutureExt, try_join_all};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::Result;
use crate::lake::{Lake, WriteMode};
use crate::models::{Artist, Label, PersonnelEdge, Work};
use crate::normalize::track_id;
use crate::records::{AlbumLabel, AlbumWork, GoldAlbum, HistoryRecord, LakeRecord, Track};

/// Names of the rebuilt tables under `gold/`.
pub const GOLD_TABLES: [&str; 8] = [
    "albums",
    "artists",
    "works",
    "labels",
    "album_artist",
    "album_work",
    "album_label",
    "tracks",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoldTables {
    pub albums: Vec<GoldAlbum>,
    pub artists: Vec<Artist>,
    pub works: Vec<Work>,
    pub labels: Vec<Label>,
    pub album_artist: Vec<PersonnelEdge>,
    pub album_work: Vec<AlbumWork>,
    pub album_label: Vec<AlbumLabel>,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableWrite {
    pub table: String,
    pub rows: usize,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildSummary {
    pub history_rows: usize,
    pub tables: Vec<TableWrite>,
}

/// Keeps the lexicographically smallest display spelling per id.
fn keep_smallest(names: &mut BTreeMap<String, String>, id: &str, name: &str) {
    match names.get_mut(id) {
        Some(current) if name < current.as_str() => *current = name.to_string(),
        Some(_) => {}
        None => {
            names.insert(id.to_string(), name.to_string());
        }
    }
}

impl GoldTables {
    /// Derives every gold table from the complete history.
    ///
    /// Only the latest history row of each album contributes, so an album
    /// that was re-ingested has its relations replaced, not accumulated.
    pub fn derive(history: &[HistoryRecord]) -> Self {
        let mut latest: BTreeMap<&str, &HistoryRecord> = BTreeMap::new();
        for record in history {
            match latest.get(record.album_id.as_str()) {
                Some(current) if current.recency() >= record.recency() => {}
                _ => {
                    latest.insert(record.album_id.as_str(), record);
                }
            }
        }

        let mut artist_names = BTreeMap::new();
        let mut work_titles = BTreeMap::new();
        let mut label_names = BTreeMap::new();
        let mut album_artist = BTreeSet::new();
        let mut album_work = BTreeSet::new();
        let mut album_label = BTreeSet::new();
        let mut tracks = Vec::new();
        let mut albums = Vec::with_capacity(latest.len());

        for (album_id, record) in latest {
            albums.push(GoldAlbum {
                album_id: album_id.to_string(),
                ensemble: record.ensemble.clone(),
                title: record.title.clone(),
                year: record.year,
                label: record.label.clone(),
                styles: record.styles.clone(),
                cover_url: record.cover_url.clone(),
                leader_fallback: record.leader_fallback,
            });

            if let (Some(label_id), Some(name)) = (&record.label_id, &record.label) {
                keep_smallest(&mut label_names, label_id, name);
                album_label.insert(AlbumLabel {
                    album_id: album_id.to_string(),
                    label_id: label_id.clone(),
                });
            }

            let mut position = 0;
            for work in &record.works.0 {
                keep_smallest(&mut work_titles, &work.work_id, &work.work_title);
                if album_work.insert(AlbumWork {
                    album_id: album_id.to_string(),
                    work_id: work.work_id.clone(),
                }) {
                    position += 1;
                    tracks.push(Track {
                        track_id: track_id(album_id, &work.work_title),
                        album_id: album_id.to_string(),
                        position,
                        name: work.work_title.clone(),
                    });
                }
            }

            for credit in &record.personnel.0 {
                keep_smallest(&mut artist_names, &credit.artist_id, &credit.name);
                album_artist.insert(PersonnelEdge {
                    album_id: album_id.to_string(),
                    artist_id: credit.artist_id.clone(),
                    role: credit.role,
                });
            }
        }

        tracks.sort_by(|a, b| {
            (a.album_id.as_str(), a.position).cmp(&(b.album_id.as_str(), b.position))
        });

        Self {
            albums,
            artists: artist_names
                .into_iter()
                .map(|(artist_id, name)| Artist { artist_id, name })
                .collect(),
            works: work_titles
                .into_iter()
                .map(|(work_id, work_title)| Work {
                    work_id,
                    work_title,
                })
                .collect(),
            labels: label_names
                .into_iter()
                .map(|(label_id, name)| Label { label_id, name })
                .collect(),
            album_artist: album_artist.into_iter().collect(),
            album_work: album_work.into_iter().collect(),
            album_label: album_label.into_iter().collect(),
            tracks,
        }
    }

    /// Overwrites every gold table, one Delta commit each, and waits for all
    /// of them before returning.
    pub async fn publish(&self, lake: &Lake) -> Result<Vec<TableWrite>> {
        let writes: Vec<BoxFuture<'_, Result<TableWrite>>> = vec![
            overwrite(lake, &self.albums),
            overwrite(lake, &self.artists),
            overwrite(lake, &self.works),
            overwrite(lake, &self.labels),
            overwrite(lake, &self.album_artist),
            overwrite(lake, &self.album_work),
            overwrite(lake, &self.album_label),
            overwrite(lake, &self.tracks),
        ];
        try_join_all(writes).await
    }
}

fn overwrite<'a, R: LakeRecord>(lake: &'a Lake, rows: &'a [R]) -> BoxFuture<'a, Result<TableWrite>> {
    async move {
        let version = lake.write_records(rows, WriteMode::Overwrite).await?;
        Ok(TableWrite {
            table: R::TABLE.to_string(),
            rows: rows.len(),
            version,
        })
    }
    .boxed()
}

/// Re-derives the gold layer from the whole history table.
///
/// The history is read and decoded completely before the first gold write,
/// so a missing or incompatible history leaves the published tables as
/// they were.
pub async fn rebuild(lake: &Lake) -> Result<RebuildSummary> {
    let history: Vec<HistoryRecord> = lake.read_records().await?;
    log::info!("Rebuilding gold tables from {} history row(s)", history.len());

    let gold = GoldTables::derive(&history);
    let tables = gold.publish(lake).await?;
    for write in &tables {
        log::info!(
            "Published '{}' with {} row(s) at version {}",
            write.table,
            write.rows,
            write.version
        );
    }
    Ok(RebuildSummary {
        history_rows: history.len(),
        tables,
    })
}
