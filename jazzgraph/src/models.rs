use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One tabular row keyed by column name, as read from the lake.
pub type Row = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Musician,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Leader => "leader",
            Role::Musician => "musician",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalAlbum {
    pub album_id: String,
    pub ensemble: String,
    pub title: String,
    pub year: Option<i32>,
    pub label: Option<String>,
    pub styles: Vec<String>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Artist {
    pub artist_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub label_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Work {
    pub work_id: String,
    pub work_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PersonnelEdge {
    pub album_id: String,
    pub artist_id: String,
    pub role: Role,
}

/// A personnel edge together with the display name it was resolved from.
///
/// This is the shape stored in the history table so that the artist
/// dimension can be rebuilt without re-running leader inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonnelCredit {
    pub artist_id: String,
    pub name: String,
    pub role: Role,
}

/// Everything the normalizer derives from one raw release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRelease {
    pub album: CanonicalAlbum,
    pub label: Option<Label>,
    pub artists: Vec<Artist>,
    pub works: Vec<Work>,
    pub personnel: Vec<PersonnelCredit>,
    /// Set when no credit matched the artist field and the whole field was
    /// attributed as a single leader.
    pub leader_fallback: bool,
}

impl NormalizedRelease {
    pub fn personnel_edges(&self) -> Vec<PersonnelEdge> {
        self.personnel
            .iter()
            .map(|credit| PersonnelEdge {
                album_id: self.album.album_id.clone(),
                artist_id: credit.artist_id.clone(),
                role: credit.role,
            })
            .collect()
    }
}

// --- Metadata Catalog (SQLite) Models ---

#[derive(Debug, Clone, Serialize)]
pub struct TaskLog {
    pub task_id: i64,
    pub task_name: String,
    pub start_time: i64, // Unix timestamp
    pub end_time: Option<i64>,
    pub status: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineRecord {
    pub record_id: i64,
    pub source_file: String,
    pub reason: String,
    pub payload: String,
    pub batch_id: i64,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionEvent {
    pub album_id: String,
    pub kind: String,
    pub detail: String,
    pub batch_id: i64,
    pub recorded_at: i64,
}

/// A pending change to the resolution events of one album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionChange {
    Record {
        album_id: String,
        kind: String,
        detail: String,
    },
    Clear {
        album_id: String,
        kind: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Appended,
    Quarantined,
    Superseded,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Appended => "appended",
            FileStatus::Quarantined => "quarantined",
            FileStatus::Superseded => "superseded",
        }
    }
}
