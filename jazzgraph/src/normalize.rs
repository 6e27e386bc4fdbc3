//! Per-release normalization.
//!
//! Pure transformation from one intake document into a [`NormalizedRelease`].
//! Nothing here touches storage; validation failures are returned as
//! [`ValidationError`] so the caller can route the record to quarantine.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::models::{
    Artist, CanonicalAlbum, Label, NormalizedRelease, PersonnelCredit, Role, Work,
};
use crate::utils::id::stable_entity_id;
use crate::utils::text::{
    canonical_label, canonical_text, collapse_whitespace, split_artist_names, split_credit,
    strip_disambiguation, strip_take_notes,
};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("document is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("document does not match the release schema: {0}")]
    Schema(serde_json::Error),

    #[error("required field '{0}' is empty")]
    EmptyField(&'static str),
}

/// A release as delivered by the catalog fetcher. List fields may arrive
/// either as JSON arrays or as strings holding JSON-array text.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRelease {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(alias = "artist")]
    pub artists: String,
    pub title: String,
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: Option<i32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "text_encoded_list")]
    pub tracklist: Vec<String>,
    #[serde(default, deserialize_with = "text_encoded_list")]
    pub musicians: Vec<String>,
    #[serde(default, deserialize_with = "text_encoded_list")]
    pub leaders: Vec<String>,
    #[serde(default, alias = "styles", deserialize_with = "text_encoded_list")]
    pub style: Vec<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
}

impl RawRelease {
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(ValidationError::InvalidJson)?;
        let release: RawRelease =
            serde_json::from_value(value).map_err(ValidationError::Schema)?;
        release.validate()?;
        Ok(release)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyField("id"));
        }
        if self.artists.trim().is_empty() {
            return Err(ValidationError::EmptyField("artists"));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("title"));
        }
        Ok(())
    }
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s.trim().to_string()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "id must be a string or number, got {other}"
        ))),
    }
}

fn lenient_year<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    let year = match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    };
    Ok(year)
}

fn text_encoded_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let items = match value {
        None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items,
        Some(serde_json::Value::String(text)) => {
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(serde_json::Value::Array(items)) => items,
                _ => {
                    return Err(de::Error::custom(format!(
                        "expected JSON-array text, got {text:?}"
                    )));
                }
            }
        }
        Some(other) => {
            return Err(de::Error::custom(format!("expected a list, got {other}")));
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(s) => Ok(s),
            other => Err(de::Error::custom(format!(
                "list entries must be strings, got {other}"
            ))),
        })
        .collect()
}

/// Parses and normalizes one intake document.
pub fn normalize_json(text: &str) -> Result<NormalizedRelease, ValidationError> {
    let raw = RawRelease::from_json(text)?;
    Ok(normalize(&raw))
}

pub fn artist_id(name: &str) -> Option<String> {
    let key = canonical_text(name);
    (!key.is_empty()).then(|| stable_entity_id("Artist", &[("name", &key)]))
}

pub fn work_id(title: &str) -> Option<String> {
    let key = canonical_text(&strip_take_notes(title));
    (!key.is_empty()).then(|| stable_entity_id("Work", &[("title", &key)]))
}

pub fn label_id(name: &str) -> Option<String> {
    let key = canonical_label(name);
    (!key.is_empty()).then(|| stable_entity_id("Label", &[("name", &key)]))
}

pub fn track_id(album_id: &str, title: &str) -> String {
    let key = canonical_text(&strip_take_notes(title));
    stable_entity_id("Track", &[("album_id", album_id), ("title", &key)])
}

pub fn normalize(raw: &RawRelease) -> NormalizedRelease {
    let album_id = raw.id.trim().to_string();
    let ensemble = strip_disambiguation(&collapse_whitespace(&raw.artists));

    let label_name = raw
        .label
        .as_deref()
        .map(collapse_whitespace)
        .filter(|l| !l.is_empty());
    let label = label_name.as_deref().and_then(|name| {
        label_id(name).map(|label_id| Label {
            label_id,
            name: name.to_string(),
        })
    });

    let styles = raw
        .style
        .iter()
        .map(|s| collapse_whitespace(s))
        .filter(|s| !s.is_empty())
        .collect();

    let album = CanonicalAlbum {
        album_id: album_id.clone(),
        ensemble: ensemble.clone(),
        title: collapse_whitespace(&raw.title),
        year: raw.year,
        label: label_name,
        styles,
        cover_url: raw
            .cover_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string),
    };

    let works = extract_works(&raw.tracklist);
    let (personnel, leader_fallback) = infer_personnel(&ensemble, &raw.leaders, &raw.musicians);

    let mut artists: BTreeMap<String, String> = BTreeMap::new();
    for credit in &personnel {
        artists
            .entry(credit.artist_id.clone())
            .and_modify(|name| {
                if credit.name < *name {
                    *name = credit.name.clone();
                }
            })
            .or_insert_with(|| credit.name.clone());
    }

    NormalizedRelease {
        album,
        label,
        artists: artists
            .into_iter()
            .map(|(artist_id, name)| Artist { artist_id, name })
            .collect(),
        works,
        personnel,
        leader_fallback,
    }
}

/// One Work per distinct canonical title, in tracklist order.
pub fn extract_works(tracklist: &[String]) -> Vec<Work> {
    let mut seen = BTreeSet::new();
    let mut works = Vec::new();
    for raw_title in tracklist {
        let title = strip_take_notes(raw_title.trim());
        if title.is_empty() {
            continue;
        }
        let Some(work_id) = work_id(&title) else {
            continue;
        };
        if seen.insert(work_id.clone()) {
            works.push(Work {
                work_id,
                work_title: title,
            });
        }
    }
    works
}

/// True when the tokens of `needle` appear as a contiguous run in `haystack`.
/// Both sides are canonical text, so tokens are single-space separated.
fn contains_tokens(haystack: &str, needle: &str) -> bool {
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

fn credit_matches(candidate_key: &str, credit_key: &str, credit_name_key: &str) -> bool {
    if candidate_key.is_empty() || credit_name_key.is_empty() {
        return false;
    }
    contains_tokens(credit_key, candidate_key) || contains_tokens(candidate_key, credit_name_key)
}

/// Tags every musician credit as leader or musician.
///
/// Candidates come from the artist field (split on `&`, `,`, `and`) plus any
/// leader hints. A credit is a leader when it contains a candidate or its
/// name is contained in one, comparing whole tokens only. When nothing matches, the artist field itself is
/// attributed as one leader; that loses precision for named ensembles whose
/// leader is not spelled out, and is reported through the returned flag.
pub fn infer_personnel(
    artist_field: &str,
    leader_hints: &[String],
    musicians: &[String],
) -> (Vec<PersonnelCredit>, bool) {
    let mut candidates: Vec<String> = split_artist_names(artist_field)
        .iter()
        .map(|name| canonical_text(name))
        .collect();
    candidates.extend(leader_hints.iter().map(|hint| canonical_text(hint)));
    candidates.retain(|c| !c.is_empty());

    let mut credits = Vec::new();
    let mut seen = BTreeSet::new();
    let mut any_leader = false;

    for raw_credit in musicians {
        let (name, _instrument) = split_credit(raw_credit);
        let name = collapse_whitespace(&name);
        let Some(artist_id) = artist_id(&name) else {
            continue;
        };
        let credit_key = canonical_text(raw_credit);
        let name_key = canonical_text(&name);
        let is_leader = candidates
            .iter()
            .any(|candidate| credit_matches(candidate, &credit_key, &name_key));
        let role = if is_leader { Role::Leader } else { Role::Musician };
        any_leader |= is_leader;
        if seen.insert((artist_id.clone(), role)) {
            credits.push(PersonnelCredit {
                artist_id,
                name,
                role,
            });
        }
    }

    if any_leader {
        return (credits, false);
    }

    let fallback_name = collapse_whitespace(artist_field);
    if let Some(artist_id) = artist_id(&fallback_name) {
        if seen.insert((artist_id.clone(), Role::Leader)) {
            credits.insert(
                0,
                PersonnelCredit {
                    artist_id,
                    name: fallback_name,
                    role: Role::Leader,
                },
            );
        }
    }
    (credits, true)
}
