//! Canonical forms for display strings.
//!
//! Every entity id in the lake is derived from one of these forms, so any
//! change here re-keys the whole dataset on the next rebuild.

use once_cell::sync::Lazy;
use regex::Regex;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static TAKE_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\([^)]*\btake\b[^)]*\)").expect("valid regex"));
static TRAILING_NOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<head>.*?)\s*\((?P<note>[^()]*)\)\s*$").expect("valid regex")
});
static NAME_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(?:&|,|\band\b)\s*").expect("valid regex"));

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'õ' | 'ø' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Collapses runs of whitespace into one space and trims the ends.
pub fn collapse_whitespace(value: &str) -> String {
    WHITESPACE.replace_all(value.trim(), " ").into_owned()
}

/// Matching/identity form: lowercase, accents folded, punctuation dropped.
pub fn canonical_text(value: &str) -> String {
    let folded: String = value
        .trim()
        .to_lowercase()
        .chars()
        .map(fold_accent)
        .collect();
    let without_punct = NON_WORD.replace_all(&folded, " ");
    collapse_whitespace(&without_punct)
}

/// Labels only differ by case and spacing in practice.
pub fn canonical_label(value: &str) -> String {
    collapse_whitespace(&value.to_lowercase())
}

/// Removes parenthesised take annotations such as "(alt. take)".
pub fn strip_take_notes(title: &str) -> String {
    collapse_whitespace(&TAKE_NOTE.replace_all(title, ""))
}

/// Splits `"Name (note)"` into the name and its trailing annotation.
///
/// Purely numeric notes are catalog disambiguation ("Bill Evans (2)") and are
/// dropped; the first non-numeric note found from the right is returned.
pub fn split_credit(credit: &str) -> (String, Option<String>) {
    let mut head = credit.trim().to_string();
    let mut note = None;
    while let Some(caps) = TRAILING_NOTE.captures(&head) {
        let inner = caps["note"].trim().to_string();
        let rest = caps["head"].trim().to_string();
        if rest.is_empty() {
            break;
        }
        if !inner.chars().all(|c| c.is_ascii_digit()) && note.is_none() {
            note = Some(inner);
        }
        head = rest;
    }
    (head, note)
}

/// Drops trailing numeric disambiguation from a display name.
pub fn strip_disambiguation(name: &str) -> String {
    let mut head = name.trim().to_string();
    while let Some(caps) = TRAILING_NOTE.captures(&head) {
        let inner = caps["note"].trim();
        let rest = caps["head"].trim();
        if rest.is_empty() || inner.is_empty() || !inner.chars().all(|c| c.is_ascii_digit()) {
            break;
        }
        head = rest.to_string();
    }
    head
}

/// Splits an artist field like "Art Blakey & The Jazz Messengers" into
/// candidate names.
pub fn split_artist_names(artists: &str) -> Vec<String> {
    NAME_SEPARATOR
        .split(artists)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_text_folds_case_space_and_accents() {
        assert_eq!(canonical_text(" John  Coltrane "), "john coltrane");
        assert_eq!(canonical_text("Thelonious Monk!"), "thelonious monk");
        assert_eq!(canonical_text("Canción Última"), "cancion ultima");
        assert_eq!(canonical_text("'Round Midnight"), "round midnight");
    }

    #[test]
    fn take_notes_are_removed() {
        assert_eq!(strip_take_notes("Blue in Green (alt. take)"), "Blue in Green");
        assert_eq!(strip_take_notes("So What (Take 2)"), "So What");
        assert_eq!(strip_take_notes("Milestones (live)"), "Milestones (live)");
    }

    #[test]
    fn credits_split_into_name_and_instrument() {
        assert_eq!(
            split_credit("Miles Davis (trumpet)"),
            ("Miles Davis".to_string(), Some("trumpet".to_string()))
        );
        assert_eq!(split_credit("Bill Evans (2)"), ("Bill Evans".to_string(), None));
        assert_eq!(
            split_credit("Bill Evans (2) (piano)"),
            ("Bill Evans".to_string(), Some("piano".to_string()))
        );
        assert_eq!(split_credit("Paul Chambers"), ("Paul Chambers".to_string(), None));
    }

    #[test]
    fn disambiguation_only_strips_numbers() {
        assert_eq!(strip_disambiguation("Max Roach (3)"), "Max Roach");
        assert_eq!(strip_disambiguation("Quartet (live)"), "Quartet (live)");
    }

    #[test]
    fn artist_field_splits_on_joiners() {
        assert_eq!(
            split_artist_names("Art Blakey & The Jazz Messengers"),
            vec!["Art Blakey", "The Jazz Messengers"]
        );
        assert_eq!(
            split_artist_names("Sonny Rollins and Coleman Hawkins, Paul Bley"),
            vec!["Sonny Rollins", "Coleman Hawkins", "Paul Bley"]
        );
        assert_eq!(split_artist_names("Miles Davis Quintet"), vec!["Miles Davis Quintet"]);
    }
}
