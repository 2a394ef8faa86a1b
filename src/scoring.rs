//! Scoring functions for chart-to-catalog matching.
//!
//! Title and artist are scored independently, each between 0 and 100. A cover
//! version scores high on title and low on artist; keeping the two apart is
//! what lets the resolver reject it.

use strsim::jaro_winkler;

use crate::models::{CatalogTrack, Song};
use crate::normalize::{lower_case_no_diacritics, strip_dash_suffix, Normalizer};

// ============================================================================
// Score Thresholds
// ============================================================================

/// Title AND artist score must both exceed this to accept a catalog candidate
pub const ACCEPT_THRESHOLD: f64 = 75.0;

pub const EXACT_SCORE: f64 = 100.0;

/// Title starts or ends with the other title
pub const PARTIAL_TITLE_SCORE: f64 = 80.0;

/// Some, but not all, credited catalog artists appear in the chart artist
pub const PARTIAL_ARTIST_SCORE: f64 = 75.0;

// ============================================================================
// Match Score
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub title: f64,
    pub artist: f64,
}

impl MatchScore {
    pub fn is_acceptable(&self) -> bool {
        self.title > ACCEPT_THRESHOLD && self.artist > ACCEPT_THRESHOLD
    }
}

/// Edit similarity between two strings (0.0 to 1.0), Jaro-Winkler.
pub fn similarity(a: &str, b: &str) -> f64 {
    jaro_winkler(a, b)
}

/// Score a chart song against a catalog track.
/// Both sides are compared lower-cased and without diacritics.
pub fn score_match(normalizer: &Normalizer, song: &Song, track: &CatalogTrack) -> MatchScore {
    let catalog_artists: Vec<String> = track
        .artists
        .iter()
        .map(|a| lower_case_no_diacritics(a))
        .collect();
    MatchScore {
        title: title_score(
            &lower_case_no_diacritics(&song.title),
            &lower_case_no_diacritics(&track.name),
        ),
        artist: artist_score(normalizer, &lower_case_no_diacritics(&song.artist), &catalog_artists),
    }
}

// ============================================================================
// Title Score
// ============================================================================

/// Title score of two already folded titles.
pub fn title_score(chart_title: &str, catalog_title: &str) -> f64 {
    if chart_title == catalog_title {
        return EXACT_SCORE;
    }

    let chart_title = strip_dash_suffix(chart_title).trim();
    let catalog_title = strip_dash_suffix(catalog_title).trim();
    let chart: Vec<char> = chart_title.chars().collect();
    let catalog: Vec<char> = catalog_title.chars().collect();
    if chart.len() != catalog.len() {
        let shortest = chart.len().min(catalog.len());
        if shortest > 0 {
            // check if beginning matches
            if chart[..shortest] == catalog[..shortest] {
                return PARTIAL_TITLE_SCORE;
            }
            // check if ending matches
            if chart[chart.len() - shortest..] == catalog[catalog.len() - shortest..] {
                return PARTIAL_TITLE_SCORE;
            }
        }
    }

    similarity(chart_title, catalog_title) * 100.0
}

// ============================================================================
// Artist Score
// ============================================================================

/// Artist score of a folded chart artist credit against the folded names of
/// all credited catalog artists.
pub fn artist_score(
    normalizer: &Normalizer,
    chart_artist: &str,
    catalog_artists: &[String],
) -> f64 {
    let chart_artist = normalizer.strip_artist_noise(chart_artist);
    match catalog_artists {
        [] => 0.0,
        [single] => {
            let single = normalizer.strip_artist_noise(single);
            if single == chart_artist {
                EXACT_SCORE
            } else {
                similarity(&chart_artist, &single) * 100.0
            }
        }
        multiple => {
            let matched = multiple
                .iter()
                .map(|a| normalizer.strip_artist_noise(a))
                .filter(|a| !a.is_empty() && chart_artist.contains(a.as_str()))
                .count();
            if matched == multiple.len() {
                EXACT_SCORE
            } else if matched >= 1 {
                PARTIAL_ARTIST_SCORE
            } else {
                0.0
            }
        }
    }
}
