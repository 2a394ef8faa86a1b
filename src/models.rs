//! Core data models for chart-to-playlist reconciliation.
//!
//! This module contains the chart-side and catalog-side value types that flow
//! between the normalizer, the resolver and the reconciler, plus the run
//! statistics that are logged at the end of each phase.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Chart Models
// ============================================================================

/// A song as it appears on a chart or in a catalog, before any normalization.
///
/// Natural ordering is artist first, then title (derived field order).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Song {
    pub artist: String,
    pub title: String,
}

impl Song {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// One song's appearance at a position in a dated chart edition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartEntry {
    pub chart_name: String,
    pub year: u16,
    pub week_number: u8, // 1-53
    pub position: u8,
    pub is_new_release: bool,
    pub song: Song,
}

/// A music chart understood by this software.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MusicChart {
    pub name: &'static str,
    /// Path segment used by the chart website
    pub slug: &'static str,
    pub year_started: u16,
    pub week_started: u8,
}

pub const TOP40: MusicChart = MusicChart {
    name: "Top 40",
    slug: "top40",
    year_started: 1965,
    week_started: 1,
};

pub const TIPPARADE: MusicChart = MusicChart {
    name: "Tipparade",
    slug: "tipparade",
    year_started: 1967,
    week_started: 28,
};

pub const SUPPORTED_CHARTS: [MusicChart; 2] = [TOP40, TIPPARADE];

// ============================================================================
// Catalog Models
// ============================================================================

/// Track as returned by the catalog service. Read-only to this system.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogTrack {
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>, // credited order
    pub popularity: u32,      // 0-100
}

impl CatalogTrack {
    /// Project the track onto the chart-side song shape.
    pub fn as_song(&self) -> Song {
        Song::new(self.artists.join(", "), self.name.clone())
    }
}

/// Entry of a playlist listing. The track is absent for items the catalog no
/// longer serves, but the item still occupies a position in the listing.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaylistItem {
    pub track: Option<CatalogTrack>,
}

/// Resolved pairing between a chart-side song and a catalog track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMatch {
    pub song: Song,
    pub track_uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogPlaylist {
    pub name: String,
    pub id: String,
}

/// Name of the playlist that collects the charted songs of one year.
pub fn playlist_name_for_year(year: u16) -> String {
    format!("{} charted songs", year)
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Outcome counts of one playlist reconciliation.
#[derive(Default, Debug, Clone, Serialize)]
pub struct ReconcileStats {
    pub playlist: String,
    pub playlist_created: bool,
    pub chart_songs: usize,
    pub existing_tracks: usize,

    // Diff against current playlist contents
    pub already_present: usize,
    pub searched: usize,

    // Resolution outcome of the searched songs
    pub resolved: usize,
    pub unresolved: usize,
    pub failed: usize,       // catalog error other than rate limiting
    pub duplicate_uris: usize, // resolved to a track already present or already queued

    pub added: usize,
    pub add_batches: usize,

    pub elapsed_seconds: f64,
}

impl ReconcileStats {
    /// Share of searched songs that resolved to a catalog track
    pub fn resolve_rate(&self) -> f64 {
        if self.searched == 0 {
            0.0
        } else {
            100.0 * self.resolved as f64 / self.searched as f64
        }
    }

    /// Log stats in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            log::info!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Counts of one ingestion pass over all supported charts.
#[derive(Default, Debug, Clone, Serialize)]
pub struct IngestStats {
    pub weeks_planned: usize,
    pub weeks_scraped: usize,
    pub weeks_empty: usize,
    pub weeks_failed: usize,
    pub entries_written: usize,
    pub elapsed_seconds: f64,
}

impl IngestStats {
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            log::info!("[STATS:{}]\n{}", phase, json);
        }
    }
}
