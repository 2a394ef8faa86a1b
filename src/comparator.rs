//! Song equivalence comparator.
//!
//! Orders songs like their natural ordering, except that near-duplicates
//! compare as equal. Used to decide whether a chart song is already in a
//! playlist without going back to the catalog.

use std::cmp::Ordering;

use crate::models::Song;
use crate::normalize::{join_words, Normalizer};
use crate::scoring::similarity;

/// Near-exact similarity on one side
pub const THRESHOLD_HIGH: f64 = 0.99;

/// Tolerated similarity on the other side
pub const THRESHOLD_MID: f64 = 0.92;

/// Normalized representation of a song, computed once per song.
#[derive(Clone, Debug)]
pub struct ComparableSong {
    pub song: Song,
    artist: String,
    title: String,
    core_title: String,
}

#[derive(Clone, Debug)]
pub struct SongComparator {
    normalizer: Normalizer,
    threshold_high: f64,
    threshold_mid: f64,
}

impl SongComparator {
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            normalizer,
            threshold_high: THRESHOLD_HIGH,
            threshold_mid: THRESHOLD_MID,
        }
    }

    pub fn prepare(&self, song: &Song) -> ComparableSong {
        ComparableSong {
            song: song.clone(),
            artist: join_words(&self.normalizer.normalize_artist(song)),
            title: join_words(&self.normalizer.normalize_title(song)),
            core_title: join_words(&self.normalizer.normalize_core_title(song)),
        }
    }

    /// Total ordering that returns `Equal` for equivalent songs.
    pub fn compare(&self, a: &Song, b: &Song) -> Ordering {
        self.compare_prepared(&self.prepare(a), &self.prepare(b))
    }

    pub fn compare_prepared(&self, a: &ComparableSong, b: &ComparableSong) -> Ordering {
        if a.song == b.song || self.is_equivalent(a, b) {
            return Ordering::Equal;
        }
        a.song.cmp(&b.song)
    }

    pub fn is_same(&self, a: &Song, b: &Song) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    /// First of `candidates` equivalent to `song`.
    pub fn find_equivalent<'a>(
        &self,
        song: &ComparableSong,
        candidates: &'a [ComparableSong],
    ) -> Option<&'a ComparableSong> {
        candidates
            .iter()
            .find(|c| self.compare_prepared(song, c) == Ordering::Equal)
    }

    fn is_equivalent(&self, a: &ComparableSong, b: &ComparableSong) -> bool {
        let artist = similarity(&a.artist, &b.artist);
        // "She Moves" vs "She Moves (Far Away)": the remark-free title decides
        let title = similarity(&a.title, &b.title).max(similarity(&a.core_title, &b.core_title));

        let equivalent = (artist >= self.threshold_high && title >= self.threshold_mid)
            || (title >= self.threshold_high && artist >= self.threshold_mid);
        if equivalent {
            log::trace!(
                "'{}' ~ '{}' (artist {:.3}, title {:.3})",
                a.song,
                b.song,
                artist,
                title
            );
        }
        equivalent
    }
}

impl Default for SongComparator {
    fn default() -> Self {
        Self::new(Normalizer::default())
    }
}
