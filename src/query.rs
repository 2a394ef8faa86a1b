//! Catalog search query composition.
//!
//! Queries are built from the normalizer's sorted word sets, so the same song
//! always yields the same query string. The match cache relies on that.

use crate::models::Song;
use crate::normalize::{Normalizer, WordSet};

/// Field restricting keywords to the artist name
pub const ARTIST_FIELD: &str = "artist";

/// Field restricting keywords to the track title
pub const TRACK_FIELD: &str = "track";

/// Minimum word length kept by the minimized query
const MINIMIZED_WORD_LENGTH: usize = 4;

/// Maximum words per field kept by the minimized query
const MINIMIZED_WORDS_PER_FIELD: usize = 2;

/// Normalized artist and title words of one song.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryWords {
    pub artist_words: WordSet,
    pub title_words: WordSet,
}

impl QueryWords {
    pub fn of(normalizer: &Normalizer, song: &Song) -> Self {
        Self {
            artist_words: normalizer.normalize_artist(song),
            title_words: normalizer.normalize_title(song),
        }
    }

    /// The primary query, also the match cache key.
    pub fn normalized(&self) -> String {
        as_query_string(
            self.artist_words.iter().map(String::as_str),
            self.title_words.iter().map(String::as_str),
        )
    }

    /// A looser query that keeps only the longest words of each field.
    pub fn minimized(&self) -> String {
        as_query_string(
            longest_words(&self.artist_words).into_iter(),
            longest_words(&self.title_words).into_iter(),
        )
    }
}

/// Compose the search query for a song, e.g. `artist:downtime zero track:one three two`.
pub fn compose(normalizer: &Normalizer, song: &Song) -> String {
    QueryWords::of(normalizer, song).normalized()
}

fn as_query_string<'a>(
    artist: impl Iterator<Item = &'a str>,
    title: impl Iterator<Item = &'a str>,
) -> String {
    let artist: Vec<&str> = artist.collect();
    let title: Vec<&str> = title.collect();
    let mut clauses = Vec::with_capacity(2);
    if !artist.is_empty() {
        clauses.push(format!("{}:{}", ARTIST_FIELD, artist.join(" ")));
    }
    if !title.is_empty() {
        clauses.push(format!("{}:{}", TRACK_FIELD, title.join(" ")));
    }
    clauses.join(" ")
}

/// Up to two of the longest words of at least four characters, in word-set
/// order. Falls back to all words when none is long enough.
fn longest_words(words: &WordSet) -> Vec<&str> {
    if words.len() <= 1 {
        return words.iter().map(String::as_str).collect();
    }
    let mut long: Vec<&str> = words
        .iter()
        .map(String::as_str)
        .filter(|w| w.chars().count() >= MINIMIZED_WORD_LENGTH)
        .collect();
    if long.is_empty() {
        return words.iter().map(String::as_str).collect();
    }
    // stable sort keeps alphabetical order among equally long words
    long.sort_by_key(|w| std::cmp::Reverse(w.chars().count()));
    long.truncate(MINIMIZED_WORDS_PER_FIELD);
    long.sort_unstable();
    long
}
