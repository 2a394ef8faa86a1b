//! Normalization of chart and catalog text into comparable word sets.
//! Used by the query composer, the song comparator and the scorer.
//!
//! CRITICAL: match cache keys are composed from this output. Any change here
//! changes the composed queries, so earlier cache entries stop being hit.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use unicode_normalization::UnicodeNormalization;

use crate::models::Song;

// ============================================================================
// NOISE WORDS AND ALIASES
// ============================================================================

// all entries must be lower case

/// Credit markers, dropped from both artist and title.
pub const CREDITS_NOISE_WORDS: &[&str] =
    &["feat", "feat.", "featuring", "ft", "ft.", "mmv", "m.m.v."];

pub const ARTIST_NOISE_WORDS: &[&str] = &["the", "with", "and", "x", "+", "vs", "vs."];

pub const TITLE_NOISE_WORDS: &[&str] = &["the", "a", "de", "-", "radio", "edit", "mix", "single"];

/// Artist spellings used by the charts mapped to the catalog's spelling.
pub const ARTIST_ALIASES: &[(&str, &str)] = &[
    ("atc", "a touch of class"),
    ("beegees", "bee gees"),
    ("scr!pt", "script"),
    ("p!nk", "pink"),
    ("abba*teens", "a*teens"),
];

/// Stripped from titles before splitting into words.
const TITLE_PUNCTUATION: &[char] = &[',', '.', '!', '?', '\'', '"'];

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Word separators: whitespace, parentheses, comma and ampersand.
static WORD_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s(),&]+").unwrap());

/// Parenthesised or bracketed remarks: "(Far Away)", "[Live]".
static TITLE_REMARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").unwrap());

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(
        c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F
    )
}

/// Lower-case text and strip diacritics via NFD decomposition.
/// e.g., "Beyoncé" → "beyonce", "Motörhead" → "motorhead"
pub fn lower_case_no_diacritics(s: &str) -> String {
    s.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

/// Cut a trailing "- remark" ("- Club Mix", "- Live") at the last dash.
///
/// Dashes joining two word characters ("x-ray") are not remark markers and are
/// skipped. A cut that would leave nothing but whitespace is not applied.
pub fn strip_dash_suffix(value: &str) -> &str {
    let chars: Vec<(usize, char)> = value.char_indices().collect();
    for i in (0..chars.len()).rev() {
        let (pos, c) = chars[i];
        if c != '-' {
            continue;
        }
        let joins_word = i > 0
            && i + 1 < chars.len()
            && chars[i - 1].1.is_alphanumeric()
            && chars[i + 1].1.is_alphanumeric();
        if joins_word {
            continue;
        }
        let head = &value[..pos];
        return if head.trim().is_empty() { value } else { head };
    }
    value
}

/// Keep only the first side of a double A-side single ("Side A / Side B").
pub fn choose_one_when_double_a_side(title: &str) -> &str {
    match title.find('/') {
        Some(pos) if !title[..pos].trim().is_empty() => &title[..pos],
        _ => title,
    }
}

fn split_words(s: &str) -> impl Iterator<Item = &str> {
    WORD_SEPARATOR.split(s).filter(|w| !w.is_empty())
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Sorted, de-duplicated words. Sorting only makes the output deterministic.
pub type WordSet = BTreeSet<String>;

/// Static configuration of the normalizer.
#[derive(Clone, Debug)]
pub struct NormalizerTables {
    pub artist_noise: FxHashSet<String>,
    pub title_noise: FxHashSet<String>,
    pub aliases: FxHashMap<String, String>,
}

impl NormalizerTables {
    /// The tables tuned against the Dutch charts and Spotify.
    pub fn standard() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        let mut artist_noise: FxHashSet<String> = owned(ARTIST_NOISE_WORDS).into_iter().collect();
        artist_noise.extend(owned(CREDITS_NOISE_WORDS));
        let mut title_noise: FxHashSet<String> = owned(TITLE_NOISE_WORDS).into_iter().collect();
        title_noise.extend(owned(CREDITS_NOISE_WORDS));
        let aliases = ARTIST_ALIASES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self {
            artist_noise,
            title_noise,
            aliases,
        }
    }

    /// Tables that drop nothing and alias nothing.
    pub fn empty() -> Self {
        Self {
            artist_noise: FxHashSet::default(),
            title_noise: FxHashSet::default(),
            aliases: FxHashMap::default(),
        }
    }
}

/// Turns raw (artist, title) pairs into canonical word sets.
#[derive(Clone, Debug)]
pub struct Normalizer {
    tables: NormalizerTables,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerTables::standard())
    }
}

impl Normalizer {
    pub fn new(tables: NormalizerTables) -> Self {
        Self { tables }
    }

    /// Artist words without credit and noise words, aliases applied.
    pub fn normalize_artist(&self, song: &Song) -> WordSet {
        let folded = lower_case_no_diacritics(&song.artist);
        split_words(&folded)
            .filter(|w| !self.tables.artist_noise.contains(*w))
            .map(|w| self.replace_alias(w))
            .collect()
    }

    /// Title words of the first A-side, without a trailing dash remark,
    /// noise words or words that also occur in the normalized artist.
    pub fn normalize_title(&self, song: &Song) -> WordSet {
        self.title_words(song, false)
    }

    /// Like [`Normalizer::normalize_title`], but also drops parenthesised
    /// remarks, so "She Moves (Far Away)" reduces to the words of "She Moves".
    pub fn normalize_core_title(&self, song: &Song) -> WordSet {
        self.title_words(song, true)
    }

    /// Lower-case artist string with noise words removed, kept as one string
    /// so that catalog artist names can be found in it as substrings.
    pub fn strip_artist_noise(&self, artist: &str) -> String {
        artist
            .split_whitespace()
            .filter(|w| !self.tables.artist_noise.contains(*w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn title_words(&self, song: &Song, drop_remarks: bool) -> WordSet {
        let folded = lower_case_no_diacritics(&song.title);
        let mut title = strip_dash_suffix(choose_one_when_double_a_side(&folded)).to_string();
        if drop_remarks {
            title = TITLE_REMARK.replace_all(&title, " ").into_owned();
        }
        let title: String = title.chars().filter(|c| !TITLE_PUNCTUATION.contains(c)).collect();

        // Artist words in the title would inflate the overlap between songs
        let artist_words = self.normalize_artist(song);
        split_words(&title)
            .filter(|w| !self.tables.title_noise.contains(*w))
            .filter(|w| !artist_words.contains(*w))
            .map(str::to_string)
            .collect()
    }

    fn replace_alias(&self, word: &str) -> String {
        self.tables
            .aliases
            .get(word)
            .cloned()
            .unwrap_or_else(|| word.to_string())
    }
}

/// Join a word set with single spaces.
pub fn join_words(words: &WordSet) -> String {
    words.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
