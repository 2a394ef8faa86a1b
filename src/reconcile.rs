//! Playlist reconciliation.
//!
//! Brings one catalog playlist up to date with a list of chart songs:
//! 1. Find the playlist by exact name, or create it
//! 2. Read its current tracks
//! 3. Drop chart songs that are already in it (comparator equivalence)
//! 4. Resolve the rest on a bounded worker pool
//! 5. Append the matches in chart order, in batches

use anyhow::{Context, Result};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::cache::MatchCache;
use crate::catalog::{
    CatalogError, CatalogService, RateLimitPolicy, MAX_TRACKS_PER_ADD, PLAYLISTS_PAGE_LIMIT,
    PLAYLIST_TRACKS_PAGE_LIMIT,
};
use crate::comparator::{ComparableSong, SongComparator};
use crate::models::{CatalogMatch, CatalogPlaylist, ReconcileStats, Song};
use crate::normalize::Normalizer;
use crate::paging::PagingIterator;
use crate::progress::{Phase, PhaseProgress};
use crate::resolver::CatalogSearchResolver;

pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 8;
pub const DEFAULT_ADD_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Concurrent resolver workers
    pub workers: usize,
    /// Track URIs per add request
    pub batch_size: usize,
    pub policy: RateLimitPolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_ADD_BATCH_SIZE,
            policy: RateLimitPolicy::default(),
        }
    }
}

/// A track currently in the playlist.
#[derive(Debug, Clone)]
pub struct ExistingTrack {
    pub uri: String,
    pub song: ComparableSong,
}

pub struct PlaylistReconciler<'a> {
    catalog: &'a dyn CatalogService,
    cache: &'a MatchCache,
    normalizer: &'a Normalizer,
    comparator: SongComparator,
    options: ReconcileOptions,
}

impl<'a> PlaylistReconciler<'a> {
    pub fn new(
        catalog: &'a dyn CatalogService,
        cache: &'a MatchCache,
        normalizer: &'a Normalizer,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            catalog,
            cache,
            normalizer,
            comparator: SongComparator::new(normalizer.clone()),
            options: ReconcileOptions {
                workers: options.workers.clamp(1, MAX_WORKERS),
                batch_size: options.batch_size.clamp(1, MAX_TRACKS_PER_ADD),
                policy: options.policy,
            },
        }
    }

    pub fn reconcile(&self, playlist_name: &str, chart_songs: &[Song]) -> Result<ReconcileStats> {
        let start = Instant::now();
        let mut stats = ReconcileStats {
            playlist: playlist_name.to_string(),
            chart_songs: chart_songs.len(),
            ..Default::default()
        };

        let (playlist, created) = self.find_or_create_playlist(playlist_name)?;
        stats.playlist_created = created;

        let existing = self.read_playlist_tracks(&playlist)?;
        stats.existing_tracks = existing.len();

        let missing = self.missing_songs(&existing, chart_songs);
        stats.already_present = chart_songs.len() - missing.len();
        stats.searched = missing.len();
        log::info!(
            "{} of {} chart songs already in '{}', searching {}",
            stats.already_present,
            chart_songs.len(),
            playlist.name,
            missing.len()
        );

        let outcomes = self.resolve_all(&missing)?;

        let mut present: FxHashSet<&str> = existing.iter().map(|t| t.uri.as_str()).collect();
        let mut to_add: Vec<String> = Vec::new();
        let mut unresolved: Vec<&Song> = Vec::new();
        for (song, outcome) in missing.iter().copied().zip(&outcomes) {
            match outcome {
                Ok(Some(found)) => {
                    stats.resolved += 1;
                    if present.insert(found.track_uri.as_str()) {
                        log::debug!("Adding {} as {}", song, found.track_uri);
                        to_add.push(found.track_uri.clone());
                    } else {
                        log::debug!(
                            "{} resolved to {}, which is already present",
                            song,
                            found.track_uri
                        );
                        stats.duplicate_uris += 1;
                    }
                }
                Ok(None) => {
                    stats.unresolved += 1;
                    unresolved.push(song);
                }
                Err(e) => {
                    log::warn!("Search failed for {}: {}", song, e);
                    stats.failed += 1;
                }
            }
        }

        if !unresolved.is_empty() {
            log::warn!("{} songs not found on the catalog", unresolved.len());
            for song in &unresolved {
                log::info!("  not found: {}", song);
            }
        }

        for batch in to_add.chunks(self.options.batch_size) {
            self.options
                .policy
                .call("add tracks", || self.catalog.add_tracks(&playlist.id, batch))
                .with_context(|| format!("Failed to add tracks to '{}'", playlist.name))?;
            stats.add_batches += 1;
            stats.added += batch.len();
        }
        log::info!(
            "Added {} tracks to '{}' in {} batches",
            stats.added,
            playlist.name,
            stats.add_batches
        );

        stats.elapsed_seconds = start.elapsed().as_secs_f64();
        Ok(stats)
    }

    /// Exact-name lookup over the user's playlists; creates the playlist only
    /// when none matches. Returns whether it was created.
    pub fn find_or_create_playlist(&self, name: &str) -> Result<(CatalogPlaylist, bool)> {
        let policy = self.options.policy;
        let playlists = PagingIterator::new(|offset| {
            policy.call("user playlists", || {
                self.catalog.user_playlists(offset, PLAYLISTS_PAGE_LIMIT)
            })
        });
        for playlist in playlists {
            let Some(playlist) = playlist.context("Failed to list playlists")? else {
                continue;
            };
            if playlist.name == name {
                log::info!("Found existing playlist '{}'", playlist.name);
                return Ok((playlist, false));
            }
        }

        let user_id = policy
            .call("current user", || self.catalog.current_user_id())
            .context("Failed to read the current user")?;
        let playlist = policy
            .call("create playlist", || self.catalog.create_playlist(&user_id, name))
            .with_context(|| format!("Failed to create playlist '{}'", name))?;
        log::info!("Created playlist '{}'", playlist.name);
        Ok((playlist, true))
    }

    fn read_playlist_tracks(&self, playlist: &CatalogPlaylist) -> Result<Vec<ExistingTrack>> {
        let policy = self.options.policy;
        let mut items = PagingIterator::new(|offset| {
            policy.call("playlist tracks", || {
                self.catalog.playlist_tracks(&playlist.id, offset, PLAYLIST_TRACKS_PAGE_LIMIT)
            })
        });
        let total = items.size().context("Failed to read playlist tracks")?;
        let progress = PhaseProgress::start(Phase::ReadingPlaylist, total as u64);

        let mut tracks = Vec::with_capacity(total);
        for item in items {
            let item = item.context("Failed to read playlist tracks")?;
            progress.advance();
            // unavailable tracks still take a position
            if let Some(track) = item.track {
                tracks.push(ExistingTrack {
                    song: self.comparator.prepare(&track.as_song()),
                    uri: track.uri,
                });
            }
        }

        progress.finish(format!("Read {} playlist tracks", tracks.len()));
        Ok(tracks)
    }

    /// Chart songs with no equivalent among the existing tracks, in chart order.
    pub fn missing_songs<'s>(
        &self,
        existing: &[ExistingTrack],
        chart_songs: &'s [Song],
    ) -> Vec<&'s Song> {
        let existing: Vec<ComparableSong> = existing.iter().map(|t| t.song.clone()).collect();
        chart_songs
            .par_iter()
            .filter(|song| {
                let prepared = self.comparator.prepare(song);
                match self.comparator.find_equivalent(&prepared, &existing) {
                    Some(equivalent) => {
                        log::debug!("Already in playlist: {} as {}", song, equivalent.song);
                        false
                    }
                    None => true,
                }
            })
            .collect()
    }

    /// Resolve songs on the worker pool. Outcomes keep the input order.
    /// An authentication failure stops all workers and fails the run.
    fn resolve_all(
        &self,
        songs: &[&Song],
    ) -> Result<Vec<Result<Option<CatalogMatch>, CatalogError>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .build()
            .context("Failed to build resolver thread pool")?;
        let resolver = CatalogSearchResolver::new(
            self.catalog,
            self.cache,
            self.normalizer,
            self.options.policy,
        );
        let progress = PhaseProgress::start(Phase::SearchingCatalog, songs.len() as u64);
        let abort = AtomicBool::new(false);

        let outcomes: Vec<Option<Result<Option<CatalogMatch>, CatalogError>>> = pool.install(|| {
            songs
                .par_iter()
                .map(|song| {
                    if abort.load(Ordering::Relaxed) {
                        return None;
                    }
                    let outcome = resolver.resolve(song);
                    if matches!(&outcome, Err(e) if e.is_fatal()) {
                        abort.store(true, Ordering::Relaxed);
                    }
                    progress.advance();
                    Some(outcome)
                })
                .collect()
        });
        progress.finish(format!("Searched {} of {} songs", progress.done(), songs.len()));

        let mut resolved = Vec::with_capacity(outcomes.len());
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Err(e) if e.is_fatal() => return Err(e).context("Catalog search aborted"),
                outcome => resolved.push(outcome),
            }
        }
        Ok(resolved)
    }
}
