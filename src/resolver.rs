//! Catalog search resolver: chart song to catalog track.

use crate::cache::MatchCache;
use crate::catalog::{CatalogError, CatalogService, RateLimitPolicy};
use crate::models::{CatalogMatch, CatalogTrack, Song};
use crate::normalize::Normalizer;
use crate::query::QueryWords;
use crate::scoring::score_match;

/// Candidates requested per search
pub const SEARCH_LIMIT: usize = 5;

pub struct CatalogSearchResolver<'a> {
    catalog: &'a dyn CatalogService,
    cache: &'a MatchCache,
    normalizer: &'a Normalizer,
    policy: RateLimitPolicy,
}

impl<'a> CatalogSearchResolver<'a> {
    pub fn new(
        catalog: &'a dyn CatalogService,
        cache: &'a MatchCache,
        normalizer: &'a Normalizer,
        policy: RateLimitPolicy,
    ) -> Self {
        Self {
            catalog,
            cache,
            normalizer,
            policy,
        }
    }

    /// Resolve a chart song to a catalog track.
    ///
    /// `Ok(None)` means no candidate passed the score threshold. That outcome
    /// is not cached, so the next run searches again.
    pub fn resolve(&self, song: &Song) -> Result<Option<CatalogMatch>, CatalogError> {
        let words = QueryWords::of(self.normalizer, song);
        let query = words.normalized();
        if query.is_empty() {
            log::debug!("Nothing to search for: {}", song);
            return Ok(None);
        }

        if let Some(hit) = self.cache.get(&query) {
            log::trace!("Found (cacheHit=true): {} -> {}", song, hit.track_uri);
            return Ok(Some(hit));
        }

        let mut candidates = self.search(&query)?;
        if candidates.is_empty() {
            let minimized = words.minimized();
            if minimized != query {
                log::debug!("No hits for '{}', retrying with '{}'", query, minimized);
                candidates = self.search(&minimized)?;
            }
        }

        match select_candidate(self.normalizer, song, &candidates) {
            Some(track) => {
                let found = CatalogMatch {
                    song: song.clone(),
                    track_uri: track.uri.clone(),
                };
                log::trace!("Found (cacheHit=false): {} -> {}", song, found.track_uri);
                self.cache.put(&query, found.clone());
                Ok(Some(found))
            }
            None => {
                log::debug!("Not found on catalog: {} ({} candidates)", song, candidates.len());
                Ok(None)
            }
        }
    }

    fn search(&self, query: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
        self.policy
            .call("search tracks", || self.catalog.search_tracks(query, SEARCH_LIMIT))
    }
}

/// Most popular candidate whose title and artist scores both pass the
/// threshold. Scored against the song as charted, not its normalized form.
/// Ties go to the earlier candidate.
pub fn select_candidate<'t>(
    normalizer: &Normalizer,
    song: &Song,
    candidates: &'t [CatalogTrack],
) -> Option<&'t CatalogTrack> {
    let mut best: Option<&CatalogTrack> = None;
    for candidate in candidates {
        let score = score_match(normalizer, song, candidate);
        if !score.is_acceptable() {
            log::trace!(
                "Rejected {} - {} for {} (title {:.0}, artist {:.0})",
                candidate.artists.join(", "),
                candidate.name,
                song,
                score.title,
                score.artist
            );
            continue;
        }
        if best.map_or(true, |b| candidate.popularity > b.popularity) {
            best = Some(candidate);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::{track, FakeCatalog};
    use std::time::Duration;

    const WATERLOO: &str = "artist:abba track:waterloo";

    fn resolver<'a>(
        catalog: &'a FakeCatalog,
        cache: &'a MatchCache,
        normalizer: &'a Normalizer,
    ) -> CatalogSearchResolver<'a> {
        CatalogSearchResolver::new(catalog, cache, normalizer, RateLimitPolicy::new(Duration::ZERO))
    }

    #[test]
    fn test_resolved_match_is_cached() {
        let catalog = FakeCatalog::new()
            .with_search(WATERLOO, vec![track("spotify:track:w", &["ABBA"], "Waterloo", 70)]);
        let cache = MatchCache::in_memory();
        let normalizer = Normalizer::default();
        let resolver = resolver(&catalog, &cache, &normalizer);
        let song = Song::new("Abba", "Waterloo");

        let first = resolver.resolve(&song).unwrap().unwrap();
        let second = resolver.resolve(&song).unwrap().unwrap();
        assert_eq!(first.track_uri, "spotify:track:w");
        assert_eq!(first, second);
        assert_eq!(catalog.searches(), vec![WATERLOO.to_string()]);
        assert_eq!(cache.get(WATERLOO).map(|m| m.track_uri), Some("spotify:track:w".to_string()));
    }

    #[test]
    fn test_unresolved_is_not_cached() {
        // only a cover version comes back
        let catalog = FakeCatalog::new()
            .with_search(WATERLOO, vec![track("spotify:track:c", &["Cleopatra"], "Waterloo", 40)]);
        let cache = MatchCache::in_memory();
        let normalizer = Normalizer::default();
        let resolver = resolver(&catalog, &cache, &normalizer);
        let song = Song::new("Abba", "Waterloo");

        assert!(resolver.resolve(&song).unwrap().is_none());
        assert!(resolver.resolve(&song).unwrap().is_none());
        assert_eq!(catalog.searches().len(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_most_popular_passing_candidate_wins() {
        let normalizer = Normalizer::default();
        let song = Song::new("Abba", "Waterloo");
        let candidates = vec![
            track("spotify:track:1", &["ABBA"], "Waterloo", 40),
            track("spotify:track:2", &["Abba"], "Waterloo - Live", 80),
            track("spotify:track:3", &["Someone Else"], "Waterloo", 99),
            track("spotify:track:4", &["ABBA"], "Waterloo", 80),
        ];
        let best = select_candidate(&normalizer, &song, &candidates).unwrap();
        assert_eq!(best.uri, "spotify:track:2");
    }

    #[test]
    fn test_partially_credited_track_rejected() {
        let normalizer = Normalizer::default();
        let song = Song::new("Alle Farben, Graham Candy", "She Moves");
        let candidates = vec![track(
            "spotify:track:x",
            &["Alle Farben", "Someone Else"],
            "She Moves",
            90,
        )];
        assert!(select_candidate(&normalizer, &song, &candidates).is_none());

        let candidates = vec![
            track("spotify:track:x", &["Alle Farben", "Someone Else"], "She Moves", 90),
            track("spotify:track:y", &["Alle Farben", "Graham Candy"], "She Moves", 60),
        ];
        let best = select_candidate(&normalizer, &song, &candidates).unwrap();
        assert_eq!(best.uri, "spotify:track:y");
    }

    #[test]
    fn test_no_candidates() {
        let normalizer = Normalizer::default();
        assert!(select_candidate(&normalizer, &Song::new("Abba", "Waterloo"), &[]).is_none());
    }

    #[test]
    fn test_minimized_query_fallback() {
        let song = Song::new(
            "Felix Jaehn feat. Marc E. Bassy & Gucci Mane",
            "Cool Summer Evenings Downtown",
        );
        let minimized = "artist:bassy felix track:downtown evenings";
        let catalog = FakeCatalog::new().with_search(
            minimized,
            vec![track(
                "spotify:track:f",
                &["Felix Jaehn", "Marc E. Bassy", "Gucci Mane"],
                "Cool Summer Evenings Downtown",
                55,
            )],
        );
        let cache = MatchCache::in_memory();
        let normalizer = Normalizer::default();
        let resolver = resolver(&catalog, &cache, &normalizer);

        let found = resolver.resolve(&song).unwrap().unwrap();
        assert_eq!(found.track_uri, "spotify:track:f");
        let searches = catalog.searches();
        assert_eq!(searches.len(), 2);
        assert_eq!(searches[1], minimized);

        // cached under the normalized query
        resolver.resolve(&song).unwrap().unwrap();
        assert_eq!(catalog.searches().len(), 2);
        assert!(cache.get(&searches[0]).is_some());
    }

    #[test]
    fn test_rate_limit_is_retried() {
        let catalog = FakeCatalog::new()
            .with_search(WATERLOO, vec![track("spotify:track:w", &["ABBA"], "Waterloo", 70)])
            .with_rate_limits(2);
        let cache = MatchCache::in_memory();
        let normalizer = Normalizer::default();
        let resolver = resolver(&catalog, &cache, &normalizer);
        assert!(resolver.resolve(&Song::new("Abba", "Waterloo")).unwrap().is_some());
    }

    #[test]
    fn test_search_failure_is_returned() {
        let catalog = FakeCatalog::new().with_failing_search(WATERLOO);
        let cache = MatchCache::in_memory();
        let normalizer = Normalizer::default();
        let resolver = resolver(&catalog, &cache, &normalizer);
        let err = resolver.resolve(&Song::new("Abba", "Waterloo")).unwrap_err();
        assert!(matches!(err, CatalogError::Status { status: 500, .. }));
    }
}
