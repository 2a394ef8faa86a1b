//! Streaming catalog abstraction.
//!
//! The reconciler and resolver only talk to a [`CatalogService`]. The Spotify
//! Web API implementation lives in [`spotify`]; tests use an in-crate fake.

pub mod spotify;

use std::time::Duration;
use thiserror::Error;

use crate::models::{CatalogPlaylist, CatalogTrack, PlaylistItem};

/// Page size when listing the user's playlists
pub const PLAYLISTS_PAGE_LIMIT: usize = 50;

/// Page size when listing the tracks of a playlist
pub const PLAYLIST_TRACKS_PAGE_LIMIT: usize = 100;

/// Maximum track URIs accepted by one add-tracks request
pub const MAX_TRACKS_PER_ADD: usize = 100;

/// Added to the server's retry-after before retrying a rate-limited call
pub const DEFAULT_RATE_LIMIT_MARGIN: Duration = Duration::from_secs(1);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("API rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("catalog rejected the access token")]
    Unauthorized,

    #[error("{request} failed with HTTP status {status}")]
    Status { request: String, status: u16 },

    #[error("{request} failed: {message}")]
    Transport { request: String, message: String },

    #[error("{request} returned an unexpected payload: {message}")]
    Decode { request: String, message: String },
}

impl CatalogError {
    /// Errors after which no further catalog call can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatalogError::Unauthorized)
    }
}

// ============================================================================
// Service Contract
// ============================================================================

/// One page of a paged list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages
    pub total: usize,
}

/// Operations the reconciler needs from a streaming catalog.
///
/// Any call may fail with [`CatalogError::RateLimited`]; callers retry
/// through a [`RateLimitPolicy`].
pub trait CatalogService: Send + Sync {
    fn current_user_id(&self) -> Result<String, CatalogError>;

    fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<CatalogTrack>, CatalogError>;

    /// Entries the catalog cannot show are `None`; they still take a position.
    fn user_playlists(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Option<CatalogPlaylist>>, CatalogError>;

    fn playlist_tracks(
        &self,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page<PlaylistItem>, CatalogError>;

    fn create_playlist(&self, user_id: &str, name: &str) -> Result<CatalogPlaylist, CatalogError>;

    fn add_tracks(&self, playlist_id: &str, track_uris: &[String]) -> Result<(), CatalogError>;
}

// ============================================================================
// Rate Limiting
// ============================================================================

/// Retries rate-limited calls after the server's retry-after plus a margin.
/// Never gives up on a rate limit; every other outcome is returned as is.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub margin: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            margin: DEFAULT_RATE_LIMIT_MARGIN,
        }
    }
}

impl RateLimitPolicy {
    pub fn new(margin: Duration) -> Self {
        Self { margin }
    }

    pub fn call<T>(
        &self,
        request: &str,
        mut send: impl FnMut() -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        loop {
            match send() {
                Err(CatalogError::RateLimited { retry_after }) => {
                    let sleep = retry_after + self.margin;
                    log::warn!(
                        "{}: API rate limit exceeded. Going to sleep for {:.1}s",
                        request,
                        sleep.as_secs_f64()
                    );
                    std::thread::sleep(sleep);
                    log::debug!("{}: waking up and going on", request);
                }
                other => return other,
            }
        }
    }
}

// ============================================================================
// Test Double
// ============================================================================


#[cfg(test)]
mod tests {
    use super::testing::FakeCatalog;
    use super::*;

    #[test]
    fn test_rate_limited_call_is_retried() {
        let catalog = FakeCatalog::new().with_rate_limits(3);
        let policy = RateLimitPolicy::new(Duration::ZERO);
        let user = policy.call("current user", || catalog.current_user_id()).unwrap();
        assert_eq!(user, testing::USER_ID);
    }

    #[test]
    fn test_other_errors_are_returned() {
        let catalog = FakeCatalog::new().with_unauthorized();
        let policy = RateLimitPolicy::new(Duration::ZERO);
        let err = policy.call("current user", || catalog.current_user_id()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = CatalogError::Status {
            request: "search".to_string(),
            status: 502,
        };
        assert_eq!(err.to_string(), "search failed with HTTP status 502");
        let err = CatalogError::RateLimited {
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "API rate limit exceeded, retry after 3s");
    }
}
