//! Spotify Web API client backed by `ureq`.
//!
//! Authentication is out of scope: the client is handed a bearer access token.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{CatalogError, CatalogService, Page};
use crate::models::{CatalogPlaylist, CatalogTrack, PlaylistItem};

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

/// Used when a 429 response carries no usable Retry-After header
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub struct SpotifyCatalog {
    http_client: ureq::Agent,
    api_base: String,
    access_token: String,
}

impl SpotifyCatalog {
    pub fn new(access_token: impl Into<String>) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(15))
            .build();
        Self {
            http_client,
            api_base: SPOTIFY_API_BASE.to_string(),
            access_token: access_token.into(),
        }
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut url = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        for (index, (key, value)) in params.iter().enumerate() {
            url.push(if index == 0 { '?' } else { '&' });
            url.push_str(key);
            url.push('=');
            url.push_str(urlencoding::encode(value).as_ref());
        }
        url
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn get_json<T: DeserializeOwned>(&self, request: &str, url: &str) -> Result<T, CatalogError> {
        let response = self
            .http_client
            .get(url)
            .set("Authorization", &self.bearer())
            .set("Accept", "application/json")
            .call()
            .map_err(|err| classify_failure(request, err))?;
        response.into_json().map_err(|err| CatalogError::Decode {
            request: request.to_string(),
            message: err.to_string(),
        })
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        request: &str,
        url: &str,
        body: serde_json::Value,
    ) -> Result<T, CatalogError> {
        let response = self
            .http_client
            .post(url)
            .set("Authorization", &self.bearer())
            .send_json(body)
            .map_err(|err| classify_failure(request, err))?;
        response.into_json().map_err(|err| CatalogError::Decode {
            request: request.to_string(),
            message: err.to_string(),
        })
    }
}

/// Map a `ureq` failure onto the catalog error kinds callers act on.
fn classify_failure(request: &str, err: ureq::Error) -> CatalogError {
    match err {
        ureq::Error::Status(429, response) => {
            let secs = response
                .header("Retry-After")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            CatalogError::RateLimited {
                retry_after: Duration::from_secs(secs),
            }
        }
        ureq::Error::Status(401, _) => CatalogError::Unauthorized,
        ureq::Error::Status(status, _) => CatalogError::Status {
            request: request.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => CatalogError::Transport {
            request: request.to_string(),
            message: transport.to_string(),
        },
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PagingPayload<T> {
    #[serde(default = "Vec::new")]
    items: Vec<Option<T>>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    tracks: PagingPayload<TrackPayload>,
}

#[derive(Debug, Deserialize)]
struct ArtistPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TrackPayload {
    uri: String,
    name: String,
    // episodes in playlists carry no artists
    #[serde(default)]
    artists: Vec<ArtistPayload>,
    #[serde(default)]
    popularity: u32,
}

impl From<TrackPayload> for CatalogTrack {
    fn from(track: TrackPayload) -> Self {
        CatalogTrack {
            uri: track.uri,
            name: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            popularity: track.popularity,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistPayload {
    id: String,
    name: String,
}

impl From<PlaylistPayload> for CatalogPlaylist {
    fn from(playlist: PlaylistPayload) -> Self {
        CatalogPlaylist {
            name: playlist.name,
            id: playlist.id,
        }
    }
}

// null entries keep their slot so paging offsets stay aligned
fn playlists_page(payload: PagingPayload<PlaylistPayload>) -> Page<Option<CatalogPlaylist>> {
    Page {
        items: payload
            .items
            .into_iter()
            .map(|playlist| playlist.map(CatalogPlaylist::from))
            .collect(),
        total: payload.total,
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistTrackPayload {
    track: Option<TrackPayload>,
}

// ============================================================================
// CatalogService
// ============================================================================

impl CatalogService for SpotifyCatalog {
    fn current_user_id(&self) -> Result<String, CatalogError> {
        let user: UserPayload = self.get_json("current user", &self.url("me", &[]))?;
        Ok(user.id)
    }

    fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<CatalogTrack>, CatalogError> {
        let url = self.url(
            "search",
            &[
                ("q", query.to_string()),
                ("type", "track".to_string()),
                ("limit", limit.to_string()),
            ],
        );
        let payload: SearchPayload = self.get_json("search tracks", &url)?;
        Ok(payload.tracks.items.into_iter().flatten().map(CatalogTrack::from).collect())
    }

    fn user_playlists(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Option<CatalogPlaylist>>, CatalogError> {
        let url = self.url(
            "me/playlists",
            &[("offset", offset.to_string()), ("limit", limit.to_string())],
        );
        let payload: PagingPayload<PlaylistPayload> = self.get_json("user playlists", &url)?;
        Ok(playlists_page(payload))
    }

    fn playlist_tracks(
        &self,
        playlist_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page<PlaylistItem>, CatalogError> {
        let url = self.url(
            &format!("playlists/{}/tracks", urlencoding::encode(playlist_id)),
            &[("offset", offset.to_string()), ("limit", limit.to_string())],
        );
        let payload: PagingPayload<PlaylistTrackPayload> = self.get_json("playlist tracks", &url)?;
        Ok(Page {
            items: payload
                .items
                .into_iter()
                .map(|item| PlaylistItem {
                    track: item.and_then(|i| i.track).map(CatalogTrack::from),
                })
                .collect(),
            total: payload.total,
        })
    }

    fn create_playlist(&self, user_id: &str, name: &str) -> Result<CatalogPlaylist, CatalogError> {
        let url = self.url(&format!("users/{}/playlists", urlencoding::encode(user_id)), &[]);
        let playlist: PlaylistPayload = self.post_json(
            "create playlist",
            &url,
            serde_json::json!({ "name": name, "public": false }),
        )?;
        Ok(playlist.into())
    }

    fn add_tracks(&self, playlist_id: &str, track_uris: &[String]) -> Result<(), CatalogError> {
        let url = self.url(&format!("playlists/{}/tracks", urlencoding::encode(playlist_id)), &[]);
        // response is a snapshot id we have no use for
        let _: serde_json::Value =
            self.post_json("add tracks", &url, serde_json::json!({ "uris": track_uris }))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_is_encoded() {
        let catalog = SpotifyCatalog::new("token");
        let url = catalog.url(
            "search",
            &[("q", "artist:abba track:waterloo".to_string()), ("type", "track".to_string())],
        );
        assert_eq!(
            url,
            "https://api.spotify.com/v1/search?q=artist%3Aabba%20track%3Awaterloo&type=track"
        );
    }

    #[test]
    fn test_search_payload() {
        let json = r#"{"tracks": {"total": 2, "items": [
            {"uri": "spotify:track:1", "name": "Waterloo", "popularity": 71,
             "artists": [{"name": "ABBA"}]},
            null
        ]}}"#;
        let payload: SearchPayload = serde_json::from_str(json).unwrap();
        let tracks: Vec<CatalogTrack> = payload
            .tracks
            .items
            .into_iter()
            .flatten()
            .map(CatalogTrack::from)
            .collect();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].artists, vec!["ABBA".to_string()]);
        assert_eq!(tracks[0].popularity, 71);
    }

    #[test]
    fn test_null_playlists_keep_their_position() {
        let json = r#"{"total": 3, "items": [
            null,
            {"id": "p1", "name": "2018 charted songs"},
            null
        ]}"#;
        let payload: PagingPayload<PlaylistPayload> = serde_json::from_str(json).unwrap();
        let page = playlists_page(payload);
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 3);
        assert!(page.items[0].is_none());
        assert_eq!(page.items[1].as_ref().map(|p| p.id.as_str()), Some("p1"));
    }

    #[test]
    fn test_playlist_item_without_track() {
        let json = r#"{"total": 2, "items": [
            {"track": null},
            {"track": {"uri": "spotify:episode:9", "name": "Talk"}}
        ]}"#;
        let payload: PagingPayload<PlaylistTrackPayload> = serde_json::from_str(json).unwrap();
        let items: Vec<Option<CatalogTrack>> = payload
            .items
            .into_iter()
            .map(|item| item.and_then(|i| i.track).map(CatalogTrack::from))
            .collect();
        assert!(items[0].is_none());
        let episode = items[1].as_ref().unwrap();
        assert!(episode.artists.is_empty());
        assert_eq!(episode.popularity, 0);
    }
}
