//! Spotify Web API backend.
//!
//! The bearer token is injected and refreshed externally; this client only
//! spends it. Requests resolve a query to a track (share link, URI, bare
//! ID, or best-match search), insert it into the live queue, and read the
//! queue back to report a 1-based position.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::http::{HttpClient, HttpResponse};
use crate::music::{MusicBackend, MusicError, QueuedTrack, map_transport};
use tunebot_common::models::{MusicService, TrackInfo};

const DEFAULT_API_BASE: &str = "https://api.spotify.com";
const SEARCH_LIMIT: u8 = 5;

static TRACK_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"open\.spotify\.com/track/([a-zA-Z0-9]+)").unwrap());
static TRACK_URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"spotify:track:([a-zA-Z0-9]+)").unwrap());
static BARE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]{15,}$").unwrap());

pub struct SpotifyClient {
    http: Arc<dyn HttpClient>,
    token: RwLock<Option<String>>,
    api_base: String,
    /// Optional playlist the broadcaster mirrors requests into.
    playlist_url: Option<String>,
}

impl SpotifyClient {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            token: RwLock::new(None),
            api_base: DEFAULT_API_BASE.to_string(),
            playlist_url: None,
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_playlist(mut self, playlist_url: Option<String>) -> Self {
        self.playlist_url = playlist_url;
        self
    }

    /// Installs a fresh bearer token. Called by the external OAuth layer
    /// whenever it refreshes.
    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    async fn auth_headers(&self) -> Result<HashMap<String, String>, MusicError> {
        let guard = self.token.read().await;
        let token = guard.as_ref().ok_or(MusicError::AuthExpired)?;
        Ok(HashMap::from([(
            "Authorization".to_string(),
            format!("Bearer {token}"),
        )]))
    }

    async fn get(&self, path_and_query: String) -> Result<HttpResponse, MusicError> {
        let headers = self.auth_headers().await?;
        self.http
            .get(format!("{}{}", self.api_base, path_and_query), headers)
            .await
            .map_err(map_transport)
    }

    async fn search(&self, query: &str) -> Result<ApiTrack, MusicError> {
        let encoded = urlencoding::encode(query);
        let response = self
            .get(format!(
                "/v1/search?q={encoded}&type=track&limit={SEARCH_LIMIT}"
            ))
            .await?;
        if !response.is_success() {
            return Err(map_status(response.status, &response.body));
        }

        let parsed: SearchResponse =
            serde_json::from_str(&response.body).map_err(|e| MusicError::Backend(e.to_string()))?;
        let items = parsed.tracks.items;
        if items.is_empty() {
            return Err(MusicError::NotFound);
        }

        // Best match, not first match: popularity plus normalized
        // name/artist/combined containment, the way operators expect
        // "artist title" text to win over remixes.
        let query_norm = normalize(query);
        let best = items
            .into_iter()
            .map(|track| {
                let score = score_track(&track, &query_norm);
                (score, track)
            })
            .max_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, track)| track)
            .ok_or(MusicError::NotFound)?;
        debug!("search '{query}' matched '{}' by {}", best.name, best.artist_names());
        Ok(best)
    }

    async fn lookup(&self, track_id: &str) -> Result<ApiTrack, MusicError> {
        let response = self.get(format!("/v1/tracks/{track_id}")).await?;
        if response.status == 404 {
            return Err(MusicError::NotFound);
        }
        if !response.is_success() {
            return Err(map_status(response.status, &response.body));
        }
        serde_json::from_str(&response.body).map_err(|e| MusicError::Backend(e.to_string()))
    }

    async fn queue_track(&self, track_id: &str) -> Result<(), MusicError> {
        let headers = self.auth_headers().await?;
        let uri = format!("spotify:track:{track_id}");
        let encoded = urlencoding::encode(&uri);
        let response = self
            .http
            .post_empty(
                format!("{}/v1/me/player/queue?uri={encoded}", self.api_base),
                headers,
            )
            .await
            .map_err(map_transport)?;
        match response.status {
            200 | 202 | 204 => Ok(()),
            // Spotify reports "no active device" as a 404 on this endpoint.
            404 => Err(MusicError::NoDevice),
            status => Err(map_status(status, &response.body)),
        }
    }

    /// 1-based position of the track in the player queue, best effort.
    /// The queue endpoint needs a recent playback session; when it can't
    /// answer we return `None` rather than failing a queued request.
    async fn queue_position(&self, track_id: &str) -> Option<u32> {
        let response = match self.get("/v1/me/player/queue".to_string()).await {
            Ok(r) if r.is_success() => r,
            Ok(r) => {
                debug!("queue position unavailable (status {})", r.status);
                return None;
            }
            Err(e) => {
                debug!("queue position unavailable: {e}");
                return None;
            }
        };
        let parsed: QueueResponse = serde_json::from_str(&response.body).ok()?;
        parsed
            .queue
            .iter()
            .position(|t| t.id == track_id)
            .map(|idx| idx as u32 + 1)
    }

    async fn add_to_playlist(&self, track_id: &str) {
        let Some(playlist_url) = &self.playlist_url else {
            return;
        };
        let Some(playlist_id) = extract_playlist_id(playlist_url) else {
            warn!("could not extract playlist id from '{playlist_url}'");
            return;
        };
        let headers = match self.auth_headers().await {
            Ok(h) => h,
            Err(_) => return,
        };
        let body = serde_json::json!({ "uris": [format!("spotify:track:{track_id}")] });
        let result = self
            .http
            .post_json(
                format!("{}/v1/playlists/{playlist_id}/tracks", self.api_base),
                headers,
                body,
            )
            .await;
        match result {
            Ok(r) if r.is_success() => {}
            Ok(r) => warn!("playlist append failed with status {}", r.status),
            Err(e) => warn!("playlist append failed: {e}"),
        }
    }
}

#[async_trait]
impl MusicBackend for SpotifyClient {
    fn service(&self) -> MusicService {
        MusicService::Spotify
    }

    async fn request_track(&self, query: &str) -> Result<QueuedTrack, MusicError> {
        let track = match self.extract_track_id(query) {
            Some(id) => self.lookup(&id).await?,
            None => self.search(query).await?,
        };

        self.queue_track(&track.id).await?;
        // Playlist mirroring is fire-and-forget; the queue insertion is
        // what the requester asked for.
        self.add_to_playlist(&track.id).await;

        let position = self.queue_position(&track.id).await;
        info!(
            "queued '{}' by {} (position {:?})",
            track.name,
            track.artist_names(),
            position
        );
        Ok(QueuedTrack {
            track: track.into_track_info(),
            position,
        })
    }

    async fn now_playing(&self) -> Result<TrackInfo, MusicError> {
        let response = self
            .get("/v1/me/player/currently-playing".to_string())
            .await?;
        // 204 means nothing is playing.
        if response.status == 204 || response.body.is_empty() {
            return Err(MusicError::NotFound);
        }
        if !response.is_success() {
            return Err(map_status(response.status, &response.body));
        }
        let parsed: CurrentlyPlayingResponse =
            serde_json::from_str(&response.body).map_err(|e| MusicError::Backend(e.to_string()))?;
        match parsed.item {
            Some(track) => Ok(track.into_track_info()),
            None => Err(MusicError::NotFound),
        }
    }

    fn extract_track_id(&self, input: &str) -> Option<String> {
        let input = input.trim();
        if let Some(caps) = TRACK_URL_RE.captures(input) {
            return Some(caps[1].to_string());
        }
        if let Some(caps) = TRACK_URI_RE.captures(input) {
            return Some(caps[1].to_string());
        }
        if BARE_ID_RE.is_match(input) {
            return Some(input.to_string());
        }
        None
    }

    async fn track_info(&self, track_id: &str) -> Result<TrackInfo, MusicError> {
        Ok(self.lookup(track_id).await?.into_track_info())
    }
}

fn map_status(status: u16, body: &str) -> MusicError {
    match status {
        401 => MusicError::AuthExpired,
        403 => MusicError::PremiumRequired,
        429 => MusicError::RateLimited,
        _ => MusicError::Backend(format!("spotify returned status {status}: {body}")),
    }
}

/// Strips everything non-alphanumeric for fuzzy containment checks.
fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn score_track(track: &ApiTrack, query_norm: &str) -> f64 {
    let mut score = track.popularity.unwrap_or(0) as f64 * 0.5;

    let track_norm = normalize(&track.name);
    if *query_norm == track_norm {
        score += 100.0;
    } else if query_norm.contains(&track_norm) || track_norm.contains(query_norm) {
        score += 50.0;
    }

    for artist in &track.artists {
        let artist_norm = normalize(&artist.name);
        if query_norm.contains(&artist_norm) && !artist_norm.is_empty() {
            score += 50.0;
        }
        let combined_a = normalize(&format!("{}{}", artist.name, track.name));
        let combined_b = normalize(&format!("{}{}", track.name, artist.name));
        if *query_norm == combined_a || *query_norm == combined_b {
            score += 200.0;
        } else if query_norm.contains(&combined_a)
            || combined_a.contains(query_norm)
            || query_norm.contains(&combined_b)
            || combined_b.contains(query_norm)
        {
            score += 150.0;
        }
    }

    score
}

fn extract_playlist_id(playlist_url: &str) -> Option<String> {
    let clean = playlist_url.split('?').next().unwrap_or(playlist_url);
    clean
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
}

// ------------------------------------------------------------------
// Wire shapes (only the fields this client reads).
// ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    #[serde(default)]
    items: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    #[serde(default)]
    queue: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlayingResponse {
    item: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: String,
    name: String,
    #[serde(default)]
    popularity: Option<u32>,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    album: Option<ApiAlbum>,
    #[serde(default)]
    external_urls: ApiExternalUrls,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    name: String,
    #[serde(default)]
    images: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    url: String,
}

#[derive(Debug, Deserialize, Default)]
struct ApiExternalUrls {
    spotify: Option<String>,
}

impl ApiTrack {
    fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn into_track_info(self) -> TrackInfo {
        let artist = self.artist_names();
        let artwork_url = self
            .album
            .as_ref()
            .and_then(|a| a.images.first())
            .map(|i| i.url.clone());
        TrackInfo {
            name: self.name,
            artist,
            album: self.album.map(|a| a.name),
            url: self.external_urls.spotify,
            artwork_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ids_from_links_uris_and_bare_ids() {
        let http = Arc::new(crate::http::DefaultHttpClient::new());
        let client = SpotifyClient::new(http);
        assert_eq!(
            client.extract_track_id("https://open.spotify.com/track/4cOdK2wGLETKBW3PvgPWqT?si=x"),
            Some("4cOdK2wGLETKBW3PvgPWqT".to_string())
        );
        assert_eq!(
            client.extract_track_id("spotify:track:4cOdK2wGLETKBW3PvgPWqT"),
            Some("4cOdK2wGLETKBW3PvgPWqT".to_string())
        );
        assert_eq!(
            client.extract_track_id("4cOdK2wGLETKBW3PvgPWqT"),
            Some("4cOdK2wGLETKBW3PvgPWqT".to_string())
        );
        assert_eq!(client.extract_track_id("never gonna give you up"), None);
    }

    #[test]
    fn exact_title_and_artist_beats_popularity() {
        let exact = ApiTrack {
            id: "a".into(),
            name: "Resonance".into(),
            popularity: Some(40),
            artists: vec![ApiArtist {
                name: "Home".into(),
            }],
            album: None,
            external_urls: ApiExternalUrls::default(),
        };
        let popular = ApiTrack {
            id: "b".into(),
            name: "Resonance (Remix)".into(),
            popularity: Some(90),
            artists: vec![ApiArtist {
                name: "Someone Else".into(),
            }],
            album: None,
            external_urls: ApiExternalUrls::default(),
        };
        let query_norm = normalize("home resonance");
        assert!(score_track(&exact, &query_norm) > score_track(&popular, &query_norm));
    }

    #[test]
    fn playlist_id_from_share_url() {
        assert_eq!(
            extract_playlist_id("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc"),
            Some("37i9dQZF1DXcBWIGoYBM5M".to_string())
        );
        assert_eq!(extract_playlist_id(""), None);
    }
}
