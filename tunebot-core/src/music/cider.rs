//! Cider (Apple Music) backend.
//!
//! Cider exposes a local RPC surface on the streaming machine. Insertion
//! is "play next" semantics with no queue position, and different Cider
//! versions mount the endpoint at different paths, so insertion walks a
//! candidate list. Catalog search goes through Cider's Apple Music API
//! proxy with the public iTunes Search API as a fallback when the proxy
//! is unavailable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::http::{HttpClient, HttpResponse};
use crate::music::{MusicBackend, MusicError, QueuedTrack, map_transport};
use tunebot_common::models::{MusicService, TrackInfo};

pub const DEFAULT_CIDER_HOST: &str = "http://localhost:10767";
const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";
const STOREFRONT: &str = "us";

/// Play-next endpoint candidates, ordered by how current the path is.
const PLAY_NEXT_PATHS: &[&str] = &[
    "/api/v1/playback/play-next",
    "/play-next",
    "/api/v1/play-next",
    "/api/v1/playback/queue",
];

const NOW_PLAYING_PATHS: &[&str] = &["/api/v1/playback/now-playing", "/api/v1/playback/active"];

static ALBUM_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]i=(\d+)").unwrap());
static SONG_PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/song/[^/]+/(\d+)").unwrap());
static BARE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

pub struct CiderClient {
    http: Arc<dyn HttpClient>,
    host: String,
    token: Option<String>,
    itunes_base: String,
}

impl CiderClient {
    pub fn new(http: Arc<dyn HttpClient>, host: &str, token: Option<String>) -> Self {
        Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            token: token.map(|t| t.trim().to_string()),
            itunes_base: ITUNES_SEARCH_URL.to_string(),
        }
    }

    /// Host and token from `CIDER_HOST` / `CIDER_TOKEN` env vars, the way
    /// the control panel provisions them.
    pub fn from_env(http: Arc<dyn HttpClient>) -> Self {
        dotenv::dotenv().ok();
        let host =
            std::env::var("CIDER_HOST").unwrap_or_else(|_| DEFAULT_CIDER_HOST.to_string());
        let token = std::env::var("CIDER_TOKEN").ok();
        Self::new(http, &host, token)
    }

    pub fn with_itunes_base(mut self, base: &str) -> Self {
        self.itunes_base = base.trim_end_matches('/').to_string();
        self
    }

    /// Both header spellings are sent to cover all Cider versions.
    fn headers(&self) -> HashMap<String, String> {
        match &self.token {
            Some(token) => HashMap::from([
                ("apptoken".to_string(), token.clone()),
                ("apitoken".to_string(), token.clone()),
            ]),
            None => HashMap::new(),
        }
    }

    async fn get(&self, path_and_query: &str) -> Result<HttpResponse, MusicError> {
        self.http
            .get(format!("{}{path_and_query}", self.host), self.headers())
            .await
            .map_err(map_transport)
    }

    /// Search via the AMAPI proxy, falling back to iTunes when the proxy
    /// errors or Cider is not running.
    async fn search(&self, query: &str) -> Result<FoundTrack, MusicError> {
        let encoded = urlencoding::encode(query);
        let proxy = self
            .get(&format!(
                "/api/v1/amapi/catalog/{STOREFRONT}/search?types=songs&term={encoded}&limit=1"
            ))
            .await;

        match proxy {
            Ok(response) if response.is_success() => {
                let parsed: AmapiSearchResponse = serde_json::from_str(&response.body)
                    .map_err(|e| MusicError::Backend(e.to_string()))?;
                if let Some(song) = parsed
                    .results
                    .songs
                    .and_then(|s| s.data.into_iter().next())
                {
                    return Ok(FoundTrack {
                        id: song.id,
                        track: song.attributes.into_track_info(),
                    });
                }
                debug!("amapi search empty for '{query}', trying itunes");
            }
            Ok(response) => {
                warn!("cider search failed with status {}", response.status);
            }
            Err(e) => {
                warn!("cider search unreachable: {e}");
            }
        }

        self.search_itunes(query).await
    }

    async fn search_itunes(&self, query: &str) -> Result<FoundTrack, MusicError> {
        let encoded = urlencoding::encode(query);
        info!("searching itunes for '{query}'");
        let response = self
            .http
            .get(
                format!(
                    "{}?term={encoded}&media=music&entity=song&limit=1",
                    self.itunes_base
                ),
                HashMap::new(),
            )
            .await
            .map_err(map_transport)?;
        if !response.is_success() {
            return Err(MusicError::Backend(format!(
                "itunes search returned status {}",
                response.status
            )));
        }
        let parsed: ItunesSearchResponse =
            serde_json::from_str(&response.body).map_err(|e| MusicError::Backend(e.to_string()))?;
        let track = parsed
            .results
            .into_iter()
            .next()
            .ok_or(MusicError::NotFound)?;
        Ok(FoundTrack {
            id: track.track_id.to_string(),
            track: TrackInfo {
                name: track.track_name.unwrap_or_else(|| "Unknown".to_string()),
                artist: track.artist_name.unwrap_or_else(|| "Unknown".to_string()),
                album: track.collection_name,
                url: track.track_view_url,
                artwork_url: track.artwork_url_100,
            },
        })
    }

    async fn play_next(&self, track_id: &str) -> Result<(), MusicError> {
        let payload = serde_json::json!({ "id": track_id, "type": "songs" });
        let mut last_status = None;

        for path in PLAY_NEXT_PATHS {
            let result = self
                .http
                .post_json(
                    format!("{}{path}", self.host),
                    self.headers(),
                    payload.clone(),
                )
                .await;
            match result {
                Ok(response) if matches!(response.status, 200 | 204) => {
                    debug!("cider accepted play-next via {path}");
                    return Ok(());
                }
                Ok(response) => {
                    if response.status != 404 {
                        warn!("cider endpoint {path} returned {}", response.status);
                    }
                    last_status = Some(response.status);
                }
                Err(e) => return Err(map_transport(e)),
            }
        }

        match last_status {
            Some(401) => Err(MusicError::AuthExpired),
            _ => Err(MusicError::Backend(
                "all cider play-next endpoints failed".to_string(),
            )),
        }
    }
}

#[async_trait]
impl MusicBackend for CiderClient {
    fn service(&self) -> MusicService {
        MusicService::Cider
    }

    async fn request_track(&self, query: &str) -> Result<QueuedTrack, MusicError> {
        let found = match self.extract_track_id(query) {
            Some(id) => {
                let track = self.track_info(&id).await?;
                FoundTrack { id, track }
            }
            None => self.search(query).await?,
        };

        self.play_next(&found.id).await?;
        info!("queued '{}' by {} on cider", found.track.name, found.track.artist);

        // Play-next insertion has no queue position to report.
        Ok(QueuedTrack {
            track: found.track,
            position: None,
        })
    }

    async fn now_playing(&self) -> Result<TrackInfo, MusicError> {
        let mut last_err = MusicError::NotFound;
        for path in NOW_PLAYING_PATHS {
            match self.get(path).await {
                Ok(response) if response.is_success() => {
                    let parsed: NowPlayingResponse = serde_json::from_str(&response.body)
                        .map_err(|e| MusicError::Backend(e.to_string()))?;
                    let info = parsed.info.unwrap_or(parsed.flat);
                    if let Some(name) = info.name {
                        return Ok(TrackInfo {
                            name,
                            artist: info.artist_name.unwrap_or_else(|| "Unknown".to_string()),
                            album: info.album_name,
                            url: info.url,
                            artwork_url: info.artwork.map(|a| a.sized_url()),
                        });
                    }
                    last_err = MusicError::NotFound;
                }
                Ok(response) => {
                    last_err = MusicError::Backend(format!(
                        "cider returned status {}",
                        response.status
                    ));
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn extract_track_id(&self, input: &str) -> Option<String> {
        let input = input.trim();
        // Apple links only; anything else is free text or another
        // service's link.
        if input.contains("music.apple.com") {
            if let Some(caps) = ALBUM_PARAM_RE.captures(input) {
                return Some(caps[1].to_string());
            }
            if let Some(caps) = SONG_PATH_RE.captures(input) {
                return Some(caps[1].to_string());
            }
        }
        if BARE_ID_RE.is_match(input) {
            return Some(input.to_string());
        }
        None
    }

    async fn track_info(&self, track_id: &str) -> Result<TrackInfo, MusicError> {
        let response = self
            .get(&format!(
                "/api/v1/amapi/catalog/{STOREFRONT}/songs/{track_id}"
            ))
            .await?;
        if !response.is_success() {
            return Err(MusicError::Backend(format!(
                "cider track lookup returned status {}",
                response.status
            )));
        }
        let parsed: AmapiSongsResponse =
            serde_json::from_str(&response.body).map_err(|e| MusicError::Backend(e.to_string()))?;
        let song = parsed.data.into_iter().next().ok_or(MusicError::NotFound)?;
        Ok(song.attributes.into_track_info())
    }
}

struct FoundTrack {
    id: String,
    track: TrackInfo,
}

// ------------------------------------------------------------------
// Wire shapes.
// ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AmapiSearchResponse {
    #[serde(default)]
    results: AmapiSearchResults,
}

#[derive(Debug, Deserialize, Default)]
struct AmapiSearchResults {
    songs: Option<AmapiSongList>,
}

#[derive(Debug, Deserialize)]
struct AmapiSongList {
    #[serde(default)]
    data: Vec<AmapiSong>,
}

#[derive(Debug, Deserialize)]
struct AmapiSongsResponse {
    #[serde(default)]
    data: Vec<AmapiSong>,
}

#[derive(Debug, Deserialize)]
struct AmapiSong {
    id: String,
    attributes: AmapiAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmapiAttributes {
    name: Option<String>,
    artist_name: Option<String>,
    album_name: Option<String>,
    url: Option<String>,
    artwork: Option<AmapiArtwork>,
}

#[derive(Debug, Deserialize)]
struct AmapiArtwork {
    #[serde(default)]
    url: String,
}

impl AmapiArtwork {
    /// The catalog hands back a templated URL with `{w}`/`{h}` slots.
    fn sized_url(&self) -> String {
        self.url.replace("{w}", "300").replace("{h}", "300")
    }
}

impl AmapiAttributes {
    fn into_track_info(self) -> TrackInfo {
        TrackInfo {
            name: self.name.unwrap_or_else(|| "Unknown".to_string()),
            artist: self.artist_name.unwrap_or_else(|| "Unknown".to_string()),
            album: self.album_name,
            url: self.url,
            artwork_url: self.artwork.map(|a| a.sized_url()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItunesSearchResponse {
    #[serde(default)]
    results: Vec<ItunesTrack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItunesTrack {
    track_id: u64,
    track_name: Option<String>,
    artist_name: Option<String>,
    collection_name: Option<String>,
    track_view_url: Option<String>,
    artwork_url_100: Option<String>,
}

/// Cider returns the now-playing payload either wrapped in an `info`
/// object or flat, depending on version.
#[derive(Debug, Deserialize)]
struct NowPlayingResponse {
    info: Option<NowPlayingInfo>,
    #[serde(flatten)]
    flat: NowPlayingInfo,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct NowPlayingInfo {
    name: Option<String>,
    artist_name: Option<String>,
    album_name: Option<String>,
    url: Option<String>,
    artwork: Option<AmapiArtwork>,
}
