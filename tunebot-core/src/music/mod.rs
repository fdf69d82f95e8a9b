//! Song-request coordination across the two music backends.
//!
//! The coordinator is the only thing above the backends that knows there
//! are two of them. It dispatches by command, runs every backend call
//! under a deadline, resolves cross-service links (an Apple Music link
//! requested on Spotify, or the reverse), and normalizes each backend's
//! error vocabulary into one closed code set that response templates can
//! rely on.

pub mod cider;
pub mod spotify;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use tunebot_common::models::{
    BotSettings, Chatter, MusicErrorCode, MusicService, RequestOutcome, TrackInfo,
};

pub use cider::CiderClient;
pub use spotify::SpotifyClient;

/// Backend-facing error. Every failure a backend can produce maps onto
/// the closed [`MusicErrorCode`] set via [`MusicError::code`].
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("no matching track was found")]
    NotFound,

    #[error("no active playback device")]
    NoDevice,

    #[error("authorization expired, the backend refused our token")]
    AuthExpired,

    #[error("a premium account is required for queueing")]
    PremiumRequired,

    #[error("rate limited by the backend")]
    RateLimited,

    #[error("backend unreachable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("backend call timed out")]
    Timeout,
}

impl MusicError {
    pub fn code(&self) -> MusicErrorCode {
        match self {
            MusicError::NotFound => MusicErrorCode::NotFound,
            MusicError::NoDevice => MusicErrorCode::NoDevice,
            MusicError::AuthExpired => MusicErrorCode::AuthExpired,
            MusicError::PremiumRequired => MusicErrorCode::PremiumRequired,
            MusicError::RateLimited => MusicErrorCode::RateLimited,
            MusicError::Unavailable(_) => MusicErrorCode::BackendUnavailable,
            MusicError::Backend(_) => MusicErrorCode::BackendError,
            MusicError::Timeout => MusicErrorCode::Timeout,
        }
    }
}

/// Maps transport-level failures from the HTTP layer onto music errors.
fn map_transport(err: crate::Error) -> MusicError {
    match err {
        crate::Error::Http(e) if e.is_connect() => MusicError::Unavailable(e.to_string()),
        crate::Error::Http(e) if e.is_timeout() => MusicError::Timeout,
        other => MusicError::Backend(other.to_string()),
    }
}

/// A track successfully inserted into a backend's queue. `position` is
/// 1-based and only present when the backend reports one.
#[derive(Debug, Clone)]
pub struct QueuedTrack {
    pub track: TrackInfo,
    pub position: Option<u32>,
}

#[async_trait]
pub trait MusicBackend: Send + Sync {
    fn service(&self) -> MusicService;

    /// Resolves `query` (free text, share link, or bare ID) to a track
    /// and inserts it into this backend's queue.
    async fn request_track(&self, query: &str) -> Result<QueuedTrack, MusicError>;

    async fn now_playing(&self) -> Result<TrackInfo, MusicError>;

    /// Extracts this backend's track ID from a share link or URI, if the
    /// input is one. Used for cross-service link resolution.
    fn extract_track_id(&self, input: &str) -> Option<String>;

    /// Metadata lookup by backend-native track ID.
    async fn track_info(&self, track_id: &str) -> Result<TrackInfo, MusicError>;
}

pub struct MusicRequestCoordinator {
    spotify: Arc<dyn MusicBackend>,
    cider: Arc<dyn MusicBackend>,
    settings: Arc<RwLock<BotSettings>>,
}

impl MusicRequestCoordinator {
    pub fn new(
        spotify: Arc<dyn MusicBackend>,
        cider: Arc<dyn MusicBackend>,
        settings: Arc<RwLock<BotSettings>>,
    ) -> Self {
        Self {
            spotify,
            cider,
            settings,
        }
    }

    pub async fn active_service(&self) -> MusicService {
        self.settings.read().await.active_music_service
    }

    fn backend(&self, service: MusicService) -> &Arc<dyn MusicBackend> {
        match service {
            MusicService::Spotify => &self.spotify,
            MusicService::Cider => &self.cider,
        }
    }

    fn other_backend(&self, service: MusicService) -> &Arc<dyn MusicBackend> {
        match service {
            MusicService::Spotify => &self.cider,
            MusicService::Cider => &self.spotify,
        }
    }

    /// Handles one song request against `service`. Always returns a
    /// terminal outcome; identical requests queue independently, the
    /// coordinator never deduplicates.
    pub async fn request(
        &self,
        service: MusicService,
        chatter: &Chatter,
        query: &str,
    ) -> RequestOutcome {
        info!("music request on {service}: '{query}' from {}", chatter.name);

        let deadline = self.deadline().await;
        let search_query = match self.resolve_cross_link(service, query, deadline).await {
            Ok(q) => q,
            Err(e) => return failed(e),
        };

        let backend = self.backend(service);
        match tokio::time::timeout(deadline, backend.request_track(&search_query)).await {
            Ok(Ok(queued)) => RequestOutcome::Queued {
                track: queued.track,
                position: queued.position,
            },
            Ok(Err(e)) => failed(e),
            Err(_) => {
                warn!("{service} request timed out after {deadline:?}");
                failed(MusicError::Timeout)
            }
        }
    }

    /// Answers a now-playing query against the configured active service.
    pub async fn now_playing(&self) -> RequestOutcome {
        let service = self.active_service().await;
        let deadline = self.deadline().await;
        let backend = self.backend(service);
        match tokio::time::timeout(deadline, backend.now_playing()).await {
            Ok(Ok(track)) => RequestOutcome::Playing { track },
            Ok(Err(e)) => failed(e),
            Err(_) => {
                warn!("{service} now-playing timed out after {deadline:?}");
                failed(MusicError::Timeout)
            }
        }
    }

    async fn deadline(&self) -> Duration {
        Duration::from_secs(self.settings.read().await.backend_timeout_secs)
    }

    /// A share link for the *other* service is resolved to "artist title"
    /// text through that service's metadata lookup, so the target backend
    /// can search for it natively.
    async fn resolve_cross_link(
        &self,
        target: MusicService,
        query: &str,
        deadline: Duration,
    ) -> Result<String, MusicError> {
        let other = self.other_backend(target);
        let Some(track_id) = other.extract_track_id(query) else {
            return Ok(query.to_string());
        };

        info!("resolving {} link for a {target} request", other.service());
        let info = tokio::time::timeout(deadline, other.track_info(&track_id))
            .await
            .map_err(|_| MusicError::Timeout)??;

        // Cider metadata sometimes pads the artist with the storefront name.
        let artist = info.artist.replace("Apple Music", "");
        Ok(format!("{} {}", artist.trim(), info.name).trim().to_string())
    }
}

fn failed(err: MusicError) -> RequestOutcome {
    warn!("music request failed: {err}");
    RequestOutcome::Failed {
        code: err.code(),
        message: err.to_string(),
    }
}

/// Builds the `{name}` bindings for one outcome. Exactly one of the
/// success or failure variable sets is populated; optional fields that the
/// backend could not supply (`position` on Cider) are simply absent, which
/// the resolver renders as empty.
pub fn context_fields(
    outcome: &RequestOutcome,
    chatter: &Chatter,
    query: &str,
) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("user".to_string(), chatter.name.clone());
    match outcome {
        RequestOutcome::Queued { track, position } => {
            insert_track(&mut fields, track);
            fields.insert("query".to_string(), query.to_string());
            if let Some(pos) = position {
                fields.insert("position".to_string(), pos.to_string());
            }
        }
        RequestOutcome::Playing { track } => {
            insert_track(&mut fields, track);
            fields.insert("query".to_string(), query.to_string());
        }
        RequestOutcome::Failed { code, message } => {
            fields.insert("error_code".to_string(), code.to_string());
            fields.insert("error_message".to_string(), message.clone());
            fields.insert("query".to_string(), query.to_string());
        }
    }
    fields
}

fn insert_track(fields: &mut HashMap<String, String>, track: &TrackInfo) {
    fields.insert("track_name".to_string(), track.name.clone());
    fields.insert("artist".to_string(), track.artist.clone());
    if let Some(album) = &track.album {
        fields.insert("album".to_string(), album.clone());
    }
    if let Some(url) = &track.url {
        fields.insert("url".to_string(), url.clone());
    }
}
