use serde::{Deserialize, Serialize};

use crate::models::music::MusicService;

/// Operator-facing settings, loaded from `settings.json` by the store
/// layer. This core only reads them; the GUI owns edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Backend that answers `!song` and untargeted requests.
    pub active_music_service: MusicService,
    pub requests_enabled: bool,
    pub disable_requests_offline: bool,
    /// Optional playlist that Spotify requests are also appended to.
    pub spotify_playlist_url: Option<String>,
    /// Deadline for one backend call, in seconds.
    pub backend_timeout_secs: u64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            active_music_service: MusicService::Spotify,
            requests_enabled: true,
            disable_requests_offline: false,
            spotify_playlist_url: None,
            backend_timeout_secs: 10,
        }
    }
}
