use serde::{Deserialize, Serialize};

/// Which music backend handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MusicService {
    #[default]
    Spotify,
    Cider,
}

impl MusicService {
    pub fn as_str(&self) -> &'static str {
        match self {
            MusicService::Spotify => "Spotify",
            MusicService::Cider => "Cider",
        }
    }
}

impl std::fmt::Display for MusicService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MusicService {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spotify" => Ok(MusicService::Spotify),
            "cider" | "apple" | "applemusic" => Ok(MusicService::Cider),
            other => Err(crate::Error::Parse(format!("unknown music service '{other}'"))),
        }
    }
}

/// Closed set of normalized backend error codes. Both backends map their
/// native error vocabulary into this set so one response template can
/// cover either service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MusicErrorCode {
    NotFound,
    NoDevice,
    AuthExpired,
    PremiumRequired,
    RateLimited,
    BackendUnavailable,
    BackendError,
    Timeout,
}

impl MusicErrorCode {
    /// Stable wire/template form, surfaced through `{error_code}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MusicErrorCode::NotFound => "NOT_FOUND",
            MusicErrorCode::NoDevice => "NO_DEVICE",
            MusicErrorCode::AuthExpired => "AUTH_EXPIRED",
            MusicErrorCode::PremiumRequired => "PREMIUM_REQUIRED",
            MusicErrorCode::RateLimited => "RATE_LIMITED",
            MusicErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            MusicErrorCode::BackendError => "BACKEND_ERROR",
            MusicErrorCode::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for MusicErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Track metadata, normalized across Spotify and Apple Music shapes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrackInfo {
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

/// Terminal outcome of one music request. Built once, used to populate
/// the resolution context, then dropped.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Inserted into the live queue. `position` is 1-based and only
    /// present when the backend can report it (Spotify); Cider's play-next
    /// insertion gives no position.
    Queued {
        track: TrackInfo,
        position: Option<u32>,
    },
    /// Now-playing query result.
    Playing { track: TrackInfo },
    Failed {
        code: MusicErrorCode,
        message: String,
    },
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RequestOutcome::Failed { .. })
    }
}
