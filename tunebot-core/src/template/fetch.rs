//! Bounded remote text retrieval for `$(urlfetch ...)`.
//!
//! The URL comes out of an operator-authored template but the result lands
//! in chat, so everything degrades to an empty string: bad scheme, bad
//! status, non-text content, timeout, oversized body. The caller never
//! sees an error, only the (possibly empty, possibly truncated) text.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::http::HttpClient;

/// Hard cap on the text inserted into a chat message.
pub const MAX_FETCH_CHARS: usize = 400;

pub struct BoundedFetcher {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl BoundedFetcher {
    pub fn new(http: Arc<dyn HttpClient>, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Fetches `url` and returns at most [`MAX_FETCH_CHARS`] characters of
    /// its body, or an empty string on any failure.
    pub async fn fetch(&self, url: &str) -> String {
        let url = url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            warn!("urlfetch: refusing non-http(s) url '{url}'");
            return String::new();
        }

        let request = self.http.get(url.to_string(), HashMap::new());
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                warn!("urlfetch: request to '{url}' failed: {e}");
                return String::new();
            }
            Err(_) => {
                warn!("urlfetch: request to '{url}' timed out");
                return String::new();
            }
        };

        if !response.is_success() {
            warn!("urlfetch: '{url}' returned status {}", response.status);
            return String::new();
        }
        if let Some(ct) = &response.content_type {
            if !is_texty(ct) {
                warn!("urlfetch: '{url}' returned non-text content type '{ct}'");
                return String::new();
            }
        }

        truncate_chars(&response.body, MAX_FETCH_CHARS)
    }
}

fn is_texty(content_type: &str) -> bool {
    let ct = content_type.to_lowercase();
    ct.starts_with("text/") || ct.starts_with("application/json")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
