//! HTTP client abstraction for the fetcher and the music backends.
//!
//! Everything that leaves the process over HTTP goes through this trait so
//! tests can substitute a mock and exercise the callers without real
//! network requests. The default implementation wraps reqwest with a
//! bounded redirect policy and a connect timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::Error;

/// What callers need back from a request: enough to branch on status and
/// content type without re-exposing the whole reqwest response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(
        &self,
        url: String,
        headers: HashMap<String, String>,
    ) -> Result<HttpResponse, Error>;

    async fn post_json(
        &self,
        url: String,
        headers: HashMap<String, String>,
        body: serde_json::Value,
    ) -> Result<HttpResponse, Error>;

    /// POST with no body, for endpoints like Spotify's queue insertion
    /// that take everything in the query string.
    async fn post_empty(
        &self,
        url: String,
        headers: HashMap<String, String>,
    ) -> Result<HttpResponse, Error>;
}

/// Redirect hop limit for every outbound request.
const MAX_REDIRECTS: usize = 3;

#[derive(Clone)]
pub struct DefaultHttpClient {
    client: reqwest::Client,
}

impl DefaultHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for DefaultHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn into_response(response: reqwest::Response) -> Result<HttpResponse, Error> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let body = response.text().await?;
    Ok(HttpResponse {
        status,
        content_type,
        body,
    })
}

#[async_trait]
impl HttpClient for DefaultHttpClient {
    async fn get(
        &self,
        url: String,
        headers: HashMap<String, String>,
    ) -> Result<HttpResponse, Error> {
        let mut request = self.client.get(&url);
        for (key, value) in headers {
            request = request.header(&key, value);
        }
        into_response(request.send().await?).await
    }

    async fn post_json(
        &self,
        url: String,
        headers: HashMap<String, String>,
        body: serde_json::Value,
    ) -> Result<HttpResponse, Error> {
        let mut request = self.client.post(&url).json(&body);
        for (key, value) in headers {
            request = request.header(&key, value);
        }
        into_response(request.send().await?).await
    }

    async fn post_empty(
        &self,
        url: String,
        headers: HashMap<String, String>,
    ) -> Result<HttpResponse, Error> {
        let mut request = self.client.post(&url);
        for (key, value) in headers {
            request = request.header(&key, value);
        }
        into_response(request.send().await?).await
    }
}
