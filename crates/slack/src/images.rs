use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;

pub const GIPHY_API_BASE: &str = "https://api.giphy.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ImageSearchError {
    #[error("image search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("image search returned HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait ImageSearch: Send + Sync {
    /// URL of the best match, or `None` when nothing matched.
    async fn search(&self, query: &str) -> Result<Option<String>, ImageSearchError>;
}

pub struct GiphyClient {
    http: reqwest::Client,
    api_key: SecretString,
    rating: String,
    base_url: String,
}

impl GiphyClient {
    pub fn new(
        api_key: SecretString,
        rating: impl Into<String>,
    ) -> Result<Self, ImageSearchError> {
        Self::with_request_timeout(api_key, rating, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Every lookup, connect through body, is bounded by `timeout`.
    pub fn with_request_timeout(
        api_key: SecretString,
        rating: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ImageSearchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, api_key, rating: rating.into(), base_url: GIPHY_API_BASE.to_owned() })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ImageSearch for GiphyClient {
    async fn search(&self, query: &str) -> Result<Option<String>, ImageSearchError> {
        let response = self
            .http
            .get(format!("{}/v1/gifs/translate", self.base_url.trim_end_matches('/')))
            .query(&[
                ("api_key", self.api_key.expose_secret()),
                ("s", query),
                ("rating", self.rating.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageSearchError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        Ok(extract_image_url(&body))
    }
}

/// Giphy answers a miss with `"data": []` rather than an error.
fn extract_image_url(body: &Value) -> Option<String> {
    let data = body.get("data")?.as_object()?;
    data.get("images")
        .and_then(|images| images.get("original"))
        .and_then(|original| original.get("url"))
        .or_else(|| data.get("url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_owned)
}
