//! URL shortening
//!
//! Short links are cosmetic: callers treat every [`Error::Shorten`] as
//! non-fatal and keep the canonical URLs.

use crate::config::ShortenerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Shortens URLs in bulk
#[async_trait]
pub trait UrlShortener: Send + Sync {
    /// Shorten `urls`; the result is aligned positionally with the input
    async fn shorten(&self, urls: &[String]) -> Result<Vec<String>>;
}

#[derive(Deserialize)]
struct ShortenResponse {
    #[serde(default)]
    data: Vec<ShortenedUrl>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ShortenedUrl {
    short_url: String,
}

/// Bulk shortening API taking `url[i]` form fields
///
/// The answer is `{"data": [{"short_url": ...}, ...]}` in request order.
pub struct HttpShortener {
    api_url: String,
    api_key: String,
    user_id: Option<String>,
    client: reqwest::Client,
}

impl HttpShortener {
    /// Create from the shortener config
    pub fn new(config: &ShortenerConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            user_id: config.user_id.clone(),
            client,
        })
    }
}

#[async_trait]
impl UrlShortener for HttpShortener {
    async fn shorten(&self, urls: &[String]) -> Result<Vec<String>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut form: Vec<(String, String)> = vec![("_api_key".to_string(), self.api_key.clone())];
        if let Some(user_id) = &self.user_id {
            form.push(("_user_id".to_string(), user_id.clone()));
        }
        for (i, url) in urls.iter().enumerate() {
            form.push((format!("url[{}]", i), url.clone()));
        }

        debug!(count = urls.len(), "Shortening URLs");
        let response = self
            .client
            .post(&self.api_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Shorten(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Shorten(format!("HTTP {}", status.as_u16())));
        }

        let body: ShortenResponse = response
            .json()
            .await
            .map_err(|e| Error::Shorten(format!("unreadable response: {}", e)))?;

        if !body.errors.is_empty() {
            return Err(Error::Shorten(serde_json::Value::from(body.errors).to_string()));
        }
        if body.data.len() != urls.len() {
            return Err(Error::Shorten(format!(
                "asked for {} short URLs, got {}",
                urls.len(),
                body.data.len()
            )));
        }

        Ok(body.data.into_iter().map(|d| d.short_url).collect())
    }
}

/// Shorten `urls`, falling back to the originals on any failure
///
/// Returns the shortened URLs aligned with `urls`, or `None` when the
/// shortener is absent or failed (the failure is logged).
pub async fn shorten_or_keep(
    shortener: Option<&dyn UrlShortener>,
    urls: &[String],
) -> Option<Vec<String>> {
    let shortener = shortener?;
    match shortener.shorten(urls).await {
        Ok(short) => Some(short),
        Err(e) => {
            tracing::warn!(error = %e, count = urls.len(), "URL shortening failed, keeping canonical URLs");
            None
        }
    }
}
