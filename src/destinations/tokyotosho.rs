//! Tokyo Toshokan submission API

use super::{Destination, UploadOutcome, UploadRequest, description, http_client, send_for_text};
use crate::config::DestinationConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

/// Tokyo Toshokan
///
/// The site fetches the torrent itself, so requests must carry a public
/// torrent file URL. A success answer reads `OK,<id>`.
pub struct TokyoTosho {
    name: String,
    api_url: String,
    api_key: String,
    details_base: String,
    site_url: String,
    client: reqwest::Client,
}

impl TokyoTosho {
    /// Create from a destination config
    pub fn new(config: &DestinationConfig, site_url: &str) -> Result<Self> {
        let api = url::Url::parse(&config.api_url).map_err(|e| {
            Error::config("destinations", format!("invalid api_url for {}: {}", config.name(), e))
        })?;
        Ok(Self {
            name: config.name().to_string(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            details_base: format!("{}/details.php?id=", api.origin().ascii_serialization()),
            site_url: site_url.to_string(),
            client: http_client(config.timeout)?,
        })
    }
}

#[async_trait]
impl Destination for TokyoTosho {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadOutcome> {
        let torrent_url = request.torrent_file_url.ok_or_else(|| {
            Error::destination(&self.name, "no public torrent file URL to submit")
        })?;

        let comment = description(request.resolution, request.subtype, &self.site_url);
        let form = [
            ("type", "1"),
            ("apikey", self.api_key.as_str()),
            ("comment", comment.as_str()),
            ("website", self.site_url.as_str()),
            ("url", torrent_url),
            ("send", "true"),
        ];

        debug!(destination = %self.name, torrent_url, "Submitting");
        let body = send_for_text(&self.name, self.client.post(&self.api_url).form(&form)).await?;

        let id = body
            .strip_prefix("OK")
            .and_then(|rest| rest.split(',').nth(1))
            .map(str::trim)
            .filter(|id| !id.is_empty());

        match id {
            Some(id) => Ok(UploadOutcome {
                canonical_url: format!("{}{}", self.details_base, id),
                response: json!({ "text": body }),
            }),
            None => Err(Error::destination(&self.name, body)),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DestinationKind;
    use crate::destinations::tests::{SITE, config, request};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn ok_answer_yields_details_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/new.php"))
            .and(body_string_contains("apikey=tt-key"))
            .and(body_string_contains("direct_download"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK,1712345"))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = config(
            DestinationKind::TokyoTosho,
            &format!("{}/new.php", server.uri()),
            "tt-key",
        );
        let outcome = TokyoTosho::new(&cfg, SITE)
            .unwrap()
            .upload(&request(
                &[],
                Some("https://relay.example.org/direct_download/torrent/abc/x.torrent"),
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome.canonical_url,
            format!("{}/details.php?id=1712345", server.uri())
        );
    }

    #[tokio::test]
    async fn missing_torrent_url_fails_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cfg = config(DestinationKind::TokyoTosho, &server.uri(), "tt-key");
        let result = TokyoTosho::new(&cfg, SITE)
            .unwrap()
            .upload(&request(&[], None))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn error_answer_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Error: duplicate"))
            .mount(&server)
            .await;

        let cfg = config(DestinationKind::TokyoTosho, &server.uri(), "tt-key");
        let err = TokyoTosho::new(&cfg, SITE)
            .unwrap()
            .upload(&request(&[], Some("https://relay.example.org/t.torrent")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
