//! AniRena upload through the site's web forms
//!
//! There is no API: the uploader logs in like a browser, submits the torrent
//! to get a prefilled upload form, then submits that form with the
//! description filled in. Session cookies are carried by hand.

use super::{Destination, UploadOutcome, UploadRequest, credentials, description, torrent_part};
use crate::config::DestinationConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::multipart::Form;
use serde_json::json;
use tracing::debug;

/// AniRena; `api_key` holds `user:password`
pub struct AniRena {
    name: String,
    api_url: String,
    login_url: String,
    download_base: String,
    username: String,
    password: String,
    site_url: String,
    client: reqwest::Client,
    input: Regex,
    attribute: Regex,
    upload_form: Regex,
    success: Regex,
}

#[derive(Default)]
struct Cookies(Vec<(String, String)>);

impl Cookies {
    /// Absorb `Set-Cookie` headers; returns how many were set
    fn absorb(&mut self, response: &reqwest::Response) -> usize {
        let mut count = 0;
        for value in response.headers().get_all(SET_COOKIE) {
            let Some((name, value)) = value
                .to_str()
                .ok()
                .and_then(|v| v.split(';').next())
                .and_then(|pair| pair.split_once('='))
            else {
                continue;
            };
            let (name, value) = (name.trim().to_string(), value.trim().to_string());
            match self.0.iter_mut().find(|(n, _)| *n == name) {
                Some(existing) => existing.1 = value,
                None => self.0.push((name, value)),
            }
            count += 1;
        }
        count
    }

    fn header(&self) -> String {
        self.0
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl AniRena {
    /// Create from a destination config
    pub fn new(config: &DestinationConfig, site_url: &str) -> Result<Self> {
        let (username, password) = credentials(config)?;
        let api = url::Url::parse(&config.api_url).map_err(|e| {
            Error::config("destinations", format!("invalid api_url for {}: {}", config.name(), e))
        })?;
        let origin = api.origin().ascii_serialization();

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("release-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: config.name().to_string(),
            api_url: config.api_url.clone(),
            login_url: format!("{}/ucp.php?mode=login", origin),
            download_base: format!("{}/dl/", origin),
            username,
            password,
            site_url: site_url.to_string(),
            client,
            input: compile(r"(?i)<input\b[^>]*>")?,
            attribute: compile(r#"(?i)\b(name|value|type)\s*=\s*["']([^"']*)["']"#)?,
            upload_form: compile(r#"(?is)<form\b[^>]*\bid=["']upload["'][^>]*>(.*?)</form>"#)?,
            success: compile(r"Torrent uploaded succesfully under ID\s*(\d+)")?,
        })
    }

    /// `(name, value, type)` of every `<input>` in `html`
    fn inputs(&self, html: &str) -> Vec<(String, String, String)> {
        self.input
            .find_iter(html)
            .map(|tag| {
                let (mut name, mut value, mut kind) = (String::new(), String::new(), String::new());
                for attr in self.attribute.captures_iter(tag.as_str()) {
                    let content = attr[2].to_string();
                    match attr[1].to_ascii_lowercase().as_str() {
                        "name" => name = content,
                        "value" => value = content,
                        _ => kind = content,
                    }
                }
                (name, value, kind)
            })
            .filter(|(name, _, _)| !name.is_empty())
            .collect()
    }

    async fn send(&self, cookies: &mut Cookies, request: reqwest::RequestBuilder) -> Result<(usize, String)> {
        let request = if cookies.0.is_empty() {
            request
        } else {
            request.header(COOKIE, cookies.header())
        };
        let response = request
            .send()
            .await
            .map_err(|e| Error::destination(&self.name, e.to_string()))?;
        let set = cookies.absorb(&response);
        let body = response
            .text()
            .await
            .map_err(|e| Error::destination(&self.name, e.to_string()))?;
        Ok((set, body))
    }

    async fn login(&self, cookies: &mut Cookies) -> Result<()> {
        let (_, page) = self.send(cookies, self.client.get(&self.login_url)).await?;
        let sid = self
            .inputs(&page)
            .into_iter()
            .find(|(name, _, _)| name == "sid")
            .map(|(_, value, _)| value)
            .ok_or_else(|| Error::destination(&self.name, "login page has no sid"))?;

        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("redirect", "index.php"),
            ("login", "Login"),
            ("sid", sid.as_str()),
            ("submit", "True"),
        ];
        let (set, _) = self
            .send(cookies, self.client.post(&self.login_url).form(&form))
            .await?;
        if set == 0 {
            return Err(Error::destination(&self.name, "login rejected"));
        }
        Ok(())
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Other(format!("invalid pattern {}: {}", pattern, e)))
}

#[async_trait]
impl Destination for AniRena {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadOutcome> {
        let mut cookies = Cookies::default();
        self.login(&mut cookies).await?;

        debug!(destination = %self.name, torrent = request.torrent_name, "Submitting torrent");
        let form = Form::new()
            .part("f", torrent_part(request)?)
            .text("submit", "Next");
        let (_, page) = self
            .send(&mut cookies, self.client.post(&self.api_url).multipart(form))
            .await?;

        let upload_form = self
            .upload_form
            .captures(&page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| Error::destination(&self.name, "no upload form after submitting torrent"))?;

        let mut fields: Vec<(String, String)> = self
            .inputs(upload_form)
            .into_iter()
            .filter(|(_, _, kind)| !kind.eq_ignore_ascii_case("submit"))
            .map(|(name, value, _)| (name, value))
            .collect();
        fields.retain(|(name, _)| !matches!(name.as_str(), "t" | "c" | "submit"));
        fields.push(("t".to_string(), "2".to_string()));
        fields.push((
            "c".to_string(),
            description(request.resolution, request.subtype, &self.site_url),
        ));
        fields.push(("submit".to_string(), "Submit".to_string()));

        let (_, result) = self
            .send(&mut cookies, self.client.post(&self.api_url).form(&fields))
            .await?;

        match self.success.captures(&result) {
            Some(found) => Ok(UploadOutcome {
                canonical_url: format!("{}{}", self.download_base, &found[1]),
                response: json!({ "text": found[0].to_string() }),
            }),
            None => Err(Error::destination(&self.name, "upload not confirmed")),
        }
    }
}
