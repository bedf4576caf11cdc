//! Calendar retrieval.
//!
//! A source is either an `http(s)://` URL or a local file (`file://` URL or a
//! plain path). HTTP responses are cached per URL and revalidated with
//! `If-None-Match` / `If-Modified-Since`, so an unchanged calendar is not
//! downloaded again on every cycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use maxd_core::RawCalendarRecord;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderMap, HeaderName, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

use crate::parsers::ics::parse_ics;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A configured calendar feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSource {
    pub name: String,
    pub url: String,
    pub credentials: Option<Credentials>,
}

impl CalendarSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Http(String),
    File(PathBuf),
}

impl SourceKind {
    pub fn of(url: &str) -> SourceKind {
        let trimmed = url.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceKind::Http(trimmed.to_string())
        } else if lower.starts_with("file://") {
            SourceKind::File(PathBuf::from(&trimmed["file://".len()..]))
        } else {
            SourceKind::File(PathBuf::from(trimmed))
        }
    }
}

#[derive(Debug, Clone)]
struct CachedResponse {
    etag: Option<String>,
    last_modified: Option<String>,
    body: String,
}

/// Fetches and parses calendar sources; keeps one HTTP client and the
/// revalidation cache for the lifetime of the daemon.
pub struct Fetcher {
    client: reqwest::Client,
    cache: HashMap<String, CachedResponse>,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("maxd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            cache: HashMap::new(),
        }
    }

    pub async fn fetch(&mut self, source: &CalendarSource) -> Result<Vec<RawCalendarRecord>> {
        let text = self.fetch_text(source).await?;
        let records = parse_ics(&text).with_context(|| format!("parse calendar '{}'", source.name))?;
        tracing::debug!(calendar = %source.name, records = records.len(), "calendar parsed");
        Ok(records)
    }

    pub async fn fetch_text(&mut self, source: &CalendarSource) -> Result<String> {
        match SourceKind::of(&source.url) {
            SourceKind::File(path) => tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("read calendar '{}' from {}", source.name, path.display())),
            SourceKind::Http(url) => self.fetch_http(source, &url).await,
        }
    }

    async fn fetch_http(&mut self, source: &CalendarSource, url: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        if let Some(cached) = self.cache.get(url) {
            if let Some(etag) = &cached.etag {
                headers.insert(IF_NONE_MATCH, HeaderValue::from_str(etag)?);
            }
            if let Some(last_modified) = &cached.last_modified {
                headers.insert(IF_MODIFIED_SINCE, HeaderValue::from_str(last_modified)?);
            }
        }

        let mut request = self.client.get(url).headers(headers);
        if let Some(creds) = &source.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("request calendar '{}'", source.name))?;

        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            if let Some(cached) = self.cache.get(url) {
                tracing::debug!(calendar = %source.name, "calendar not modified");
                return Ok(cached.body.clone());
            }
            bail!("calendar '{}': 304 Not Modified without a cached copy", source.name);
        }
        if !status.is_success() {
            bail!("calendar '{}': HTTP {status}", source.name);
        }

        let etag = header_string(resp.headers(), ETAG);
        let last_modified = header_string(resp.headers(), LAST_MODIFIED);

        let body = resp
            .text()
            .await
            .with_context(|| format!("read calendar '{}' body", source.name))?;

        if etag.is_some() || last_modified.is_some() {
            self.cache.insert(
                url.to_string(),
                CachedResponse {
                    etag,
                    last_modified,
                    body: body.clone(),
                },
            );
        } else {
            self.cache.remove(url);
        }

        Ok(body)
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}
