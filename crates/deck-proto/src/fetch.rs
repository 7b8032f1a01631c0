//! Fetching catalog documents from the static host.
//!
//! Paths are always relative to the site root (`songs/index.json`,
//! `songs/ncs/info.json`, ...).  `HttpFetcher` joins them onto the configured
//! base URL; tests and embedders can supply any other `Fetch` implementation.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::error::FetchError;

#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch the document at `path` as text.  Non-2xx answers are errors.
    async fn get_text(&self, path: &str) -> Result<String, FetchError>;
}

/// Fetch `path` and decode it as JSON.
pub async fn fetch_json<T, F>(fetcher: &F, path: &str) -> Result<T, FetchError>
where
    T: DeserializeOwned,
    F: Fetch + ?Sized,
{
    let body = fetcher.get_text(path).await?;
    serde_json::from_str(&body).map_err(|e| FetchError::Decode {
        url: path.to_string(),
        reason: e.to_string(),
    })
}

/// `Fetch` over HTTP(S) with a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("songdeck/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: base_url.to_string(),
                source: e,
            })?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for a site-relative path.
    pub fn resolve(&self, path: &str) -> Result<Url, FetchError> {
        join_relative(&self.base_url, path)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get_text(&self, path: &str) -> Result<String, FetchError> {
        let url = self.resolve(path)?;
        debug!("fetch: GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Parse a base URL, making sure it ends in `/` so relative joins keep the
/// last path segment.
pub fn normalize_base_url(base_url: &str) -> Result<Url, FetchError> {
    let mut raw = base_url.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|e| FetchError::InvalidPath {
        path: base_url.to_string(),
        reason: e.to_string(),
    })
}

/// Join a site-relative path onto `base`.  Leading slashes are stripped so a
/// path never escapes a base URL that lives below the host root.
pub fn join_relative(base: &Url, path: &str) -> Result<Url, FetchError> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| FetchError::InvalidPath {
            path: path.to_string(),
            reason: e.to_string(),
        })
}
