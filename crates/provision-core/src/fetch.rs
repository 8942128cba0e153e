//! Document retrieval from local paths and HTTP(S) URLs.
//!
//! Remote fetches are retried with exponential backoff; local reads and
//! malformed URLs fail immediately. Every successfully retrieved document is
//! run through the template processor before it is handed back.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::cancel::{Cancellation, Cancelled};
use crate::retry::{retry, Backoff, RetryError};
use crate::settings::EngineSettings;
use crate::template::{self, BuildInfo, TemplateError};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cannot read {path}: {source}")]
    Local {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("bad status code {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("gave up on {url} after {attempts} attempt(s): {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("fetch of {url} stopped: {cause}")]
    Cancelled { url: String, cause: Cancelled },

    #[error("template processing failed: {0}")]
    Template(#[from] TemplateError),

    #[error("cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }
}

/// Whether `source` names an HTTP(S) resource rather than a local path.
pub fn is_remote(source: &str) -> bool {
    let lower = source.get(..8).unwrap_or(source).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Source of raw document bytes, already templated.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, cancel: &Cancellation, source: &str) -> Result<Vec<u8>, FetchError>;
}

/// Production fetcher: local files plus retried HTTP(S) GETs.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    build: Option<BuildInfo>,
    backoff: Backoff,
}

impl Fetcher {
    /// Three attempts, 1s base delay, 30s per-request timeout.
    pub fn new(build: Option<BuildInfo>) -> Result<Self, FetchError> {
        Self::from_settings(&EngineSettings::default(), build)
    }

    pub fn from_settings(settings: &EngineSettings, build: Option<BuildInfo>) -> Result<Self, FetchError> {
        let client = build_client(settings.fetch_timeout())?;
        Ok(Self {
            client,
            build,
            backoff: settings.fetch_backoff(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build_info(&self) -> Option<&BuildInfo> {
        self.build.as_ref()
    }

    /// GET `url` with retries, returning the raw body.
    pub async fn fetch_remote(&self, cancel: &Cancellation, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let outcome = retry(cancel, &self.backoff, url, |attempt| {
            let request = self.client.get(parsed.clone());
            let url = url.to_string();
            async move {
                debug!(url = %url, attempt, "GET");
                let response = request.send().await.map_err(|source| FetchError::Transport {
                    url: url.clone(),
                    source,
                })?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url,
                        status: status.as_u16(),
                    });
                }
                let body = response
                    .bytes()
                    .await
                    .map_err(|source| FetchError::Transport { url, source })?;
                Ok(body.to_vec())
            }
        })
        .await;

        match outcome {
            Ok((body, _)) => Ok(body),
            Err(RetryError::Cancelled(cause)) => Err(FetchError::Cancelled {
                url: url.to_string(),
                cause,
            }),
            Err(RetryError::Exhausted { attempts, last }) => Err(FetchError::Exhausted {
                url: url.to_string(),
                attempts,
                last: Box::new(last),
            }),
        }
    }

    async fn fetch_local(&self, cancel: &Cancellation, path: &str) -> Result<Vec<u8>, FetchError> {
        let read = tokio::fs::read(Path::new(path));
        match cancel.run(read).await {
            Ok(result) => result.map_err(|source| FetchError::Local {
                path: path.to_string(),
                source,
            }),
            Err(cause) => Err(FetchError::Cancelled {
                url: path.to_string(),
                cause,
            }),
        }
    }

    /// Confirm every URL answers with a success status. Failures are
    /// collected rather than stopping at the first one.
    pub async fn verify_reachable(
        &self,
        cancel: &Cancellation,
        urls: &[String],
    ) -> Vec<(String, FetchError)> {
        let mut failures = Vec::new();
        for url in urls {
            info!(url = %url, "verifying URL");
            if let Err(e) = self.fetch_remote(cancel, url).await {
                let stop = e.is_cancelled();
                failures.push((url.clone(), e));
                if stop {
                    break;
                }
            }
        }
        failures
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("provision/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FetchError::Client)
}

#[async_trait]
impl Fetch for Fetcher {
    async fn fetch(&self, cancel: &Cancellation, source: &str) -> Result<Vec<u8>, FetchError> {
        let raw = if is_remote(source) {
            self.fetch_remote(cancel, source).await?
        } else {
            self.fetch_local(cancel, source).await?
        };
        Ok(template::process(&raw, self.build.as_ref())?)
    }
}
