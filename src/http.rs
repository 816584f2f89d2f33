use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use crate::settings::Settings;

const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const VIDEO_ACCEPT: &str = "video/webp,video/*,*/*;q=0.8";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading body of {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("incomplete body for {url}: {got}/{expected} bytes")]
    Incomplete { url: String, got: u64, expected: u64 },
    #[error("cannot write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                *status == StatusCode::FORBIDDEN
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
            }
            FetchError::Transport { .. } | FetchError::Body { .. } | FetchError::Incomplete { .. } => {
                true
            }
            FetchError::Io { .. } => false,
        }
    }
}

/// Enforces a fixed minimum gap between consecutive requests.
pub struct Throttle {
    delay: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Throttle { delay, last: None }
    }

    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Blocking HTTP client with a browser-like header set, one request at a time.
pub struct Fetcher {
    client: Client,
    throttle: Throttle,
    max_retries: u32,
    retry_delay: Duration,
}

impl Fetcher {
    /// Client for HTML pages.
    pub fn for_pages(settings: &Settings) -> Result<Self> {
        let client = build_client(
            settings,
            PAGE_ACCEPT,
            Duration::from_secs(settings.request_timeout_secs),
        )?;
        Ok(Fetcher {
            client,
            throttle: Throttle::new(settings.request_delay()),
            max_retries: settings.max_retries,
            retry_delay: settings.retry_delay(),
        })
    }

    /// Client for video files; longer timeout, its own delay.
    pub fn for_videos(settings: &Settings) -> Result<Self> {
        let client = build_client(
            settings,
            VIDEO_ACCEPT,
            Duration::from_secs(settings.download_timeout_secs),
        )?;
        Ok(Fetcher {
            client,
            throttle: Throttle::new(Duration::from_millis(settings.download_delay_ms)),
            max_retries: settings.max_retries,
            retry_delay: settings.retry_delay(),
        })
    }

    /// GET a page body, retrying retryable failures with a fixed delay.
    pub fn fetch_text(&mut self, url: &str) -> Result<String, FetchError> {
        self.with_retry(url, |fetcher| {
            let resp = fetcher.get(url)?;
            resp.text().map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })
        })
    }

    /// Single throttled GET; non-2xx becomes `FetchError::Status`.
    pub fn get(&mut self, url: &str) -> Result<Response, FetchError> {
        self.throttle.wait();
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(resp)
    }

    /// Run `op` up to `max_retries` times. Non-retryable errors return at once.
    pub fn with_retry<T>(
        &mut self,
        url: &str,
        mut op: impl FnMut(&mut Self) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let attempts = self.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match op(self) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "{} (attempt {}/{}), retrying in {:.1}s",
                        e,
                        attempt,
                        attempts,
                        self.retry_delay.as_secs_f64()
                    );
                    thread::sleep(self.retry_delay);
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Giving up on {} after {} attempts", url, attempts);
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn build_client(settings: &Settings, accept: &'static str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .default_headers(request_headers(settings, accept)?)
        .build()
        .context("Failed to build HTTP client")
}

/// Browser-like defaults, then the configured `headers` table on top.
fn request_headers(settings: &Settings, accept: &'static str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&settings.user_agent).context("Invalid user_agent")?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static(accept));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert("dnt", HeaderValue::from_static("1"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));

    for (name, value) in &settings.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name {:?}", name))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header {}", name))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
