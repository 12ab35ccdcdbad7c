use crate::feed::parser::{parse_feed, ParsedFeed};
use futures::stream::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Default response size cap (10 MB).
pub const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024;

/// Errors that can occur while fetching a single feed.
///
/// Fetch failures are never retried within a run; the URL is picked up
/// again the next time the pipeline runs.
#[derive(Debug, Error)]
pub enum FetchErrorKind {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request, body download and parse together exceeded the fetch timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Feed could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// A failed fetch together with the URL it was for.
#[derive(Debug, Error)]
#[error("Failed to load feed {url}: {kind}")]
pub struct FetchError {
    pub url: String,
    pub kind: FetchErrorKind,
}

/// Limits applied to each fetch.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Absolute bound on request + download + parse
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_bytes: DEFAULT_MAX_FEED_SIZE,
        }
    }
}

/// Builds the HTTP client shared by every fetch of a run.
pub fn build_client(user_agent: &str, connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}

/// Fetches and parses one feed.
///
/// The entire operation is bounded by `settings.timeout`. When the parsed
/// document carries no self link, `url` is used instead, so the returned
/// feed always has a non-empty [`ParsedFeed::feed_url`].
///
/// # Errors
///
/// Returns a [`FetchError`] carrying `url` and one of:
/// - [`FetchErrorKind::Network`] - Connection or TLS errors
/// - [`FetchErrorKind::Timeout`] - The fetch exceeded `settings.timeout`
/// - [`FetchErrorKind::HttpStatus`] - Non-2xx HTTP response
/// - [`FetchErrorKind::ResponseTooLarge`] - Body exceeded `settings.max_bytes`
/// - [`FetchErrorKind::IncompleteResponse`] - Body shorter than Content-Length
/// - [`FetchErrorKind::Parse`] - Not RSS, Atom or JSON Feed
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    settings: &FetchSettings,
) -> Result<ParsedFeed, FetchError> {
    let result = tokio::time::timeout(
        settings.timeout,
        download_and_parse(client, url, settings.max_bytes),
    )
    .await
    .unwrap_or_else(|_| Err(FetchErrorKind::Timeout(settings.timeout)));

    let mut feed = result.map_err(|kind| FetchError {
        url: url.to_owned(),
        kind,
    })?;

    if feed.feed_url().is_none() {
        tracing::debug!(url = %url, "Feed declares no self link, using request URL");
        feed.self_link = Some(url.to_owned());
    }

    Ok(feed)
}

async fn download_and_parse(
    client: &reqwest::Client,
    url: &str,
    max_bytes: usize,
) -> Result<ParsedFeed, FetchErrorKind> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchErrorKind::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_limited_bytes(response, max_bytes).await?;

    parse_feed(&bytes).map_err(|e| FetchErrorKind::Parse(e.to_string()))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchErrorKind> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchErrorKind::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchErrorKind::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchErrorKind::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
