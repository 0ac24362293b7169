use std::time::Duration;

use reqwest::{StatusCode, Url};
use tokio::time::timeout;
use tracing::{debug, warn};

pub mod extract;

use self::extract::extract_region;

pub const NOT_FOUND_MESSAGE: &str = "Page not found";
pub const UNREACHABLE_MESSAGE: &str = "Error loading preview";
pub const NO_CONTENT_MESSAGE: &str = "No preview available";

/// Display-ready content of a previewed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub url: Url,
    /// Sanitized markup of the page's content region.
    pub html: String,
    pub title: Option<String>,
}

/// Failures are shown inline in the popup; none of them is fatal.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("page not found: {url}")]
    NotFound { url: Url },

    #[error("failed to load {url}: {reason}")]
    Unreachable { url: Url, reason: String },

    #[error("no content region found in {url}")]
    NoContentRegion { url: Url },
}

impl FetchError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => NOT_FOUND_MESSAGE,
            Self::Unreachable { .. } => UNREACHABLE_MESSAGE,
            Self::NoContentRegion { .. } => NO_CONTENT_MESSAGE,
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            Self::NotFound { url } | Self::Unreachable { url, .. } | Self::NoContentRegion { url } => {
                url
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentFetcher {
    http_client: reqwest::Client,
    timeout_ms: u64,
    page_extension: String,
}

impl ContentFetcher {
    pub fn new(timeout_ms: u64, page_extension: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout_ms,
            page_extension: page_extension.into(),
        }
    }

    pub async fn fetch(&self, url: &Url) -> Result<PageContent, FetchError> {
        let url = with_page_extension(url, &self.page_extension);
        let timeout_duration = Duration::from_millis(self.timeout_ms);

        let body = match timeout(timeout_duration, self.fetch_body(&url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Unreachable {
                    url,
                    reason: format!("timed out after {}ms", self.timeout_ms),
                });
            }
        };
        debug!(url = %url, bytes = body.len(), "fetched preview page");

        match extract_region(&body) {
            Some(region) => {
                debug!(url = %url, source = ?region.source, "extracted preview region");
                Ok(PageContent {
                    url,
                    html: region.html,
                    title: region.title,
                })
            }
            None => Err(FetchError::NoContentRegion { url }),
        }
    }

    async fn fetch_body(&self, url: &Url) -> Result<String, FetchError> {
        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|error| unreachable(url, &error))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %url, "preview target not found");
            return Err(FetchError::NotFound { url: url.clone() });
        }
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "preview fetch failed");
            return Err(FetchError::Unreachable {
                url: url.clone(),
                reason: format!("HTTP {status}"),
            });
        }

        response
            .text()
            .await
            .map_err(|error| unreachable(url, &error))
    }
}

fn unreachable(url: &Url, error: &reqwest::Error) -> FetchError {
    warn!(url = %url, error = %error, "preview fetch transport error");
    FetchError::Unreachable {
        url: url.clone(),
        reason: error.to_string(),
    }
}

/// Drops query and fragment, maps a directory URL to its index page and
/// appends `extension` when the last segment lacks it.
pub fn with_page_extension(url: &Url, extension: &str) -> Url {
    let mut page = url.clone();
    page.set_query(None);
    page.set_fragment(None);

    let path = page.path().to_owned();
    if path.ends_with('/') {
        page.set_path(&format!("{path}index{extension}"));
    } else if !path.ends_with(extension) {
        page.set_path(&format!("{path}{extension}"));
    }
    page
}
