use thiserror::Error;

/// Errors raised while fetching a page from the network.
///
/// Every variant is treated the same by the retry wrapper; the distinction
/// only matters for diagnostics.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure: DNS, connect, reset, timeout
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Body could not be read
    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Http { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Body { url, .. }
            | FetchError::InvalidUrl { url } => url,
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
