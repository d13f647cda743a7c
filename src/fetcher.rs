use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use tracing::debug;

use crate::error::{FetchError, FetchResult};
use crate::limiter::RateLimiter;
use crate::retry::{with_retry, RetryPolicy};

/// Desktop Chrome identity; a few sites refuse obvious bots outright.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Anything that can turn a URL into markup.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult<String>;
}

/// Plain HTTP GET with a browser user-agent and a bounded timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<String> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })
    }
}

/// Wraps another source so every fetch is spaced by the shared limiter and
/// retried with backoff.
pub struct PoliteFetcher {
    inner: Arc<dyn PageSource>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl PoliteFetcher {
    pub fn new(inner: Arc<dyn PageSource>, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self { inner, limiter, retry }
    }
}

#[async_trait]
impl PageSource for PoliteFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<String> {
        with_retry(&self.retry, url, || {
            self.limiter.schedule(self.inner.fetch(url))
        })
        .await
    }
}
