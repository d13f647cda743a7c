use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::models::JobListing;

pub const DEFAULT_ADZUNA_BASE_URL: &str = "https://api.adzuna.com/v1/api/jobs";

/// A paginated feed of job postings.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<Vec<JobListing>>;
}

#[derive(Debug, Clone)]
pub struct AdzunaConfig {
    pub base_url: String,
    pub country: String,
    pub app_id: String,
    pub app_key: String,
}

// --- Adzuna wire format ---

#[derive(Debug, Deserialize)]
struct AdzunaResponse {
    #[serde(default)]
    results: Vec<AdzunaJob>,
}

#[derive(Debug, Default, Deserialize)]
struct AdzunaJob {
    #[serde(default)]
    company: AdzunaName,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: AdzunaName,
    #[serde(default)]
    created: String,
}

#[derive(Debug, Default, Deserialize)]
struct AdzunaName {
    #[serde(default)]
    display_name: String,
}

impl From<AdzunaJob> for JobListing {
    fn from(job: AdzunaJob) -> Self {
        JobListing {
            company_name: job.company.display_name,
            job_description: job.description,
            location: job.location.display_name,
            listing_date: job.created,
        }
    }
}

pub struct AdzunaSource {
    config: AdzunaConfig,
    client: reqwest::Client,
}

impl AdzunaSource {
    pub fn new(config: AdzunaConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for the listing source")?;
        Ok(Self { config, client })
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}/{}/search/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.country,
            page
        )
    }
}

#[async_trait]
impl ListingSource for AdzunaSource {
    async fn fetch_page(&self, page: u32) -> Result<Vec<JobListing>> {
        let url = self.page_url(page);
        debug!(url = %url, page, "Fetching job listings");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("app_id", self.config.app_id.as_str()),
                ("app_key", self.config.app_key.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to request listings page {}", page))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Listing source returned {} for page {}: {}",
                status,
                page,
                body
            ));
        }

        let body = response
            .text()
            .await
            .context("Failed to read listing response")?;
        parse_listings(&body)
    }
}

pub fn parse_listings(body: &str) -> Result<Vec<JobListing>> {
    let parsed: AdzunaResponse =
        serde_json::from_str(body).context("Failed to parse listing response")?;
    Ok(parsed.results.into_iter().map(JobListing::from).collect())
}
