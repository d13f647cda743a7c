//! Per-listing discovery and extraction.
//!
//! ```text
//! listing page ──► for each job (one at a time)
//!                     │
//!                     ├─► search "<company> company website" ──► candidates
//!                     │
//!                     ├─► for each candidate (stop at first with emails)
//!                     │       ├─► title + careers link
//!                     │       ├─► emails on candidate
//!                     │       └─► emails on careers page
//!                     │
//!                     └─► persist batch, pause, next job
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indexmap::IndexSet;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::company::fetch_company_details;
use crate::config::Config;
use crate::db::{Database, UpsertOutcome};
use crate::discovery::{discover_websites, website_query};
use crate::email::fetch_emails;
use crate::fetcher::{HttpFetcher, PageSource, PoliteFetcher};
use crate::limiter::RateLimiter;
use crate::listings::{AdzunaSource, ListingSource};
use crate::models::{JobListing, ScanRecord};
use crate::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub start_page: u32,
    pub end_page: u32,
    pub search_url: String,
    pub results_per_search: usize,
    pub job_delay: Duration,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            start_page: config.start_page,
            end_page: config.end_page,
            search_url: config.search_url.clone(),
            results_per_search: config.results_per_search,
            job_delay: config.job_delay,
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub pages: u32,
    pub jobs: usize,
    pub with_emails: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed_writes: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} page(s), {} job(s), {} with emails; {} inserted, {} updated, {} skipped, {} failed writes",
            self.pages,
            self.jobs,
            self.with_emails,
            self.inserted,
            self.updated,
            self.skipped,
            self.failed_writes
        )
    }
}

pub struct Pipeline {
    listings: Arc<dyn ListingSource>,
    // Search provider requests are retried but not rate limited
    search: Arc<dyn PageSource>,
    // Company and email fetches: rate limited and retried
    pages: Arc<dyn PageSource>,
    db: Arc<Database>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        listings: Arc<dyn ListingSource>,
        search: Arc<dyn PageSource>,
        pages: Arc<dyn PageSource>,
        db: Arc<Database>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            listings,
            search,
            pages,
            db,
            settings,
        }
    }

    pub fn from_config(config: &Config, db: Arc<Database>) -> Result<Self> {
        if !config.has_listing_credentials() {
            warn!("ADZUNA_APP_ID / ADZUNA_APP_KEY not set; listing requests will be rejected");
        }

        let settings = PipelineSettings::from_config(config);
        let http: Arc<dyn PageSource> = Arc::new(HttpFetcher::new(config.request_timeout)?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        debug!(
            interval_ms = limiter.min_interval().as_millis() as u64,
            attempts = settings.retry.max_attempts,
            "Page fetches are rate limited and retried"
        );
        let polite = Arc::new(PoliteFetcher::new(http.clone(), limiter, settings.retry));
        let listings = Arc::new(AdzunaSource::new(config.adzuna.clone(), config.request_timeout)?);

        Ok(Self::new(listings, http, polite, db, settings))
    }

    /// Walk every configured listing page. Individual failures are logged and
    /// skipped; the run always reaches the last page.
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            start_page = self.settings.start_page,
            end_page = self.settings.end_page,
            "Pipeline run starting"
        );

        for page in self.settings.start_page..=self.settings.end_page {
            self.run_page(page, &mut summary).await;
            summary.pages += 1;
            info!(page, "Completed processing page");
        }

        info!("Pipeline run complete. {summary}");
        summary
    }

    async fn run_page(&self, page: u32, summary: &mut RunSummary) {
        let listings = match with_retry(&self.settings.retry, "listing page", || {
            self.listings.fetch_page(page)
        })
        .await
        {
            Ok(listings) => listings,
            Err(e) => {
                error!(page, error = %e, "Error fetching job listings");
                Vec::new()
            }
        };

        let total = listings.len();
        let mut batch: Vec<ScanRecord> = Vec::with_capacity(total);

        for (i, job) in listings.iter().enumerate() {
            info!(page, position = i + 1, total, company = %job.company_name, "Processing job");

            let record = self.scan_job(job).await;
            summary.jobs += 1;
            if !record.emails.is_empty() {
                summary.with_emails += 1;
            }
            batch.push(record);

            // The whole batch goes out each time; earlier entries resolve as
            // skips or merges, so only the newest outcome is counted
            match self.persist(batch.clone()).await {
                Some(Ok(UpsertOutcome::Inserted(_))) => summary.inserted += 1,
                Some(Ok(UpsertOutcome::Updated(_))) => summary.updated += 1,
                Some(Ok(UpsertOutcome::Skipped(_))) => summary.skipped += 1,
                Some(Err(_)) => summary.failed_writes += 1,
                None => {}
            }

            sleep(self.settings.job_delay).await;
        }
    }

    /// Resolve one listing into a record. Candidates are tried in search
    /// order until one of them (with its careers page) yields an address.
    pub async fn scan_job(&self, job: &JobListing) -> ScanRecord {
        let mut record = ScanRecord::for_listing(job);

        let candidates = self.discover(&job.company_name).await;
        if candidates.is_empty() {
            info!(company = %job.company_name, "No website found");
        }

        let mut emails: IndexSet<String> = IndexSet::new();
        for candidate in &candidates {
            let Some(details) = fetch_company_details(self.pages.as_ref(), candidate).await else {
                debug!(url = %candidate, "No company details, trying next candidate");
                continue;
            };

            emails.extend(fetch_emails(self.pages.as_ref(), candidate).await);
            record.scanned_pages.push(candidate.clone());

            if let Some(careers) = &details.careers_page {
                emails.extend(fetch_emails(self.pages.as_ref(), careers).await);
                record.scanned_pages.push(careers.clone());
            }

            record.company_info = Some(details.display_name);
            record.careers_page = details.careers_page;

            if !emails.is_empty() {
                info!(
                    company = %job.company_name,
                    website = %candidate,
                    emails = emails.len(),
                    "Found contact emails"
                );
                break;
            }
        }

        record.emails = emails;
        record
    }

    /// Write `batch` off the async workers and return the newest record's
    /// outcome. Write volume per page is quadratic in its job count, and under
    /// `MergePolicy::Merge` every earlier row's `updated_at` moves again.
    async fn persist(&self, batch: Vec<ScanRecord>) -> Option<Result<UpsertOutcome>> {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || db.persist_batch(&batch).pop()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Persistence task failed");
                Some(Err(e.into()))
            }
        }
    }

    async fn discover(&self, company_name: &str) -> Vec<String> {
        if company_name.trim().is_empty() {
            warn!("Listing has no company name, skipping website search");
            return Vec::new();
        }

        let query = website_query(company_name);
        let result = with_retry(&self.settings.retry, "website discovery", || {
            discover_websites(
                self.search.as_ref(),
                &self.settings.search_url,
                &query,
                self.settings.results_per_search,
            )
        })
        .await;

        match result {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(company = %company_name, url = %e.url(), error = %e, "Error searching for company websites");
                Vec::new()
            }
        }
    }
}
