use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::db::MergePolicy;
use crate::discovery::{DEFAULT_RESULT_LIMIT, DEFAULT_SEARCH_URL};
use crate::listings::{AdzunaConfig, DEFAULT_ADZUNA_BASE_URL};

/// Runtime settings, read from the environment (and `.env`, if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub adzuna: AdzunaConfig,
    pub search_url: String,
    pub results_per_search: usize,
    pub start_page: u32,
    pub end_page: u32,
    pub rate_limit: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub job_delay: Duration,
    pub request_timeout: Duration,
    pub merge_policy: MergePolicy,
    pub port: u16,
    pub self_url: Option<String>,
    pub self_ping_interval: Duration,
    pub run_interval: Duration,
    pub run_on_start: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal in production
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source; `get` returns the raw value for a key.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(get);
        Ok(Self {
            database_url: vars.optional("DATABASE_URL"),
            adzuna: AdzunaConfig {
                base_url: vars
                    .optional("ADZUNA_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_ADZUNA_BASE_URL.to_string()),
                country: vars.optional("ADZUNA_COUNTRY").unwrap_or_else(|| "in".to_string()),
                app_id: vars.optional("ADZUNA_APP_ID").unwrap_or_default(),
                app_key: vars.optional("ADZUNA_APP_KEY").unwrap_or_default(),
            },
            search_url: vars
                .optional("SEARCH_URL")
                .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string()),
            results_per_search: vars.parsed("RESULTS_PER_SEARCH", DEFAULT_RESULT_LIMIT)?,
            start_page: vars.parsed("START_PAGE", 1)?,
            end_page: vars.parsed("END_PAGE", 1)?,
            rate_limit: Duration::from_millis(vars.parsed("RATE_LIMIT_MS", 1000)?),
            retry_max_attempts: vars.parsed("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_millis(vars.parsed("RETRY_BASE_DELAY_MS", 1000)?),
            job_delay: Duration::from_millis(vars.parsed("JOB_DELAY_MS", 5000)?),
            request_timeout: Duration::from_secs(vars.parsed("REQUEST_TIMEOUT_SECS", 15)?),
            merge_policy: vars.parsed("MERGE_POLICY", MergePolicy::Skip)?,
            port: vars.parsed("PORT", 3000)?,
            self_url: vars.optional("SELF_URL"),
            self_ping_interval: Duration::from_secs(60 * vars.parsed::<u64>("SELF_PING_MINUTES", 14)?),
            run_interval: Duration::from_secs(3600 * vars.parsed::<u64>("RUN_INTERVAL_HOURS", 24)?),
            run_on_start: vars.parsed_bool("RUN_ON_START", true),
        })
    }

    pub fn has_listing_credentials(&self) -> bool {
        !self.adzuna.app_id.is_empty() && !self.adzuna.app_key.is_empty()
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{}", e))
                .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
            None => Ok(default),
        }
    }

    fn parsed_bool(&self, key: &str, default: bool) -> bool {
        self.optional(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(default)
    }
}
