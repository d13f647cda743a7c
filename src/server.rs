//! HTTP triggers, the periodic scheduler, and the guard that keeps them from
//! starting overlapping runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::{Pipeline, RunSummary};

/// Where a run request came from; only used for logging.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    Startup,
    Http,
    Schedule,
    Cli,
}

/// Lets at most one pipeline run exist at a time, no matter who asks.
#[derive(Clone)]
pub struct RunCoordinator {
    pipeline: Arc<Pipeline>,
    running: Arc<AtomicBool>,
    last_summary: Arc<Mutex<Option<RunSummary>>>,
}

/// Clears the running flag when the run ends, including by panic.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RunCoordinator {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            running: Arc::new(AtomicBool::new(false)),
            last_summary: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_summary(&self) -> Option<RunSummary> {
        self.last_summary.lock().ok().and_then(|s| s.clone())
    }

    fn try_acquire(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(self.running.clone()))
    }

    /// Start a run in the background. Returns false, without doing anything,
    /// if one is already in progress.
    pub fn try_start(&self, trigger: Trigger) -> bool {
        let Some(guard) = self.try_acquire() else {
            warn!(?trigger, "Run already in progress, ignoring trigger");
            return false;
        };

        info!(?trigger, "Starting pipeline run");
        let coordinator = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let summary = coordinator.pipeline.run().await;
            coordinator.record(summary);
        });
        true
    }

    /// Run in the foreground. Returns `None` if another run holds the guard.
    pub async fn run_now(&self, trigger: Trigger) -> Option<RunSummary> {
        let Some(_guard) = self.try_acquire() else {
            warn!(?trigger, "Run already in progress, ignoring trigger");
            return None;
        };
        info!(?trigger, "Starting pipeline run");
        let summary = self.pipeline.run().await;
        self.record(summary.clone());
        Some(summary)
    }

    fn record(&self, summary: RunSummary) {
        if let Ok(mut last) = self.last_summary.lock() {
            *last = Some(summary);
        }
    }
}

// --- HTTP handlers ---

#[derive(Serialize)]
struct StatusResponse {
    running: bool,
    last_summary: Option<RunSummary>,
}

async fn health() -> &'static str {
    "ok"
}

async fn trigger_run(State(coordinator): State<RunCoordinator>) -> impl IntoResponse {
    if coordinator.try_start(Trigger::Http) {
        (StatusCode::ACCEPTED, Json(json!({ "status": "started" })))
    } else {
        (StatusCode::CONFLICT, Json(json!({ "status": "already_running" })))
    }
}

async fn status(State(coordinator): State<RunCoordinator>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: coordinator.is_running(),
        last_summary: coordinator.last_summary(),
    })
}

pub fn router(coordinator: RunCoordinator) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/run", get(trigger_run).post(trigger_run))
        .route("/status", get(status))
        .with_state(coordinator)
}

// --- Scheduler ---

/// Re-run the pipeline every `config.run_interval`, and keep the host awake
/// by pinging our own health check when `SELF_URL` is configured.
pub async fn start_scheduler(coordinator: RunCoordinator, config: &Config) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let run_job = Job::new_repeated_async(config.run_interval, move |_uuid, _lock| {
        let coordinator = coordinator.clone();
        Box::pin(async move {
            coordinator.try_start(Trigger::Schedule);
        })
    })?;
    scheduler.add(run_job).await?;

    if let Some(self_url) = config.self_url.clone() {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let health_url = format!("{}/health", self_url.trim_end_matches('/'));
        let ping_job = Job::new_repeated_async(config.self_ping_interval, move |_uuid, _lock| {
            let client = client.clone();
            let health_url = health_url.clone();
            Box::pin(async move {
                match client.get(&health_url).send().await {
                    Ok(resp) => info!(status = %resp.status(), "Self-ping"),
                    Err(e) => warn!(error = %e, url = %health_url, "Self-ping failed"),
                }
            })
        })?;
        scheduler.add(ping_job).await?;
    }

    scheduler.start().await?;
    info!(
        interval_hours = config.run_interval.as_secs() / 3600,
        self_ping = config.self_url.is_some(),
        "Scheduled tasks started"
    );
    Ok(scheduler)
}

pub async fn serve(coordinator: RunCoordinator, config: &Config) -> Result<()> {
    let _scheduler = start_scheduler(coordinator.clone(), config).await?;

    if config.run_on_start {
        coordinator.try_start(Trigger::Startup);
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {addr}");

    axum::serve(listener, router(coordinator))
        .await
        .context("HTTP server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MergePolicy};
    use crate::fetcher::testing::MockSource;
    use crate::listings::ListingSource;
    use crate::models::JobListing;
    use crate::pipeline::PipelineSettings;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn wait_idle(coordinator: &RunCoordinator) {
        while coordinator.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    struct OneJob;

    #[async_trait]
    impl ListingSource for OneJob {
        async fn fetch_page(&self, _page: u32) -> anyhow::Result<Vec<JobListing>> {
            Ok(vec![JobListing {
                company_name: "Acme".to_string(),
                job_description: "Rockets".to_string(),
                location: "Pune".to_string(),
                listing_date: "2024-05-01".to_string(),
            }])
        }
    }

    fn coordinator(job_delay: Duration) -> (RunCoordinator, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory(MergePolicy::Skip).unwrap());
        let web = Arc::new(MockSource::new());
        let pipeline = Pipeline::new(
            Arc::new(OneJob),
            web.clone(),
            web,
            db.clone(),
            PipelineSettings {
                start_page: 1,
                end_page: 1,
                search_url: "https://search.test/html/".to_string(),
                results_per_search: 5,
                job_delay,
                retry: RetryPolicy::new(1, Duration::ZERO),
            },
        );
        (RunCoordinator::new(Arc::new(pipeline)), db)
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_is_refused_while_running() {
        let (coordinator, db) = coordinator(Duration::from_secs(60));

        assert!(coordinator.try_start(Trigger::Http));
        assert!(coordinator.is_running());
        assert!(!coordinator.try_start(Trigger::Schedule));
        assert!(coordinator.run_now(Trigger::Cli).await.is_none());

        wait_idle(&coordinator).await;
        assert_eq!(db.count_records().unwrap(), 1);
        assert_eq!(coordinator.last_summary().unwrap().jobs, 1);

        // Free again once the run has finished
        assert!(coordinator.try_start(Trigger::Http));
        wait_idle(&coordinator).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_now_returns_summary() {
        let (coordinator, _db) = coordinator(Duration::ZERO);
        let summary = coordinator.run_now(Trigger::Cli).await.unwrap();
        assert_eq!(summary.jobs, 1);
        assert_eq!(summary.inserted, 1);
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (coordinator, _db) = coordinator(Duration::ZERO);
        let response = router(coordinator)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_endpoint_reports_conflict() {
        let (coordinator, _db) = coordinator(Duration::from_secs(60));
        let app = router(coordinator.clone());

        let first = app
            .clone()
            .oneshot(Request::post("/run").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app
            .oneshot(Request::post("/run").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        wait_idle(&coordinator).await;
    }
}
