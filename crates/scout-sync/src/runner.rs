//! Fire-and-sample client for the job controller's HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use scout_core::{NewJob, ScoutConfig, ScrapeJob, ALL_TOOLS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("job controller request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("job controller rejected {action} ({status}): {message}")]
    Rejected {
        action: &'static str,
        status: u16,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    #[serde(default)]
    success: bool,
    job: Option<ScrapeJob>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JobControllerClient {
    client: reqwest::Client,
    base_url: String,
}

impl JobControllerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ControllerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/jobs{path}", self.base_url)
    }

    pub async fn create_job(&self, new_job: &NewJob) -> Result<ScrapeJob, ControllerError> {
        let response = self
            .client
            .post(self.url("/jobs/create"))
            .json(new_job)
            .send()
            .await?;
        expect_job("create", response).await
    }

    pub async fn start_job(&self, id: i64) -> Result<ScrapeJob, ControllerError> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{id}/start")))
            .send()
            .await?;
        expect_job("start", response).await
    }

    pub async fn get_job(&self, id: i64) -> Result<ScrapeJob, ControllerError> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{id}")))
            .send()
            .await?;
        expect_job("status", response).await
    }
}

async fn expect_job(
    action: &'static str,
    response: reqwest::Response,
) -> Result<ScrapeJob, ControllerError> {
    let status = response.status();
    let envelope: JobEnvelope = decode(response).await.map_err(|body| ControllerError::Rejected {
        action,
        status: status.as_u16(),
        message: body,
    })?;

    match envelope.job {
        Some(job) if status.is_success() && envelope.success => Ok(job),
        _ => Err(ControllerError::Rejected {
            action,
            status: status.as_u16(),
            message: envelope
                .message
                .or(envelope.error)
                .unwrap_or_else(|| "no job in response".to_string()),
        }),
    }
}

// On a non-JSON body, hands the raw text back as the error.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, String> {
    let text = response.text().await.map_err(|err| err.to_string())?;
    serde_json::from_str(&text).map_err(|_| text)
}

/// What one scheduled run observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerReport {
    pub job_id: i64,
    pub snapshot: ScrapeJob,
}

pub struct ScheduledRunner {
    client: JobControllerClient,
    delay: Duration,
}

impl ScheduledRunner {
    pub fn new(client: JobControllerClient, delay: Duration) -> Self {
        Self { client, delay }
    }

    pub fn from_config(config: &ScoutConfig) -> Result<Self> {
        let client = JobControllerClient::new(
            &config.backend_url,
            Duration::from_secs(config.http_timeout_secs),
        )
        .context("building job controller client")?;
        Ok(Self::new(client, Duration::from_secs(config.runner_delay_secs)))
    }

    pub fn scheduled_job(now: chrono::DateTime<Utc>) -> NewJob {
        NewJob {
            job_name: Some(format!("Scheduled scrape - {}", now.to_rfc3339())),
            job_type: "scheduled".to_string(),
            tool: ALL_TOOLS.to_string(),
            max_videos_per_term: 50,
            min_quality_score: 60,
        }
    }

    /// Creates and starts a job, waits once, and reads its status once.
    /// The job is not followed to completion.
    pub async fn run_once(&self) -> Result<RunnerReport> {
        let job = self
            .client
            .create_job(&Self::scheduled_job(Utc::now()))
            .await
            .context("creating scheduled job")?;
        info!(job_id = job.id, name = %job.job_name, "scheduled job created");

        self.client
            .start_job(job.id)
            .await
            .with_context(|| format!("starting job {}", job.id))?;
        info!(job_id = job.id, "scheduled job started");

        tokio::time::sleep(self.delay).await;

        let snapshot = self
            .client
            .get_job(job.id)
            .await
            .with_context(|| format!("reading status of job {}", job.id))?;
        info!(
            job_id = snapshot.id,
            status = %snapshot.status,
            progress = %format!(
                "{}/{}",
                snapshot.completed_search_terms, snapshot.total_search_terms
            ),
            videos_saved = snapshot.total_videos_saved,
            "scheduled job status"
        );

        Ok(RunnerReport {
            job_id: job.id,
            snapshot,
        })
    }
}

/// Builds a scheduler that calls `runner.run_once()` on every `cron` tick.
/// Failures are logged; the schedule keeps running.
pub async fn build_scheduler(cron: &str, runner: Arc<ScheduledRunner>) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let runner = runner.clone();
        Box::pin(async move {
            if let Err(err) = runner.run_once().await {
                error!(error = ?err, "scheduled run failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
