//! Persistence for scraped videos and scrape jobs.
//!
//! Two backends implement the same traits: Postgres (`pg`) for real runs and
//! an in-process map (`memory`) for dry runs and tests.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scout_core::{
    DashboardStats, Difficulty, JobAction, JobLog, JobProgress, JobSchedule, JobStatus, LogLevel,
    NewJob, NewSchedule, ScrapeJob, VideoGroupStats, VideoRecord, LIBRARY_MIN_QUALITY,
};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use thiserror::Error;
use tracing::info;

pub mod memory;
pub mod pg;

pub use memory::{MemoryJobStore, MemoryVideoStore};
pub use pg::{PgJobStore, PgVideoStore};
pub use sqlx::postgres::PgPool;

pub const CRATE_NAME: &str = "scout-storage";

/// DDL for every table this workspace owns. Idempotent.
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job {0} not found")]
    JobNotFound(i64),
    #[error("schedule {0} not found")]
    ScheduleNotFound(i64),
    #[error("job {id} cannot {action} while {from}")]
    InvalidTransition {
        id: i64,
        from: JobStatus,
        action: JobAction,
    },
    #[error("unexpected value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Inserts a new row or refreshes the mutable fields of an existing one,
    /// as one atomic operation.
    async fn upsert(&self, video: &VideoRecord) -> StoreResult<()>;
    async fn get(&self, video_id: &str) -> StoreResult<Option<VideoRecord>>;
    async fn count(&self) -> StoreResult<i64>;
    async fn top_by_views(&self, limit: i64) -> StoreResult<Vec<VideoRecord>>;
    async fn list_all(&self) -> StoreResult<Vec<VideoRecord>>;
    /// Videos at or above `LIBRARY_MIN_QUALITY` matching `filter`, best first.
    async fn browse(&self, filter: &VideoFilter) -> StoreResult<Vec<VideoRecord>>;
    /// Per tool and difficulty, over the same quality floor as `browse`.
    async fn stats(&self) -> StoreResult<Vec<VideoGroupStats>>;
}

#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    pub tool: Option<String>,
    pub difficulty: Option<Difficulty>,
    /// Case-insensitive substring of title, description or channel.
    pub text: Option<String>,
}

impl VideoFilter {
    pub(crate) fn pattern(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }

    pub(crate) fn matches(&self, video: &VideoRecord) -> bool {
        if video.quality_score < LIBRARY_MIN_QUALITY {
            return false;
        }
        if self.tool.as_deref().is_some_and(|t| video.tool != t) {
            return false;
        }
        if self.difficulty.is_some_and(|d| video.difficulty != d) {
            return false;
        }
        self.pattern().is_none_or(|needle| {
            [&video.title, &video.description, &video.channel]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub tool: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl JobFilter {
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            50
        } else {
            self.limit.min(500)
        }
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }

    pub(crate) fn matches(&self, job: &ScrapeJob) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.tool.as_deref().is_none_or(|t| job.tool == t)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
    pub jobs: Vec<ScrapeJob>,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub deleted_logs: u64,
    pub deleted_jobs: u64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, new_job: &NewJob) -> StoreResult<ScrapeJob>;
    async fn get(&self, id: i64) -> StoreResult<ScrapeJob>;
    async fn list(&self, filter: &JobFilter) -> StoreResult<JobPage>;
    /// Applies `start`, `pause` or `cancel` if the job's current status allows it.
    async fn transition(&self, id: i64, action: JobAction) -> StoreResult<ScrapeJob>;
    async fn complete(&self, id: i64, duration_secs: i64) -> StoreResult<ScrapeJob>;
    async fn fail(&self, id: i64, message: &str) -> StoreResult<ScrapeJob>;
    async fn record_progress(&self, id: i64, progress: &JobProgress) -> StoreResult<()>;
    async fn append_log(&self, id: i64, level: LogLevel, message: &str) -> StoreResult<()>;
    async fn logs(&self, id: i64, limit: i64) -> StoreResult<Vec<JobLog>>;
    async fn stats(&self) -> StoreResult<DashboardStats>;
    async fn schedules(&self) -> StoreResult<Vec<JobSchedule>>;
    async fn create_schedule(&self, schedule: &NewSchedule) -> StoreResult<JobSchedule>;
    async fn toggle_schedule(&self, id: i64) -> StoreResult<JobSchedule>;
    /// Drops logs and terminal jobs older than `older_than_days`.
    async fn cleanup(&self, older_than_days: i32) -> StoreResult<CleanupReport>;
}

/// Opens a pool. `ssl` forces TLS; otherwise the server's preference is used.
pub async fn connect(database_url: &str, ssl: bool) -> StoreResult<PgPool> {
    let options = PgConnectOptions::from_str(database_url)?.ssl_mode(if ssl {
        PgSslMode::Require
    } else {
        PgSslMode::Prefer
    });
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;
    info!("database connected");
    Ok(pool)
}

/// Applies `SCHEMA_SQL`.
pub async fn apply_schema(pool: &PgPool) -> StoreResult<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    info!("schema applied");
    Ok(())
}

pub(crate) fn parse_status(value: &str) -> StoreResult<JobStatus> {
    JobStatus::parse(value).ok_or_else(|| StoreError::Corrupt {
        column: "status",
        value: value.to_string(),
    })
}

pub(crate) fn check_transition(job: &ScrapeJob, action: JobAction) -> StoreResult<()> {
    if action.allowed_from().contains(&job.status) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: job.id,
            from: job.status,
            action,
        })
    }
}

pub(crate) fn cutoff(now: DateTime<Utc>, older_than_days: i32) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(older_than_days))
}
