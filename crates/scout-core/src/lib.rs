//! Core domain model for Tutorial Scout: scraped videos and scrape jobs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod classify;
pub mod config;

pub use classify::{detect_difficulty, detect_series, parse_duration, quality_score, SeriesInfo};
pub use config::{ConfigError, ScoutConfig};

pub const CRATE_NAME: &str = "scout-core";

/// Automation platforms the search-term table knows about. `all` on a job
/// expands to exactly this list.
pub const KNOWN_TOOLS: [&str; 4] = ["zapier", "n8n", "make", "power-automate"];

/// Tool tag meaning "every known tool".
pub const ALL_TOOLS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [
        Difficulty::Beginner,
        Difficulty::Intermediate,
        Difficulty::Advanced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// Recognises a tier name. `all`, blanks and anything else yield `None`.
    pub fn from_tier(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "beginner" => Some(Difficulty::Beginner),
            "intermediate" => Some(Difficulty::Intermediate),
            "advanced" => Some(Difficulty::Advanced),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `scraped_videos`, keyed by the platform's video id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub video_url: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub channel: String,
    pub duration: i64,
    pub view_count: i64,
    pub difficulty: Difficulty,
    pub tool: String,
    pub quality_score: f64,
    pub published_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
}

impl VideoRecord {
    pub fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={video_id}")
    }

    /// Applies the fields a re-ingestion is allowed to refresh. Identity,
    /// `published_at` and the first-seen `difficulty` stay untouched.
    pub fn merge_refresh(&mut self, incoming: &VideoRecord) {
        self.title = incoming.title.clone();
        self.description = incoming.description.clone();
        self.view_count = incoming.view_count;
        self.quality_score = incoming.quality_score;
        self.scraped_at = incoming.scraped_at;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle actions a job controller accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Start,
    Pause,
    Cancel,
    Complete,
    Fail,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            JobAction::Start => "start",
            JobAction::Pause => "pause",
            JobAction::Cancel => "cancel",
            JobAction::Complete => "complete",
            JobAction::Fail => "fail",
        }
    }

    /// Statuses from which this action is legal.
    pub fn allowed_from(self) -> &'static [JobStatus] {
        match self {
            JobAction::Start => &[JobStatus::Pending, JobStatus::Paused],
            JobAction::Pause => &[JobStatus::Running],
            JobAction::Cancel => &[JobStatus::Pending, JobStatus::Running, JobStatus::Paused],
            JobAction::Complete => &[JobStatus::Running],
            JobAction::Fail => &[JobStatus::Pending, JobStatus::Running, JobStatus::Paused],
        }
    }

    pub fn target(self) -> JobStatus {
        match self {
            JobAction::Start => JobStatus::Running,
            JobAction::Pause => JobStatus::Paused,
            JobAction::Cancel => JobStatus::Cancelled,
            JobAction::Complete => JobStatus::Completed,
            JobAction::Fail => JobStatus::Failed,
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coarse-grained scraping run and its progress counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: i64,
    pub job_name: String,
    pub job_type: String,
    pub status: JobStatus,
    pub tool: String,
    pub max_videos_per_term: i32,
    pub min_quality_score: i32,
    pub total_search_terms: i32,
    pub completed_search_terms: i32,
    pub current_search_term: Option<String>,
    pub total_videos_found: i32,
    pub total_videos_saved: i32,
    pub videos_filtered_out: i32,
    pub error_count: i32,
    pub last_error: Option<String>,
    pub total_duration_seconds: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default = "default_job_type")]
    pub job_type: String,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_max_videos_per_term")]
    pub max_videos_per_term: i32,
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: i32,
}

impl NewJob {
    pub fn resolved_name(&self) -> String {
        self.job_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Scrape {} videos", self.tool))
    }
}

impl Default for NewJob {
    fn default() -> Self {
        Self {
            job_name: None,
            job_type: default_job_type(),
            tool: default_tool(),
            max_videos_per_term: default_max_videos_per_term(),
            min_quality_score: default_min_quality_score(),
        }
    }
}

fn default_job_type() -> String {
    "manual".to_string()
}

fn default_tool() -> String {
    ALL_TOOLS.to_string()
}

fn default_max_videos_per_term() -> i32 {
    50
}

fn default_min_quality_score() -> i32 {
    60
}

/// Counter snapshot written by the executor after each search term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_search_terms: i32,
    pub completed_search_terms: i32,
    pub current_search_term: Option<String>,
    pub total_videos_found: i32,
    pub total_videos_saved: i32,
    pub videos_filtered_out: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "warning" | "warn" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    pub job_id: i64,
    pub log_level: LogLevel,
    pub log_message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub id: i64,
    pub schedule_name: String,
    pub cron_expression: String,
    pub tool: String,
    pub is_active: bool,
    pub max_videos_per_term: i32,
    pub min_quality_score: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub schedule_name: String,
    pub cron_expression: String,
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_max_videos_per_term")]
    pub max_videos_per_term: i32,
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: i32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub running_jobs: i64,
    pub pending_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub paused_jobs: i64,
    pub total_videos_scraped: i64,
    pub avg_duration_seconds: Option<f64>,
}

/// Stored videos that clear [`LIBRARY_MIN_QUALITY`], summarised per
/// tool and difficulty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoGroupStats {
    pub tool: String,
    pub difficulty: Difficulty,
    pub video_count: i64,
    pub avg_quality: f64,
    pub avg_views: f64,
    pub first_scraped: DateTime<Utc>,
    pub last_scraped: DateTime<Utc>,
}

/// Quality floor for browsing stored videos and for their stats.
pub const LIBRARY_MIN_QUALITY: f64 = 50.0;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn video(title: &str, views: i64) -> VideoRecord {
        VideoRecord {
            video_id: "abc123".into(),
            video_url: VideoRecord::watch_url("abc123"),
            title: title.into(),
            description: String::new(),
            thumbnail_url: String::new(),
            channel: "chan".into(),
            duration: 600,
            view_count: views,
            difficulty: Difficulty::Beginner,
            tool: "zapier".into(),
            quality_score: 10.0,
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single(),
            scraped_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn difficulty_tier_parsing_ignores_all_and_case() {
        assert_eq!(Difficulty::from_tier("Advanced"), Some(Difficulty::Advanced));
        assert_eq!(Difficulty::from_tier(" intermediate "), Some(Difficulty::Intermediate));
        assert_eq!(Difficulty::from_tier("all"), None);
        assert_eq!(Difficulty::from_tier(""), None);
    }

    #[test]
    fn merge_refresh_keeps_identity_and_classification() {
        let mut stored = video("Old", 10);
        let mut incoming = video("New", 99);
        incoming.difficulty = Difficulty::Advanced;
        incoming.published_at = None;
        incoming.channel = "other".into();

        stored.merge_refresh(&incoming);

        assert_eq!(stored.title, "New");
        assert_eq!(stored.view_count, 99);
        assert_eq!(stored.difficulty, Difficulty::Beginner);
        assert_eq!(stored.channel, "chan");
        assert!(stored.published_at.is_some());
    }

    #[test]
    fn job_actions_only_leave_allowed_statuses() {
        assert!(JobAction::Start.allowed_from().contains(&JobStatus::Paused));
        assert!(!JobAction::Start.allowed_from().contains(&JobStatus::Completed));
        assert!(!JobAction::Cancel.allowed_from().contains(&JobStatus::Cancelled));
        assert_eq!(JobAction::Pause.target(), JobStatus::Paused);
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }

    #[test]
    fn new_job_defaults_match_scheduled_runner_payload() {
        let job = NewJob::default();
        assert_eq!(job.tool, "all");
        assert_eq!(job.max_videos_per_term, 50);
        assert_eq!(job.min_quality_score, 60);
        assert_eq!(job.resolved_name(), "Scrape all videos");
    }
}
