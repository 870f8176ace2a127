//! Axum JSON API: video search, health, and the job controller.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use scout_adapters::{SearchPage, SearchProvider, SearchQuery, SearchTermTable, YouTubeDataApi};
use scout_core::{Difficulty, LogLevel, ScoutConfig};
use scout_storage::{
    JobStore, MemoryJobStore, MemoryVideoStore, PgJobStore, PgVideoStore, VideoFilter, VideoStore,
};
use scout_sync::{ActiveJobs, JobExecutor};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub mod error;
mod jobs;

use error::{ApiError, ApiResult};

pub const CRATE_NAME: &str = "scout-web";

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub videos: Arc<dyn VideoStore>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub terms: Arc<SearchTermTable>,
    pub pool: Option<PgPool>,
    pub active_jobs: ActiveJobs,
}

impl AppState {
    /// Postgres-backed; fails when `DATABASE_URL` is missing.
    pub async fn from_config(config: &ScoutConfig) -> anyhow::Result<Self> {
        let url = config.require_database_url()?;
        let pool = scout_storage::connect(url, config.database_ssl)
            .await
            .context("connecting to database")?;
        Ok(Self {
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            videos: Arc::new(PgVideoStore::new(pool.clone())),
            search: search_provider(config),
            terms: Arc::new(load_terms(config)?),
            pool: Some(pool),
            active_jobs: ActiveJobs::default(),
        })
    }

    /// Keeps jobs and videos in process memory; nothing survives a restart.
    pub fn in_memory(config: &ScoutConfig) -> anyhow::Result<Self> {
        warn!("in-memory storage: jobs and videos are lost on exit");
        Ok(Self {
            jobs: Arc::new(MemoryJobStore::new()),
            videos: Arc::new(MemoryVideoStore::new()),
            search: search_provider(config),
            terms: Arc::new(load_terms(config)?),
            pool: None,
            active_jobs: ActiveJobs::default(),
        })
    }

    pub fn executor(&self) -> Option<JobExecutor> {
        let provider = self.search.clone()?;
        Some(
            JobExecutor::new(
                self.jobs.clone(),
                self.videos.clone(),
                provider,
                self.terms.clone(),
            )
            .with_active_jobs(self.active_jobs.clone()),
        )
    }

    async fn log_job(&self, job_id: i64, level: LogLevel, message: &str) {
        if let Err(err) = self.jobs.append_log(job_id, level, message).await {
            warn!(job_id, error = %err, "could not append job log");
        }
    }
}

fn load_terms(config: &ScoutConfig) -> anyhow::Result<SearchTermTable> {
    SearchTermTable::load(config.search_terms_path.as_deref()).context("loading search terms")
}

fn search_provider(config: &ScoutConfig) -> Option<Arc<dyn SearchProvider>> {
    match YouTubeDataApi::from_config(config) {
        Ok(api) => Some(Arc::new(api)),
        Err(err) => {
            warn!(error = %err, "video search disabled");
            None
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/videos/search", get(search_handler))
        .route("/api/videos/library", get(library_handler))
        .route("/api/videos/stats", get(video_stats_handler))
        .nest("/api/jobs", jobs::router())
        .with_state(Arc::new(state))
}

/// Serves the API. `in_memory` skips Postgres entirely.
pub async fn serve(config: &ScoutConfig, in_memory: bool) -> anyhow::Result<()> {
    let state = if in_memory {
        AppState::in_memory(config)?
    } else {
        AppState::from_config(config).await?
    };
    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    info!(port = config.web_port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "OK", "timestamp": Utc::now().to_rfc3339() }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams {
    tool: Option<String>,
    query: Option<String>,
    difficulty: Option<String>,
    page_token: Option<String>,
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchPage>> {
    const FAILED: &str = "Failed to fetch videos";
    let tool = params
        .tool
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("tool is required"))?;
    let provider = state
        .search
        .as_ref()
        .ok_or_else(|| ApiError::internal(FAILED, "YOUTUBE_API_KEY is not configured"))?;

    let text = state
        .terms
        .build_query(tool, params.query.as_deref(), params.difficulty.as_deref());
    info!(tool, search_query = %text, "video search");

    let page = provider
        .search(&SearchQuery {
            text,
            tool: tool.to_string(),
            difficulty: params.difficulty.clone(),
            page_token: params.page_token.clone().filter(|t| !t.is_empty()),
        })
        .await
        .map_err(|err| ApiError::internal(FAILED, err))?;
    Ok(Json(page))
}

#[derive(Debug, Default, Deserialize)]
struct LibraryParams {
    tool: Option<String>,
    difficulty: Option<String>,
    query: Option<String>,
}

async fn library_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LibraryParams>,
) -> ApiResult<Json<Value>> {
    let tool = params
        .tool
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("tool is required"))?;
    // `all` or an unknown tier means no difficulty filter.
    let filter = VideoFilter {
        tool: Some(tool.to_string()),
        difficulty: params.difficulty.as_deref().and_then(Difficulty::from_tier),
        text: params.query,
    };
    let videos = state
        .videos
        .browse(&filter)
        .await
        .map_err(|err| ApiError::store("Failed to search scraped videos", err))?;
    info!(tool, found = videos.len(), "stored video search");
    Ok(Json(json!({
        "success": true,
        "totalVideos": videos.len(),
        "videos": videos,
    })))
}

async fn video_stats_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let stats = state
        .videos
        .stats()
        .await
        .map_err(|err| ApiError::store("Failed to get scraped videos stats", err))?;
    let total: i64 = stats.iter().map(|group| group.video_count).sum();
    Ok(Json(json!({
        "success": true,
        "stats": stats,
        "totalVideos": total,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
