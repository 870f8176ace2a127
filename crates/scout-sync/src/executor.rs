//! Runs a started scrape job to completion against a search provider.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use scout_adapters::{SearchProvider, SearchQuery, SearchTermTable};
use scout_core::{JobProgress, JobStatus, LogLevel, ScrapeJob};
use scout_storage::{JobStore, StoreError, VideoStore};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Ids of jobs that currently have an executor driving them. Clones share
/// the same set, so one value should back every executor in a process.
///
/// A claim is only given up while the lock is held and the job is seen
/// outside `running`, so a restart can never race a stopping executor.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs(Arc<Mutex<HashSet<i64>>>);

impl ActiveJobs {
    pub async fn contains(&self, job_id: i64) -> bool {
        self.0.lock().await.contains(&job_id)
    }
}

#[derive(Clone)]
pub struct JobExecutor {
    jobs: Arc<dyn JobStore>,
    videos: Arc<dyn VideoStore>,
    provider: Arc<dyn SearchProvider>,
    terms: Arc<SearchTermTable>,
    active: ActiveJobs,
}

impl JobExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        videos: Arc<dyn VideoStore>,
        provider: Arc<dyn SearchProvider>,
        terms: Arc<SearchTermTable>,
    ) -> Self {
        Self {
            jobs,
            videos,
            provider,
            terms,
            active: ActiveJobs::default(),
        }
    }

    /// Shares `active` with other executors so a job is never driven twice.
    pub fn with_active_jobs(mut self, active: ActiveJobs) -> Self {
        self.active = active;
        self
    }

    /// Drives job `job_id`, which must already be `running`.
    ///
    /// Returns the job as last stored. A provider failure marks the job
    /// failed and is not an `Err`; only storage failures are. When another
    /// executor already owns the job this returns its current state at once.
    pub async fn run(&self, job_id: i64) -> Result<ScrapeJob> {
        if !self.active.0.lock().await.insert(job_id) {
            info!(job_id, "job already has an executor");
            return Ok(self.jobs.get(job_id).await?);
        }
        let result = self.drive(job_id).await;
        if result.is_err() {
            self.active.0.lock().await.remove(&job_id);
        }
        result
    }

    /// Every `Ok` return releases the claim on `job_id` itself.
    async fn drive(&self, job_id: i64) -> Result<ScrapeJob> {
        let started = Instant::now();
        let job = self.jobs.get(job_id).await?;
        let terms = self.terms.terms_for_job(&job.tool);
        let total = i32::try_from(terms.len()).context("too many search terms")?;

        // A resumed job continues after the last finished term.
        let mut progress = if job.total_search_terms == total && job.completed_search_terms > 0 {
            JobProgress {
                total_search_terms: total,
                completed_search_terms: job.completed_search_terms,
                current_search_term: None,
                total_videos_found: job.total_videos_found,
                total_videos_saved: job.total_videos_saved,
                videos_filtered_out: job.videos_filtered_out,
            }
        } else {
            JobProgress {
                total_search_terms: total,
                ..JobProgress::default()
            }
        };
        self.jobs.record_progress(job_id, &progress).await?;
        self.log(
            job_id,
            LogLevel::Info,
            format!("Starting scrape of {} search terms for {}", total, job.tool),
        )
        .await;
        info!(job_id, tool = %job.tool, terms = total, "job executor started");

        let max_per_term = usize::try_from(job.max_videos_per_term).unwrap_or(0);
        let min_quality = f64::from(job.min_quality_score);
        let skip = usize::try_from(progress.completed_search_terms).unwrap_or(0);

        for term in terms.into_iter().skip(skip) {
            let mut active = self.active.0.lock().await;
            let current = self.jobs.get(job_id).await?;
            if current.status != JobStatus::Running {
                active.remove(&job_id);
                drop(active);
                info!(job_id, status = %current.status, "job no longer running, executor stopping");
                self.log(
                    job_id,
                    LogLevel::Info,
                    format!("Stopped while {}", current.status),
                )
                .await;
                return Ok(current);
            }
            drop(active);

            progress.current_search_term = Some(term.term.clone());
            self.jobs.record_progress(job_id, &progress).await?;

            let mut collected = 0usize;
            let mut page_token: Option<String> = None;
            while collected < max_per_term {
                let query = SearchQuery {
                    text: term.term.clone(),
                    tool: term.tool.clone(),
                    difficulty: None,
                    page_token: page_token.take(),
                };
                let page = match self.provider.search(&query).await {
                    Ok(page) => page,
                    Err(err) => {
                        let message = format!("search for \"{}\" failed: {err}", term.term);
                        warn!(job_id, error = %err, term = %term.term, "search failed, failing job");
                        self.log(job_id, LogLevel::Error, message.clone()).await;
                        return self.finish_failed(job_id, &message).await;
                    }
                };

                let scraped_at = Utc::now();
                for video in page.videos.iter().take(max_per_term - collected) {
                    collected += 1;
                    progress.total_videos_found += 1;
                    if video.quality_score < min_quality {
                        progress.videos_filtered_out += 1;
                        continue;
                    }
                    self.videos
                        .upsert(&video.to_record(&term.tool, scraped_at))
                        .await?;
                    progress.total_videos_saved += 1;
                }

                match page.next_page_token {
                    Some(token) if !page.videos.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }

            progress.completed_search_terms += 1;
            self.jobs.record_progress(job_id, &progress).await?;
        }

        progress.current_search_term = None;
        self.jobs.record_progress(job_id, &progress).await?;

        let elapsed = i64::try_from(started.elapsed().as_secs()).unwrap_or(i64::MAX);
        let completed = {
            let mut active = self.active.0.lock().await;
            let completed = self.jobs.complete(job_id, elapsed).await;
            active.remove(&job_id);
            completed
        };
        match completed {
            Ok(done) => {
                self.log(
                    job_id,
                    LogLevel::Info,
                    format!(
                        "Completed: {} found, {} saved, {} filtered out",
                        done.total_videos_found, done.total_videos_saved, done.videos_filtered_out
                    ),
                )
                .await;
                info!(
                    job_id,
                    saved = done.total_videos_saved,
                    seconds = elapsed,
                    "job completed"
                );
                Ok(done)
            }
            // Paused or cancelled during the last term.
            Err(StoreError::InvalidTransition { .. }) => Ok(self.jobs.get(job_id).await?),
            Err(err) => Err(err.into()),
        }
    }

    async fn finish_failed(&self, job_id: i64, message: &str) -> Result<ScrapeJob> {
        let failed = {
            let mut active = self.active.0.lock().await;
            let failed = self.jobs.fail(job_id, message).await;
            active.remove(&job_id);
            failed
        };
        match failed {
            Ok(job) => Ok(job),
            Err(StoreError::InvalidTransition { .. }) => Ok(self.jobs.get(job_id).await?),
            Err(err) => Err(err.into()),
        }
    }

    async fn log(&self, job_id: i64, level: LogLevel, message: String) {
        if let Err(err) = self.jobs.append_log(job_id, level, &message).await {
            warn!(job_id, error = %err, "could not append job log");
        }
    }
}
