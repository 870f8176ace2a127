use std::collections::{btree_map::Entry, BTreeMap};

use async_trait::async_trait;
use chrono::Utc;
use scout_core::{
    DashboardStats, JobAction, JobLog, JobProgress, JobSchedule, JobStatus, LogLevel, NewJob,
    NewSchedule, ScrapeJob, VideoGroupStats, VideoRecord,
};
use tokio::sync::Mutex;

use crate::{
    check_transition, cutoff, CleanupReport, JobFilter, JobPage, JobStore, StoreError,
    StoreResult, VideoFilter, VideoStore,
};

/// Keyed on `video_id`; used by `import --dry-run` and tests.
#[derive(Debug, Default)]
pub struct MemoryVideoStore {
    videos: Mutex<BTreeMap<String, VideoRecord>>,
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn upsert(&self, video: &VideoRecord) -> StoreResult<()> {
        let mut videos = self.videos.lock().await;
        videos
            .entry(video.video_id.clone())
            .and_modify(|existing| existing.merge_refresh(video))
            .or_insert_with(|| video.clone());
        Ok(())
    }

    async fn get(&self, video_id: &str) -> StoreResult<Option<VideoRecord>> {
        Ok(self.videos.lock().await.get(video_id).cloned())
    }

    async fn count(&self) -> StoreResult<i64> {
        Ok(self.videos.lock().await.len() as i64)
    }

    async fn top_by_views(&self, limit: i64) -> StoreResult<Vec<VideoRecord>> {
        let mut all: Vec<VideoRecord> = self.videos.lock().await.values().cloned().collect();
        all.sort_by(|a, b| {
            b.view_count
                .cmp(&a.view_count)
                .then_with(|| a.video_id.cmp(&b.video_id))
        });
        all.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(all)
    }

    async fn list_all(&self) -> StoreResult<Vec<VideoRecord>> {
        let mut all: Vec<VideoRecord> = self.videos.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.tool.cmp(&b.tool).then_with(|| a.video_id.cmp(&b.video_id)));
        Ok(all)
    }

    async fn browse(&self, filter: &VideoFilter) -> StoreResult<Vec<VideoRecord>> {
        let mut hits: Vec<VideoRecord> = self
            .videos
            .lock()
            .await
            .values()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.quality_score
                .total_cmp(&a.quality_score)
                .then_with(|| b.view_count.cmp(&a.view_count))
                .then_with(|| a.video_id.cmp(&b.video_id))
        });
        Ok(hits)
    }

    async fn stats(&self) -> StoreResult<Vec<VideoGroupStats>> {
        let videos = self.videos.lock().await;
        let everything = VideoFilter::default();
        // (count, quality sum, views sum, first, last)
        let mut groups = BTreeMap::new();
        for video in videos.values().filter(|v| everything.matches(v)) {
            let key = (video.tool.clone(), video.difficulty);
            match groups.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert((
                        1i64,
                        video.quality_score,
                        video.view_count as f64,
                        video.scraped_at,
                        video.scraped_at,
                    ));
                }
                Entry::Occupied(mut slot) => {
                    let group = slot.get_mut();
                    group.0 += 1;
                    group.1 += video.quality_score;
                    group.2 += video.view_count as f64;
                    group.3 = group.3.min(video.scraped_at);
                    group.4 = group.4.max(video.scraped_at);
                }
            }
        }
        Ok(groups
            .into_iter()
            .map(
                |((tool, difficulty), (count, quality, views, first, last))| VideoGroupStats {
                    tool,
                    difficulty,
                    video_count: count,
                    avg_quality: quality / count as f64,
                    avg_views: views / count as f64,
                    first_scraped: first,
                    last_scraped: last,
                },
            )
            .collect())
    }
}

#[derive(Debug, Default)]
struct JobState {
    next_job_id: i64,
    next_schedule_id: i64,
    jobs: BTreeMap<i64, ScrapeJob>,
    logs: Vec<JobLog>,
    schedules: BTreeMap<i64, JobSchedule>,
}

impl JobState {
    fn job_mut(&mut self, id: i64) -> StoreResult<&mut ScrapeJob> {
        self.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))
    }
}

/// Same transition rules as `PgJobStore`, held behind one lock.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<JobState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn apply(
        &self,
        id: i64,
        action: JobAction,
        update: impl FnOnce(&mut ScrapeJob) + Send,
    ) -> StoreResult<ScrapeJob> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        check_transition(job, action)?;

        let now = Utc::now();
        match action {
            JobAction::Start => {
                job.started_at.get_or_insert(now);
                job.paused_at = None;
            }
            JobAction::Pause => job.paused_at = Some(now),
            JobAction::Cancel | JobAction::Complete | JobAction::Fail => {
                job.completed_at = Some(now);
                job.current_search_term = None;
            }
        }
        job.status = action.target();
        job.updated_at = now;
        update(job);
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: &NewJob) -> StoreResult<ScrapeJob> {
        let mut state = self.state.lock().await;
        state.next_job_id += 1;
        let now = Utc::now();
        let job = ScrapeJob {
            id: state.next_job_id,
            job_name: new_job.resolved_name(),
            job_type: new_job.job_type.clone(),
            status: JobStatus::Pending,
            tool: new_job.tool.clone(),
            max_videos_per_term: new_job.max_videos_per_term,
            min_quality_score: new_job.min_quality_score,
            total_search_terms: 0,
            completed_search_terms: 0,
            current_search_term: None,
            total_videos_found: 0,
            total_videos_saved: 0,
            videos_filtered_out: 0,
            error_count: 0,
            last_error: None,
            total_duration_seconds: None,
            started_at: None,
            paused_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: i64) -> StoreResult<ScrapeJob> {
        let state = self.state.lock().await;
        state.jobs.get(&id).cloned().ok_or(StoreError::JobNotFound(id))
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<JobPage> {
        let state = self.state.lock().await;
        let matching: Vec<&ScrapeJob> = state
            .jobs
            .values()
            .rev()
            .filter(|job| filter.matches(job))
            .collect();
        let total = matching.len() as i64;
        let jobs = matching
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .cloned()
            .collect();
        Ok(JobPage { jobs, total })
    }

    async fn transition(&self, id: i64, action: JobAction) -> StoreResult<ScrapeJob> {
        self.apply(id, action, |_| {}).await
    }

    async fn complete(&self, id: i64, duration_secs: i64) -> StoreResult<ScrapeJob> {
        self.apply(id, JobAction::Complete, move |job| {
            job.total_duration_seconds = Some(duration_secs);
        })
        .await
    }

    async fn fail(&self, id: i64, message: &str) -> StoreResult<ScrapeJob> {
        let message = message.to_string();
        self.apply(id, JobAction::Fail, move |job| {
            job.last_error = Some(message);
            job.error_count += 1;
        })
        .await
    }

    async fn record_progress(&self, id: i64, progress: &JobProgress) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        job.total_search_terms = progress.total_search_terms;
        job.completed_search_terms = progress.completed_search_terms;
        job.current_search_term = progress.current_search_term.clone();
        job.total_videos_found = progress.total_videos_found;
        job.total_videos_saved = progress.total_videos_saved;
        job.videos_filtered_out = progress.videos_filtered_out;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn append_log(&self, id: i64, level: LogLevel, message: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&id) {
            return Err(StoreError::JobNotFound(id));
        }
        state.logs.push(JobLog {
            job_id: id,
            log_level: level,
            log_message: message.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn logs(&self, id: i64, limit: i64) -> StoreResult<Vec<JobLog>> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .rev()
            .filter(|log| log.job_id == id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> StoreResult<DashboardStats> {
        let state = self.state.lock().await;
        let count = |status: JobStatus| {
            state.jobs.values().filter(|j| j.status == status).count() as i64
        };
        let durations: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Completed)
            .filter_map(|j| j.total_duration_seconds)
            .collect();
        let avg_duration_seconds = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
        };

        Ok(DashboardStats {
            running_jobs: count(JobStatus::Running),
            pending_jobs: count(JobStatus::Pending),
            completed_jobs: count(JobStatus::Completed),
            failed_jobs: count(JobStatus::Failed),
            paused_jobs: count(JobStatus::Paused),
            total_videos_scraped: state
                .jobs
                .values()
                .map(|j| i64::from(j.total_videos_saved))
                .sum(),
            avg_duration_seconds,
        })
    }

    async fn schedules(&self) -> StoreResult<Vec<JobSchedule>> {
        let state = self.state.lock().await;
        Ok(state.schedules.values().rev().cloned().collect())
    }

    async fn create_schedule(&self, schedule: &NewSchedule) -> StoreResult<JobSchedule> {
        let mut state = self.state.lock().await;
        state.next_schedule_id += 1;
        let now = Utc::now();
        let created = JobSchedule {
            id: state.next_schedule_id,
            schedule_name: schedule.schedule_name.clone(),
            cron_expression: schedule.cron_expression.clone(),
            tool: schedule.tool.clone(),
            is_active: schedule.is_active,
            max_videos_per_term: schedule.max_videos_per_term,
            min_quality_score: schedule.min_quality_score,
            created_at: now,
            updated_at: now,
        };
        state.schedules.insert(created.id, created.clone());
        Ok(created)
    }

    async fn toggle_schedule(&self, id: i64) -> StoreResult<JobSchedule> {
        let mut state = self.state.lock().await;
        let schedule = state
            .schedules
            .get_mut(&id)
            .ok_or(StoreError::ScheduleNotFound(id))?;
        schedule.is_active = !schedule.is_active;
        schedule.updated_at = Utc::now();
        Ok(schedule.clone())
    }

    async fn cleanup(&self, older_than_days: i32) -> StoreResult<CleanupReport> {
        let before = cutoff(Utc::now(), older_than_days);
        let mut state = self.state.lock().await;

        let logs_before = state.logs.len();
        state.logs.retain(|log| log.created_at >= before);
        let deleted_logs = (logs_before - state.logs.len()) as u64;

        let expired: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .filter(|j| j.completed_at.is_some_and(|at| at < before))
            .map(|j| j.id)
            .collect();
        for id in &expired {
            state.jobs.remove(id);
        }
        state.logs.retain(|log| !expired.contains(&log.job_id));

        Ok(CleanupReport {
            deleted_logs,
            deleted_jobs: expired.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use scout_core::Difficulty;

    fn video(id: &str, title: &str, views: i64) -> VideoRecord {
        VideoRecord {
            video_id: id.to_string(),
            video_url: VideoRecord::watch_url(id),
            title: title.to_string(),
            description: String::new(),
            thumbnail_url: String::new(),
            channel: "Automation Academy".to_string(),
            duration: 600,
            view_count: views,
            difficulty: Difficulty::Beginner,
            tool: "zapier".to_string(),
            quality_score: 50.0,
            published_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).single(),
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_keeps_published_at_and_refreshes_title_and_views() {
        let store = MemoryVideoStore::new();
        let original = video("abc123", "Zapier Basics", 100);
        store.upsert(&original).await.unwrap();

        let mut refreshed = video("abc123", "Zapier Basics (2024 update)", 2500);
        refreshed.published_at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single();
        store.upsert(&refreshed).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get("abc123").await.unwrap().unwrap();
        assert_eq!(stored.title, "Zapier Basics (2024 update)");
        assert_eq!(stored.view_count, 2500);
        assert_eq!(stored.published_at, original.published_at);
    }

    #[tokio::test]
    async fn browse_filters_and_orders_by_quality() {
        let store = MemoryVideoStore::new();
        let mut webhooks = video("w", "Zapier Webhooks Deep Dive", 900);
        webhooks.quality_score = 90.0;
        webhooks.difficulty = Difficulty::Advanced;
        let mut basics = video("b", "Zapier basics", 5000);
        basics.quality_score = 70.0;
        let mut weak = video("x", "zapier webhooks quick look", 10);
        weak.quality_score = 30.0;
        let mut other_tool = video("n", "n8n webhooks", 100);
        other_tool.tool = "n8n".to_string();
        other_tool.quality_score = 95.0;
        for v in [&webhooks, &basics, &weak, &other_tool] {
            store.upsert(v).await.unwrap();
        }

        let zapier = VideoFilter {
            tool: Some("zapier".into()),
            ..VideoFilter::default()
        };
        let ids: Vec<String> = store
            .browse(&zapier)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.video_id)
            .collect();
        assert_eq!(ids, vec!["w", "b"]);

        let text = VideoFilter {
            tool: Some("zapier".into()),
            text: Some("  WEBHOOKS ".into()),
            ..VideoFilter::default()
        };
        assert_eq!(store.browse(&text).await.unwrap().len(), 1);

        let beginner = VideoFilter {
            difficulty: Some(Difficulty::Beginner),
            ..VideoFilter::default()
        };
        let hits = store.browse(&beginner).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].video_id, "b");
    }

    #[tokio::test]
    async fn stats_group_by_tool_and_difficulty_above_floor() {
        let store = MemoryVideoStore::new();
        let mut first = video("a", "a", 100);
        first.quality_score = 60.0;
        first.scraped_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut second = video("b", "b", 300);
        second.quality_score = 80.0;
        second.scraped_at = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let mut weak = video("c", "c", 99_999);
        weak.quality_score = 10.0;
        let mut advanced = video("d", "d", 50);
        advanced.quality_score = 50.0;
        advanced.difficulty = Difficulty::Advanced;
        for v in [&first, &second, &weak, &advanced] {
            store.upsert(v).await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        let beginner = &stats[0];
        assert_eq!(beginner.difficulty, Difficulty::Beginner);
        assert_eq!(beginner.video_count, 2);
        assert_eq!(beginner.avg_quality, 70.0);
        assert_eq!(beginner.avg_views, 200.0);
        assert_eq!(beginner.first_scraped, first.scraped_at);
        assert_eq!(beginner.last_scraped, second.scraped_at);
        assert_eq!(stats[1].difficulty, Difficulty::Advanced);
        assert_eq!(stats[1].video_count, 1);
    }

    #[tokio::test]
    async fn top_by_views_orders_descending() {
        let store = MemoryVideoStore::new();
        for (id, views) in [("a", 10), ("b", 300), ("c", 20)] {
            store.upsert(&video(id, id, views)).await.unwrap();
        }
        let top = store.top_by_views(2).await.unwrap();
        let ids: Vec<&str> = top.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn job_lifecycle_follows_allowed_transitions() {
        let store = MemoryJobStore::new();
        let job = store.create(&NewJob::default()).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_name, "Scrape all videos");

        let err = store.transition(job.id, JobAction::Pause).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Pending,
                ..
            }
        ));

        let running = store.transition(job.id, JobAction::Start).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);
        let started_at = running.started_at;
        assert!(started_at.is_some());

        store.transition(job.id, JobAction::Pause).await.unwrap();
        let resumed = store.transition(job.id, JobAction::Start).await.unwrap();
        assert_eq!(resumed.started_at, started_at);
        assert!(resumed.paused_at.is_none());

        let done = store.complete(job.id, 42).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.total_duration_seconds, Some(42));
        assert!(store.transition(job.id, JobAction::Cancel).await.is_err());
    }

    #[tokio::test]
    async fn fail_records_error_and_missing_job_is_reported() {
        let store = MemoryJobStore::new();
        let job = store.create(&NewJob::default()).await.unwrap();
        store.transition(job.id, JobAction::Start).await.unwrap();
        let failed = store.fail(job.id, "quota exceeded").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("quota exceeded"));

        assert!(matches!(
            store.get(999).await,
            Err(StoreError::JobNotFound(999))
        ));
    }

    #[tokio::test]
    async fn list_filters_and_stats_count_by_status() {
        let store = MemoryJobStore::new();
        let zapier = NewJob {
            tool: "zapier".into(),
            ..NewJob::default()
        };
        let a = store.create(&zapier).await.unwrap();
        store.create(&NewJob::default()).await.unwrap();
        store.transition(a.id, JobAction::Start).await.unwrap();
        store
            .record_progress(
                a.id,
                &JobProgress {
                    total_videos_saved: 7,
                    ..JobProgress::default()
                },
            )
            .await
            .unwrap();

        let page = store
            .list(&JobFilter {
                tool: Some("zapier".into()),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.jobs[0].id, a.id);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.running_jobs, 1);
        assert_eq!(stats.pending_jobs, 1);
        assert_eq!(stats.total_videos_scraped, 7);
        assert_eq!(stats.avg_duration_seconds, None);
    }

    #[tokio::test]
    async fn logs_come_back_newest_first() {
        let store = MemoryJobStore::new();
        let job = store.create(&NewJob::default()).await.unwrap();
        store.append_log(job.id, LogLevel::Info, "first").await.unwrap();
        store.append_log(job.id, LogLevel::Error, "second").await.unwrap();
        let logs = store.logs(job.id, 10).await.unwrap();
        assert_eq!(logs[0].log_message, "second");
        assert_eq!(logs[0].log_level, LogLevel::Error);
        assert!(store.append_log(77, LogLevel::Info, "x").await.is_err());
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_jobs() {
        let store = MemoryJobStore::new();
        let old = store.create(&NewJob::default()).await.unwrap();
        let fresh = store.create(&NewJob::default()).await.unwrap();
        store.transition(old.id, JobAction::Cancel).await.unwrap();
        store.transition(fresh.id, JobAction::Cancel).await.unwrap();
        {
            let mut state = store.state.lock().await;
            let job = state.job_mut(old.id).unwrap();
            job.completed_at = Some(Utc::now() - chrono::Duration::days(45));
        }

        let report = store.cleanup(30).await.unwrap();
        assert_eq!(report.deleted_jobs, 1);
        assert!(store.get(old.id).await.is_err());
        assert!(store.get(fresh.id).await.is_ok());
    }

    #[tokio::test]
    async fn schedules_toggle() {
        let store = MemoryJobStore::new();
        let created = store
            .create_schedule(&NewSchedule {
                schedule_name: "daily".into(),
                cron_expression: "0 0 6 * * *".into(),
                tool: "n8n".into(),
                is_active: true,
                max_videos_per_term: 10,
                min_quality_score: 50,
            })
            .await
            .unwrap();
        let toggled = store.toggle_schedule(created.id).await.unwrap();
        assert!(!toggled.is_active);
        assert!(matches!(
            store.toggle_schedule(99).await,
            Err(StoreError::ScheduleNotFound(99))
        ));
    }
}
