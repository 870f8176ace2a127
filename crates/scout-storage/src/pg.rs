use async_trait::async_trait;
use chrono::Utc;
use scout_core::{
    DashboardStats, Difficulty, JobAction, JobLog, JobProgress, JobSchedule, LogLevel, NewJob,
    NewSchedule, ScrapeJob, VideoGroupStats, VideoRecord, LIBRARY_MIN_QUALITY,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::{
    cutoff, parse_status, CleanupReport, JobFilter, JobPage, JobStore, StoreError, StoreResult,
    VideoFilter, VideoStore,
};

const VIDEO_COLUMNS: &str = "video_id, video_url, title, description, thumbnail_url, channel, \
     duration, view_count, difficulty, tool, quality_score, published_at, scraped_at";

#[derive(Debug, Clone)]
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn video_from_row(row: &PgRow) -> StoreResult<VideoRecord> {
    let difficulty: String = row.try_get("difficulty")?;
    Ok(VideoRecord {
        video_id: row.try_get("video_id")?,
        video_url: row.try_get("video_url")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        channel: row.try_get("channel")?,
        duration: row.try_get("duration")?,
        view_count: row.try_get("view_count")?,
        difficulty: Difficulty::from_tier(&difficulty).unwrap_or_default(),
        tool: row.try_get("tool")?,
        quality_score: row.try_get("quality_score")?,
        published_at: row.try_get("published_at")?,
        scraped_at: row.try_get("scraped_at")?,
    })
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn upsert(&self, video: &VideoRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scraped_videos (
                video_id, video_url, title, description, thumbnail_url,
                channel, duration, view_count, difficulty, tool, quality_score,
                published_at, scraped_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (video_id) DO UPDATE
               SET title = EXCLUDED.title,
                   description = EXCLUDED.description,
                   view_count = EXCLUDED.view_count,
                   quality_score = EXCLUDED.quality_score,
                   scraped_at = EXCLUDED.scraped_at
            "#,
        )
        .bind(&video.video_id)
        .bind(&video.video_url)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.thumbnail_url)
        .bind(&video.channel)
        .bind(video.duration)
        .bind(video.view_count)
        .bind(video.difficulty.as_str())
        .bind(&video.tool)
        .bind(video.quality_score)
        .bind(video.published_at)
        .bind(video.scraped_at)
        .execute(&self.pool)
        .await?;
        debug!(video_id = %video.video_id, "video upserted");
        Ok(())
    }

    async fn get(&self, video_id: &str) -> StoreResult<Option<VideoRecord>> {
        let sql = format!("SELECT {VIDEO_COLUMNS} FROM scraped_videos WHERE video_id = $1");
        let row = sqlx::query(&sql)
            .bind(video_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(video_from_row).transpose()
    }

    async fn count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM scraped_videos")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    async fn top_by_views(&self, limit: i64) -> StoreResult<Vec<VideoRecord>> {
        let sql = format!(
            "SELECT {VIDEO_COLUMNS} FROM scraped_videos ORDER BY view_count DESC, video_id LIMIT $1"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(video_from_row).collect()
    }

    async fn list_all(&self) -> StoreResult<Vec<VideoRecord>> {
        let sql = format!("SELECT {VIDEO_COLUMNS} FROM scraped_videos ORDER BY tool, video_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(video_from_row).collect()
    }

    async fn browse(&self, filter: &VideoFilter) -> StoreResult<Vec<VideoRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {VIDEO_COLUMNS} FROM scraped_videos WHERE quality_score >= "
        ));
        qb.push_bind(LIBRARY_MIN_QUALITY);
        if let Some(tool) = &filter.tool {
            qb.push(" AND tool = ").push_bind(tool.clone());
        }
        if let Some(difficulty) = filter.difficulty {
            qb.push(" AND difficulty = ").push_bind(difficulty.as_str());
        }
        if let Some(needle) = filter.pattern() {
            let like = format!("%{}%", escape_like(&needle));
            qb.push(" AND (title ILIKE ")
                .push_bind(like.clone())
                .push(" OR description ILIKE ")
                .push_bind(like.clone())
                .push(" OR channel ILIKE ")
                .push_bind(like)
                .push(")");
        }
        qb.push(" ORDER BY quality_score DESC, view_count DESC, video_id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(video_from_row).collect()
    }

    async fn stats(&self) -> StoreResult<Vec<VideoGroupStats>> {
        let rows = sqlx::query(
            r#"
            SELECT tool, difficulty,
                   COUNT(*) AS video_count,
                   AVG(quality_score)::FLOAT8 AS avg_quality,
                   AVG(view_count)::FLOAT8 AS avg_views,
                   MIN(scraped_at) AS first_scraped,
                   MAX(scraped_at) AS last_scraped
              FROM scraped_videos
             WHERE quality_score >= $1
             GROUP BY tool, difficulty
             ORDER BY tool,
                      CASE difficulty WHEN 'beginner' THEN 0 WHEN 'intermediate' THEN 1 ELSE 2 END
            "#,
        )
        .bind(LIBRARY_MIN_QUALITY)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let difficulty: String = row.try_get("difficulty")?;
                Ok(VideoGroupStats {
                    tool: row.try_get("tool")?,
                    difficulty: Difficulty::from_tier(&difficulty).unwrap_or_default(),
                    video_count: row.try_get("video_count")?,
                    avg_quality: row.try_get("avg_quality")?,
                    avg_views: row.try_get("avg_views")?,
                    first_scraped: row.try_get("first_scraped")?,
                    last_scraped: row.try_get("last_scraped")?,
                })
            })
            .collect()
    }
}

/// `ILIKE` treats `%`, `_` and `\` specially.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Moves a job to `action.target()` in one conditional UPDATE. When no
    /// row matches, a follow-up read tells "missing" apart from "illegal".
    async fn apply(&self, id: i64, action: JobAction, extra: Extra<'_>) -> StoreResult<ScrapeJob> {
        let set_clause = match action {
            JobAction::Start => "started_at = COALESCE(started_at, NOW()), paused_at = NULL",
            JobAction::Pause => "paused_at = NOW()",
            JobAction::Cancel => "completed_at = NOW(), current_search_term = NULL",
            JobAction::Complete => {
                "completed_at = NOW(), current_search_term = NULL, total_duration_seconds = $4"
            }
            JobAction::Fail => {
                "completed_at = NOW(), current_search_term = NULL, last_error = $4, \
                 error_count = error_count + 1"
            }
        };
        let sql = format!(
            "UPDATE scraping_jobs SET status = $3, {set_clause}, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($2) RETURNING *"
        );
        let allowed = action
            .allowed_from()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect::<Vec<_>>();

        let mut query = sqlx::query(&sql)
            .bind(id)
            .bind(allowed)
            .bind(action.target().as_str());
        query = match extra {
            Extra::None => query,
            Extra::Duration(secs) => query.bind(secs),
            Extra::Error(message) => query.bind(message),
        };

        match query.fetch_optional(&self.pool).await? {
            Some(row) => job_from_row(&row),
            None => {
                let current = self.get(id).await?;
                Err(StoreError::InvalidTransition {
                    id,
                    from: current.status,
                    action,
                })
            }
        }
    }
}

enum Extra<'a> {
    None,
    Duration(i64),
    Error(&'a str),
}

fn job_from_row(row: &PgRow) -> StoreResult<ScrapeJob> {
    let status: String = row.try_get("status")?;
    Ok(ScrapeJob {
        id: row.try_get("id")?,
        job_name: row.try_get("job_name")?,
        job_type: row.try_get("job_type")?,
        status: parse_status(&status)?,
        tool: row.try_get("tool")?,
        max_videos_per_term: row.try_get("max_videos_per_term")?,
        min_quality_score: row.try_get("min_quality_score")?,
        total_search_terms: row.try_get("total_search_terms")?,
        completed_search_terms: row.try_get("completed_search_terms")?,
        current_search_term: row.try_get("current_search_term")?,
        total_videos_found: row.try_get("total_videos_found")?,
        total_videos_saved: row.try_get("total_videos_saved")?,
        videos_filtered_out: row.try_get("videos_filtered_out")?,
        error_count: row.try_get("error_count")?,
        last_error: row.try_get("last_error")?,
        total_duration_seconds: row.try_get("total_duration_seconds")?,
        started_at: row.try_get("started_at")?,
        paused_at: row.try_get("paused_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn schedule_from_row(row: &PgRow) -> StoreResult<JobSchedule> {
    Ok(JobSchedule {
        id: row.try_get("id")?,
        schedule_name: row.try_get("schedule_name")?,
        cron_expression: row.try_get("cron_expression")?,
        tool: row.try_get("tool")?,
        is_active: row.try_get("is_active")?,
        max_videos_per_term: row.try_get("max_videos_per_term")?,
        min_quality_score: row.try_get("min_quality_score")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_job_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(tool) = &filter.tool {
        qb.push(" AND tool = ").push_bind(tool.clone());
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, new_job: &NewJob) -> StoreResult<ScrapeJob> {
        let row = sqlx::query(
            r#"
            INSERT INTO scraping_jobs (
                job_name, job_type, status, tool,
                max_videos_per_term, min_quality_score,
                created_at, updated_at
            ) VALUES ($1, $2, 'pending', $3, $4, $5, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(new_job.resolved_name())
        .bind(&new_job.job_type)
        .bind(&new_job.tool)
        .bind(new_job.max_videos_per_term)
        .bind(new_job.min_quality_score)
        .fetch_one(&self.pool)
        .await?;
        job_from_row(&row)
    }

    async fn get(&self, id: i64) -> StoreResult<ScrapeJob> {
        let row = sqlx::query("SELECT * FROM scraping_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => job_from_row(&row),
            None => Err(StoreError::JobNotFound(id)),
        }
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<JobPage> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM scraping_jobs WHERE TRUE");
        push_job_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.effective_limit())
            .push(" OFFSET ")
            .push_bind(filter.effective_offset());
        let rows = qb.build().fetch_all(&self.pool).await?;
        let jobs = rows.iter().map(job_from_row).collect::<StoreResult<Vec<_>>>()?;

        let mut count_qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM scraping_jobs WHERE TRUE");
        push_job_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        Ok(JobPage { jobs, total })
    }

    async fn transition(&self, id: i64, action: JobAction) -> StoreResult<ScrapeJob> {
        self.apply(id, action, Extra::None).await
    }

    async fn complete(&self, id: i64, duration_secs: i64) -> StoreResult<ScrapeJob> {
        self.apply(id, JobAction::Complete, Extra::Duration(duration_secs))
            .await
    }

    async fn fail(&self, id: i64, message: &str) -> StoreResult<ScrapeJob> {
        self.apply(id, JobAction::Fail, Extra::Error(message)).await
    }

    async fn record_progress(&self, id: i64, progress: &JobProgress) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scraping_jobs
               SET total_search_terms = $2,
                   completed_search_terms = $3,
                   current_search_term = $4,
                   total_videos_found = $5,
                   total_videos_saved = $6,
                   videos_filtered_out = $7,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(progress.total_search_terms)
        .bind(progress.completed_search_terms)
        .bind(progress.current_search_term.as_deref())
        .bind(progress.total_videos_found)
        .bind(progress.total_videos_saved)
        .bind(progress.videos_filtered_out)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    async fn append_log(&self, id: i64, level: LogLevel, message: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO job_logs (job_id, log_level, log_message) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(level.as_str())
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn logs(&self, id: i64, limit: i64) -> StoreResult<Vec<JobLog>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, log_level, log_message, created_at
              FROM job_logs
             WHERE job_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let level: String = row.try_get("log_level")?;
            out.push(JobLog {
                job_id: row.try_get("job_id")?,
                log_level: LogLevel::parse(&level),
                log_message: row.try_get("log_message")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }

    async fn stats(&self) -> StoreResult<DashboardStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) FILTER (WHERE status = 'running') AS running_jobs,
                   COUNT(*) FILTER (WHERE status = 'pending') AS pending_jobs,
                   COUNT(*) FILTER (WHERE status = 'completed') AS completed_jobs,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed_jobs,
                   COUNT(*) FILTER (WHERE status = 'paused') AS paused_jobs,
                   COALESCE(SUM(total_videos_saved), 0)::BIGINT AS total_videos_scraped,
                   (AVG(total_duration_seconds) FILTER (WHERE status = 'completed'))::FLOAT8
                       AS avg_duration_seconds
              FROM scraping_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DashboardStats {
            running_jobs: row.try_get("running_jobs")?,
            pending_jobs: row.try_get("pending_jobs")?,
            completed_jobs: row.try_get("completed_jobs")?,
            failed_jobs: row.try_get("failed_jobs")?,
            paused_jobs: row.try_get("paused_jobs")?,
            total_videos_scraped: row.try_get("total_videos_scraped")?,
            avg_duration_seconds: row.try_get("avg_duration_seconds")?,
        })
    }

    async fn schedules(&self) -> StoreResult<Vec<JobSchedule>> {
        let rows = sqlx::query("SELECT * FROM job_schedules ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn create_schedule(&self, schedule: &NewSchedule) -> StoreResult<JobSchedule> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_schedules (
                schedule_name, cron_expression, tool, is_active,
                max_videos_per_term, min_quality_score,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(&schedule.schedule_name)
        .bind(&schedule.cron_expression)
        .bind(&schedule.tool)
        .bind(schedule.is_active)
        .bind(schedule.max_videos_per_term)
        .bind(schedule.min_quality_score)
        .fetch_one(&self.pool)
        .await?;
        schedule_from_row(&row)
    }

    async fn toggle_schedule(&self, id: i64) -> StoreResult<JobSchedule> {
        let row = sqlx::query(
            r#"
            UPDATE job_schedules
               SET is_active = NOT is_active, updated_at = NOW()
             WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => schedule_from_row(&row),
            None => Err(StoreError::ScheduleNotFound(id)),
        }
    }

    async fn cleanup(&self, older_than_days: i32) -> StoreResult<CleanupReport> {
        let before = cutoff(Utc::now(), older_than_days);
        let logs = sqlx::query("DELETE FROM job_logs WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        let jobs = sqlx::query(
            r#"
            DELETE FROM scraping_jobs
             WHERE status IN ('completed', 'failed', 'cancelled')
               AND completed_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(CleanupReport {
            deleted_logs: logs.rows_affected(),
            deleted_jobs: jobs.rows_affected(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("SCOUT_TEST_DATABASE_URL").ok()?;
        let pool = crate::connect(&url, false).await.ok()?;
        crate::apply_schema(&pool).await.ok()?;
        Some(pool)
    }

    #[tokio::test]
    async fn pg_upsert_refreshes_only_mutable_fields() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let store = PgVideoStore::new(pool);
        let video_id = format!("pgtest-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0));
        let first = VideoRecord {
            video_id: video_id.clone(),
            video_url: VideoRecord::watch_url(&video_id),
            title: "First".into(),
            description: "d".into(),
            thumbnail_url: String::new(),
            channel: "c".into(),
            duration: 60,
            view_count: 10,
            difficulty: Difficulty::Beginner,
            tool: "zapier".into(),
            quality_score: 20.0,
            published_at: Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).single(),
            scraped_at: Utc::now(),
        };
        store.upsert(&first).await.unwrap();

        let mut second = first.clone();
        second.title = "Second".into();
        second.view_count = 99;
        second.difficulty = Difficulty::Advanced;
        second.published_at = None;
        store.upsert(&second).await.unwrap();

        let stored = store.get(&video_id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Second");
        assert_eq!(stored.view_count, 99);
        assert_eq!(stored.difficulty, Difficulty::Beginner);
        assert_eq!(stored.published_at, first.published_at);
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("100%_done\\"), "100\\%\\_done\\\\");
        assert_eq!(escape_like("webhooks"), "webhooks");
    }
}
