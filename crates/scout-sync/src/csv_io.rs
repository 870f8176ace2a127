//! Bulk CSV import into a `VideoStore`, and the matching export.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scout_core::{Difficulty, VideoRecord};
use scout_storage::{StoreError, VideoStore};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

pub const CSV_HEADERS: [&str; 13] = [
    "video_id",
    "video_url",
    "title",
    "description",
    "thumbnail_url",
    "channel",
    "duration",
    "view_count",
    "difficulty",
    "tool",
    "quality_score",
    "published_at",
    "scraped_at",
];

const TOP_VIDEOS: i64 = 5;
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} has no header row")]
    EmptyFile(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported_count: usize,
    pub skipped_count: usize,
    pub total_in_store: i64,
    pub top_videos: Vec<VideoRecord>,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum RowError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("video_id is empty")]
    MissingVideoId,
}

/// Splits one CSV line. A double quote toggles "inside field" and is
/// dropped; commas inside quotes are kept; every field is trimmed.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

fn parse_header(line: &str) -> Vec<String> {
    line.split(',').map(|h| h.trim().to_string()).collect()
}

fn parse_int(raw: &str) -> i64 {
    let raw = raw.trim();
    raw.parse::<i64>()
        .or_else(|_| raw.parse::<f64>().map(|f| f as i64))
        .unwrap_or(0)
}

fn parse_float(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}

/// RFC 3339, Postgres text output, or a bare date.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn row_to_record(
    headers: &[String],
    fields: Vec<String>,
    now: DateTime<Utc>,
) -> Result<VideoRecord, RowError> {
    if fields.len() != headers.len() {
        return Err(RowError::FieldCount {
            expected: headers.len(),
            found: fields.len(),
        });
    }
    let row: HashMap<&str, String> = headers.iter().map(String::as_str).zip(fields).collect();
    let text = |key: &str| row.get(key).cloned().unwrap_or_default();

    let video_id = text("video_id");
    if video_id.is_empty() {
        return Err(RowError::MissingVideoId);
    }
    let video_url = Some(text("video_url"))
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| VideoRecord::watch_url(&video_id));

    Ok(VideoRecord {
        video_url,
        title: text("title"),
        description: text("description"),
        thumbnail_url: text("thumbnail_url"),
        channel: text("channel"),
        duration: parse_int(&text("duration")),
        view_count: parse_int(&text("view_count")).max(0),
        difficulty: Difficulty::from_tier(&text("difficulty")).unwrap_or_default(),
        tool: Some(text("tool"))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "automation".to_string()),
        quality_score: parse_float(&text("quality_score")),
        published_at: parse_timestamp(&text("published_at")),
        scraped_at: parse_timestamp(&text("scraped_at")).unwrap_or(now),
        video_id,
    })
}

/// Imports every row of `raw` that parses; bad rows are logged and counted.
pub async fn import_csv_str(
    raw: &str,
    store: &dyn VideoStore,
) -> Result<ImportSummary, CsvError> {
    // Spreadsheet exports often start with a UTF-8 byte order mark.
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut lines = raw.lines();
    let headers = match lines.next() {
        Some(line) if !line.trim().is_empty() => parse_header(line),
        _ => return Err(CsvError::EmptyFile(PathBuf::from("<input>"))),
    };

    let now = Utc::now();
    let mut imported_count = 0usize;
    let mut skipped_count = 0usize;

    for (idx, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        // 1-based, counting the header.
        let line_no = idx + 2;

        let record = match row_to_record(&headers, parse_csv_line(line), now) {
            Ok(record) => record,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping csv row");
                skipped_count += 1;
                continue;
            }
        };

        match store.upsert(&record).await {
            Ok(()) => {
                imported_count += 1;
                if imported_count % PROGRESS_EVERY == 0 {
                    info!(imported = imported_count, "import progress");
                }
            }
            Err(err) => {
                warn!(line = line_no, video_id = %record.video_id, error = %err, "upsert failed");
                skipped_count += 1;
            }
        }
    }

    let total_in_store = store.count().await?;
    let top_videos = store.top_by_views(TOP_VIDEOS).await?;
    Ok(ImportSummary {
        imported_count,
        skipped_count,
        total_in_store,
        top_videos,
    })
}

pub async fn import_csv(path: &Path, store: &dyn VideoStore) -> Result<ImportSummary, CsvError> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("csv_import", %run_id, path = %path.display());
    async move {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CsvError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let summary = import_csv_str(&raw, store).await.map_err(|err| match err {
            CsvError::EmptyFile(_) => CsvError::EmptyFile(path.to_path_buf()),
            other => other,
        })?;
        info!(
            imported = summary.imported_count,
            skipped = summary.skipped_count,
            total = summary.total_in_store,
            "csv import finished"
        );
        Ok(summary)
    }
    .instrument(span)
    .await
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', ""))
    } else {
        value.to_string()
    }
}

fn timestamp_field(value: Option<DateTime<Utc>>) -> String {
    value.map(|dt| dt.to_rfc3339()).unwrap_or_default()
}

/// Renders rows the importer reads back unchanged, apart from embedded
/// double quotes, which the importer's quote rule cannot represent.
pub fn render_csv(videos: &[VideoRecord]) -> String {
    let mut out = CSV_HEADERS.join(",");
    out.push('\n');
    for video in videos {
        let fields = [
            csv_field(&video.video_id),
            csv_field(&video.video_url),
            csv_field(&video.title),
            csv_field(&video.description.replace(['\r', '\n'], " ")),
            csv_field(&video.thumbnail_url),
            csv_field(&video.channel),
            video.duration.to_string(),
            video.view_count.to_string(),
            video.difficulty.as_str().to_string(),
            csv_field(&video.tool),
            video.quality_score.to_string(),
            timestamp_field(video.published_at),
            timestamp_field(Some(video.scraped_at)),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

pub async fn export_csv(path: &Path, store: &dyn VideoStore) -> Result<usize, CsvError> {
    let videos = store.list_all().await?;
    tokio::fs::write(path, render_csv(&videos))
        .await
        .map_err(|source| CsvError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    info!(path = %path.display(), rows = videos.len(), "csv export written");
    Ok(videos.len())
}
