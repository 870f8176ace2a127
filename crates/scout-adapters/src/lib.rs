//! Video search providers and the search-phrase table that drives them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scout_core::{Difficulty, SeriesInfo, VideoRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod terms;
pub mod youtube;

pub use terms::{JobTerm, SearchTermTable, TermTableError};
pub use youtube::YouTubeDataApi;

pub const CRATE_NAME: &str = "scout-adapters";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("YOUTUBE_API_KEY is not configured")]
    MissingApiKey,
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search provider returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("unexpected search response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One page request against a provider. `text` is the final query string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchQuery {
    pub text: String,
    pub tool: String,
    pub difficulty: Option<String>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchVideo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub channel: String,
    pub published_at: Option<DateTime<Utc>>,
    pub video_id: String,
    pub duration: i64,
    pub difficulty: Difficulty,
    pub views: i64,
    pub quality_score: f64,
    #[serde(flatten)]
    pub series: SeriesInfo,
}

impl SearchVideo {
    pub fn to_record(&self, tool: &str, scraped_at: DateTime<Utc>) -> VideoRecord {
        VideoRecord {
            video_id: self.video_id.clone(),
            video_url: VideoRecord::watch_url(&self.video_id),
            title: self.title.clone(),
            description: self.description.clone(),
            thumbnail_url: self.thumbnail.clone().unwrap_or_default(),
            channel: self.channel.clone(),
            duration: self.duration,
            view_count: self.views.max(0),
            difficulty: self.difficulty,
            tool: tool.to_string(),
            quality_score: self.quality_score,
            published_at: self.published_at,
            scraped_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub videos: Vec<SearchVideo>,
    pub cached: bool,
    pub search_query: String,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn search_video_serializes_flat_camel_case() {
        let video = SearchVideo {
            id: "abc".into(),
            title: "n8n Day 2".into(),
            description: String::new(),
            thumbnail: None,
            channel: "ch".into(),
            published_at: None,
            video_id: "abc".into(),
            duration: 90,
            difficulty: Difficulty::Intermediate,
            views: 10,
            quality_score: 25.0,
            series: scout_core::detect_series("n8n Day 2"),
        };
        let value = serde_json::to_value(&video).unwrap();
        assert_eq!(value["videoId"], "abc");
        assert_eq!(value["qualityScore"], 25.0);
        assert_eq!(value["difficulty"], "intermediate");
        assert_eq!(value["isSeries"], true);
        assert_eq!(value["seriesNumber"], 2);
    }

    #[test]
    fn to_record_builds_watch_url_and_clamps_views() {
        let video = SearchVideo {
            id: "xyz".into(),
            title: "t".into(),
            description: "d".into(),
            thumbnail: Some("thumb".into()),
            channel: "c".into(),
            published_at: None,
            video_id: "xyz".into(),
            duration: 10,
            difficulty: Difficulty::Beginner,
            views: -4,
            quality_score: 5.0,
            series: SeriesInfo::none(),
        };
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let record = video.to_record("make", at);
        assert_eq!(record.video_url, "https://www.youtube.com/watch?v=xyz");
        assert_eq!(record.view_count, 0);
        assert_eq!(record.tool, "make");
        assert_eq!(record.thumbnail_url, "thumb");
        assert_eq!(record.scraped_at, at);
    }
}
