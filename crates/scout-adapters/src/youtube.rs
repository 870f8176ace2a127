//! YouTube Data API v3 client: one `search` call plus one `videos` call per page.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scout_core::{detect_difficulty, detect_series, parse_duration, quality_score, ScoutConfig};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{SearchError, SearchPage, SearchProvider, SearchQuery, SearchVideo};

pub const PAGE_SIZE: u32 = 12;

#[derive(Debug, Clone)]
pub struct YouTubeDataApi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl YouTubeDataApi {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, SearchError> {
        if api_key.trim().is_empty() {
            return Err(SearchError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ScoutConfig) -> Result<Self, SearchError> {
        let key = config
            .youtube_api_key
            .as_deref()
            .ok_or(SearchError::MissingApiKey)?;
        Self::new(
            key,
            &config.youtube_api_base,
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, SearchError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, path, "youtube api returned an error");
            return Err(SearchError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl SearchProvider for YouTubeDataApi {
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        info!(search_query = %query.text, tool = %query.tool, "youtube search");

        let max_results = PAGE_SIZE.to_string();
        let mut params = vec![
            ("part", "snippet"),
            ("type", "video"),
            ("order", "relevance"),
            ("maxResults", max_results.as_str()),
            ("q", query.text.as_str()),
        ];
        if let Some(token) = query.page_token.as_deref() {
            params.push(("pageToken", token));
        }
        let listing: SearchListResponse = self.get_json("search", &params).await?;

        let ids = listing
            .items
            .iter()
            .filter_map(|item| item.id.video_id.as_deref())
            .collect::<Vec<_>>()
            .join(",");
        let details = if ids.is_empty() {
            VideoListResponse::default()
        } else {
            self.get_json(
                "videos",
                &[("part", "contentDetails,statistics"), ("id", ids.as_str())],
            )
            .await?
        };

        let page = assemble_page(listing, details, query);
        debug!(count = page.videos.len(), "youtube search mapped");
        Ok(page)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    channel_title: String,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    content_details: Option<ContentDetails>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    #[serde(default)]
    duration: String,
}

// The API encodes counters as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
}

fn assemble_page(
    listing: SearchListResponse,
    details: VideoListResponse,
    query: &SearchQuery,
) -> SearchPage {
    let details: HashMap<String, VideoItem> = details
        .items
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect();

    let videos = listing
        .items
        .into_iter()
        .filter_map(|item| {
            let video_id = item.id.video_id?;
            let detail = details.get(&video_id);
            let duration = detail
                .and_then(|d| d.content_details.as_ref())
                .map(|c| parse_duration(&c.duration))
                .unwrap_or(0);
            let views = detail
                .and_then(|d| d.statistics.as_ref())
                .and_then(|s| s.view_count.as_deref())
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);

            let snippet = item.snippet;
            let series = detect_series(&snippet.title);
            if series.is_series {
                debug!(title = %snippet.title, series_type = ?series.series_type, "series detected");
            }
            let thumbnail = snippet
                .thumbnails
                .medium
                .or(snippet.thumbnails.default)
                .map(|t| t.url);

            Some(SearchVideo {
                id: video_id.clone(),
                difficulty: detect_difficulty(
                    &snippet.title,
                    &snippet.description,
                    query.difficulty.as_deref(),
                ),
                quality_score: quality_score(views, duration, &snippet.title, &snippet.description),
                title: snippet.title,
                description: snippet.description,
                thumbnail,
                channel: snippet.channel_title,
                published_at: snippet.published_at,
                video_id,
                duration,
                views,
                series,
            })
        })
        .collect();

    SearchPage {
        videos,
        cached: false,
        search_query: query.text.clone(),
        next_page_token: listing.next_page_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::Difficulty;
    use serde_json::json;

    fn query(difficulty: Option<&str>) -> SearchQuery {
        SearchQuery {
            text: "zapier basics".into(),
            tool: "zapier".into(),
            difficulty: difficulty.map(str::to_string),
            page_token: None,
        }
    }

    fn listing() -> SearchListResponse {
        serde_json::from_value(json!({
            "nextPageToken": "CAwQAA",
            "items": [
                {
                    "id": { "kind": "youtube#video", "videoId": "vid1" },
                    "snippet": {
                        "title": "Zapier Tutorial Part 3: Filters",
                        "description": "Learn filters",
                        "channelTitle": "Automation Academy",
                        "publishedAt": "2024-02-01T12:00:00Z",
                        "thumbnails": {
                            "default": { "url": "https://i.ytimg.com/vi/vid1/default.jpg" },
                            "medium": { "url": "https://i.ytimg.com/vi/vid1/mqdefault.jpg" }
                        }
                    }
                },
                {
                    "id": { "kind": "youtube#channel", "channelId": "chan" },
                    "snippet": { "title": "A channel" }
                },
                {
                    "id": { "videoId": "vid2" },
                    "snippet": {
                        "title": "Advanced Enterprise Automation",
                        "description": "",
                        "channelTitle": "Ops",
                        "thumbnails": {}
                    }
                }
            ]
        }))
        .unwrap()
    }

    fn details() -> VideoListResponse {
        serde_json::from_value(json!({
            "items": [
                {
                    "id": "vid1",
                    "contentDetails": { "duration": "PT1H2M3S" },
                    "statistics": { "viewCount": "123456" }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn page_maps_details_and_skips_non_video_items() {
        let page = assemble_page(listing(), details(), &query(None));
        assert_eq!(page.search_query, "zapier basics");
        assert_eq!(page.next_page_token.as_deref(), Some("CAwQAA"));
        assert_eq!(page.videos.len(), 2);

        let first = &page.videos[0];
        assert_eq!(first.video_id, "vid1");
        assert_eq!(first.duration, 3723);
        assert_eq!(first.views, 123456);
        assert_eq!(
            first.thumbnail.as_deref(),
            Some("https://i.ytimg.com/vi/vid1/mqdefault.jpg")
        );
        assert!(first.series.is_series);
        assert_eq!(first.series.series_number, Some(3));

        let second = &page.videos[1];
        assert_eq!(second.duration, 0);
        assert_eq!(second.views, 0);
        assert_eq!(second.difficulty, Difficulty::Advanced);
        assert!(second.thumbnail.is_none());
        assert!(second.published_at.is_none());
    }

    #[test]
    fn requested_tier_overrides_detection() {
        let page = assemble_page(listing(), details(), &query(Some("beginner")));
        assert_eq!(page.videos[1].difficulty, Difficulty::Beginner);
    }

    #[test]
    fn blank_api_key_is_rejected() {
        let err = YouTubeDataApi::new(" ", "http://localhost", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SearchError::MissingApiKey));
    }
}
