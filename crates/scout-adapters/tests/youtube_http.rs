use std::collections::HashMap;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use scout_adapters::{SearchError, SearchProvider, SearchQuery, YouTubeDataApi};
use serde_json::{json, Value};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn search(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    assert_eq!(params.get("key").map(String::as_str), Some("test-key"));
    assert_eq!(params.get("maxResults").map(String::as_str), Some("12"));
    let token = params.get("pageToken").cloned().unwrap_or_default();
    Json(json!({
        "nextPageToken": if token.is_empty() { Value::from("page2") } else { Value::Null },
        "items": [{
            "id": { "videoId": format!("v-{}", params["q"].replace(' ', "-")) },
            "snippet": {
                "title": "Zapier for Beginners",
                "description": "",
                "channelTitle": "Scout",
                "thumbnails": {}
            }
        }]
    }))
}

async fn videos(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    assert_eq!(
        params.get("part").map(String::as_str),
        Some("contentDetails,statistics")
    );
    Json(json!({
        "items": [{
            "id": params["id"],
            "contentDetails": { "duration": "PT10M" },
            "statistics": { "viewCount": "5000" }
        }]
    }))
}

#[tokio::test]
async fn search_runs_both_calls_and_maps_results() {
    let base = serve(
        Router::new()
            .route("/search", get(search))
            .route("/videos", get(videos)),
    )
    .await;
    let api = YouTubeDataApi::new("test-key", &base, Duration::from_secs(5)).unwrap();

    let page = api
        .search(&SearchQuery {
            text: "zapier basics".into(),
            tool: "zapier".into(),
            ..SearchQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(page.next_page_token.as_deref(), Some("page2"));
    assert_eq!(page.videos.len(), 1);
    let video = &page.videos[0];
    assert_eq!(video.video_id, "v-zapier-basics");
    assert_eq!(video.duration, 600);
    assert_eq!(video.views, 5000);
    assert_eq!(video.difficulty.as_str(), "beginner");
}

#[tokio::test]
async fn non_success_status_surfaces_provider_body() {
    let base = serve(Router::new().route(
        "/search",
        get(|| async { (StatusCode::FORBIDDEN, "quotaExceeded") }),
    ))
    .await;
    let api = YouTubeDataApi::new("test-key", &base, Duration::from_secs(5)).unwrap();

    let err = api
        .search(&SearchQuery {
            text: "n8n tutorial".into(),
            tool: "n8n".into(),
            ..SearchQuery::default()
        })
        .await
        .unwrap_err();

    match err {
        SearchError::Upstream { status, body } => {
            assert_eq!(status, 403);
            assert_eq!(body, "quotaExceeded");
        }
        other => panic!("unexpected error: {other}"),
    }
}
