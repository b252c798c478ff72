use async_stream::stream;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::routes::proxy::{guess_content_type, is_manifest_url, is_valid_http_url};
use crate::services::hls;
use crate::AppState;

/// Query parameters for file download
#[derive(Deserialize)]
pub struct DownloadQuery {
    pub url: String,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

type DownloadError = (StatusCode, Json<serde_json::Value>);

/// Strip characters that would break a Content-Disposition header or
/// smuggle a path
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '/' | '\\' | '"' | '\''))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}

fn download_filename(query_name: Option<&str>, hls: bool) -> String {
    let base = sanitize_filename(query_name.unwrap_or("video"));
    if base.contains('.') {
        base
    } else if hls {
        format!("{}.ts", base)
    } else {
        format!("{}.mp4", base)
    }
}

fn build_client(state: &AppState, referer: Option<&str>) -> Result<Client, DownloadError> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(referer) = referer {
        if let Ok(value) = referer.parse() {
            headers.insert(reqwest::header::REFERER, value);
        }
    }

    Client::builder()
        .user_agent(&state.config.user_agent)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| {
            tracing::error!("Failed to create HTTP client: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal error" })),
            )
        })
}

/// GET /api/download-video?url=<encoded>&referer=<optional>&filename=<optional>
///
/// HLS sources are remuxed server-side: the media playlist is resolved and
/// every segment (init first, when present) is concatenated into one raw
/// MPEG-TS response. A segment failure mid-stream can only truncate the
/// file since headers are already committed. Client disconnects drop the
/// body stream, which aborts whichever segment fetch is in flight.
pub async fn download_video(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, DownloadError> {
    if query.url.is_empty() || !is_valid_http_url(&query.url) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Missing url parameter" })),
        ));
    }

    let client = build_client(&state, query.referer.as_deref())?;

    if is_manifest_url(&query.url) {
        download_hls(&state, client, &query).await
    } else {
        download_file(&state, client, &query, &headers).await
    }
}

async fn download_hls(
    state: &AppState,
    client: Client,
    query: &DownloadQuery,
) -> Result<Response, DownloadError> {
    let playlist = hls::resolve_media_playlist(&client, &query.url)
        .await
        .map_err(|e| {
            tracing::error!("playlist resolution failed for {}: {:#}", query.url, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to resolve HLS playlist" })),
            )
        })?;

    let mut urls = Vec::with_capacity(playlist.segment_urls.len() + 1);
    if let Some(init) = playlist.init_segment_url {
        urls.push(init);
    }
    urls.extend(playlist.segment_urls);

    tracing::info!("remuxing {} segment(s) from {}", urls.len(), query.url);

    let segment_timeout = Duration::from_millis(state.config.segment_timeout_ms);
    let filename = download_filename(query.filename.as_deref(), true);

    let body_stream = stream! {
        for url in urls {
            let result = client
                .get(&url)
                .timeout(segment_timeout)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    // Headers are already out; the client sees a truncated file
                    tracing::error!("segment fetch failed mid-download ({}): {}", url, e);
                    yield Err(e);
                    return;
                }
            };

            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        tracing::error!("segment stream failed mid-download ({}): {}", url, e);
                        yield Err(e);
                        return;
                    }
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp2t")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Body::from_stream(body_stream))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal error" })),
            )
        })
}

/// Byte-range-aware single-file passthrough for non-HLS links
async fn download_file(
    state: &AppState,
    client: Client,
    query: &DownloadQuery,
    headers: &HeaderMap,
) -> Result<Response, DownloadError> {
    let mut request = client
        .get(&query.url)
        .timeout(Duration::from_millis(state.config.proxy_timeout_ms));

    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        request = request.header(reqwest::header::RANGE, range);
    }

    let upstream_response = request.send().await.map_err(|e| {
        let status = if e.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        tracing::error!("download error for {}: {}", query.url, e);
        (
            status,
            Json(serde_json::json!({
                "error": "Failed to reach upstream",
                "detail": e.to_string()
            })),
        )
    })?;

    let upstream_status = upstream_response.status();
    let content_type = upstream_response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| guess_content_type(&query.url).to_string());

    let filename = download_filename(query.filename.as_deref(), false);

    let mut response = Response::builder()
        .status(StatusCode::from_u16(upstream_status.as_u16()).unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");

    for (reqwest_key, axum_key) in [
        (reqwest::header::CONTENT_LENGTH, header::CONTENT_LENGTH),
        (reqwest::header::ACCEPT_RANGES, header::ACCEPT_RANGES),
        (reqwest::header::CONTENT_RANGE, header::CONTENT_RANGE),
    ] {
        if let Some(value) = upstream_response
            .headers()
            .get(reqwest_key)
            .and_then(|v| v.to_str().ok())
        {
            response = response.header(axum_key, value);
        }
    }

    response
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| {
            tracing::error!("Failed to build response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal error" })),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_strips_unsafe_chars() {
        assert_eq!(sanitize_filename("ep \"01\"/../x"), "ep 01..x");
        assert_eq!(sanitize_filename(""), "video");
        assert_eq!(sanitize_filename("   "), "video");
    }

    #[test]
    fn test_download_filename_extension() {
        assert_eq!(download_filename(None, true), "video.ts");
        assert_eq!(download_filename(None, false), "video.mp4");
        assert_eq!(download_filename(Some("Show E01"), true), "Show E01.ts");
        assert_eq!(download_filename(Some("custom.mkv"), true), "custom.mkv");
    }
}
