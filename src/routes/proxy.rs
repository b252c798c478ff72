use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use urlencoding::encode;

use crate::services::hls;
use crate::AppState;

// Re-export reqwest header module to avoid version conflicts
mod reqwest_header {
    pub use reqwest::header::{
        ACCEPT, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED, RANGE, REFERER,
    };
}

/// Query parameters for the streaming proxy
#[derive(Deserialize)]
pub struct ProxyQuery {
    pub url: String,
    #[serde(default)]
    pub referer: Option<String>,
}

/// Guess content type from URL
pub fn guess_content_type(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    if lower.contains(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if lower.contains(".mp4") {
        "video/mp4"
    } else if lower.contains(".mkv") {
        "video/x-matroska"
    } else if lower.contains(".webm") {
        "video/webm"
    } else {
        "video/MP2T"
    }
}

/// Validate URL is HTTP/HTTPS
pub fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Whether the URL's path points at an HLS manifest
pub fn is_manifest_url(url: &str) -> bool {
    url.split(['?', '#'])
        .next()
        .map(|path| path.ends_with(".m3u8"))
        .unwrap_or(false)
}

/// Rewrite a manifest so every URI line round-trips back through /proxy.
/// Comment/tag lines pass through untouched; URI lines are resolved against
/// the manifest's own URL before being wrapped.
pub fn rewrite_manifest(body: &str, manifest_url: &str, referer: Option<&str>) -> String {
    body.lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                line.to_string()
            } else {
                let absolute = hls::join_url(manifest_url, trimmed);
                match referer {
                    Some(r) => format!("/proxy?url={}&referer={}", encode(&absolute), encode(r)),
                    None => format!("/proxy?url={}", encode(&absolute)),
                }
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

type ProxyError = (StatusCode, Json<serde_json::Value>);

fn internal_error(msg: &str) -> ProxyError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": msg })),
    )
}

/// GET /proxy?url=<encoded>&referer=<optional>
/// Manifest URLs are fetched and rewritten so nested playlists and segments
/// stay proxied; everything else streams through unmodified. Dropping the
/// client connection drops the response body, which aborts the upstream
/// request.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    if query.url.is_empty() || !is_valid_http_url(&query.url) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Invalid url parameter" })),
        ));
    }

    let client = Client::builder()
        .timeout(Duration::from_millis(state.config.proxy_timeout_ms))
        .user_agent(&state.config.user_agent)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| {
            tracing::error!("Failed to create HTTP client: {}", e);
            internal_error("Internal error")
        })?;

    // Build upstream request
    let mut request = client.get(&query.url);

    if let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
        request = request.header(reqwest_header::ACCEPT, accept);
    } else {
        request = request.header(reqwest_header::ACCEPT, "*/*");
    }

    // Forward Range header for partial content requests
    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        request = request.header(reqwest_header::RANGE, range);
    }

    if let Some(ref referer) = query.referer {
        request = request.header(reqwest_header::REFERER, referer);
    }

    let upstream_response = request.send().await.map_err(|e| {
        let status = if e.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        tracing::error!("proxy error for {}: {}", query.url, e);
        (
            status,
            Json(serde_json::json!({
                "error": "Failed to reach upstream",
                "detail": e.to_string()
            })),
        )
    })?;

    let upstream_status = upstream_response.status();

    // Manifest branch: rewrite instead of streaming
    if is_manifest_url(&query.url) && upstream_status.is_success() {
        let manifest_url = upstream_response.url().to_string();
        let body = upstream_response.text().await.map_err(|e| {
            tracing::error!("failed to read manifest {}: {}", query.url, e);
            internal_error("Failed to read manifest")
        })?;

        let rewritten = rewrite_manifest(&body, &manifest_url, query.referer.as_deref());

        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
            .header(header::CACHE_CONTROL, "no-store")
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(Body::from(rewritten))
            .map_err(|e| {
                tracing::error!("Failed to build response: {}", e);
                internal_error("Internal error")
            });
    }

    // Passthrough branch
    let content_type = upstream_response
        .headers()
        .get(reqwest_header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| guess_content_type(&query.url).to_string());

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        content_type
            .parse()
            .unwrap_or_else(|_| "video/MP2T".parse().unwrap()),
    );
    response_headers.insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
    response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".parse().unwrap());
    response_headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        "Content-Length, Content-Type, Accept-Ranges"
            .parse()
            .unwrap(),
    );

    // Reflect useful upstream headers
    for (reqwest_key, axum_key) in [
        (reqwest_header::CONTENT_LENGTH, header::CONTENT_LENGTH),
        (reqwest_header::ACCEPT_RANGES, header::ACCEPT_RANGES),
        (reqwest_header::ETAG, header::ETAG),
        (reqwest_header::LAST_MODIFIED, header::LAST_MODIFIED),
    ] {
        if let Some(value) = upstream_response
            .headers()
            .get(reqwest_key)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(parsed) = value.parse() {
                response_headers.insert(axum_key, parsed);
            }
        }
    }

    let body = Body::from_stream(upstream_response.bytes_stream());

    let mut response = Response::builder()
        .status(StatusCode::from_u16(upstream_status.as_u16()).unwrap_or(StatusCode::OK));
    for (key, value) in response_headers.iter() {
        response = response.header(key, value);
    }

    response.body(body).map_err(|e| {
        tracing::error!("Failed to build response: {}", e);
        internal_error("Internal error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_manifest_wraps_uri_lines_only() {
        let body = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXTINF:6.0,\n\
https://cdn.example.com/seg1.ts\n";
        let out = rewrite_manifest(
            body,
            "https://host/a.m3u8",
            Some("https://allanime.to"),
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-TARGETDURATION:6");
        assert_eq!(lines[2], "#EXTINF:6.0,");
        assert_eq!(
            lines[3],
            "/proxy?url=https%3A%2F%2Fhost%2Fseg0.ts&referer=https%3A%2F%2Fallanime.to"
        );
        assert_eq!(
            lines[5],
            "/proxy?url=https%3A%2F%2Fcdn.example.com%2Fseg1.ts&referer=https%3A%2F%2Fallanime.to"
        );
    }

    #[test]
    fn test_rewrite_manifest_without_referer() {
        let out = rewrite_manifest("seg0.ts\n", "https://host/v/a.m3u8", None);
        assert_eq!(out, "/proxy?url=https%3A%2F%2Fhost%2Fv%2Fseg0.ts");
    }

    #[test]
    fn test_is_manifest_url_checks_path_only() {
        assert!(is_manifest_url("https://host/a.m3u8"));
        assert!(is_manifest_url("https://host/a.m3u8?sig=x"));
        assert!(!is_manifest_url("https://host/a.ts?name=x.m3u8"));
        assert!(!is_manifest_url("https://host/a.mp4"));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("https://h/a.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(guess_content_type("https://h/a.mp4"), "video/mp4");
        assert_eq!(guess_content_type("https://h/a.ts"), "video/MP2T");
    }

    #[test]
    fn test_is_valid_http_url() {
        assert!(is_valid_http_url("https://h/a"));
        assert!(is_valid_http_url("http://h/a"));
        assert!(!is_valid_http_url("ftp://h/a"));
        assert!(!is_valid_http_url(""));
    }
}
