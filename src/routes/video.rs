use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::ResolveError;
use crate::AppState;

fn default_mode() -> String {
    "sub".to_string()
}

/// Query parameters for source resolution
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoQuery {
    pub show_id: String,
    pub episode_number: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

/// GET /video?showId=...&episodeNumber=...&mode=sub|dub
/// Resolves every playable source for an episode.
pub async fn get_video(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VideoQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if query.show_id.is_empty() || query.episode_number.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "showId and episodeNumber are required" })),
        ));
    }

    match state
        .resolver
        .resolve(&query.show_id, &query.episode_number, &query.mode)
        .await
    {
        Ok(sources) => Ok(Json(sources)),
        Err(ResolveError::NoSourcesFound) => {
            tracing::info!(
                "no sources for show={} ep={} mode={}",
                query.show_id,
                query.episode_number,
                query.mode
            );
            Err((
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "No sources found for this episode" })),
            ))
        }
        Err(e) => {
            tracing::error!(
                "source resolution failed for show={} ep={}: {}",
                query.show_id,
                query.episode_number,
                e
            );
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to resolve video sources" })),
            ))
        }
    }
}
