//! Upstream GraphQL API client
//!
//! HTTP client for the anime catalog API that serves per-episode source
//! lists. Queries go out as GET requests with URL-encoded `variables` and
//! `query` parameters.

use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use urlencoding::encode;

use crate::config::Config;
use crate::models::{RawSource, ResolveError};

const EPISODE_QUERY: &str = r#"query($showId: String!, $translationType: VaildTranslationTypeEnumType!, $episodeString: String!) {
    episode(showId: $showId, translationType: $translationType, episodeString: $episodeString) {
        sourceUrls
    }
}"#;

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<EpisodeData>,
}

#[derive(Deserialize)]
struct EpisodeData {
    #[serde(default)]
    episode: Option<EpisodeSources>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeSources {
    #[serde(default)]
    source_urls: Vec<RawSource>,
}

/// Client for the upstream GraphQL API
pub struct UpstreamClient {
    http: Client,
    api_url: String,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::REFERER, config.api_referer.parse()?);

        let http = Client::builder()
            .timeout(Duration::from_millis(config.graphql_timeout_ms))
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
        })
    }

    /// Fetch the raw source list for one episode.
    /// `mode` is the translation type ("sub" or "dub").
    pub async fn episode_sources(
        &self,
        show_id: &str,
        episode_number: &str,
        mode: &str,
    ) -> Result<Vec<RawSource>, ResolveError> {
        let variables = json!({
            "showId": show_id,
            "translationType": mode,
            "episodeString": episode_number,
        });

        let url = format!(
            "{}?variables={}&query={}",
            self.api_url,
            encode(&variables.to_string()),
            encode(EPISODE_QUERY)
        );

        debug!("GraphQL episode query: show={} ep={} mode={}", show_id, episode_number, mode);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ResolveError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Upstream(format!("HTTP {}", status.as_u16())));
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::Upstream(format!("bad GraphQL response: {}", e)))?;

        Ok(body
            .data
            .and_then(|d| d.episode)
            .map(|e| e.source_urls)
            .unwrap_or_default())
    }
}
