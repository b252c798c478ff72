use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One raw source entry as returned by the upstream GraphQL API.
/// `source_url` is obfuscated (prefixed with the `--` marker) for the
/// providers we care about; entries without the marker are skipped.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSource {
    pub source_name: String,
    pub source_url: String,
    #[serde(default)]
    pub priority: f64,
}

/// One playable link at a specific quality
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityLink {
    /// Quality label: "1080p", "720", "auto", "default"
    pub resolution_str: String,
    /// Absolute URL
    pub link: String,
    #[serde(default)]
    pub hls: bool,
    /// Request headers the player must send (typically a Referer)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Subtitle track attached to a resolved source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subtitle {
    #[serde(default)]
    pub label: String,
    pub src: String,
}

/// Final per-provider resolution result returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSource {
    pub source_name: String,
    pub links: Vec<QualityLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtitles: Vec<Subtitle>,
}

/// Source resolution error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No raw source carried the obfuscation marker
    #[error("no sources found for this episode")]
    NoSourcesFound,
    /// Every trusted source resolved to zero links
    #[error("no playable sources found")]
    NoPlayableSources,
    /// Upstream GraphQL query failed
    #[error("upstream error: {0}")]
    Upstream(String),
}
