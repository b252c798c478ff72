//! Clock-protocol resolution.
//!
//! Several providers indirect through a secondary JSON manifest (the "clock"
//! endpoint) that carries the real stream links. When the first link is HLS
//! the top-level master manifest is expanded into per-quality variants.
//!
//! Every failure here degrades to an empty result; the outer resolver treats
//! zero links as "this source failed" and drops the provider silently.

use reqwest::{header, Client};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::models::{QualityLink, Subtitle};
use crate::services::hls;

#[derive(Debug, Default, Deserialize)]
struct ClockManifest {
    #[serde(default)]
    links: Vec<ClockLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClockLink {
    link: String,
    #[serde(default)]
    hls: bool,
    #[serde(default)]
    resolution_str: Option<String>,
    #[serde(default)]
    subtitles: Vec<ClockSubtitle>,
}

#[derive(Debug, Deserialize)]
struct ClockSubtitle {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    lang: Option<String>,
    src: String,
}

/// Outcome of resolving one clock URL
#[derive(Debug, Default)]
pub struct ClockResolution {
    pub links: Vec<QualityLink>,
    pub subtitles: Vec<Subtitle>,
}

pub struct ClockResolver {
    http: Client,
    referer: String,
    clock_timeout: Duration,
    manifest_timeout: Duration,
}

impl ClockResolver {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::REFERER, config.api_referer.parse()?);

        let http = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            referer: config.api_referer.clone(),
            clock_timeout: Duration::from_millis(config.clock_timeout_ms),
            manifest_timeout: Duration::from_millis(config.manifest_timeout_ms),
        })
    }

    /// Resolve a clock URL into quality links + subtitles. Never fails;
    /// fetch/parse errors come back as an empty resolution.
    pub async fn resolve(&self, clock_url: &str) -> ClockResolution {
        let manifest = match self.fetch_manifest(clock_url).await {
            Ok(m) => m,
            Err(e) => {
                warn!("clock fetch failed for {}: {}", clock_url, e);
                return ClockResolution::default();
            }
        };

        let Some(first) = manifest.links.first() else {
            return ClockResolution::default();
        };

        let subtitles = subtitle_tracks(&first.subtitles);

        let links = if first.hls {
            match self.fetch_hls_body(&first.link).await {
                Ok(body) => hls_variant_links(&body, &first.link, &self.referer),
                Err(e) => {
                    warn!("clock HLS manifest fetch failed for {}: {}", first.link, e);
                    Vec::new()
                }
            }
        } else {
            direct_links(&manifest.links, &self.referer)
        };

        ClockResolution { links, subtitles }
    }

    async fn fetch_manifest(&self, url: &str) -> reqwest::Result<ClockManifest> {
        self.http
            .get(url)
            .timeout(self.clock_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn fetch_hls_body(&self, url: &str) -> reqwest::Result<String> {
        self.http
            .get(url)
            .timeout(self.manifest_timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

fn referer_headers(referer: &str) -> HashMap<String, String> {
    HashMap::from([("Referer".to_string(), referer.to_string())])
}

fn subtitle_tracks(subtitles: &[ClockSubtitle]) -> Vec<Subtitle> {
    subtitles
        .iter()
        .map(|s| Subtitle {
            label: s
                .label
                .clone()
                .or_else(|| s.lang.clone())
                .unwrap_or_default(),
            src: s.src.clone(),
        })
        .collect()
}

/// Expand an HLS master body into quality links labeled "{height}p", sorted
/// by descending height. When no variants are found the original manifest URL
/// is kept as a single "auto" entry.
fn hls_variant_links(body: &str, manifest_url: &str, referer: &str) -> Vec<QualityLink> {
    let mut variants = hls::parse_variants(body, manifest_url);
    variants.sort_by(|a, b| b.height_px.cmp(&a.height_px));

    if variants.is_empty() {
        return vec![QualityLink {
            resolution_str: "auto".to_string(),
            link: manifest_url.to_string(),
            hls: true,
            headers: referer_headers(referer),
        }];
    }

    variants
        .into_iter()
        .map(|v| QualityLink {
            resolution_str: format!("{}p", v.height_px),
            link: v.url,
            hls: true,
            headers: referer_headers(referer),
        })
        .collect()
}

/// Map already-resolved direct links through as-is
fn direct_links(links: &[ClockLink], referer: &str) -> Vec<QualityLink> {
    links
        .iter()
        .map(|l| QualityLink {
            resolution_str: l
                .resolution_str
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            link: l.link.clone(),
            hls: l.hls,
            headers: referer_headers(referer),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERER: &str = "https://allanime.to";

    #[test]
    fn test_hls_variants_sorted_descending() {
        let body = "#EXTM3U\n\
#EXT-X-STREAM-INF:RESOLUTION=1280x720\n720.m3u8\n\
#EXT-X-STREAM-INF:RESOLUTION=1920x1080\n1080.m3u8\n\
#EXT-X-STREAM-INF:RESOLUTION=854x480\n480.m3u8\n";
        let links = hls_variant_links(body, "https://cdn.example.com/v/master.m3u8", REFERER);
        let labels: Vec<&str> = links.iter().map(|l| l.resolution_str.as_str()).collect();
        assert_eq!(labels, vec!["1080p", "720p", "480p"]);
        assert_eq!(links[0].link, "https://cdn.example.com/v/1080.m3u8");
        assert!(links.iter().all(|l| l.hls));
        assert_eq!(links[0].headers.get("Referer").unwrap(), REFERER);
    }

    #[test]
    fn test_hls_auto_fallback_when_no_variants() {
        let body = "#EXTM3U\n#EXTINF:4,\nseg0.ts\n";
        let links = hls_variant_links(body, "https://cdn.example.com/v/index.m3u8", REFERER);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].resolution_str, "auto");
        assert_eq!(links[0].link, "https://cdn.example.com/v/index.m3u8");
        assert!(links[0].hls);
    }

    #[test]
    fn test_direct_links_pass_through() {
        let manifest: ClockManifest = serde_json::from_str(
            r#"{"links":[
                {"link":"https://cdn/a.mp4","resolutionStr":"1080p"},
                {"link":"https://cdn/b.mp4"}
            ]}"#,
        )
        .unwrap();
        let links = direct_links(&manifest.links, REFERER);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].resolution_str, "1080p");
        assert_eq!(links[1].resolution_str, "default");
        assert!(!links[0].hls);
    }

    #[test]
    fn test_subtitles_prefer_label_over_lang() {
        let manifest: ClockManifest = serde_json::from_str(
            r#"{"links":[{"link":"x","subtitles":[
                {"label":"English","lang":"en","src":"https://cdn/en.vtt"},
                {"lang":"pt","src":"https://cdn/pt.vtt"}
            ]}]}"#,
        )
        .unwrap();
        let tracks = subtitle_tracks(&manifest.links[0].subtitles);
        assert_eq!(tracks[0].label, "English");
        assert_eq!(tracks[1].label, "pt");
        assert_eq!(tracks[1].src, "https://cdn/pt.vtt");
    }
}
