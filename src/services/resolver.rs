//! Per-episode source resolution.
//!
//! Fetches the raw source list from the upstream API, keeps the obfuscated
//! entries from trusted providers, and resolves each one concurrently into
//! quality-labeled links. One provider failing never affects the others;
//! a provider that yields zero links is silently dropped.

use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{QualityLink, RawSource, ResolveError, ResolvedSource};
use crate::services::allanime::UpstreamClient;
use crate::services::cache::{cache_key, SourceCache};
use crate::services::clock::ClockResolver;
use crate::services::deobfuscate::{self, OBFUSCATION_MARKER};
use crate::services::wixmp::{self, WIXMP_REPACKAGER_HOST};

/// Providers eligible for resolution; anything else is ignored even when
/// its URL is well-formed
const TRUSTED_SOURCES: &[&str] = &["Default", "wixmp", "Yt-mp4", "S-mp4", "Luf-Mp4"];

/// Shape of a decoded source URL, deciding which resolution path runs
#[derive(Debug, Clone, PartialEq)]
enum LinkShape {
    /// Clock-protocol manifest (URL normalized to the .json form)
    Clock(String),
    /// Wixmp repackager template
    Wixmp,
    /// Single direct link
    Direct,
}

fn classify(decoded_url: &str) -> LinkShape {
    if decoded_url.contains("/clock") {
        let normalized = if decoded_url.contains("/clock.json") {
            decoded_url.to_string()
        } else {
            decoded_url.replacen("/clock", "/clock.json", 1)
        };
        LinkShape::Clock(normalized)
    } else if decoded_url.contains(WIXMP_REPACKAGER_HOST) {
        LinkShape::Wixmp
    } else {
        LinkShape::Direct
    }
}

fn is_trusted(source_name: &str) -> bool {
    TRUSTED_SOURCES.contains(&source_name)
}

/// Keep obfuscated entries and rank by priority, highest first. The sort is
/// stable, so equal priorities preserve upstream order.
fn kept_sources(raw: Vec<RawSource>) -> Result<Vec<RawSource>, ResolveError> {
    let mut kept: Vec<RawSource> = raw
        .into_iter()
        .filter(|s| s.source_url.starts_with(OBFUSCATION_MARKER))
        .collect();

    if kept.is_empty() {
        return Err(ResolveError::NoSourcesFound);
    }

    kept.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(Ordering::Equal));
    Ok(kept)
}

pub struct SourceResolver {
    upstream: UpstreamClient,
    clock: ClockResolver,
    cache: SourceCache,
    content_mirror: String,
    referer: String,
}

impl SourceResolver {
    pub fn new(config: &Config, cache: SourceCache) -> anyhow::Result<Self> {
        Ok(Self {
            upstream: UpstreamClient::new(config)?,
            clock: ClockResolver::new(config)?,
            cache,
            content_mirror: config.content_mirror.clone(),
            referer: config.api_referer.clone(),
        })
    }

    /// Resolve every playable source for one episode, cached with a short TTL
    pub async fn resolve(
        &self,
        show_id: &str,
        episode_number: &str,
        mode: &str,
    ) -> Result<Vec<ResolvedSource>, ResolveError> {
        let key = cache_key(show_id, episode_number, mode);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("source cache hit for show={} ep={}", show_id, episode_number);
            return Ok(cached);
        }

        let raw = self
            .upstream
            .episode_sources(show_id, episode_number, mode)
            .await?;
        let kept = kept_sources(raw)?;

        let trusted: Vec<RawSource> = kept
            .into_iter()
            .filter(|s| {
                let ok = is_trusted(&s.source_name);
                if !ok {
                    debug!("skipping untrusted source {}", s.source_name);
                }
                ok
            })
            .collect();

        // All resolutions settle independently; one failing provider must
        // not abort the rest.
        let results = join_all(trusted.iter().map(|s| self.resolve_one(s))).await;
        let resolved: Vec<ResolvedSource> = results.into_iter().flatten().collect();

        if resolved.is_empty() {
            return Err(ResolveError::NoPlayableSources);
        }

        info!(
            "resolved {} source(s) for show={} ep={} mode={}",
            resolved.len(),
            show_id,
            episode_number,
            mode
        );
        self.cache.insert(&key, resolved.clone()).await;
        Ok(resolved)
    }

    /// Resolve one raw source; `None` when it contributes nothing
    async fn resolve_one(&self, source: &RawSource) -> Option<ResolvedSource> {
        let decoded = deobfuscate::decode(&source.source_url, &self.content_mirror);

        let (links, subtitles) = match classify(&decoded) {
            LinkShape::Clock(clock_url) => {
                let resolution = self.clock.resolve(&clock_url).await;
                (resolution.links, resolution.subtitles)
            }
            LinkShape::Wixmp => (wixmp::expand(&decoded), Vec::new()),
            LinkShape::Direct => (vec![self.direct_link(&decoded)], Vec::new()),
        };

        if links.is_empty() {
            warn!("source {} resolved to zero links", source.source_name);
            return None;
        }

        Some(ResolvedSource {
            source_name: source.source_name.clone(),
            links,
            subtitles,
        })
    }

    fn direct_link(&self, decoded_url: &str) -> QualityLink {
        let path = decoded_url.split(['?', '#']).next().unwrap_or(decoded_url);
        QualityLink {
            resolution_str: "default".to_string(),
            link: decoded_url.to_string(),
            hls: path.ends_with(".m3u8"),
            headers: HashMap::from([("Referer".to_string(), self.referer.clone())]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, url: &str, priority: f64) -> RawSource {
        RawSource {
            source_name: name.to_string(),
            source_url: url.to_string(),
            priority,
        }
    }

    #[test]
    fn test_kept_sources_filters_marker_and_sorts_by_priority() {
        let kept = kept_sources(vec![
            raw("Default", "--5d5d", 7.0),
            raw("plain", "https://no-marker.example.com/x", 99.0),
            raw("wixmp", "--5a5a", 9.5),
        ])
        .unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].source_name, "wixmp");
        assert_eq!(kept[1].source_name, "Default");
    }

    #[test]
    fn test_kept_sources_tie_break_preserves_upstream_order() {
        let kept = kept_sources(vec![
            raw("S-mp4", "--01", 5.0),
            raw("Luf-Mp4", "--02", 5.0),
        ])
        .unwrap();
        assert_eq!(kept[0].source_name, "S-mp4");
        assert_eq!(kept[1].source_name, "Luf-Mp4");
    }

    #[test]
    fn test_no_sources_found_when_all_lack_marker() {
        let err = kept_sources(vec![
            raw("Default", "https://plain.example.com/a", 1.0),
            raw("wixmp", "http://plain.example.com/b", 2.0),
        ])
        .unwrap_err();
        assert!(matches!(err, ResolveError::NoSourcesFound));
    }

    #[test]
    fn test_trusted_set() {
        for name in ["Default", "wixmp", "Yt-mp4", "S-mp4", "Luf-Mp4"] {
            assert!(is_trusted(name));
        }
        assert!(!is_trusted("Sak"));
        assert!(!is_trusted("default"));
    }

    #[test]
    fn test_classify_clock_normalizes_suffix() {
        assert_eq!(
            classify("https://allanime.day/apivtwo/clock?id=abc"),
            LinkShape::Clock("https://allanime.day/apivtwo/clock.json?id=abc".to_string())
        );
        assert_eq!(
            classify("https://allanime.day/apivtwo/clock.json?id=abc"),
            LinkShape::Clock("https://allanime.day/apivtwo/clock.json?id=abc".to_string())
        );
    }

    fn test_resolver() -> SourceResolver {
        let config = Config::from_env();
        SourceResolver::new(&config, SourceCache::new(60_000, 4)).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_one_wixmp_expands_qualities() {
        let plain = "https://repackager.wixmp.com/video.wixstatic.com/mp4/abc/,1080,480,/mp4/file.mp4.urlset/master.m3u8";
        let source = raw("wixmp", &deobfuscate::encode(plain), 1.0);

        let resolved = test_resolver().resolve_one(&source).await.unwrap();
        assert_eq!(resolved.source_name, "wixmp");
        assert_eq!(resolved.links.len(), 2);
        assert_eq!(resolved.links[0].resolution_str, "1080");
        assert_eq!(resolved.links[1].resolution_str, "480");
        assert_eq!(
            resolved.links[0].link,
            "https://video.wixstatic.com/mp4/abc/1080/mp4/file.mp4"
        );
    }

    #[tokio::test]
    async fn test_resolve_one_direct_link() {
        let plain = "https://cdn.example.com/ep1/master.m3u8";
        let source = raw("S-mp4", &deobfuscate::encode(plain), 1.0);

        let resolved = test_resolver().resolve_one(&source).await.unwrap();
        assert_eq!(resolved.links.len(), 1);
        let link = &resolved.links[0];
        assert_eq!(link.resolution_str, "default");
        assert_eq!(link.link, plain);
        assert!(link.hls);
        assert!(link.headers.contains_key("Referer"));
    }

    #[tokio::test]
    async fn test_resolve_one_direct_mp4_is_not_hls() {
        let plain = "https://cdn.example.com/ep1.mp4?sig=a9";
        let source = raw("Yt-mp4", &deobfuscate::encode(plain), 1.0);

        let resolved = test_resolver().resolve_one(&source).await.unwrap();
        assert!(!resolved.links[0].hls);
    }

    #[test]
    fn test_classify_wixmp_and_direct() {
        assert_eq!(
            classify("https://repackager.wixmp.com/video.wixstatic.com/mp4/x/,720,/mp4/f.mp4.urlset/master.m3u8"),
            LinkShape::Wixmp
        );
        assert_eq!(classify("https://cdn.example.com/file.mp4"), LinkShape::Direct);
    }
}
