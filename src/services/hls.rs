//! HLS playlist parsing and media-playlist resolution.
//!
//! Parsing helpers are shared between the live-proxy manifest rewrite, the
//! clock-protocol resolver (variant extraction) and the download walker.
//! The walker follows master -> media redirection to a bounded depth and is
//! only used by the download path; live playback proxies manifests verbatim
//! (rewritten) and lets the client player walk them.

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use url::Url;

/// Maximum master -> media redirection hops before giving up
const MAX_PLAYLIST_HOPS: usize = 3;

lazy_static! {
    /// Height capture from a RESOLUTION=WxH attribute
    static ref RESOLUTION_REGEX: Regex = Regex::new(r"RESOLUTION=\d+x(\d+)").unwrap();
    /// Init segment URI from an #EXT-X-MAP tag
    static ref MAP_URI_REGEX: Regex = Regex::new(r#"#EXT-X-MAP:[^\n]*URI="([^"]+)""#).unwrap();
}

/// One variant stream extracted from a master playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistVariant {
    pub url: String,
    pub height_px: u32,
}

/// Fully resolved media playlist: segment URLs in playback order plus an
/// optional initialization segment
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    pub segment_urls: Vec<String>,
    pub init_segment_url: Option<String>,
}

/// Resolve a possibly-relative playlist reference against its playlist's URL
pub fn join_url(base: &str, reference: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }
    Url::parse(base)
        .and_then(|b| b.join(reference))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| reference.to_string())
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#')
}

/// Extract `#EXT-X-STREAM-INF` variants: each tag line paired with the next
/// non-comment line, URL resolved against `base_url`. A variant without a
/// RESOLUTION attribute gets height 0 so it only wins when nothing else does.
pub fn parse_variants(body: &str, base_url: &str) -> Vec<PlaylistVariant> {
    let mut variants = Vec::new();
    let mut pending_height: Option<u32> = None;

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("#EXT-X-STREAM-INF") {
            let height = RESOLUTION_REGEX
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            pending_height = Some(height);
        } else if !is_comment(line) {
            if let Some(height_px) = pending_height.take() {
                variants.push(PlaylistVariant {
                    url: join_url(base_url, line),
                    height_px,
                });
            }
        }
    }
    variants
}

/// Pick the variant with the greatest height; first occurrence wins ties.
pub fn best_variant(variants: &[PlaylistVariant]) -> Option<&PlaylistVariant> {
    let mut best: Option<&PlaylistVariant> = None;
    for v in variants {
        match best {
            Some(b) if v.height_px <= b.height_px => {}
            _ => best = Some(v),
        }
    }
    best
}

/// Enumerate media segments: each `#EXTINF` paired with the next non-comment
/// line that follows it. Playlists without `#EXTINF` tags fall back to every
/// non-comment, non-empty line. Order is playlist file order, never sorted.
pub fn parse_segments(body: &str, base_url: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut awaiting_uri = false;

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("#EXTINF") {
            awaiting_uri = true;
        } else if !is_comment(line) && awaiting_uri {
            segments.push(join_url(base_url, line));
            awaiting_uri = false;
        }
    }

    if segments.is_empty() {
        // Malformed playlist without #EXTINF tags
        segments = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !is_comment(l))
            .map(|l| join_url(base_url, l))
            .collect();
    }
    segments
}

/// Absolute init-segment URL from an #EXT-X-MAP tag, if present
pub fn parse_init_segment(body: &str, base_url: &str) -> Option<String> {
    MAP_URI_REGEX
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| join_url(base_url, m.as_str()))
}

/// First non-comment line referencing another `.m3u8` playlist. Handles
/// manifests that nest a playlist reference without `#EXT-X-STREAM-INF`.
fn nested_playlist_line(body: &str) -> Option<&str> {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !is_comment(l) && l.contains(".m3u8"))
}

/// Follow master -> media playlist redirection from `initial_url` and
/// enumerate the final media playlist's segments.
///
/// Unlike per-source resolution, any fetch failure here is fatal: the
/// download must abort visibly rather than produce a truncated file quietly.
pub async fn resolve_media_playlist(client: &Client, initial_url: &str) -> Result<MediaPlaylist> {
    let mut current_url = initial_url.to_string();
    let mut body = fetch_playlist(client, &current_url).await?;

    for _ in 0..MAX_PLAYLIST_HOPS {
        if body.contains("#EXT-X-STREAM-INF") {
            let variants = parse_variants(&body, &current_url);
            let Some(best) = best_variant(&variants) else {
                bail!("master playlist with no usable variants: {}", current_url);
            };
            current_url = best.url.clone();
        } else if let Some(line) = nested_playlist_line(&body) {
            current_url = join_url(&current_url, line);
        } else {
            // Media playlist reached
            break;
        }
        body = fetch_playlist(client, &current_url).await?;
    }

    // Segment references resolve against the final playlist URL, not the
    // original input; the base shifts with every redirection hop.
    let segment_urls = parse_segments(&body, &current_url);
    let init_segment_url = parse_init_segment(&body, &current_url);

    if segment_urls.is_empty() {
        bail!("no media segments found in playlist: {}", current_url);
    }

    Ok(MediaPlaylist {
        segment_urls,
        init_segment_url,
    })
}

async fn fetch_playlist(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to fetch playlist {}", url))?
        .error_for_status()
        .with_context(|| format!("playlist fetch rejected: {}", url))?;

    response
        .text()
        .await
        .with_context(|| format!("failed to read playlist body {}", url))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
720/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080\n\
1080/index.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXTINF:6.0,\n\
#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00Z\n\
seg1.ts\n\
#EXTINF:4.2,\n\
https://cdn.example.com/abs/seg2.ts\n";

    #[test]
    fn test_parse_variants_heights_and_urls() {
        let variants = parse_variants(MASTER, "https://host/path/master.m3u8");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].height_px, 720);
        assert_eq!(variants[0].url, "https://host/path/720/index.m3u8");
        assert_eq!(variants[1].height_px, 1080);
    }

    #[test]
    fn test_best_variant_prefers_highest_height() {
        let variants = parse_variants(MASTER, "https://host/master.m3u8");
        assert_eq!(best_variant(&variants).unwrap().height_px, 1080);
    }

    #[test]
    fn test_best_variant_tie_keeps_first() {
        let variants = vec![
            PlaylistVariant { url: "a".into(), height_px: 720 },
            PlaylistVariant { url: "b".into(), height_px: 720 },
        ];
        assert_eq!(best_variant(&variants).unwrap().url, "a");
    }

    #[test]
    fn test_parse_segments_pairs_extinf_with_next_uri() {
        let segments = parse_segments(MEDIA, "https://host/v/720/index.m3u8");
        assert_eq!(
            segments,
            vec![
                "https://host/v/720/seg0.ts",
                "https://host/v/720/seg1.ts",
                "https://cdn.example.com/abs/seg2.ts",
            ]
        );
    }

    #[test]
    fn test_parse_segments_fallback_without_extinf() {
        let body = "#EXTM3U\nseg0.ts\nseg1.ts\n";
        let segments = parse_segments(body, "https://host/index.m3u8");
        assert_eq!(
            segments,
            vec!["https://host/seg0.ts", "https://host/seg1.ts"]
        );
    }

    #[test]
    fn test_parse_init_segment() {
        let body = "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:4,\nseg0.m4s\n";
        assert_eq!(
            parse_init_segment(body, "https://host/v/index.m3u8"),
            Some("https://host/v/init.mp4".to_string())
        );
        assert_eq!(parse_init_segment(MEDIA, "https://host/i.m3u8"), None);
    }

    #[test]
    fn test_nested_playlist_line_skips_comments() {
        let body = "#EXTM3U\n#EXT-X-VERSION:3\nlow/index.m3u8\n";
        assert_eq!(nested_playlist_line(body), Some("low/index.m3u8"));
        assert_eq!(nested_playlist_line(MEDIA), None);
    }

    #[test]
    fn test_join_url_absolute_passthrough() {
        assert_eq!(
            join_url("https://host/a/b.m3u8", "https://other/c.ts"),
            "https://other/c.ts"
        );
        assert_eq!(join_url("https://host/a/b.m3u8", "c.ts"), "https://host/a/c.ts");
        assert_eq!(join_url("https://host/a/b.m3u8", "/c.ts"), "https://host/c.ts");
    }
}
