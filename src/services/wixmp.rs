//! Wixmp repackager URL expansion.
//!
//! The repackager convention packs every available bitrate into a single
//! path segment: `.../,1080p,720p,480p,/mp4/file.mp4.urlset/master.m3u8`.
//! Stripping the repackager host and the `.urlset` suffix leaves a template
//! into which each quality token is substituted.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::QualityLink;

/// Hostname marking a repackager URL (used by the resolver to classify links)
pub const WIXMP_REPACKAGER_HOST: &str = "repackager.wixmp.com";

lazy_static! {
    /// Comma-joined quality list between "/," and ",/mp4"
    static ref QUALITY_LIST_REGEX: Regex = Regex::new(r"/,([^/]*),/mp4").unwrap();
    static ref NUMERIC_PREFIX_REGEX: Regex = Regex::new(r"^(\d+)").unwrap();
}

/// Leading digits of a quality token, 0 when absent ("auto" etc. sort last)
fn numeric_prefix(token: &str) -> u32 {
    NUMERIC_PREFIX_REGEX
        .captures(token)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Expand a decoded repackager URL into one concrete link per quality token,
/// sorted by descending numeric resolution. Returns empty when the URL does
/// not match the repackager shape (the source then contributes nothing).
pub fn expand(decoded_url: &str) -> Vec<QualityLink> {
    let Some(caps) = QUALITY_LIST_REGEX.captures(decoded_url) else {
        return Vec::new();
    };
    let list = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

    let template = decoded_url.replacen(&format!("{}/", WIXMP_REPACKAGER_HOST), "", 1);
    let template = template
        .split(".urlset")
        .next()
        .unwrap_or(template.as_str())
        .to_string();

    let list_segment = format!(",{},", list);
    let mut links: Vec<QualityLink> = list
        .split(',')
        .filter(|token| !token.is_empty())
        .map(|token| QualityLink {
            resolution_str: token.to_string(),
            link: template.replacen(&list_segment, token, 1),
            hls: false,
            headers: Default::default(),
        })
        .collect();

    // Stable sort keeps upstream order among equal resolutions
    links.sort_by(|a, b| {
        numeric_prefix(&b.resolution_str).cmp(&numeric_prefix(&a.resolution_str))
    });
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://repackager.wixmp.com/video.wixstatic.com/mp4/abc123/,1080,720,480,/mp4/file.mp4.urlset/master.m3u8";

    #[test]
    fn test_expands_each_quality_token() {
        let links = expand(URL);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].resolution_str, "1080");
        assert_eq!(links[1].resolution_str, "720");
        assert_eq!(links[2].resolution_str, "480");
        assert_eq!(
            links[0].link,
            "https://video.wixstatic.com/mp4/abc123/1080/mp4/file.mp4"
        );
        assert_eq!(
            links[2].link,
            "https://video.wixstatic.com/mp4/abc123/480/mp4/file.mp4"
        );
        assert!(links.iter().all(|l| !l.hls));
    }

    #[test]
    fn test_sorts_descending_by_numeric_prefix() {
        let url = "https://repackager.wixmp.com/video.wixstatic.com/mp4/x/,480p,1080p,720p,/mp4/f.mp4.urlset/master.m3u8";
        let links = expand(url);
        let labels: Vec<&str> = links.iter().map(|l| l.resolution_str.as_str()).collect();
        assert_eq!(labels, vec!["1080p", "720p", "480p"]);
    }

    #[test]
    fn test_non_numeric_token_sorts_last() {
        let url = "https://repackager.wixmp.com/video.wixstatic.com/mp4/x/,auto,720p,/mp4/f.mp4.urlset/master.m3u8";
        let links = expand(url);
        let labels: Vec<&str> = links.iter().map(|l| l.resolution_str.as_str()).collect();
        assert_eq!(labels, vec!["720p", "auto"]);
    }

    #[test]
    fn test_unmatched_shape_yields_nothing() {
        assert!(expand("https://video.example.com/plain.mp4").is_empty());
    }
}
