//! URL deobfuscation for the upstream API.
//!
//! Source and thumbnail URLs come back encoded as a `--`-prefixed string of
//! 2-hex-digit tokens, each token mapping to one output character through a
//! fixed substitution table. Decoded paths starting with `/` are rooted at
//! the content mirror origin.

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Marker prefix signaling an obfuscated URL
pub const OBFUSCATION_MARKER: &str = "--";

/// Legacy CDN host occasionally present in non-obfuscated thumbnail URLs
const LEGACY_CDN_HOST: &str = "cdnimg.xyz";
/// Mirror host that still serves the legacy CDN's content
const MIRROR_CDN_HOST: &str = "wp.youtube-anime.com";

/// The fixed substitution table: 2-hex-digit token -> decoded character
const DEOBFUSCATION_TABLE: &[(&str, char)] = &[
    // Digits
    ("08", '0'),
    ("09", '1'),
    ("0a", '2'),
    ("0b", '3'),
    ("0c", '4'),
    ("0d", '5'),
    ("0e", '6'),
    ("0f", '7'),
    ("00", '8'),
    ("01", '9'),
    // Uppercase letters
    ("79", 'A'),
    ("7a", 'B'),
    ("7b", 'C'),
    ("7c", 'D'),
    ("7d", 'E'),
    ("7e", 'F'),
    ("7f", 'G'),
    ("70", 'H'),
    ("71", 'I'),
    ("72", 'J'),
    ("73", 'K'),
    ("74", 'L'),
    ("75", 'M'),
    ("76", 'N'),
    ("77", 'O'),
    ("68", 'P'),
    ("69", 'Q'),
    ("6a", 'R'),
    ("6b", 'S'),
    ("6c", 'T'),
    ("6d", 'U'),
    ("6e", 'V'),
    ("6f", 'W'),
    ("60", 'X'),
    ("61", 'Y'),
    ("62", 'Z'),
    // Lowercase letters
    ("59", 'a'),
    ("5a", 'b'),
    ("5b", 'c'),
    ("5c", 'd'),
    ("5d", 'e'),
    ("5e", 'f'),
    ("5f", 'g'),
    ("50", 'h'),
    ("51", 'i'),
    ("52", 'j'),
    ("53", 'k'),
    ("54", 'l'),
    ("55", 'm'),
    ("56", 'n'),
    ("57", 'o'),
    ("48", 'p'),
    ("49", 'q'),
    ("4a", 'r'),
    ("4b", 's'),
    ("4c", 't'),
    ("4d", 'u'),
    ("4e", 'v'),
    ("4f", 'w'),
    ("40", 'x'),
    ("41", 'y'),
    ("42", 'z'),
    // URL punctuation
    ("15", '-'),
    ("16", '.'),
    ("67", '_'),
    ("46", '~'),
    ("02", ':'),
    ("17", '/'),
    ("07", '?'),
    ("1b", '#'),
    ("63", '['),
    ("65", ']'),
    ("78", '@'),
    ("19", '!'),
    ("1c", '$'),
    ("1e", '&'),
    ("10", '('),
    ("11", ')'),
    ("12", '*'),
    ("13", '+'),
    ("14", ','),
    ("03", ';'),
    ("05", '='),
    ("1d", '%'),
];

lazy_static! {
    static ref TABLE: HashMap<&'static str, char> =
        DEOBFUSCATION_TABLE.iter().copied().collect();
}

/// Decode an obfuscated URL token.
///
/// Inputs without the marker are returned unchanged, except for the narrow
/// legacy-CDN rewrite. Unknown 2-char chunks pass through as-is rather than
/// failing, so a table drift upstream degrades instead of erroring.
pub fn decode(input: &str, content_mirror: &str) -> String {
    let Some(payload) = input.strip_prefix(OBFUSCATION_MARKER) else {
        if input.contains(LEGACY_CDN_HOST) {
            return input.replace(LEGACY_CDN_HOST, MIRROR_CDN_HOST);
        }
        return input.to_string();
    };

    let mut decoded = String::with_capacity(payload.len() / 2);
    let mut i = 0;
    while i < payload.len() {
        let end = (i + 2).min(payload.len());
        match payload.get(i..end) {
            Some(chunk) => {
                match TABLE.get(chunk) {
                    Some(c) => decoded.push(*c),
                    None => decoded.push_str(chunk),
                }
                i = end;
            }
            None => {
                // non-ASCII byte would split a char; keep it verbatim
                let ch = payload[i..].chars().next().unwrap();
                decoded.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    if decoded.starts_with('/') {
        format!("{}{}", content_mirror, decoded)
    } else {
        decoded
    }
}

/// Re-encode a plaintext through the reverse table (test fixtures only)
#[cfg(test)]
pub(crate) fn encode(plain: &str) -> String {
    let reverse: HashMap<char, &str> = DEOBFUSCATION_TABLE
        .iter()
        .map(|(tok, c)| (*c, *tok))
        .collect();
    let mut out = String::from(OBFUSCATION_MARKER);
    for c in plain.chars() {
        out.push_str(reverse.get(&c).expect("char not in table"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIRROR: &str = "https://allanime.day";

    #[test]
    fn test_decode_round_trip() {
        let plain = "/apivtwo/clock?id=abc-123_XY.z~";
        let decoded = decode(&encode(plain), MIRROR);
        assert_eq!(decoded, format!("{}{}", MIRROR, plain));
    }

    #[test]
    fn test_decode_absolute_url_round_trip() {
        let plain = "https://video.example.com/file.mp4?sig=A9";
        assert_eq!(decode(&encode(plain), MIRROR), plain);
    }

    #[test]
    fn test_non_marker_input_passes_through() {
        let input = "https://video.example.com/plain.mp4";
        assert_eq!(decode(input, MIRROR), input);
    }

    #[test]
    fn test_legacy_cdn_host_rewritten() {
        let input = "https://cdnimg.xyz/covers/show.jpg";
        assert_eq!(
            decode(input, MIRROR),
            "https://wp.youtube-anime.com/covers/show.jpg"
        );
    }

    #[test]
    fn test_unknown_chunk_passes_through() {
        // "zz" is not in the table; "54" is 'l'
        assert_eq!(decode("--zz54", MIRROR), "zzl");
    }

    #[test]
    fn test_odd_length_tail_preserved() {
        // trailing single char can't form a token, kept verbatim
        assert_eq!(decode("--54x", MIRROR), "lx");
    }
}
