//! Directory-index scraping.
//!
//! Some hosts answer a folder request with an HTML listing of anchors.  This
//! is the last-resort source for album folders and track names; under static
//! hosting it usually does not exist.

use scraper::{Html, Selector};

use crate::protocol::Track;

/// Decoded `href` values of every anchor in `html`, in document order.
/// Backslashes (from Windows-hosted listings) are normalised to `/`.
pub fn anchor_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(decode_href)
        .filter(|href| !href.is_empty())
        .collect()
}

/// Escapes left encoded when decoding an href: the URI reserved set plus `#`
/// and `%`.  Decoding those would change how the name later joins onto a URL.
const KEPT_ESCAPES: &[u8] = b"#$&+,/:;=?@%";

fn decode_href(href: &str) -> String {
    let raw = href.trim();
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(byte) = escaped_byte(bytes.get(i + 1..i + 3)) {
                if !KEPT_ESCAPES.contains(&byte) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    let decoded = String::from_utf8(out).unwrap_or_else(|_| raw.to_string());
    decoded.replace('\\', "/")
}

fn escaped_byte(hex: Option<&[u8]>) -> Option<u8> {
    let hex = hex?;
    if !hex.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()
}

fn last_segment(href: &str) -> Option<&str> {
    href.split('/').filter(|s| !s.is_empty()).last()
}

/// Track filenames linked from a folder listing: hrefs ending in
/// `extension`, reduced to their last path segment.
pub fn parse_track_links(html: &str, extension: &str, case_insensitive: bool) -> Vec<Track> {
    let ext_lower = extension.to_lowercase();
    let mut tracks: Vec<Track> = Vec::new();

    for href in anchor_hrefs(html) {
        let matches = if case_insensitive {
            href.to_lowercase().ends_with(&ext_lower)
        } else {
            href.ends_with(extension)
        };
        if !matches {
            continue;
        }
        if let Some(name) = last_segment(&href) {
            if !tracks.iter().any(|t| t == name) {
                tracks.push(Track::new(name));
            }
        }
    }

    tracks
}

/// Sub-folder names linked from a listing: hrefs ending in `/`, reduced to
/// their last path segment, first occurrence wins.
pub fn parse_folder_links(html: &str) -> Vec<String> {
    let mut folders: Vec<String> = Vec::new();

    for href in anchor_hrefs(html) {
        if !href.ends_with('/') {
            continue;
        }
        let Some(name) = last_segment(&href) else {
            continue;
        };
        if name == "." || name == ".." {
            continue;
        }
        if !folders.iter().any(|f| f == name) {
            folders.push(name.to_string());
        }
    }

    folders
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACK_LISTING: &str = r#"
        <html><body><h1>Directory listing for /songs/ncs/</h1><ul>
          <li><a href="a.mp3">a.mp3</a></li>
          <li><a href="b.MP3">b.MP3</a></li>
          <li><a href="c.txt">c.txt</a></li>
          <li><a href="info.json">info.json</a></li>
        </ul></body></html>
    "#;

    #[test]
    fn test_track_extension_is_case_sensitive_by_default() {
        let tracks = parse_track_links(TRACK_LISTING, ".mp3", false);
        assert_eq!(tracks, vec!["a.mp3"]);
    }

    #[test]
    fn test_track_extension_case_insensitive() {
        let tracks = parse_track_links(TRACK_LISTING, ".mp3", true);
        assert_eq!(tracks, vec!["a.mp3", "b.MP3"]);
    }

    #[test]
    fn test_track_links_are_decoded_and_reduced_to_filename() {
        let html = r#"<a href="/songs/ncs/My%20Song.mp3">x</a>
                      <a href="songs\ncs\Other.mp3">y</a>
                      <a href="/songs/ncs/My%20Song.mp3">again</a>"#;
        let tracks = parse_track_links(html, ".mp3", false);
        assert_eq!(tracks, vec!["My Song.mp3", "Other.mp3"]);
    }

    #[test]
    fn test_reserved_escapes_stay_encoded() {
        let html = r#"<a href="Track%231.mp3">x</a>
                      <a href="What%3F.mp3">y</a>
                      <a href="100%25%20Pure.mp3">z</a>
                      <a href="Caf%C3%A9.mp3">w</a>"#;
        let tracks = parse_track_links(html, ".mp3", false);
        assert_eq!(
            tracks,
            vec!["Track%231.mp3", "What%3F.mp3", "100%25 Pure.mp3", "Café.mp3"]
        );

        // The kept escapes survive the join onto the album folder.
        let base = crate::fetch::normalize_base_url("http://host/").unwrap();
        let url = crate::fetch::join_relative(&base, &format!("songs/ncs/{}", tracks[0])).unwrap();
        assert_eq!(url.path(), "/songs/ncs/Track%231.mp3");
        assert_eq!(url.fragment(), None);
        let url = crate::fetch::join_relative(&base, &format!("songs/ncs/{}", tracks[1])).unwrap();
        assert_eq!(url.path(), "/songs/ncs/What%3F.mp3");
        assert_eq!(url.query(), None);

        assert_eq!(tracks[0].display_name(".mp3"), "Track#1");
    }

    #[test]
    fn test_malformed_escape_is_kept_verbatim() {
        let tracks = parse_track_links(r#"<a href="50%+off.mp3">x</a>"#, ".mp3", false);
        assert_eq!(tracks, vec!["50%+off.mp3"]);
    }

    #[test]
    fn test_folder_links() {
        let html = r#"
            <a href="../">Parent</a>
            <a href="ncs/">ncs/</a>
            <a href="/songs/lofi/">lofi/</a>
            <a href="ncs/">ncs/ again</a>
            <a href="index.json">index.json</a>
            <a href="My%20Album/">My Album/</a>
        "#;
        assert_eq!(parse_folder_links(html), vec!["ncs", "lofi", "My Album"]);
    }

    #[test]
    fn test_no_anchors() {
        assert!(parse_track_links("<p>404 Not Found</p>", ".mp3", false).is_empty());
        assert!(parse_folder_links("").is_empty());
    }
}
