//! Decides whether an upstream response is an HLS manifest to rewrite or
//! opaque media to stream through untouched.

use url::Url;

/// File extension of HLS playlists.
pub const MANIFEST_EXTENSION: &str = ".m3u8";

/// Content types announcing an HLS playlist (compared without parameters, case-insensitively).
pub const MANIFEST_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "application/mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
    "video/mpegurl",
    "video/x-mpegurl",
];

/// Content type sent for manifests when upstream omits one.
pub const DEFAULT_MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Content type sent for segments when upstream omits one.
pub const DEFAULT_SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// HLS playlist: parse and rewrite references
    Manifest,
    /// Anything else: relay bytes as-is
    Opaque,
}

/// Classify by the final URL's path suffix or the declared content type.
pub fn classify(url: &Url, content_type: Option<&str>) -> Classification {
    if has_manifest_extension(url) || content_type.is_some_and(is_manifest_content_type) {
        Classification::Manifest
    } else {
        Classification::Opaque
    }
}

pub fn has_manifest_extension(url: &Url) -> bool {
    let path = url.path().as_bytes();
    path.len() >= MANIFEST_EXTENSION.len()
        && path[path.len() - MANIFEST_EXTENSION.len()..]
            .eq_ignore_ascii_case(MANIFEST_EXTENSION.as_bytes())
}

pub fn is_manifest_content_type(content_type: &str) -> bool {
    let essence = media_type_essence(content_type);
    MANIFEST_CONTENT_TYPES.contains(&essence.as_str())
}

/// `type/subtype` with parameters dropped, lowercased.
pub fn media_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Manifests whose declared size exceeds `max_bytes` are relayed unrewritten.
///
/// Undeclared sizes are rewritten; the rewriter never holds more than one line.
pub fn exceeds_rewrite_ceiling(content_length: Option<u64>, max_bytes: u64) -> bool {
    content_length.is_some_and(|len| len > max_bytes)
}
