//! Header translation between the client, the relay and the origin.

use crate::hls::detect::{DEFAULT_MANIFEST_CONTENT_TYPE, DEFAULT_SEGMENT_CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use url::Url;

/// Client request headers forwarded to the origin when present.
const FORWARDED_REQUEST_HEADERS: [HeaderName; 3] =
    [header::RANGE, header::IF_RANGE, header::USER_AGENT];

/// Origin response headers copied verbatim when present.
const FORWARDED_RESPONSE_HEADERS: [HeaderName; 3] =
    [header::ETAG, header::LAST_MODIFIED, header::CONTENT_RANGE];

/// Manifests mutate (live playlists) and must be refetched every time.
pub const MANIFEST_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

/// Segments are immutable once published.
pub const SEGMENT_CACHE_CONTROL: &str = "public, max-age=86400";

/// How the relayed body is treated for caching and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Manifest,
    Segment,
}

/// Build the headers sent to the origin.
///
/// Range, If-Range and User-Agent are forwarded when present; Referer is set
/// to the target's own origin so basic hotlink checks pass.
pub fn outbound(inbound: &HeaderMap, target: &Url) -> HeaderMap {
    let mut out = HeaderMap::new();

    for name in &FORWARDED_REQUEST_HEADERS {
        if let Some(value) = inbound.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }

    let referer = format!("{}/", target.origin().ascii_serialization());
    if let Ok(value) = HeaderValue::from_str(&referer) {
        out.insert(header::REFERER, value);
    }

    out
}

/// Build the headers returned to the client.
///
/// `body_modified` is true when the body is rewritten; the byte count is then
/// unknown and Content-Length is omitted. Content-Length is also absent when
/// the HTTP client already decoded a Content-Encoding, since it drops both
/// headers in that case.
pub fn inbound(upstream: &HeaderMap, kind: ResponseKind, body_modified: bool) -> HeaderMap {
    let mut out = HeaderMap::new();

    let content_type = upstream.get(header::CONTENT_TYPE).cloned().unwrap_or_else(|| {
        HeaderValue::from_static(match kind {
            ResponseKind::Manifest => DEFAULT_MANIFEST_CONTENT_TYPE,
            ResponseKind::Segment => DEFAULT_SEGMENT_CONTENT_TYPE,
        })
    });
    out.insert(header::CONTENT_TYPE, content_type);

    for name in &FORWARDED_RESPONSE_HEADERS {
        if let Some(value) = upstream.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }

    if !body_modified {
        // Bytes are relayed exactly as received, encoding included
        for name in [header::CONTENT_LENGTH, header::CONTENT_ENCODING] {
            if let Some(value) = upstream.get(&name) {
                out.insert(name, value.clone());
            }
        }
    }

    match kind {
        ResponseKind::Manifest => {
            out.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(MANIFEST_CACHE_CONTROL),
            );
            out.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            out.insert(header::EXPIRES, HeaderValue::from_static("0"));
        }
        ResponseKind::Segment => {
            out.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(SEGMENT_CACHE_CONTROL),
            );
            out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }
    }

    out
}
