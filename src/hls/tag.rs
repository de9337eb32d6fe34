//! Classification of manifest lines and in-place rewriting of URI attributes.
//!
//! Every line falls into exactly one [`Line`] variant. Tags that can carry a
//! `URI="..."` attribute are enumerated in [`UriTag`]; adding support for a new
//! one is a new variant plus a name mapping.

use super::LineError;

/// One manifest line (terminator excluded), classified by its first non-blank character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// Empty or whitespace only
    Blank,
    /// Known tag that never carries a URI (`#EXTINF`, `#EXT-X-VERSION`, ...)
    Structural(&'a str),
    /// Tag whose quoted `URI` attribute must be routed through the relay
    UriBearing(UriTag),
    /// Comment or tag this relay does not know; passed through untouched
    Unrecognized,
    /// Media segment or nested playlist, trimmed
    Reference(&'a str),
}

/// Tags carrying a quoted `URI` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriTag {
    /// `EXT-X-MEDIA` alternate rendition
    Media,
    /// `EXT-X-MAP` initialization segment
    Map,
    /// `EXT-X-KEY` segment encryption key
    Key,
    /// `EXT-X-SESSION-KEY` multivariant-level key
    SessionKey,
    /// `EXT-X-SESSION-DATA` JSON side-data
    SessionData,
    /// `EXT-X-I-FRAME-STREAM-INF` trick-play playlist
    IFrameStreamInf,
    /// `EXT-X-RENDITION-REPORT` (LL-HLS)
    RenditionReport,
    /// `EXT-X-PART` partial segment (LL-HLS)
    Part,
    /// `EXT-X-PRELOAD-HINT` (LL-HLS)
    PreloadHint,
}

impl UriTag {
    pub const ALL: [UriTag; 9] = [
        UriTag::Media,
        UriTag::Map,
        UriTag::Key,
        UriTag::SessionKey,
        UriTag::SessionData,
        UriTag::IFrameStreamInf,
        UriTag::RenditionReport,
        UriTag::Part,
        UriTag::PreloadHint,
    ];

    /// Tag name without the leading `#`.
    pub fn name(self) -> &'static str {
        match self {
            UriTag::Media => "EXT-X-MEDIA",
            UriTag::Map => "EXT-X-MAP",
            UriTag::Key => "EXT-X-KEY",
            UriTag::SessionKey => "EXT-X-SESSION-KEY",
            UriTag::SessionData => "EXT-X-SESSION-DATA",
            UriTag::IFrameStreamInf => "EXT-X-I-FRAME-STREAM-INF",
            UriTag::RenditionReport => "EXT-X-RENDITION-REPORT",
            UriTag::Part => "EXT-X-PART",
            UriTag::PreloadHint => "EXT-X-PRELOAD-HINT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.name() == name)
    }

    pub fn is_low_latency(self) -> bool {
        matches!(
            self,
            UriTag::RenditionReport | UriTag::Part | UriTag::PreloadHint
        )
    }

    /// Attribute names whose quoted values are references. Low-latency
    /// directives may also carry a quoted `PART` reference.
    pub fn uri_attributes(self) -> &'static [&'static str] {
        if self.is_low_latency() {
            &["URI", "PART"]
        } else {
            &["URI"]
        }
    }
}

/// Tags known to carry no URI. `EXT-X-STREAM-INF` belongs here: its URI is
/// the following bare line.
const STRUCTURAL_TAGS: &[&str] = &[
    "EXTM3U",
    "EXTINF",
    "EXT-X-VERSION",
    "EXT-X-TARGETDURATION",
    "EXT-X-MEDIA-SEQUENCE",
    "EXT-X-DISCONTINUITY-SEQUENCE",
    "EXT-X-DISCONTINUITY",
    "EXT-X-ENDLIST",
    "EXT-X-PLAYLIST-TYPE",
    "EXT-X-I-FRAMES-ONLY",
    "EXT-X-INDEPENDENT-SEGMENTS",
    "EXT-X-START",
    "EXT-X-DEFINE",
    "EXT-X-BYTERANGE",
    "EXT-X-PROGRAM-DATE-TIME",
    "EXT-X-GAP",
    "EXT-X-BITRATE",
    "EXT-X-STREAM-INF",
    "EXT-X-SERVER-CONTROL",
    "EXT-X-PART-INF",
    "EXT-X-SKIP",
    "EXT-X-DATERANGE",
    "EXT-X-CUE-OUT",
    "EXT-X-CUE-IN",
];

impl<'a> Line<'a> {
    pub fn classify(text: &'a str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Line::Blank;
        }

        let Some(directive) = trimmed.strip_prefix('#') else {
            return Line::Reference(trimmed);
        };

        let name = directive
            .split_once(':')
            .map_or(directive, |(name, _)| name);

        if let Some(tag) = UriTag::from_name(name) {
            Line::UriBearing(tag)
        } else if STRUCTURAL_TAGS.contains(&name) {
            Line::Structural(name)
        } else {
            Line::Unrecognized
        }
    }
}

/// Rewrite the quoted value of every attribute named in `uri_names`.
///
/// Walks the attribute list after the first `:`, honouring quoted strings so
/// commas inside values do not split attributes. Everything except the
/// rewritten values is copied byte-for-byte.
pub fn rewrite_uri_attributes<F>(
    line: &str,
    uri_names: &[&str],
    mut rewrite: F,
) -> Result<String, LineError>
where
    F: FnMut(&str) -> Result<String, LineError>,
{
    let Some(colon) = line.find(':') else {
        return Ok(line.to_string());
    };

    let mut out = String::with_capacity(line.len() + 128);
    out.push_str(&line[..=colon]);
    let mut rest = &line[colon + 1..];

    while !rest.is_empty() {
        let name_end = rest.find(['=', ',']).unwrap_or(rest.len());
        let name = &rest[..name_end];
        out.push_str(name);
        rest = &rest[name_end..];

        if let Some(value) = rest.strip_prefix('=') {
            out.push('=');
            let padding = value.len() - value.trim_start().len();
            out.push_str(&value[..padding]);
            rest = &value[padding..];

            if let Some(quoted) = rest.strip_prefix('"') {
                let close = quoted.find('"').ok_or(LineError::UnterminatedQuote)?;
                let inner = &quoted[..close];
                out.push('"');
                if uri_names.iter().any(|uri_name| *uri_name == name.trim()) {
                    out.push_str(&rewrite(inner)?);
                } else {
                    out.push_str(inner);
                }
                out.push('"');
                rest = &quoted[close + 1..];
            }

            // Unquoted value, or junk trailing a quoted one: copy up to the next comma
            let end = rest.find(',').unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        }

        if let Some(after) = rest.strip_prefix(',') {
            out.push(',');
            rest = after;
        }
    }

    Ok(out)
}
