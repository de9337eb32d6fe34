//! HLS manifest handling: reference resolution, line classification,
//! incremental rewriting and manifest detection.

pub mod detect;
pub mod rewriter;
pub mod tag;
pub mod url;

pub use detect::Classification;
pub use rewriter::{ManifestRewriter, rewrite_stream};
pub use self::url::{ManifestContext, PROXY_PATH, PROXY_PREFIX};

use thiserror::Error;

/// Failure while rewriting a single manifest line.
///
/// Never escapes the rewriter: the offending line is emitted unchanged.
#[derive(Debug, Error, PartialEq)]
pub enum LineError {
    #[error("empty reference")]
    EmptyReference,

    #[error("unresolvable reference {reference:?}: {source}")]
    Unresolvable {
        reference: String,
        source: ::url::ParseError,
    },

    #[error("unterminated quoted attribute value")]
    UnterminatedQuote,
}
