//! Incremental, chunk-boundary-safe manifest rewriter.
//!
//! [`ManifestRewriter`] is a plain value advanced by [`ManifestRewriter::push`]
//! for every upstream chunk and closed with [`ManifestRewriter::finish`]. It
//! holds only an undecoded UTF-8 tail and the unterminated line fragment
//! (capped at [`MAX_LINE_BYTES`]), so the output is the same however the
//! input bytes are split.
//! [`rewrite_stream`] adapts it to a byte stream without buffering the body.

use super::LineError;
use super::tag::{Line, rewrite_uri_attributes};
use super::url::{ManifestContext, proxy_reference};
use crate::metrics;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use std::borrow::Cow;
use tracing::debug;

/// Streaming UTF-8 decoder that defers incomplete trailing sequences.
///
/// Invalid sequences decode to U+FFFD; only a truncated tail is held back.
#[derive(Debug, Default)]
struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    fn decode(&mut self, chunk: &[u8], out: &mut String) {
        let joined;
        let mut bytes = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            joined = std::mem::take(&mut self.pending);
            joined.as_slice()
        };

        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    out.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = bytes.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[len..];
                        }
                        None => {
                            self.pending = rest.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn flush(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

/// Counters for one rewrite pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    pub lines: usize,
    pub rewritten: usize,
    pub fallbacks: usize,
}

/// Longest line the rewriter will hold while waiting for its terminator.
///
/// Real playlist lines stay well under this; anything longer is relayed
/// unchanged as it arrives.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Rewrite state for one manifest response.
#[derive(Debug)]
pub struct ManifestRewriter {
    ctx: ManifestContext,
    decoder: Utf8StreamDecoder,
    /// Line fragment still waiting for its `\n`, never longer than `max_line`
    carry: String,
    max_line: usize,
    /// Inside a line that outgrew `max_line`; text is copied through until `\n`
    overflowing: bool,
    stats: RewriteStats,
}

impl ManifestRewriter {
    pub fn new(ctx: ManifestContext) -> Self {
        Self::with_line_limit(ctx, MAX_LINE_BYTES)
    }

    pub fn with_line_limit(ctx: ManifestContext, max_line: usize) -> Self {
        Self {
            ctx,
            decoder: Utf8StreamDecoder::default(),
            carry: String::new(),
            max_line,
            overflowing: false,
            stats: RewriteStats::default(),
        }
    }

    /// Feed one chunk; returns the rewritten text of every line completed by it.
    ///
    /// Only the newly decoded text is scanned for terminators, and a line
    /// longer than the limit is released unchanged instead of being buffered.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut text = String::with_capacity(chunk.len());
        self.decoder.decode(chunk, &mut text);

        let mut out = String::with_capacity(text.len() + text.len() / 2);
        let mut rest = text.as_str();

        while let Some(newline) = rest.find('\n') {
            let segment = &rest[..newline];
            rest = &rest[newline + 1..];

            if self.overflowing {
                out.push_str(segment);
                self.overflowing = false;
            } else if self.carry.is_empty() {
                self.complete_line(segment, &mut out);
            } else {
                self.carry.push_str(segment);
                let line = std::mem::take(&mut self.carry);
                self.complete_line(&line, &mut out);
            }
            out.push('\n');
        }

        if self.overflowing {
            out.push_str(rest);
        } else {
            self.carry.push_str(rest);
            if self.carry.len() > self.max_line {
                self.start_overflow(&mut out);
            }
        }
        out
    }

    /// Flush the decoder and the final unterminated fragment.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        if self.overflowing {
            self.decoder.flush(&mut out);
            self.overflowing = false;
            return out;
        }

        self.decoder.flush(&mut self.carry);
        let tail = std::mem::take(&mut self.carry);
        if !tail.is_empty() {
            self.complete_line(&tail, &mut out);
        }
        out
    }

    pub fn stats(&self) -> RewriteStats {
        self.stats
    }

    fn complete_line(&mut self, line: &str, out: &mut String) {
        if line.len() > self.max_line {
            self.stats.lines += 1;
            self.record_oversized_line();
            out.push_str(line);
        } else {
            self.emit(line, out);
        }
    }

    fn start_overflow(&mut self, out: &mut String) {
        self.stats.lines += 1;
        self.record_oversized_line();
        out.push_str(&std::mem::take(&mut self.carry));
        self.overflowing = true;
    }

    fn record_oversized_line(&mut self) {
        debug!("Line longer than {} bytes, relaying it unchanged", self.max_line);
        self.stats.fallbacks += 1;
        metrics::record_rewrite_fallback();
    }

    fn emit(&mut self, line: &str, out: &mut String) {
        self.stats.lines += 1;
        match rewrite_line(line, &self.ctx) {
            Ok(Cow::Borrowed(unchanged)) => out.push_str(unchanged),
            Ok(Cow::Owned(rewritten)) => {
                self.stats.rewritten += 1;
                out.push_str(&rewritten);
            }
            Err(e) => {
                debug!("Keeping manifest line unchanged: {}", e);
                self.stats.fallbacks += 1;
                metrics::record_rewrite_fallback();
                out.push_str(line);
            }
        }
    }
}

/// Rewrite one line (without its `\n`). A trailing `\r` is kept as part of
/// the terminator.
pub fn rewrite_line<'a>(line: &'a str, ctx: &ManifestContext) -> Result<Cow<'a, str>, LineError> {
    let (text, cr) = match line.strip_suffix('\r') {
        Some(text) => (text, "\r"),
        None => (line, ""),
    };

    match Line::classify(text) {
        Line::Blank | Line::Structural(_) | Line::Unrecognized => Ok(Cow::Borrowed(line)),
        Line::UriBearing(tag) => {
            let rewritten =
                rewrite_uri_attributes(text, tag.uri_attributes(), |uri| proxy_reference(uri, ctx))?;
            if rewritten == text {
                Ok(Cow::Borrowed(line))
            } else {
                Ok(Cow::Owned(rewritten + cr))
            }
        }
        Line::Reference(reference) => {
            let proxied = proxy_reference(reference, ctx)?;
            if proxied == text {
                Ok(Cow::Borrowed(line))
            } else {
                Ok(Cow::Owned(proxied + cr))
            }
        }
    }
}

/// Rewrite a manifest byte stream on the fly.
///
/// Output is produced as soon as a line completes; an upstream error is
/// forwarded as the terminal item of the output stream.
pub fn rewrite_stream<S, E>(
    upstream: S,
    ctx: ManifestContext,
) -> impl Stream<Item = Result<Bytes, E>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let state = (upstream.boxed(), ManifestRewriter::new(ctx));

    stream::unfold(Some(state), |state| async move {
        let (mut upstream, mut rewriter) = state?;
        loop {
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    let out = rewriter.push(&chunk);
                    if !out.is_empty() {
                        return Some((Ok(Bytes::from(out)), Some((upstream, rewriter))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    let out = rewriter.finish();
                    let stats = rewriter.stats();
                    debug!(
                        "Manifest rewrite done: {} lines, {} rewritten, {} kept after errors",
                        stats.lines, stats.rewritten, stats.fallbacks
                    );
                    metrics::record_manifest_rewritten();
                    return (!out.is_empty()).then(|| (Ok(Bytes::from(out)), None));
                }
            }
        }
    })
}
