//! Resolution of manifest references and encoding into the relay's
//! callback form (`/hls?url=<percent-encoded absolute URL>`).

use super::LineError;
use crate::config::QueryInheritance;
use std::collections::HashSet;
use url::{Origin, Url};

/// Route that serves relayed HLS resources.
pub const PROXY_PATH: &str = "/hls";

/// Prefix of every rewritten reference.
pub const PROXY_PREFIX: &str = "/hls?url=";

/// Per-response state derived from the final (post-redirect) manifest URL.
#[derive(Debug, Clone)]
pub struct ManifestContext {
    origin: Origin,
    /// Manifest URL with the trailing filename, query and fragment stripped
    base: Url,
    /// The manifest's own query parameters, candidates for inheritance
    query: Vec<(String, String)>,
    inheritance: QueryInheritance,
}

impl ManifestContext {
    pub fn new(manifest_url: &Url, inheritance: QueryInheritance) -> Self {
        // "./" resolves to the containing directory and drops query + fragment
        let base = manifest_url
            .join("./")
            .unwrap_or_else(|_| manifest_url.clone());

        Self {
            origin: manifest_url.origin(),
            base,
            query: manifest_url.query_pairs().into_owned().collect(),
            inheritance,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

/// Resolve `reference` against the manifest's base directory.
///
/// Absolute references are returned as-is. Protocol-relative references
/// (`//host/path`) take the manifest's scheme. On any parse failure the
/// original text is returned unmodified.
pub fn resolve(reference: &str, ctx: &ManifestContext) -> String {
    match try_resolve(clean_reference(reference), ctx) {
        Ok(url) => url.into(),
        Err(_) => reference.to_string(),
    }
}

/// Copy each manifest query parameter onto `url` unless `url` already
/// defines that key. Existing values are never overwritten.
pub fn merge_inherited_query(url: &mut Url, ctx: &ManifestContext) {
    if ctx.query.is_empty() {
        return;
    }
    match ctx.inheritance {
        QueryInheritance::None => return,
        QueryInheritance::SameOrigin if url.origin() != ctx.origin => return,
        _ => {}
    }

    let existing: HashSet<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
    let missing: Vec<(&str, &str)> = ctx
        .query
        .iter()
        .filter(|(k, _)| !existing.contains(k))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    if !missing.is_empty() {
        url.query_pairs_mut().extend_pairs(missing);
    }
}

/// Wrap an absolute URL in the relay's callback form.
///
/// Values already in callback form and inline `data:` URIs are returned unchanged.
pub fn encode_proxy(url: &str) -> String {
    if is_proxied(url) || is_data_uri(url) {
        return url.to_string();
    }
    format!("{}{}", PROXY_PREFIX, urlencoding::encode(url))
}

/// Full pipeline for one reference: resolve, merge query, encode.
///
/// References that cannot be fetched through the relay (already proxied,
/// `data:`, non-HTTP schemes such as `skd:`) come back unchanged.
pub fn proxy_reference(reference: &str, ctx: &ManifestContext) -> Result<String, LineError> {
    let cleaned = clean_reference(reference);
    if cleaned.is_empty() {
        return Err(LineError::EmptyReference);
    }
    if is_proxied(cleaned) || is_data_uri(cleaned) {
        return Ok(cleaned.to_string());
    }
    if let Some(scheme) = scheme_of(cleaned)
        && !is_fetchable_scheme(scheme)
    {
        return Ok(cleaned.to_string());
    }

    let mut url = try_resolve(cleaned, ctx)?;
    if !is_fetchable_scheme(url.scheme()) {
        return Ok(cleaned.to_string());
    }
    merge_inherited_query(&mut url, ctx);

    Ok(encode_proxy(url.as_str()))
}

fn try_resolve(reference: &str, ctx: &ManifestContext) -> Result<Url, LineError> {
    let parsed = if scheme_of(reference).is_some() {
        Url::parse(reference)
    } else {
        // Covers relative paths, root-relative and protocol-relative forms
        ctx.base.join(reference)
    };

    parsed.map_err(|source| LineError::Unresolvable {
        reference: reference.to_string(),
        source,
    })
}

/// Strip surrounding whitespace and trailing stray semicolons.
fn clean_reference(reference: &str) -> &str {
    reference
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

pub fn is_proxied(value: &str) -> bool {
    value.starts_with(PROXY_PREFIX)
}

fn is_data_uri(value: &str) -> bool {
    value
        .get(..5)
        .is_some_and(|p| p.eq_ignore_ascii_case("data:"))
}

fn is_fetchable_scheme(scheme: &str) -> bool {
    scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
}

/// RFC 3986 scheme prefix (`ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"`), if any.
fn scheme_of(reference: &str) -> Option<&str> {
    let (scheme, _) = reference.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        .then_some(scheme)
}
