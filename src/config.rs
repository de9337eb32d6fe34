use std::env;
use std::time::Duration;

/// Default budget for manifest-classified requests.
pub const DEFAULT_MANIFEST_TIMEOUT_MS: u64 = 10_000;
/// Default budget for segment-classified requests.
pub const DEFAULT_SEGMENT_TIMEOUT_MS: u64 = 60_000;
/// Manifests larger than this are relayed without rewriting.
pub const DEFAULT_MAX_MANIFEST_BYTES: u64 = 2 * 1024 * 1024;
/// Largest declared body accepted by the `/media` endpoint.
pub const DEFAULT_MEDIA_MAX_BYTES: u64 = 1024 * 1024 * 1024;
/// Redirect hops followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Which child references inherit the manifest's own query parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryInheritance {
    /// Every rewritten reference inherits missing parameters
    All,
    /// Only references on the manifest's own origin inherit
    SameOrigin,
    /// Query parameters are never inherited
    None,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Timeout budget for manifest requests (short; they stall playback)
    pub manifest_timeout: Duration,
    /// Timeout budget for segment requests (larger payloads)
    pub segment_timeout: Duration,
    /// Size ceiling for manifest rewriting
    pub max_manifest_bytes: u64,
    /// Size ceiling for the `/media` passthrough endpoint
    pub media_max_bytes: u64,
    pub max_redirects: usize,
    pub query_inheritance: QueryInheritance,
    /// Reject targets that are private or loopback IP literals
    pub block_private_targets: bool,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let manifest_timeout =
            Duration::from_millis(parse_or("MANIFEST_TIMEOUT_MS", DEFAULT_MANIFEST_TIMEOUT_MS));
        let segment_timeout =
            Duration::from_millis(parse_or("SEGMENT_TIMEOUT_MS", DEFAULT_SEGMENT_TIMEOUT_MS));

        let max_manifest_bytes = parse_or("MAX_MANIFEST_BYTES", DEFAULT_MAX_MANIFEST_BYTES);
        let media_max_bytes = parse_or("MEDIA_MAX_BYTES", DEFAULT_MEDIA_MAX_BYTES);
        let max_redirects = parse_or("MAX_REDIRECTS", DEFAULT_MAX_REDIRECTS);

        let query_inheritance = match env::var("QUERY_INHERITANCE")
            .unwrap_or_else(|_| "all".to_string())
            .to_lowercase()
            .as_str()
        {
            "same-origin" | "same_origin" => QueryInheritance::SameOrigin,
            "none" | "off" => QueryInheritance::None,
            _ => QueryInheritance::All,
        };

        // Private-address guard: on in prod, off in dev unless set explicitly
        let block_private_targets = env::var("BLOCK_PRIVATE_TARGETS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(!is_dev);

        Ok(Config {
            port,
            is_dev,
            manifest_timeout,
            segment_timeout,
            max_manifest_bytes,
            media_max_bytes,
            max_redirects,
            query_inheritance,
            block_private_targets,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
