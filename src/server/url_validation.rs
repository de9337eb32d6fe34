use crate::error::RelayError;
use reqwest::redirect::Policy;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// A redirect hop pointed at a private or reserved address.
#[derive(Debug, Error)]
#[error("redirect to private or reserved address blocked: {0}")]
pub struct BlockedRedirect(pub String);

/// Parse and validate the `url` query parameter of a relay request.
///
/// Accepts only absolute `http://` and `https://` URLs with a host. When
/// `block_private` is set, IP literals in private or reserved ranges are
/// rejected as well (SSRF protection).
///
/// Hostnames are accepted without DNS resolution; DNS rebinding is a known
/// limitation of this check.
///
/// # Errors
/// - [`RelayError::MissingTarget`] when the parameter is absent or empty
/// - [`RelayError::InvalidTarget`] for relative or unparseable URLs,
///   non-HTTP(S) schemes, missing hosts and blocked addresses
pub fn parse_target(raw: Option<&str>, block_private: bool) -> Result<Url, RelayError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let Some(raw) = raw else {
        return Err(RelayError::MissingTarget);
    };

    let parsed = Url::parse(raw).map_err(|e| RelayError::InvalidTarget(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(RelayError::InvalidTarget(format!(
                "scheme '{scheme}' not allowed, only http/https"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| RelayError::InvalidTarget("no host in URL".to_string()))?;

    if block_private {
        match host {
            Host::Ipv4(ip) if is_blocked_ipv4(ip) => {
                return Err(RelayError::InvalidTarget(format!(
                    "private or reserved IPv4 address not allowed: {ip}"
                )));
            }
            Host::Ipv6(ip) if is_blocked_ipv6(ip) => {
                return Err(RelayError::InvalidTarget(format!(
                    "private or reserved IPv6 address not allowed: {ip}"
                )));
            }
            _ => {}
        }
    }

    Ok(parsed)
}

/// Redirect policy for the upstream client.
///
/// Caps the chain at `max_redirects` hops. With `block_private` set, every
/// hop is held to the same address rules as the initial target, so an origin
/// cannot bounce the relay onto an internal address.
pub fn redirect_policy(max_redirects: usize, block_private: bool) -> Policy {
    if !block_private {
        return Policy::limited(max_redirects);
    }

    Policy::custom(move |attempt| {
        if attempt.previous().len() >= max_redirects {
            attempt.error("too many redirects")
        } else if is_blocked_host(attempt.url()) {
            let blocked = BlockedRedirect(attempt.url().to_string());
            attempt.error(blocked)
        } else {
            attempt.follow()
        }
    })
}

/// `true` when the URL's host is an IP literal in a blocked range.
pub fn is_blocked_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_blocked_ipv4(ip),
        Some(Host::Ipv6(ip)) => is_blocked_ipv6(ip),
        _ => false,
    }
}

/// `true` when a client error was raised by [`redirect_policy`] refusing a hop.
pub fn is_blocked_redirect(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if err.is::<BlockedRedirect>() {
            return true;
        }
        source = err.source();
    }
    false
}

/// Returns `true` for IPv4 addresses in private or reserved ranges.
///
/// Blocked ranges:
/// - `0.0.0.0/8`      "this" network (RFC 1122)
/// - `10.0.0.0/8`     RFC 1918 private
/// - `127.0.0.0/8`    loopback
/// - `169.254.0.0/16` link-local / cloud metadata
/// - `172.16.0.0/12`  RFC 1918 private
/// - `192.168.0.0/16` RFC 1918 private
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();

    a == 0
        || a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// Returns `true` for IPv6 loopback, link-local (`fe80::/10`) and
/// unique-local (`fc00::/7`) addresses, plus IPv4-mapped blocked addresses.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let s = ip.segments();

    ip.is_loopback() || (s[0] & 0xffc0) == 0xfe80 || (s[0] & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict(url: &str) -> Result<Url, RelayError> {
        parse_target(Some(url), true)
    }

    #[test]
    fn missing_or_blank_is_missing_target() {
        assert!(matches!(parse_target(None, true), Err(RelayError::MissingTarget)));
        assert!(matches!(parse_target(Some(""), true), Err(RelayError::MissingTarget)));
        assert!(matches!(parse_target(Some("   "), false), Err(RelayError::MissingTarget)));
    }

    #[test]
    fn accepts_http_and_https() {
        let url = strict("https://cdn.example.com/live/stream.m3u8?token=abc").unwrap();
        assert_eq!(url.host_str(), Some("cdn.example.com"));
        assert_eq!(url.query(), Some("token=abc"));
        assert!(strict("http://live.broadcaster.com/playlist.m3u8").is_ok());
    }

    #[test]
    fn rejects_other_schemes() {
        for url in [
            "ftp://cdn.example.com/file.ts",
            "file:///etc/passwd",
            "gopher://cdn.example.com/stream",
            "data:text/plain,hi",
        ] {
            assert!(
                matches!(strict(url), Err(RelayError::InvalidTarget(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_relative_and_garbage() {
        assert!(matches!(
            strict("cdn.example.com/stream"),
            Err(RelayError::InvalidTarget(_))
        ));
        assert!(matches!(strict("not-a-url"), Err(RelayError::InvalidTarget(_))));
        assert!(matches!(
            strict("://missing-scheme"),
            Err(RelayError::InvalidTarget(_))
        ));
    }

    #[test]
    fn rejects_private_ipv4_when_blocking() {
        for url in [
            "http://127.0.0.1/stream",
            "http://10.0.0.1/stream",
            "http://172.16.0.1/stream",
            "http://172.31.255.255/stream",
            "http://192.168.1.1/stream",
            "http://169.254.169.254/latest/meta-data/",
            "http://0.0.0.0/stream",
        ] {
            assert!(strict(url).is_err(), "{url} should be blocked");
        }
    }

    #[test]
    fn rejects_private_ipv6_when_blocking() {
        assert!(strict("http://[::1]/stream").is_err());
        assert!(strict("http://[fe80::1]/stream").is_err());
        assert!(strict("http://[fd00::1]/stream").is_err());
        assert!(strict("http://[::ffff:127.0.0.1]/stream").is_err());
    }

    #[test]
    fn private_targets_allowed_when_not_blocking() {
        assert!(parse_target(Some("http://127.0.0.1:8080/index.m3u8"), false).is_ok());
        assert!(parse_target(Some("http://[::1]/stream"), false).is_ok());
    }

    #[test]
    fn blocked_host_only_matches_ip_literals() {
        let blocked = |raw: &str| is_blocked_host(&Url::parse(raw).unwrap());
        assert!(blocked("http://127.0.0.1:9000/secret.ts"));
        assert!(blocked("http://[::ffff:10.0.0.5]/secret.ts"));
        assert!(blocked("http://169.254.169.254/latest/meta-data/"));
        assert!(!blocked("http://localhost:9000/secret.ts"));
        assert!(!blocked("https://cdn.example.com/seg.ts"));
        assert!(!blocked("https://8.8.8.8/seg.ts"));
    }

    #[test]
    fn range_boundaries() {
        assert!(strict("http://172.15.255.255/stream").is_ok());
        assert!(strict("http://172.32.0.0/stream").is_ok());
        assert!(strict("https://8.8.8.8/dns").is_ok());
    }
}
