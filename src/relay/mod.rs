//! Outbound fetch to the origin: timeout budgets, cancellation, redirects
//! and header translation.

pub mod budget;
pub mod headers;
pub mod stream;

pub use budget::RequestBudget;
pub use headers::ResponseKind;

use crate::{
    config::Config,
    error::{RelayError, Result},
    hls::detect::has_manifest_extension,
    metrics,
    server::url_validation::{is_blocked_redirect, redirect_policy},
};
use axum::http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Budget class of a request, decided from the target URL before fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Manifest,
    Segment,
}

impl RequestKind {
    pub fn for_target(target: &Url) -> Self {
        if has_manifest_extension(target) {
            RequestKind::Manifest
        } else {
            RequestKind::Segment
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::Manifest => "manifest",
            RequestKind::Segment => "segment",
        }
    }
}

/// Shared upstream client plus the timeout policy.
#[derive(Clone, Debug)]
pub struct Relay {
    client: Client,
    manifest_timeout: Duration,
    segment_timeout: Duration,
}

impl Relay {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .redirect(redirect_policy(
                config.max_redirects,
                config.block_private_targets,
            ))
            .build()?;

        Ok(Self {
            client,
            manifest_timeout: config.manifest_timeout,
            segment_timeout: config.segment_timeout,
        })
    }

    pub fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Manifest => self.manifest_timeout,
            RequestKind::Segment => self.segment_timeout,
        }
    }

    /// Start the cancellation budget for one request.
    pub fn budget(&self, kind: RequestKind) -> RequestBudget {
        RequestBudget::start(self.timeout_for(kind))
    }

    /// Send the GET and wait for the response head.
    ///
    /// Redirects are followed by the client; `Response::url()` is the final
    /// URL. A hop refused by the private-address guard is reported as
    /// [`RelayError::InvalidTarget`]. Only 200 and 206 are returned as
    /// success, any other status is surfaced as [`RelayError::UpstreamStatus`].
    pub async fn fetch(
        &self,
        target: &Url,
        outbound: HeaderMap,
        budget: &RequestBudget,
    ) -> Result<reqwest::Response> {
        let request = self.client.get(target.as_str()).headers(outbound);

        let response = tokio::select! {
            biased;
            _ = budget.token().cancelled() => {
                warn!("Upstream did not answer within {:?}", budget.timeout());
                return Err(RelayError::UpstreamTimeout);
            }
            result = request.send() => match result {
                Ok(response) => response,
                Err(e) if is_blocked_redirect(&e) => {
                    warn!("Refused upstream redirect: {}", e);
                    return Err(RelayError::InvalidTarget(
                        "redirect to private or reserved address".to_string(),
                    ));
                }
                Err(e) => {
                    warn!("Upstream fetch failed: {}", e);
                    metrics::record_origin_error();
                    return Err(e.into());
                }
            },
        };

        let status = response.status();
        if response.url() != target {
            debug!("Followed redirect to {}", response.url());
        }

        match status {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(response),
            other => {
                debug!("Upstream answered {}, surfacing as-is", other);
                Err(RelayError::UpstreamStatus(other))
            }
        }
    }
}

/// Lifecycle of one relay request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    ValidatingUrl,
    FetchingUpstream,
    Classifying,
    Rewriting,
    Passthrough,
    Streaming,
    Completed,
    Aborted,
    Errored,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted | Phase::Errored)
    }

    /// Legal transitions. No edge leads back to an earlier phase.
    pub fn can_advance_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Received, ValidatingUrl) => true,
            (ValidatingUrl, FetchingUpstream) => true,
            (FetchingUpstream, Classifying) => true,
            (Classifying, Rewriting | Passthrough) => true,
            (Rewriting | Passthrough, Streaming) => true,
            (Streaming, Completed) => true,
            (current, Aborted | Errored) => {
                !current.is_terminal() && !matches!(current, Received)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Received => "received",
            Phase::ValidatingUrl => "validating_url",
            Phase::FetchingUpstream => "fetching_upstream",
            Phase::Classifying => "classifying",
            Phase::Rewriting => "rewriting",
            Phase::Passthrough => "passthrough",
            Phase::Streaming => "streaming",
            Phase::Completed => "completed",
            Phase::Aborted => "aborted",
            Phase::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Tracks and logs phase transitions for one request.
#[derive(Debug)]
pub struct PhaseTracker {
    endpoint: &'static str,
    phase: Phase,
}

impl PhaseTracker {
    pub fn new(endpoint: &'static str) -> Self {
        debug!(endpoint, phase = %Phase::Received, "Relay request received");
        Self {
            endpoint,
            phase: Phase::Received,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, next: Phase) {
        if !self.phase.can_advance_to(next) {
            warn!(
                endpoint = self.endpoint,
                "Unexpected phase transition {} -> {}", self.phase, next
            );
        }
        debug!(endpoint = self.endpoint, from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
    }

    /// Record the terminal phase for a failed request.
    pub fn fail(&mut self, err: &RelayError) {
        let next = match err {
            RelayError::UpstreamTimeout => Phase::Aborted,
            _ => Phase::Errored,
        };
        self.advance(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_from_extension() {
        let manifest = Url::parse("https://cdn.example.com/live/index.m3u8?t=1").unwrap();
        let segment = Url::parse("https://cdn.example.com/live/seg1.ts").unwrap();
        assert_eq!(RequestKind::for_target(&manifest), RequestKind::Manifest);
        assert_eq!(RequestKind::for_target(&segment), RequestKind::Segment);
    }

    #[test]
    fn manifest_budget_is_shorter() {
        let config = Config {
            port: 0,
            is_dev: true,
            manifest_timeout: Duration::from_secs(10),
            segment_timeout: Duration::from_secs(60),
            max_manifest_bytes: 1024,
            media_max_bytes: 1024,
            max_redirects: 10,
            query_inheritance: crate::config::QueryInheritance::All,
            block_private_targets: false,
        };
        let relay = Relay::new(&config).unwrap();
        assert!(relay.timeout_for(RequestKind::Manifest) < relay.timeout_for(RequestKind::Segment));
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            Phase::Received,
            Phase::ValidatingUrl,
            Phase::FetchingUpstream,
            Phase::Classifying,
            Phase::Rewriting,
            Phase::Streaming,
            Phase::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Phase::Classifying.can_advance_to(Phase::Passthrough));
        assert!(Phase::Passthrough.can_advance_to(Phase::Streaming));
    }

    #[test]
    fn failures_reachable_after_validation_only() {
        assert!(!Phase::Received.can_advance_to(Phase::Errored));
        assert!(Phase::ValidatingUrl.can_advance_to(Phase::Errored));
        assert!(Phase::FetchingUpstream.can_advance_to(Phase::Aborted));
        assert!(Phase::Streaming.can_advance_to(Phase::Aborted));
        assert!(Phase::Streaming.can_advance_to(Phase::Errored));
    }

    #[test]
    fn no_retry_or_backwards_edges() {
        assert!(!Phase::Errored.can_advance_to(Phase::FetchingUpstream));
        assert!(!Phase::Aborted.can_advance_to(Phase::Errored));
        assert!(!Phase::Completed.can_advance_to(Phase::Streaming));
        assert!(!Phase::Streaming.can_advance_to(Phase::Classifying));
        assert!(!Phase::Received.can_advance_to(Phase::Streaming));
    }

    #[test]
    fn tracker_maps_timeout_to_aborted() {
        let mut tracker = PhaseTracker::new("hls");
        tracker.advance(Phase::ValidatingUrl);
        tracker.advance(Phase::FetchingUpstream);
        tracker.fail(&RelayError::UpstreamTimeout);
        assert_eq!(tracker.phase(), Phase::Aborted);

        let mut tracker = PhaseTracker::new("hls");
        tracker.advance(Phase::ValidatingUrl);
        tracker.fail(&RelayError::MissingTarget);
        assert_eq!(tracker.phase(), Phase::Errored);
    }
}
