use super::hls::TargetParams;
use crate::{
    error::{RelayError, Result},
    hls::detect::media_type_essence,
    metrics,
    relay::{Phase, PhaseTracker, RequestKind, ResponseKind, headers, stream::guarded_idle},
    server::{state::AppState, url_validation::parse_target},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use std::time::Instant;
use tracing::info;

const ENDPOINT: &str = "media";

const MEDIA_ACCEPT: &str = "video/*,audio/*,image/*";

/// Content types the media passthrough is willing to relay.
pub const MEDIA_CONTENT_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/ogg",
    "audio/mpeg",
    "audio/ogg",
    "audio/wav",
    "audio/webm",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

/// Relay a standalone media file without any rewriting.
pub async fn serve_media(
    Query(params): Query<TargetParams>,
    inbound: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let start = Instant::now();
    let mut phases = PhaseTracker::new(ENDPOINT);

    let response = match relay_media(&params, &inbound, &state, &mut phases).await {
        Ok(response) => response,
        Err(e) => {
            phases.fail(&e);
            e.into_response()
        }
    };

    metrics::record_request(ENDPOINT, response.status().as_u16());
    metrics::record_duration(ENDPOINT, start);
    response
}

async fn relay_media(
    params: &TargetParams,
    inbound: &HeaderMap,
    state: &AppState,
    phases: &mut PhaseTracker,
) -> Result<Response> {
    phases.advance(Phase::ValidatingUrl);
    let target = parse_target(params.url.as_deref(), state.config.block_private_targets)?;
    let budget = state.relay.budget(RequestKind::Segment);

    let mut outbound = headers::outbound(inbound, &target);
    outbound.insert(header::ACCEPT, HeaderValue::from_static(MEDIA_ACCEPT));

    phases.advance(Phase::FetchingUpstream);
    let upstream = state.relay.fetch(&target, outbound, &budget).await?;

    phases.advance(Phase::Classifying);
    let essence = media_type_essence(
        upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default(),
    );
    if !MEDIA_CONTENT_TYPES.contains(&essence.as_str()) {
        return Err(RelayError::UnsupportedMediaType(essence));
    }
    if let Some(len) = upstream.content_length()
        && len > state.config.media_max_bytes
    {
        return Err(RelayError::PayloadTooLarge(len));
    }

    info!("Relaying {} media from {}", essence, target.host_str().unwrap_or_default());
    let status = upstream.status();
    let response_headers = headers::inbound(upstream.headers(), ResponseKind::Segment, false);

    phases.advance(Phase::Passthrough);
    let body = upstream.bytes_stream().map_err(RelayError::from);

    // The budget covered the head; large files are bounded by read progress
    phases.advance(Phase::Streaming);
    let idle = budget.timeout();
    let body = Body::from_stream(guarded_idle(body, budget, idle));
    Ok((status, response_headers, body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_is_normalised() {
        for ct in MEDIA_CONTENT_TYPES {
            assert_eq!(media_type_essence(ct), *ct);
        }
    }

    #[test]
    fn manifests_and_html_are_not_media() {
        assert!(!MEDIA_CONTENT_TYPES.contains(&"application/vnd.apple.mpegurl"));
        assert!(!MEDIA_CONTENT_TYPES.contains(&"text/html"));
    }
}
