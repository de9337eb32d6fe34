use crate::{
    error::{RelayError, Result},
    hls::{
        Classification, ManifestContext,
        detect::{classify, exceeds_rewrite_ceiling},
        rewrite_stream,
    },
    metrics,
    relay::{Phase, PhaseTracker, RequestKind, ResponseKind, headers, stream::guarded},
    server::{state::AppState, url_validation::parse_target},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream::BoxStream};
use serde::Deserialize;
use std::time::Instant;
use tracing::info;

const ENDPOINT: &str = "hls";

/// Query parameters shared by the relay endpoints
#[derive(Debug, Deserialize)]
pub struct TargetParams {
    pub url: Option<String>,
}

/// Relay an HLS resource, rewriting it on the fly when it is a manifest.
///
/// Manifests come back with every child reference pointing at this endpoint;
/// segments, keys and anything else stream through byte for byte.
pub async fn serve_hls(
    Query(params): Query<TargetParams>,
    inbound: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let start = Instant::now();
    let mut phases = PhaseTracker::new(ENDPOINT);

    let response = match relay_hls(&params, &inbound, &state, &mut phases).await {
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

async fn relay_hls(
    params: &TargetParams,
    inbound: &HeaderMap,
    state: &AppState,
    phases: &mut PhaseTracker,
) -> Result<Response> {
    phases.advance(Phase::ValidatingUrl);
    let target = parse_target(params.url.as_deref(), state.config.block_private_targets)?;

    let kind = RequestKind::for_target(&target);
    let budget = state.relay.budget(kind);
    info!("Relaying {} from {}", kind.label(), target.host_str().unwrap_or_default());

    phases.advance(Phase::FetchingUpstream);
    let upstream = state
        .relay
        .fetch(&target, headers::outbound(inbound, &target), &budget)
        .await?;

    phases.advance(Phase::Classifying);
    // Relative references resolve against where the manifest actually lives
    let final_url = upstream.url().clone();
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let classification = classify(&final_url, content_type);

    let rewrite = classification == Classification::Manifest
        && status == StatusCode::OK
        && !exceeds_rewrite_ceiling(upstream.content_length(), state.config.max_manifest_bytes)
        && !upstream.headers().contains_key(header::CONTENT_ENCODING);

    let response_kind = match classification {
        Classification::Manifest => ResponseKind::Manifest,
        Classification::Opaque => ResponseKind::Segment,
    };
    let response_headers = headers::inbound(upstream.headers(), response_kind, rewrite);

    let body: BoxStream<'static, std::result::Result<Bytes, RelayError>> =
        upstream.bytes_stream().map_err(RelayError::from).boxed();

    let body = if rewrite {
        phases.advance(Phase::Rewriting);
        let ctx = ManifestContext::new(&final_url, state.config.query_inheritance);
        rewrite_stream(body, ctx).boxed()
    } else {
        phases.advance(Phase::Passthrough);
        body
    };

    phases.advance(Phase::Streaming);
    Ok((status, response_headers, Body::from_stream(guarded(body, budget))).into_response())
}
