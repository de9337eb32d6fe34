use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::warn;

/// Errors surfaced by the relay endpoints.
///
/// Every variant maps onto a status code and a short, non-sensitive message.
/// Line-level rewrite failures are not represented here; they are recovered
/// inside the manifest rewriter (see [`crate::hls::LineError`]).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("No URL provided")]
    MissingTarget,

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Upstream responded with {0}")]
    UpstreamStatus(StatusCode),

    #[error("Upstream timed out")]
    UpstreamTimeout,

    #[error("Upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Status code returned to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingTarget | RelayError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            RelayError::UpstreamStatus(status) => *status,
            RelayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Transport(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Transport(_) => StatusCode::BAD_GATEWAY,
            RelayError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the caller.
    ///
    /// Transport errors from reqwest embed the upstream URL (and with it any
    /// signed query token), so they are reduced to a generic message.
    fn public_message(&self) -> String {
        match self {
            RelayError::Transport(e) if e.is_timeout() => "Upstream timed out".to_string(),
            RelayError::Transport(_) => "Upstream fetch failed".to_string(),
            RelayError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Relay request failed with {}: {}", status, self);
        }

        (status, format!("{}\n", self.public_message())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_input_errors_are_400() {
        assert_eq!(RelayError::MissingTarget.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RelayError::InvalidTarget("nope".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn upstream_status_is_passed_through() {
        let err = RelayError::UpstreamStatus(StatusCode::FORBIDDEN);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "Upstream responded with 403 Forbidden");
    }

    #[test]
    fn timeout_is_504() {
        assert_eq!(
            RelayError::UpstreamTimeout.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn media_collaborator_statuses() {
        assert_eq!(
            RelayError::UnsupportedMediaType("text/html".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            RelayError::PayloadTooLarge(10).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn internal_message_is_not_leaked() {
        let err = RelayError::Internal("secret detail".into());
        assert_eq!(err.public_message(), "Internal error");
    }
}
