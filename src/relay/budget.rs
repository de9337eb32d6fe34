use super::Phase;
use crate::metrics;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-request cancellation signal with a timeout budget.
///
/// The token fires when the budget expires or when the budget is dropped
/// (the response body went away because the client disconnected). A timer
/// task enforces the deadline and exits as soon as the token fires or the
/// deadline is disarmed.
#[derive(Debug)]
pub struct RequestBudget {
    token: CancellationToken,
    /// Stops the timer task without cancelling the request
    deadline: CancellationToken,
    timeout: Duration,
    /// Set once the body is being streamed to the client
    streaming: bool,
    /// Set once the request reached a terminal state on its own
    settled: bool,
}

impl RequestBudget {
    /// Start the clock. Must be called inside a Tokio runtime.
    pub fn start(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let deadline = CancellationToken::new();

        let timer = token.clone();
        let disarmed = deadline.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = disarmed.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    warn!("Request budget of {:?} exhausted, aborting upstream", timeout);
                    metrics::record_aborted("timeout");
                    timer.cancel();
                }
            }
        });

        Self {
            token,
            deadline,
            timeout,
            streaming: false,
            settled: false,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop the wall-clock deadline. Cancellation on drop still applies.
    pub(crate) fn disarm_deadline(&self) {
        self.deadline.cancel();
    }

    pub(crate) fn mark_streaming(&mut self) {
        self.streaming = true;
    }

    /// Terminal state reached (completed, errored or aborted).
    pub(crate) fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for RequestBudget {
    fn drop(&mut self) {
        if self.streaming && !self.settled && !self.token.is_cancelled() {
            debug!(phase = %Phase::Aborted, "Client went away mid-stream, cancelling upstream read");
            metrics::record_aborted("client_disconnect");
        }
        self.deadline.cancel();
        self.token.cancel();
    }
}
