use super::{Phase, budget::RequestBudget};
use crate::{error::RelayError, metrics};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use std::time::Duration;
use tracing::{debug, warn};

/// Tie a response body to its request budget.
///
/// Items are relayed one at a time, so a slow client pauses the upstream
/// read (the next chunk is only pulled when the previous one was taken).
/// When the budget fires the stream ends with [`RelayError::UpstreamTimeout`]
/// instead of finishing cleanly, so a cut-off body never looks complete.
/// Dropping the stream drops the budget, which cancels the request.
pub fn guarded<S>(
    inner: S,
    budget: RequestBudget,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
{
    relay_chunks(inner, budget, None)
}

/// Like [`guarded`], but the body is bounded by read progress instead of
/// the total budget.
///
/// The budget's deadline is disarmed (it already covered the response
/// head) and the stream fails once the upstream delivers nothing for
/// `idle`. Time spent waiting on a slow client does not count, since the
/// next chunk is only awaited when the client asks for it.
pub fn guarded_idle<S>(
    inner: S,
    budget: RequestBudget,
    idle: Duration,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
{
    budget.disarm_deadline();
    relay_chunks(inner, budget, Some(idle))
}

fn relay_chunks<S>(
    inner: S,
    mut budget: RequestBudget,
    idle: Option<Duration>,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, RelayError>> + Send + 'static,
{
    budget.mark_streaming();

    stream::unfold(Some((inner.boxed(), budget)), move |state| async move {
        let (mut inner, mut budget) = state?;
        let token = budget.token().clone();
        let stall = async {
            match idle {
                Some(idle) => tokio::time::sleep(idle).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                warn!(phase = %Phase::Aborted, "Upstream read aborted mid-stream after {:?}", budget.timeout());
                budget.settle();
                Some((Err(RelayError::UpstreamTimeout), None))
            }
            _ = stall => {
                warn!(phase = %Phase::Aborted, "Upstream sent nothing for {:?}, aborting", idle.unwrap_or_default());
                metrics::record_aborted("idle_timeout");
                budget.settle();
                Some((Err(RelayError::UpstreamTimeout), None))
            }
            item = inner.next() => match item {
                Some(Ok(chunk)) => Some((Ok(chunk), Some((inner, budget)))),
                Some(Err(e)) => {
                    warn!(phase = %Phase::Errored, "Upstream body failed mid-stream: {}", e);
                    budget.settle();
                    Some((Err(e), None))
                }
                None => {
                    debug!(phase = %Phase::Completed, "Relay stream completed");
                    budget.settle();
                    None
                }
            },
        }
    })
}
