//! Timeout and cancellation wrapper for collaborator calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::LlmError;

/// Run `fut` until it finishes, `timeout` elapses, or `cancel` fires, whichever is first.
///
/// Cancellation wins over a simultaneously ready result. Nothing is retried.
///
/// # Errors
///
/// Returns the future's own error, [`LlmError::Timeout`] or [`LlmError::Cancelled`].
pub async fn guarded<T, F>(fut: F, timeout: Duration, cancel: &CancellationToken) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    if cancel.is_cancelled() {
        return Err(LlmError::Cancelled);
    }

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::info!("collaborator call cancelled");
            Err(LlmError::Cancelled)
        }
        r = tokio::time::timeout(timeout, fut) => match r {
            Ok(inner) => inner,
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs_f32(), "collaborator call timed out");
                Err(LlmError::Timeout(timeout))
            }
        },
    }
}
