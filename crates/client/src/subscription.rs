//! Owned consumer task for one job's result stream.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::messages::StreamEvent;
use crate::sse::EventStream;

/// A live subscription to a job's result stream.
///
/// Events are delivered in arrival order to the handler passed to
/// [`Subscription::spawn`]. A transport error is logged and ends the
/// subscription. Once [`close`](Subscription::close) has been called the
/// handler is not invoked again. Dropping the subscription closes it.
pub struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Start consuming `stream` on a background task.
    pub fn spawn<F>(job_id: impl Into<String>, mut stream: EventStream, mut handler: F) -> Self
    where
        F: FnMut(StreamEvent) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let job_id = job_id.into();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!(job_id = %job_id, "Subscription closed");
                        break;
                    }
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            tracing::trace!(job_id = %job_id, event = event.name(), "Stream event");
                            handler(event);
                        }
                        Some(Err(e)) => {
                            tracing::warn!(job_id = %job_id, error = %e, "Result stream failed");
                            break;
                        }
                        None => {
                            tracing::debug!(job_id = %job_id, "Result stream ended");
                            break;
                        }
                    },
                }
            }
        });

        Self { cancel, task }
    }

    /// Stop delivering events. Safe to call any number of times.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the subscription was closed or its stream has ended.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}
