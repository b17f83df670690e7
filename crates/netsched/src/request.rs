//! Caller-side handle of a scheduled request.

use bytes::Bytes;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use crate::cancel::CancelReason;
use crate::error::{Result, SchedulerError};
use crate::operation::NetworkOperation;
use crate::queue::RequestId;
use crate::scheduler::Command;
use crate::transport::Progress;

enum Pending {
    Waiting {
        reply: oneshot::Receiver<Result<Bytes>>,
        commands: mpsc::WeakUnboundedSender<Command>,
    },
    Failed(SchedulerError),
}

/// A submitted operation. Await it for the decoded result.
///
/// The future settles exactly once: with the decoded output, the operation's
/// error for a rejected status, a transport error, or a cancellation.
/// Dropping it does not cancel the request; use [`cancel`](Self::cancel).
pub struct ScheduledRequest<O: NetworkOperation> {
    id: RequestId,
    operation: O,
    progress: watch::Receiver<f64>,
    pending: Pending,
}

impl<O: NetworkOperation> ScheduledRequest<O> {
    pub(crate) fn pending(
        id: RequestId,
        operation: O,
        reply: oneshot::Receiver<Result<Bytes>>,
        progress: watch::Receiver<f64>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            operation,
            progress,
            pending: Pending::Waiting { reply, commands },
        }
    }

    pub(crate) fn failed(id: RequestId, operation: O, error: SchedulerError) -> Self {
        Self {
            id,
            operation,
            progress: Progress::channel().1,
            pending: Pending::Failed(error),
        }
    }

    /// Identifier assigned at submission.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The submitted operation.
    pub fn operation(&self) -> &O {
        &self.operation
    }

    /// Transfer progress from 0.0 to 1.0.
    ///
    /// Stays at 0.0 while the request is stalled and reaches 1.0 when the
    /// transfer completes with an accepted status. In between it moves only
    /// when the transport knows the body length.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    /// Cancels the request whether it is stalled or in flight.
    pub fn cancel(&self) {
        self.send_cancel(CancelReason::UserRequested);
    }

    fn send_cancel(&self, reason: CancelReason) {
        if let Pending::Waiting { commands, .. } = &self.pending {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Cancel {
                    id: self.id,
                    reason,
                });
            }
        }
    }

    /// Waits for the result.
    pub async fn wait(self) -> Result<O::Output> {
        let Self {
            operation, pending, ..
        } = self;
        match pending {
            Pending::Failed(e) => Err(e),
            Pending::Waiting { reply, .. } => finish(&operation, reply.await),
        }
    }

    /// Waits at most `duration`, cancelling the request when it runs out.
    pub async fn timeout(self, duration: Duration) -> Result<O::Output> {
        let Self {
            id,
            operation,
            pending,
            ..
        } = self;
        let (mut reply, commands) = match pending {
            Pending::Failed(e) => return Err(e),
            Pending::Waiting { reply, commands } => (reply, commands),
        };

        match tokio::time::timeout(duration, &mut reply).await {
            Ok(received) => finish(&operation, received),
            Err(_) => {
                if let Some(tx) = commands.upgrade() {
                    let _ = tx.send(Command::Cancel {
                        id,
                        reason: CancelReason::DeadlineExceeded,
                    });
                }
                Err(SchedulerError::Timeout {
                    request_id: id,
                    timeout_ms: duration.as_millis() as u64,
                })
            }
        }
    }
}

fn finish<O: NetworkOperation>(
    operation: &O,
    received: std::result::Result<Result<Bytes>, oneshot::error::RecvError>,
) -> Result<O::Output> {
    match received {
        Ok(Ok(body)) => operation.decode(body),
        Ok(Err(SchedulerError::UnexpectedStatus { status, body })) => {
            Err(operation.decode_error(status, body))
        }
        Ok(Err(e)) => Err(e),
        // reply dropped without settling: the domain is gone
        Err(_) => Err(SchedulerError::ShutDown),
    }
}

impl<O: NetworkOperation> IntoFuture for ScheduledRequest<O> {
    type Output = Result<O::Output>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<O: NetworkOperation> std::fmt::Debug for ScheduledRequest<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledRequest")
            .field("id", &self.id)
            .field("identity", &self.operation.identity())
            .field("settled_early", &matches!(self.pending, Pending::Failed(_)))
            .finish()
    }
}
