//! Abstract transport layer for dispatched requests.
//!
//! The scheduler only decides when a request goes out; a [`Transport`]
//! performs the I/O. Starting a transfer returns a future that resolves to
//! exactly one terminal result. Dropping that future cancels the transfer.

use bytes::Bytes;
use std::future::Future;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::TransportError;
use crate::operation::Method;

/// A prepared request ready to hand to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// Operation identity the request was created from.
    pub identity: String,
    /// HTTP method.
    pub method: Method,
    /// Absolute http or https url, without the query pairs.
    pub url: String,
    /// Request headers, sent in order.
    pub headers: Vec<(String, String)>,
    /// Query string pairs appended to the url.
    pub query: Vec<(String, String)>,
    /// Upload body, if any.
    pub body: Option<Bytes>,
    /// Status codes the operation accepts as success.
    pub accepted_status: Vec<RangeInclusive<u16>>,
}

/// Whether `status` falls in any of the `accepted` ranges.
pub fn accepts(accepted: &[RangeInclusive<u16>], status: u16) -> bool {
    accepted.iter().any(|r| r.contains(&status))
}

/// Terminal result of a successful transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Complete response body.
    pub body: Bytes,
    /// Time until the response headers arrived.
    pub latency: Duration,
    /// Total time from start until the body was complete.
    pub elapsed: Duration,
}

impl TransportResponse {
    /// Time spent moving the body, excluding latency.
    pub fn transfer_time(&self) -> Duration {
        self.elapsed.saturating_sub(self.latency)
    }
}

/// Reports how far a transfer has come, as a fraction from 0.0 to 1.0.
///
/// Cloned into the transport on dispatch; the caller holds the receiving
/// side. Reported values never decrease.
#[derive(Debug, Clone)]
pub struct Progress {
    tx: Arc<watch::Sender<f64>>,
}

impl Progress {
    /// Creates a reporter and the receiver that observes it.
    pub fn channel() -> (Self, watch::Receiver<f64>) {
        let (tx, rx) = watch::channel(0.0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Reports `transferred` of `total` bytes. Unknown or zero totals report nothing.
    pub fn report(&self, transferred: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|t| *t > 0) {
            self.advance((transferred as f64 / total as f64).min(1.0));
        }
    }

    /// Marks the transfer complete.
    pub fn finish(&self) {
        self.advance(1.0);
    }

    fn advance(&self, fraction: f64) {
        self.tx.send_if_modified(|current| {
            if fraction > *current {
                *current = fraction;
                true
            } else {
                false
            }
        });
    }
}

/// Future for one in-flight transfer.
pub type TransferFuture =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'static>>;

/// Performs network I/O for dispatched requests.
pub trait Transport: Send + Sync + 'static {
    /// Start a transfer. The returned future owns everything it needs.
    ///
    /// Transports that can observe the body as it moves report through
    /// `progress`; the scheduler marks it finished on success either way.
    fn start(&self, request: TransportRequest, progress: Progress) -> TransferFuture;
}
