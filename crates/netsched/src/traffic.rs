//! Traffic model: per-identity size estimates and the current bandwidth figure.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::store::{TrafficRecord, TrafficStore};

/// Estimated size of a request whose identity has never completed.
pub const FALLBACK_ESTIMATE_BYTES: u64 = 1024;

/// Upper bound on in-flight estimated traffic for one admission pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Bandwidth is not known yet; everything fits.
    Unbounded,
    /// Bytes that may be in flight at once.
    Bytes(u64),
}

impl Budget {
    /// Whether `traffic` bytes stay within the budget.
    pub fn allows(&self, traffic: u64) -> bool {
        match self {
            Budget::Unbounded => true,
            Budget::Bytes(limit) => traffic <= *limit,
        }
    }
}

/// Estimates request sizes from completed transfers and tracks bandwidth.
///
/// Owned by the admission domain, so it needs no locking of its own; the
/// store behind it is shared with the flush worker.
pub struct TrafficModel {
    store: Arc<dyn TrafficStore>,
    fallback_bytes: u64,
    smoothing: Option<f64>,
    bandwidth_bps: Option<f64>,
    dirty: bool,
}

impl TrafficModel {
    /// Creates a model reading from and writing to `store`.
    pub fn new(store: Arc<dyn TrafficStore>) -> Self {
        Self {
            store,
            fallback_bytes: FALLBACK_ESTIMATE_BYTES,
            smoothing: None,
            bandwidth_bps: None,
            dirty: false,
        }
    }

    /// Overrides the estimate used for identities without records.
    pub fn with_fallback_bytes(mut self, bytes: u64) -> Self {
        self.fallback_bytes = bytes;
        self
    }

    /// Blends each bandwidth sample into the previous figure with weight `alpha`.
    ///
    /// Without smoothing the most recent transfer alone sets the bandwidth.
    pub fn with_smoothing(mut self, alpha: Option<f64>) -> Self {
        self.smoothing = alpha.filter(|a| *a > 0.0 && *a <= 1.0);
        self
    }

    /// Estimated size in bytes of a request with this identity.
    pub fn estimate(&self, identity: &str) -> u64 {
        let record = match self.store.get(identity) {
            Ok(record) => record,
            Err(e) => {
                warn!(identity, error = %e, "Traffic store read failed, using fallback estimate");
                None
            }
        };
        let estimate = record
            .and_then(|r| r.average())
            .unwrap_or(self.fallback_bytes);
        trace!(target: "netsched::traffic", identity, estimate, known = record.is_some(), "Estimated traffic");
        estimate
    }

    /// Records a successful transfer of `bytes` that took `transfer_secs`.
    pub fn record(&mut self, identity: &str, bytes: u64, transfer_secs: f64) {
        let previous = match self.store.get(identity) {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(identity, error = %e, "Traffic store read failed, starting a fresh record");
                TrafficRecord::default()
            }
        };
        let updated = previous.with_completion(bytes);
        match self.store.put(identity, updated) {
            Ok(()) => self.dirty = true,
            Err(e) => warn!(identity, error = %e, "Traffic store write failed"),
        }

        if transfer_secs > 0.0 && transfer_secs.is_finite() {
            let sample = bytes as f64 / transfer_secs;
            let bandwidth = match (self.smoothing, self.bandwidth_bps) {
                (Some(alpha), Some(current)) => alpha * sample + (1.0 - alpha) * current,
                _ => sample,
            };
            self.bandwidth_bps = Some(bandwidth);
            debug!(
                target: "netsched::bandwidth",
                bytes_per_sec = bandwidth as u64,
                kilobytes_per_sec = (bandwidth / 1_000.0) as u64,
                "Bandwidth updated"
            );
        }
    }

    /// Current bandwidth estimate in bytes per second, if any transfer was measured.
    pub fn bandwidth(&self) -> Option<f64> {
        self.bandwidth_bps
    }

    /// Budget for in-flight traffic derived from the bandwidth estimate.
    pub fn budget(&self) -> Budget {
        match self.bandwidth_bps {
            Some(bps) if bps.is_finite() && bps >= 0.0 => Budget::Bytes(bps as u64),
            _ => Budget::Unbounded,
        }
    }

    /// Flags the records as needing a flush again, after a failed persist.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag, returning whether it was set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// The backing store, for flushing off the admission path.
    pub fn store(&self) -> Arc<dyn TrafficStore> {
        Arc::clone(&self.store)
    }
}

impl std::fmt::Debug for TrafficModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficModel")
            .field("fallback_bytes", &self.fallback_bytes)
            .field("smoothing", &self.smoothing)
            .field("bandwidth_bps", &self.bandwidth_bps)
            .field("dirty", &self.dirty)
            .finish()
    }
}
