//! Scheduler statistics.

use serde::Serialize;

/// Point-in-time view of the scheduler, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    /// Requests waiting for admission.
    pub stalled: usize,
    /// Requests handed to the transport and not yet settled.
    pub active: usize,
    /// Requests accepted by `schedule`.
    pub submitted: u64,
    /// Requests handed to the transport.
    pub dispatched: u64,
    /// Transfers that finished with an accepted status.
    pub completed: u64,
    /// Transfers that failed or returned a rejected status.
    pub failed: u64,
    /// Requests settled by a cancellation.
    pub cancelled: u64,
    /// Admission passes run so far.
    pub admission_passes: u64,
    /// Sum of the estimates of all active requests.
    pub estimated_traffic: u64,
    /// Last measured bandwidth in bytes per second.
    pub bandwidth_bps: Option<f64>,
}

impl SchedulerStats {
    /// True when nothing is stalled or in flight.
    pub fn is_idle(&self) -> bool {
        self.stalled == 0 && self.active == 0
    }

    /// Requests that reached a terminal state.
    pub fn settled(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_and_settled() {
        let mut stats = SchedulerStats::default();
        assert!(stats.is_idle());

        stats.active = 1;
        assert!(!stats.is_idle());

        stats.completed = 3;
        stats.failed = 1;
        stats.cancelled = 2;
        assert_eq!(stats.settled(), 6);
    }
}
