//! Reasons a scheduled request can be cancelled before reaching a transport result.

/// Why a request was taken out of the scheduler without a transport result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelReason {
    /// Explicit cancellation through [`Scheduler::cancel`](crate::Scheduler::cancel).
    #[default]
    UserRequested,
    /// The caller's deadline elapsed first.
    DeadlineExceeded,
    /// The scheduler shut down with the request still outstanding.
    SchedulerShutdown,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::UserRequested => write!(f, "UserRequested"),
            CancelReason::DeadlineExceeded => write!(f, "DeadlineExceeded"),
            CancelReason::SchedulerShutdown => write!(f, "SchedulerShutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reason_default() {
        assert_eq!(CancelReason::default(), CancelReason::UserRequested);
    }

    #[test]
    fn test_cancel_reason_display() {
        assert_eq!(CancelReason::UserRequested.to_string(), "UserRequested");
        assert_eq!(CancelReason::DeadlineExceeded.to_string(), "DeadlineExceeded");
        assert_eq!(CancelReason::SchedulerShutdown.to_string(), "SchedulerShutdown");
    }
}
