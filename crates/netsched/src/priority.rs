//! Request priorities and the age-based weighing used to rank stalled requests.
//!
//! A request's weighing grows with the time it has spent waiting, so every
//! request eventually reaches [`REQUIRED_WEIGHING`] and is dispatched without
//! regard to the bandwidth budget. A `Low` request gets there in just under
//! thirty seconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Weighing at or above which a stalled request is dispatched unconditionally.
pub const REQUIRED_WEIGHING: u64 = 5000;

/// Priority tiers for scheduled requests.
///
/// Each tier maps to a fixed numeric base that seeds the request's weighing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    /// Background traffic, prefetching.
    Low,
    /// Regular requests.
    Normal,
    /// Requests the user is waiting on.
    High,
    /// Dispatched on the next admission pass regardless of bandwidth.
    #[default]
    Required,
}

impl RequestPriority {
    /// The numeric base of this tier.
    pub const fn base(self) -> u64 {
        match self {
            RequestPriority::Low => 100,
            RequestPriority::Normal => 500,
            RequestPriority::High => 1000,
            RequestPriority::Required => 5000,
        }
    }
}

impl std::fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestPriority::Low => write!(f, "low"),
            RequestPriority::Normal => write!(f, "normal"),
            RequestPriority::High => write!(f, "high"),
            RequestPriority::Required => write!(f, "required"),
        }
    }
}

impl std::str::FromStr for RequestPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RequestPriority::Low),
            "normal" => Ok(RequestPriority::Normal),
            "high" => Ok(RequestPriority::High),
            "required" => Ok(RequestPriority::Required),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Weighing of a request of the given tier after waiting `waited`.
///
/// `base + floor(30 * secs^1.5 + 100)`
pub fn weighing(priority: RequestPriority, waited: Duration) -> u64 {
    let secs = waited.as_secs_f64();
    let age = (30.0 * secs.powf(1.5) + 100.0).floor();
    priority.base().saturating_add(age as u64)
}

/// Whether a request with this weighing bypasses the bandwidth budget.
pub fn is_required(weighing: u64) -> bool {
    weighing >= REQUIRED_WEIGHING
}
