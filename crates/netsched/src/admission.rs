//! The admission planner: decides which stalled requests one pass dispatches.
//!
//! Requests whose weighing reached [`REQUIRED_WEIGHING`](crate::priority::REQUIRED_WEIGHING)
//! go out unconditionally. The rest are walked in descending weighing order
//! and admitted while their estimated size still fits the bandwidth budget
//! next to everything already in flight. The walk stops at the first request
//! that does not fit; lower-weighing requests never overtake it.

use crate::priority::is_required;
use crate::queue::{RequestId, WeighedRequest};
use crate::traffic::Budget;

/// What is already on the wire when a pass starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight {
    /// Number of active requests.
    pub requests: usize,
    /// Sum of their estimated sizes.
    pub traffic: u64,
}

/// Outcome of one admission pass over a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionPlan {
    /// Requests dispatched regardless of the budget, in dispatch order.
    pub required: Vec<RequestId>,
    /// Requests admitted within the budget, in dispatch order.
    pub admitted: Vec<RequestId>,
    /// Estimated in-flight traffic once the plan is carried out.
    pub traffic: u64,
}

impl AdmissionPlan {
    /// All requests to dispatch, required ones first.
    pub fn dispatch_order(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.required.iter().chain(self.admitted.iter()).copied()
    }

    /// True when the pass dispatches nothing.
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.admitted.is_empty()
    }

    /// Number of requests to dispatch.
    pub fn len(&self) -> usize {
        self.required.len() + self.admitted.len()
    }
}

/// Plans one admission pass.
///
/// `active` describes everything already in flight and `estimate` returns the
/// estimated size of a request by identity. When nothing is in flight and
/// nothing is required, the head candidate is admitted whatever its size.
pub fn plan_admission<F>(
    mut snapshot: Vec<WeighedRequest>,
    active: InFlight,
    budget: Budget,
    estimate: F,
) -> AdmissionPlan
where
    F: Fn(&str) -> u64,
{
    snapshot.sort_by(|a, b| b.weighing.cmp(&a.weighing).then(a.seq.cmp(&b.seq)));

    let (required, candidates): (Vec<_>, Vec<_>) =
        snapshot.into_iter().partition(|r| is_required(r.weighing));

    let mut traffic = active.traffic;
    for request in &required {
        traffic = traffic.saturating_add(estimate(&request.identity));
    }

    let idle = active.requests == 0 && required.is_empty();
    let mut admitted = Vec::new();
    for candidate in candidates {
        let next = traffic.saturating_add(estimate(&candidate.identity));
        if (idle && admitted.is_empty()) || budget.allows(next) {
            admitted.push(candidate.id);
            traffic = next;
        } else {
            break;
        }
    }

    AdmissionPlan {
        required: required.into_iter().map(|r| r.id).collect(),
        admitted,
        traffic,
    }
}
