//! Bookkeeping for stalled and in-flight requests.
//!
//! Both containers are owned by the admission domain and are only touched
//! from that single task.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::Result;
use crate::priority::{weighing, RequestPriority};
use crate::traffic::TrafficModel;
use crate::transport::{Progress, TransportRequest};

/// Process-unique identifier of a scheduled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settles the caller's future with the raw response body or an error.
pub(crate) type Reply = oneshot::Sender<Result<Bytes>>;

/// A request waiting for admission.
#[derive(Debug)]
pub struct StalledRequest {
    pub(crate) id: RequestId,
    pub(crate) identity: String,
    pub(crate) priority: RequestPriority,
    pub(crate) inserted_at: Instant,
    pub(crate) request: TransportRequest,
    pub(crate) reply: Reply,
    pub(crate) progress: Progress,
}

impl StalledRequest {
    pub(crate) fn new(
        id: RequestId,
        priority: RequestPriority,
        request: TransportRequest,
        reply: Reply,
        progress: Progress,
    ) -> Self {
        Self {
            id,
            identity: request.identity.clone(),
            priority,
            inserted_at: Instant::now(),
            request,
            reply,
            progress,
        }
    }
}

/// A stalled request weighed at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeighedRequest {
    /// Request being weighed.
    pub id: RequestId,
    /// Operation identity, the key into the traffic model.
    pub identity: String,
    /// Priority base plus age bonus at snapshot time.
    pub weighing: u64,
    /// Insertion order, used to break weighing ties.
    pub seq: u64,
}

struct QueueEntry {
    seq: u64,
    request: StalledRequest,
}

/// Requests not yet dispatched.
#[derive(Default)]
pub struct RequestQueue {
    entries: HashMap<RequestId, QueueEntry>,
    next_seq: u64,
}

impl RequestQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request behind everything already queued.
    pub fn insert(&mut self, request: StalledRequest) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(request.id, QueueEntry { seq, request });
    }

    /// Takes a request out of the queue, for dispatch or cancellation.
    pub fn remove(&mut self, id: RequestId) -> Option<StalledRequest> {
        self.entries.remove(&id).map(|entry| entry.request)
    }

    /// Weighs every stalled request as of `now`.
    pub fn snapshot(&self, now: Instant) -> Vec<WeighedRequest> {
        self.entries
            .values()
            .map(|entry| WeighedRequest {
                id: entry.request.id,
                identity: entry.request.identity.clone(),
                weighing: weighing(
                    entry.request.priority,
                    now.saturating_duration_since(entry.request.inserted_at),
                ),
                seq: entry.seq,
            })
            .collect()
    }

    /// Number of stalled requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stalled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every stalled request, in insertion order.
    pub fn drain(&mut self) -> Vec<StalledRequest> {
        let mut entries: Vec<QueueEntry> = self.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.request).collect()
    }
}

/// A dispatched request whose transfer has not reported back yet.
pub struct ActiveRequest {
    pub(crate) identity: String,
    pub(crate) reply: Reply,
    pub(crate) progress: Progress,
    pub(crate) abort: Option<AbortHandle>,
}

impl ActiveRequest {
    pub(crate) fn new(identity: String, reply: Reply, progress: Progress) -> Self {
        Self {
            identity,
            reply,
            progress,
            abort: None,
        }
    }
}

/// In-flight requests keyed by id. Identities may repeat.
#[derive(Default)]
pub struct ActiveSet {
    entries: HashMap<RequestId, ActiveRequest>,
}

impl ActiveSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a dispatched request until it settles.
    pub fn insert(&mut self, id: RequestId, request: ActiveRequest) {
        self.entries.insert(id, request);
    }

    pub(crate) fn set_abort(&mut self, id: RequestId, abort: AbortHandle) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.abort = Some(abort);
        }
    }

    /// Stops tracking a request, returning it if it was still active.
    pub fn remove(&mut self, id: RequestId) -> Option<ActiveRequest> {
        self.entries.remove(&id)
    }

    /// Sum of estimated sizes of everything in flight.
    pub fn estimated_traffic(&self, model: &TrafficModel) -> u64 {
        self.entries
            .values()
            .map(|entry| model.estimate(&entry.identity))
            .fold(0u64, |acc, est| acc.saturating_add(est))
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every in-flight request, for shutdown.
    pub fn drain(&mut self) -> Vec<(RequestId, ActiveRequest)> {
        self.entries.drain().collect()
    }
}
