//! Shared fixtures: a scripted transport and a minimal operation.

#![allow(dead_code)]

use bytes::Bytes;
use netsched::{
    Endpoint, MemoryTrafficStore, NetworkOperation, Progress, Scheduler, SchedulerConfig,
    SchedulerStats, TrafficRecord, TrafficStore, TransferFuture, Transport, TransportError,
    TransportRequest, TransportResponse,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Scripted reply for one identity.
#[derive(Debug, Clone)]
pub struct Script {
    pub status: u16,
    pub body_len: usize,
    pub latency: Duration,
    pub elapsed: Duration,
    pub fail: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            status: 200,
            body_len: 100,
            latency: Duration::ZERO,
            elapsed: Duration::from_millis(100),
            fail: false,
        }
    }
}

/// Transport that answers from scripts and records the order of starts.
///
/// Every transfer reports half its body as soon as it starts. Gated
/// identities then wait for [`release`](Self::release) before answering.
pub struct MockTransport {
    started: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, Script>>,
    gated: Mutex<HashSet<String>>,
    gate: Arc<Semaphore>,
    finished: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            gated: Mutex::new(HashSet::new()),
            gate: Arc::new(Semaphore::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn script(&self, identity: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(identity.to_string(), script);
    }

    pub fn gate(&self, identity: &str) {
        self.gated.lock().unwrap().insert(identity.to_string());
    }

    /// Lets `n` gated transfers finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn start(&self, request: TransportRequest, progress: Progress) -> TransferFuture {
        let identity = request.identity.clone();
        self.started.lock().unwrap().push(identity.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&identity)
            .cloned()
            .unwrap_or_default();
        let gated = self.gated.lock().unwrap().contains(&identity);
        let gate = Arc::clone(&self.gate);
        let finished = Arc::clone(&self.finished);

        Box::pin(async move {
            let total = script.body_len as u64;
            progress.report(total / 2, Some(total));
            if gated {
                let permit = gate
                    .acquire_owned()
                    .await
                    .map_err(|e| TransportError::Request {
                        url: request.url.clone(),
                        reason: e.to_string(),
                    })?;
                permit.forget();
            }
            finished.fetch_add(1, Ordering::SeqCst);
            if script.fail {
                return Err(TransportError::Connection {
                    url: request.url,
                    reason: "connection reset".to_string(),
                });
            }
            Ok(TransportResponse {
                status: script.status,
                body: Bytes::from(vec![b'x'; script.body_len]),
                latency: script.latency,
                elapsed: script.elapsed,
            })
        })
    }
}

/// GET operation with a fixed identity.
#[derive(Debug, Clone)]
pub struct Op {
    pub identity: &'static str,
}

pub fn op(identity: &'static str) -> Op {
    Op { identity }
}

impl NetworkOperation for Op {
    type Output = Bytes;

    fn identity(&self) -> String {
        self.identity.to_string()
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::get(format!("http://mock.local/{}", self.identity))
    }

    fn decode(&self, body: Bytes) -> netsched::Result<Bytes> {
        Ok(body)
    }
}

/// Memory store pre-seeded with average sizes.
pub fn seeded_store(averages: &[(&str, u64)]) -> Arc<MemoryTrafficStore> {
    let store = Arc::new(MemoryTrafficStore::new());
    for (identity, bytes) in averages {
        store
            .put(identity, TrafficRecord { count: 1, bytes: *bytes })
            .unwrap();
    }
    store
}

pub fn start(transport: Arc<MockTransport>, store: Arc<MemoryTrafficStore>) -> Scheduler {
    Scheduler::start(&SchedulerConfig::default(), transport, store)
}

/// Waits until the published stats satisfy `f`, failing after five seconds.
pub async fn wait_for<F>(scheduler: &Scheduler, f: F) -> SchedulerStats
where
    F: FnMut(&SchedulerStats) -> bool,
{
    let mut rx = scheduler.watch_stats();
    let stats = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
        .await
        .expect("timed out waiting for scheduler stats")
        .expect("scheduler stopped")
        .clone();
    stats
}

/// Completes one ungated `sample` transfer so the bandwidth becomes `bps`.
pub async fn measure_bandwidth(scheduler: &Scheduler, transport: &MockTransport, bps: usize) {
    transport.script(
        "sample",
        Script {
            body_len: bps,
            elapsed: Duration::from_secs(1),
            ..Script::default()
        },
    );
    scheduler
        .schedule(op("sample"), netsched::RequestPriority::Required)
        .await
        .unwrap();
    wait_for(scheduler, |s| s.bandwidth_bps == Some(bps as f64) && s.active == 0).await;
}
