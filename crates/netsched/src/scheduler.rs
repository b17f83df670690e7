//! The scheduler and its admission domain.
//!
//! All bookkeeping lives in one task, the admission domain. It owns the
//! request queue, the active set and the traffic model, consumes commands
//! from an unbounded channel and runs an admission pass after every batch of
//! commands and on a fixed interval. Transfers run in their own tasks and
//! report back through the same channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::admission::{plan_admission, InFlight};
use crate::cancel::CancelReason;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError, TransportError};
use crate::operation::{prepare, NetworkOperation};
use crate::priority::RequestPriority;
use crate::queue::{ActiveRequest, ActiveSet, Reply, RequestId, RequestQueue, StalledRequest};
use crate::request::ScheduledRequest;
use crate::stats::SchedulerStats;
use crate::store::{JsonFileTrafficStore, MemoryTrafficStore, TrafficStore};
use crate::traffic::TrafficModel;
use crate::transport::{accepts, Progress, Transport, TransportResponse};

/// How a dispatched transfer ended.
#[derive(Debug)]
pub(crate) enum TransferOutcome {
    /// Accepted status; feeds the traffic model.
    Success(TransportResponse),
    /// The server answered with a status the operation does not accept.
    Rejected(TransportResponse),
    Failed(TransportError),
}

#[derive(Debug)]
pub(crate) enum Command {
    Enqueue(StalledRequest),
    Completed {
        id: RequestId,
        outcome: TransferOutcome,
    },
    Cancel {
        id: RequestId,
        reason: CancelReason,
    },
    Pass,
    Estimate {
        identity: String,
        reply: oneshot::Sender<u64>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

fn label(identity: &str, id: RequestId) -> String {
    format!("{}#{}", identity, id)
}

/// Handle to a running scheduler. Cheap to clone.
///
/// Requests are submitted with [`schedule`](Self::schedule), which never
/// blocks. The scheduler decides when each request reaches the transport.
#[derive(Clone)]
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
    stats: watch::Receiver<SchedulerStats>,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    /// Starts the admission domain on the current tokio runtime.
    pub fn start(
        config: &SchedulerConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TrafficStore>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(SchedulerStats::default());

        let traffic = TrafficModel::new(store)
            .with_fallback_bytes(config.fallback_estimate_bytes)
            .with_smoothing(config.bandwidth_smoothing);

        let domain = AdmissionDomain {
            transport,
            queue: RequestQueue::new(),
            active: ActiveSet::new(),
            traffic,
            commands: command_tx.downgrade(),
            stats: SchedulerStats::default(),
            stats_tx,
            flush_task: None,
            flush_failed: Arc::new(AtomicBool::new(false)),
        };

        tokio::spawn(domain.run(
            command_rx,
            config.admission_interval(),
            config.flush_interval(),
        ));
        info!(
            admission_interval_ms = config.admission_interval_ms,
            flush_interval_ms = config.flush_interval_ms,
            "Scheduler started"
        );

        Self {
            commands: command_tx,
            stats: stats_rx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Starts a scheduler whose traffic store follows `config.store_path`.
    pub fn from_config(config: &SchedulerConfig, transport: Arc<dyn Transport>) -> Self {
        let store: Arc<dyn TrafficStore> = match &config.store_path {
            Some(path) => Arc::new(JsonFileTrafficStore::open(path)),
            None => Arc::new(MemoryTrafficStore::new()),
        };
        Self::start(config, transport, store)
    }

    /// Submits an operation for dispatch.
    ///
    /// Operations that cannot be turned into a transport request resolve
    /// immediately with [`SchedulerError::InvalidRequest`] and never enter
    /// the queue.
    pub fn schedule<O: NetworkOperation>(
        &self,
        operation: O,
        priority: RequestPriority,
    ) -> ScheduledRequest<O> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = match prepare(&operation) {
            Ok(request) => request,
            Err(e) => {
                debug!(request_id = %id, error = %e, "Rejected invalid request");
                return ScheduledRequest::failed(id, operation, e);
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let (progress, progress_rx) = Progress::channel();
        let stalled = StalledRequest::new(id, priority, request, reply_tx, progress);
        if self.commands.send(Command::Enqueue(stalled)).is_err() {
            return ScheduledRequest::failed(id, operation, SchedulerError::ShutDown);
        }
        ScheduledRequest::pending(
            id,
            operation,
            reply_rx,
            progress_rx,
            self.commands.downgrade(),
        )
    }

    /// Cancels a stalled or in-flight request.
    ///
    /// Returns false when the scheduler is no longer running. Cancelling a
    /// request that already settled has no effect.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.commands
            .send(Command::Cancel {
                id,
                reason: CancelReason::UserRequested,
            })
            .is_ok()
    }

    /// Asks for an admission pass outside the regular triggers.
    pub fn request_admission_pass(&self) {
        let _ = self.commands.send(Command::Pass);
    }

    /// Current size estimate for an operation identity.
    pub async fn estimate(&self, identity: &str) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Estimate {
                identity: identity.to_string(),
                reply: tx,
            })
            .map_err(|_| SchedulerError::ShutDown)?;
        rx.await.map_err(|_| SchedulerError::ShutDown)
    }

    /// Latest published statistics.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.borrow().clone()
    }

    /// Receiver notified whenever statistics change.
    pub fn watch_stats(&self) -> watch::Receiver<SchedulerStats> {
        self.stats.clone()
    }

    /// False once the admission domain has stopped.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stops the scheduler.
    ///
    /// Outstanding requests resolve with [`CancelReason::SchedulerShutdown`],
    /// in-flight transfers are aborted and the traffic store is persisted.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.is_running())
            .field("stats", &*self.stats.borrow())
            .finish()
    }
}

enum Step {
    Idle,
    Pass,
    Shutdown(oneshot::Sender<()>),
}

struct AdmissionDomain {
    transport: Arc<dyn Transport>,
    queue: RequestQueue,
    active: ActiveSet,
    traffic: TrafficModel,
    commands: mpsc::WeakUnboundedSender<Command>,
    stats: SchedulerStats,
    stats_tx: watch::Sender<SchedulerStats>,
    flush_task: Option<JoinHandle<()>>,
    /// Set by a flush task whose persist failed; the records are still unsaved.
    flush_failed: Arc<AtomicBool>,
}

impl AdmissionDomain {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command>,
        admission_interval: Duration,
        flush_interval: Duration,
    ) {
        let mut admission = tokio::time::interval(admission_interval);
        admission.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush = tokio::time::interval(flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut acks = Vec::new();
        loop {
            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else { break };
                    let mut wants_pass = false;
                    let mut next = Some(command);
                    while let Some(command) = next {
                        match self.handle(command) {
                            Step::Idle => {}
                            Step::Pass => wants_pass = true,
                            Step::Shutdown(done) => acks.push(done),
                        }
                        next = rx.try_recv().ok();
                    }
                    if !acks.is_empty() {
                        break;
                    }
                    if wants_pass {
                        self.admission_pass();
                    }
                    self.publish_stats();
                }
                _ = admission.tick() => {
                    self.admission_pass();
                    self.publish_stats();
                }
                _ = flush.tick() => self.flush(),
            }
        }

        self.close(&mut rx, &mut acks).await;
        for done in acks {
            let _ = done.send(());
        }
    }

    fn handle(&mut self, command: Command) -> Step {
        match command {
            Command::Enqueue(stalled) => {
                trace!(
                    target: "netsched::request",
                    request = %label(&stalled.identity, stalled.id),
                    priority = %stalled.priority,
                    "Request queued"
                );
                self.stats.submitted += 1;
                self.queue.insert(stalled);
                Step::Pass
            }
            Command::Completed { id, outcome } => {
                self.complete(id, outcome);
                Step::Pass
            }
            Command::Cancel { id, reason } => {
                if self.cancel(id, reason) {
                    Step::Pass
                } else {
                    Step::Idle
                }
            }
            Command::Pass => Step::Pass,
            Command::Estimate { identity, reply } => {
                let _ = reply.send(self.traffic.estimate(&identity));
                Step::Idle
            }
            Command::Shutdown { done } => Step::Shutdown(done),
        }
    }

    fn admission_pass(&mut self) {
        self.stats.admission_passes += 1;
        if self.queue.is_empty() {
            return;
        }

        let snapshot = self.queue.snapshot(Instant::now());
        let active = InFlight {
            requests: self.active.len(),
            traffic: self.active.estimated_traffic(&self.traffic),
        };
        let budget = self.traffic.budget();
        let traffic = &self.traffic;
        let plan = plan_admission(snapshot, active, budget, |identity| {
            traffic.estimate(identity)
        });

        if plan.is_empty() {
            trace!(
                stalled = self.queue.len(),
                active = active.requests,
                active_traffic = active.traffic,
                ?budget,
                "Admission pass admitted nothing"
            );
            return;
        }
        debug!(
            required = plan.required.len(),
            admitted = plan.admitted.len(),
            stalled = self.queue.len() - plan.len(),
            traffic = plan.traffic,
            ?budget,
            "Admission pass"
        );
        for id in plan.dispatch_order() {
            self.dispatch(id);
        }
    }

    fn dispatch(&mut self, id: RequestId) {
        let Some(stalled) = self.queue.remove(id) else {
            return;
        };
        let StalledRequest {
            identity,
            priority,
            inserted_at,
            request,
            reply,
            progress,
            ..
        } = stalled;

        let Some(commands) = self.commands.upgrade() else {
            let _ = reply.send(Err(SchedulerError::ShutDown));
            return;
        };

        debug!(
            target: "netsched::request",
            request = %label(&identity, id),
            %priority,
            method = %request.method,
            url = %request.url,
            headers = request.headers.len(),
            body_bytes = request.body.as_ref().map_or(0, |b| b.len()),
            waited_ms = inserted_at.elapsed().as_millis() as u64,
            "Request started"
        );

        let accepted = request.accepted_status.clone();
        let transfer = self.transport.start(request, progress.clone());
        self.active
            .insert(id, ActiveRequest::new(identity, reply, progress));
        self.stats.dispatched += 1;

        let handle = tokio::spawn(async move {
            let outcome = match transfer.await {
                Ok(response) if accepts(&accepted, response.status) => {
                    TransferOutcome::Success(response)
                }
                Ok(response) => TransferOutcome::Rejected(response),
                Err(e) => TransferOutcome::Failed(e),
            };
            let _ = commands.send(Command::Completed { id, outcome });
        });
        self.active.set_abort(id, handle.abort_handle());
    }

    fn complete(&mut self, id: RequestId, outcome: TransferOutcome) {
        let Some(active) = self.active.remove(id) else {
            trace!(request_id = %id, "Completion for a request no longer active");
            return;
        };
        let name = label(&active.identity, id);

        let result = match outcome {
            TransferOutcome::Success(response) => {
                let bytes = response.body.len() as u64;
                let transfer = response.transfer_time();
                debug!(
                    target: "netsched::response",
                    request = %name,
                    status = response.status,
                    bytes,
                    elapsed_ms = response.elapsed.as_millis() as u64,
                    "Request finished"
                );
                self.traffic
                    .record(&active.identity, bytes, transfer.as_secs_f64());
                active.progress.finish();
                self.stats.completed += 1;
                Ok(response.body)
            }
            TransferOutcome::Rejected(response) => {
                debug!(
                    target: "netsched::response",
                    request = %name,
                    status = response.status,
                    "Request rejected by status"
                );
                self.stats.failed += 1;
                Err(SchedulerError::UnexpectedStatus {
                    status: response.status,
                    body: response.body,
                })
            }
            TransferOutcome::Failed(e) => {
                warn!(target: "netsched::response", request = %name, error = %e, "Request failed");
                self.stats.failed += 1;
                Err(SchedulerError::Transport(e))
            }
        };
        settle(active.reply, result);
    }

    fn cancel(&mut self, id: RequestId, reason: CancelReason) -> bool {
        let reply = if let Some(stalled) = self.queue.remove(id) {
            debug!(request = %label(&stalled.identity, id), %reason, "Cancelled stalled request");
            stalled.reply
        } else if let Some(active) = self.active.remove(id) {
            if let Some(abort) = &active.abort {
                abort.abort();
            }
            debug!(request = %label(&active.identity, id), %reason, "Cancelled in-flight request");
            active.reply
        } else {
            return false;
        };
        self.stats.cancelled += 1;
        settle(
            reply,
            Err(SchedulerError::Cancelled {
                request_id: id,
                reason,
            }),
        );
        true
    }

    fn flush(&mut self) {
        if let Some(task) = &self.flush_task {
            if !task.is_finished() {
                return;
            }
        }
        self.reclaim_failed_flush();
        if !self.traffic.take_dirty() {
            return;
        }
        let store = self.traffic.store();
        let failed = Arc::clone(&self.flush_failed);
        self.flush_task = Some(tokio::task::spawn_blocking(move || {
            if let Err(e) = store.persist() {
                warn!(error = %e, "Failed to persist traffic store, retrying on next flush");
                failed.store(true, Ordering::Release);
            }
        }));
    }

    fn reclaim_failed_flush(&mut self) {
        if self.flush_failed.swap(false, Ordering::Acquire) {
            self.traffic.mark_dirty();
        }
    }

    async fn close(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<Command>,
        acks: &mut Vec<oneshot::Sender<()>>,
    ) {
        rx.close();
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Enqueue(stalled) => {
                    self.stats.submitted += 1;
                    self.queue.insert(stalled);
                }
                Command::Completed { id, outcome } => self.complete(id, outcome),
                Command::Estimate { identity, reply } => {
                    let _ = reply.send(self.traffic.estimate(&identity));
                }
                Command::Shutdown { done } => acks.push(done),
                Command::Cancel { id, reason } => {
                    self.cancel(id, reason);
                }
                Command::Pass => {}
            }
        }

        let stalled = self.queue.drain();
        let active = self.active.drain();
        let outstanding = stalled.len() + active.len();
        for request in stalled {
            self.stats.cancelled += 1;
            settle(request.reply, Err(shutdown_error(request.id)));
        }
        for (id, request) in active {
            if let Some(abort) = &request.abort {
                abort.abort();
            }
            self.stats.cancelled += 1;
            settle(request.reply, Err(shutdown_error(id)));
        }

        if let Some(task) = self.flush_task.take() {
            let _ = task.await;
        }
        self.reclaim_failed_flush();
        if self.traffic.take_dirty() {
            let store = self.traffic.store();
            match tokio::task::spawn_blocking(move || store.persist()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to persist traffic store on shutdown"),
                Err(e) => warn!(error = %e, "Traffic store flush task failed"),
            }
        }

        self.publish_stats();
        info!(outstanding, "Scheduler stopped");
    }

    fn publish_stats(&mut self) {
        self.stats.stalled = self.queue.len();
        self.stats.active = self.active.len();
        self.stats.estimated_traffic = self.active.estimated_traffic(&self.traffic);
        self.stats.bandwidth_bps = self.traffic.bandwidth();
        self.stats_tx.send_if_modified(|current| {
            if *current == self.stats {
                false
            } else {
                *current = self.stats.clone();
                true
            }
        });
    }
}

fn shutdown_error(id: RequestId) -> SchedulerError {
    SchedulerError::Cancelled {
        request_id: id,
        reason: CancelReason::SchedulerShutdown,
    }
}

fn settle(reply: Reply, result: Result<bytes::Bytes>) {
    // the caller may have stopped waiting
    let _ = reply.send(result);
}
