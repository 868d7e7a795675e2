// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::AckError;
use crate::model::AckIdStatus;
use crate::retry::{BackoffPolicy, ExponentialBackoffBuilder, RetryState, is_transient_code};
use crate::subscriber::lease_state::LeaseRegistry;
use crate::transport::{CallOptions, Transport};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

// An ack ID is less than 200 bytes. The limit for a request is 512kB, so
// 2500 ack IDs fit comfortably in a single RPC.
pub(crate) const ACK_IDS_BATCH_SIZE: usize = 2500;

// Exactly-once retries: transiently failed ack ids are retried on a
// background worker within these bounds.
const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAXIMUM_DELAY: Duration = Duration::from_secs(64);
const RETRY_DEADLINE: Duration = Duration::from_secs(600);

/// The result an application observes for one ack or nack.
pub(crate) type AckOutcome = Result<(), AckError>;

/// A work item on the dispatcher queue.
pub(crate) enum Request {
    /// Acknowledge a delivery. `elapsed` is the time from delivery to ack
    /// and feeds the latency histogram.
    Ack {
        ack_id: String,
        elapsed: Option<Duration>,
        done: Option<oneshot::Sender<AckOutcome>>,
    },
    /// Reject a delivery so the server redelivers it.
    Nack {
        ack_id: String,
        done: Option<oneshot::Sender<AckOutcome>>,
    },
    /// Extend (or, with zero seconds, cut) the ack deadline of a delivery.
    ModAck {
        ack_id: String,
        seconds: i32,
        done: Option<oneshot::Sender<AckOutcome>>,
    },
    /// Start managing a delivery's lease.
    Lease {
        ack_id: String,
        size: usize,
        ordering_key: String,
    },
    /// Stop managing a delivery's lease without acking or nacking.
    Drop { ack_id: String },
    /// Resolves once everything queued ahead of it has been processed.
    Flush(oneshot::Sender<()>),
    /// Sentinel: process everything queued ahead of it, then exit.
    Shutdown,
}

/// The single background worker draining the subscriber's request queue.
///
/// Dropping the sender shuts the worker down; every item already queued is
/// processed first.
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Request>,
    handle: JoinHandle<()>,
}

impl Dispatcher {
    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        subscription: String,
        registry: Arc<LeaseRegistry>,
        exactly_once: Arc<AtomicBool>,
    ) -> Self {
        Self::start_with_backoff(
            transport,
            subscription,
            registry,
            exactly_once,
            default_retry_backoff(),
        )
    }

    // The default backoff is non-deterministic. Exposing it here helps us
    // set better test expectations.
    pub(crate) fn start_with_backoff(
        transport: Arc<dyn Transport>,
        subscription: String,
        registry: Arc<LeaseRegistry>,
        exactly_once: Arc<AtomicBool>,
        retry_backoff: Arc<dyn BackoffPolicy>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            transport,
            subscription,
            registry,
            exactly_once,
            retry_backoff,
            rx,
        };
        let handle = tokio::spawn(worker.run());
        Self { tx, handle }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Request> {
        self.tx.clone()
    }

    /// Process everything already queued, then stop the worker.
    ///
    /// A sentinel marks the cut: items enqueued after `stop` (e.g. from ack
    /// handles an application still holds) resolve as cancelled.
    pub(crate) async fn stop(self) {
        let _ = self.tx.send(Request::Shutdown);
        drop(self.tx);
        let _ = self.handle.await;
    }
}

fn default_retry_backoff() -> Arc<dyn BackoffPolicy> {
    Arc::new(
        ExponentialBackoffBuilder::new()
            .with_initial_delay(RETRY_INITIAL_DELAY)
            .with_maximum_delay(RETRY_MAXIMUM_DELAY)
            .with_scaling(2.0)
            .build()
            .expect("This is a valid configuration"),
    )
}

/// An ack id waiting on an RPC, with its optional result future.
struct AckItem {
    ack_id: String,
    done: Option<oneshot::Sender<AckOutcome>>,
}

impl AckItem {
    fn resolve(self, outcome: AckOutcome) {
        if let Some(done) = self.done {
            // The application may have dropped its future.
            let _ = done.send(outcome);
        }
    }
}

/// Which RPC a retry worker repeats.
#[derive(Clone, Copy, Debug)]
enum RetryKind {
    Ack,
    ModAck(i32),
}

struct Worker {
    transport: Arc<dyn Transport>,
    subscription: String,
    registry: Arc<LeaseRegistry>,
    exactly_once: Arc<AtomicBool>,
    retry_backoff: Arc<dyn BackoffPolicy>,
    rx: mpsc::UnboundedReceiver<Request>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            // Drain the burst that arrived since the last tick, so acks and
            // modacks coalesce into few RPCs.
            let mut requests = vec![first];
            while let Ok(next) = self.rx.try_recv() {
                requests.push(next);
            }
            let mut shutdown = false;
            if let Some(sentinel) = requests
                .iter()
                .position(|r| matches!(r, Request::Shutdown))
            {
                requests.truncate(sentinel);
                shutdown = true;
            }
            self.process(requests).await;
            if shutdown {
                return;
            }
        }
    }

    /// Classify one tick's requests into buckets, dedup within each bucket,
    /// and issue the RPCs.
    async fn process(&mut self, requests: Vec<Request>) {
        let exactly_once = self.exactly_once.load(Ordering::Acquire);
        let mut acks: Vec<AckItem> = Vec::new();
        let mut nacks: Vec<AckItem> = Vec::new();
        let mut modacks: HashMap<i32, Vec<AckItem>> = HashMap::new();
        let mut seen_acks = HashSet::new();
        let mut seen_nacks = HashSet::new();
        let mut seen_modacks = HashSet::new();
        let mut flushes = Vec::new();

        for request in requests {
            match request {
                Request::Ack {
                    ack_id,
                    elapsed,
                    done,
                } => {
                    if !seen_acks.insert(ack_id.clone()) {
                        resolve_duplicate(done, exactly_once);
                        continue;
                    }
                    if let Some(elapsed) = elapsed {
                        self.registry.record_ack_latency(elapsed);
                    }
                    self.registry.remove(&ack_id);
                    acks.push(AckItem { ack_id, done });
                }
                Request::Nack { ack_id, done } => {
                    if !seen_nacks.insert(ack_id.clone()) {
                        resolve_duplicate(done, exactly_once);
                        continue;
                    }
                    self.registry.remove(&ack_id);
                    nacks.push(AckItem { ack_id, done });
                }
                Request::ModAck {
                    ack_id,
                    seconds,
                    done,
                } => {
                    if !seen_modacks.insert(ack_id.clone()) {
                        resolve_duplicate(done, exactly_once);
                        continue;
                    }
                    modacks
                        .entry(seconds)
                        .or_default()
                        .push(AckItem { ack_id, done });
                }
                Request::Lease {
                    ack_id,
                    size,
                    ordering_key,
                } => {
                    self.registry.add(ack_id, size, ordering_key);
                }
                Request::Drop { ack_id } => {
                    self.registry.remove(&ack_id);
                }
                Request::Flush(done) => flushes.push(done),
                // Sentinels are stripped by the run loop.
                Request::Shutdown => {}
            }
        }

        if !acks.is_empty() {
            self.send_acks(acks, exactly_once).await;
        }
        if !nacks.is_empty() {
            // A nack is a modack setting the deadline to zero.
            self.send_modacks(0, nacks, exactly_once).await;
        }
        for (seconds, items) in modacks {
            self.send_modacks(seconds, items, exactly_once).await;
        }
        for done in flushes {
            let _ = done.send(());
        }
    }

    async fn send_acks(&self, items: Vec<AckItem>, exactly_once: bool) {
        for chunk in chunked(items) {
            let ack_ids = chunk.iter().map(|i| i.ack_id.clone()).collect();
            let result = self
                .transport
                .acknowledge(self.subscription.clone(), ack_ids, CallOptions::default())
                .await;
            self.settle(RetryKind::Ack, chunk, result, exactly_once);
        }
    }

    async fn send_modacks(&self, seconds: i32, items: Vec<AckItem>, exactly_once: bool) {
        for chunk in chunked(items) {
            let ack_ids = chunk.iter().map(|i| i.ack_id.clone()).collect();
            let result = self
                .transport
                .modify_ack_deadline(
                    self.subscription.clone(),
                    ack_ids,
                    seconds,
                    CallOptions::default(),
                )
                .await;
            self.settle(RetryKind::ModAck(seconds), chunk, result, exactly_once);
        }
    }

    /// Resolve futures from one RPC's outcome. Under exactly-once delivery,
    /// transiently failed ids move to a background retry worker.
    fn settle(
        &self,
        kind: RetryKind,
        items: Vec<AckItem>,
        result: crate::Result<crate::model::AckResponse>,
        exactly_once: bool,
    ) {
        if !exactly_once {
            // Best effort: the server redelivers anything it did not
            // persist.
            if let Err(e) = &result {
                tracing::warn!(kind = ?kind, "acknowledgement request failed: {e}");
            }
            for item in items {
                item.resolve(Ok(()));
            }
            return;
        }
        match result {
            Err(e) if transient_rpc_error(&e) => {
                tracing::debug!(kind = ?kind, "retrying acknowledgements after: {e}");
                self.spawn_retry(kind, items);
            }
            Err(e) => {
                let error = rpc_ack_error(&e);
                for item in items {
                    item.resolve(Err(error.clone()));
                }
            }
            Ok(response) => {
                let mut to_retry = Vec::new();
                for item in items {
                    match response.status(&item.ack_id) {
                        AckIdStatus::Success => item.resolve(Ok(())),
                        AckIdStatus::TransientFailure => to_retry.push(item),
                        status => item.resolve(Err(status_ack_error(status))),
                    }
                }
                if !to_retry.is_empty() {
                    self.spawn_retry(kind, to_retry);
                }
            }
        }
    }

    fn spawn_retry(&self, kind: RetryKind, items: Vec<AckItem>) {
        let transport = self.transport.clone();
        let subscription = self.subscription.clone();
        let backoff = self.retry_backoff.clone();
        tokio::spawn(retry_worker(transport, subscription, kind, items, backoff));
    }
}

/// Retries transiently failed ack ids until the server confirms them, they
/// fail permanently, or the retry deadline passes.
async fn retry_worker(
    transport: Arc<dyn Transport>,
    subscription: String,
    kind: RetryKind,
    mut items: Vec<AckItem>,
    backoff: Arc<dyn BackoffPolicy>,
) {
    let mut state = RetryState::new();
    loop {
        state.attempt_count += 1;
        let delay = backoff.on_failure(&state);
        if state.loop_start.elapsed() + delay > RETRY_DEADLINE {
            for item in items {
                item.resolve(Err(AckError::Exhausted));
            }
            return;
        }
        tokio::time::sleep(delay).await;

        let ack_ids: Vec<String> = items.iter().map(|i| i.ack_id.clone()).collect();
        let result = match kind {
            RetryKind::Ack => {
                transport
                    .acknowledge(subscription.clone(), ack_ids, CallOptions::default())
                    .await
            }
            RetryKind::ModAck(seconds) => {
                transport
                    .modify_ack_deadline(
                        subscription.clone(),
                        ack_ids,
                        seconds,
                        CallOptions::default(),
                    )
                    .await
            }
        };
        match result {
            Err(e) if transient_rpc_error(&e) => continue,
            Err(e) => {
                let error = rpc_ack_error(&e);
                for item in items {
                    item.resolve(Err(error.clone()));
                }
                return;
            }
            Ok(response) => {
                let mut still_failing = Vec::new();
                for item in items {
                    match response.status(&item.ack_id) {
                        AckIdStatus::Success => item.resolve(Ok(())),
                        AckIdStatus::TransientFailure => still_failing.push(item),
                        status => item.resolve(Err(status_ack_error(status))),
                    }
                }
                if still_failing.is_empty() {
                    return;
                }
                items = still_failing;
            }
        }
    }
}

fn resolve_duplicate(done: Option<oneshot::Sender<AckOutcome>>, exactly_once: bool) {
    if let Some(done) = done {
        let outcome = if exactly_once {
            Err(AckError::Duplicate)
        } else {
            Ok(())
        };
        let _ = done.send(outcome);
    }
}

fn chunked(items: Vec<AckItem>) -> Vec<Vec<AckItem>> {
    let mut chunks = Vec::new();
    let mut chunk = Vec::new();
    for item in items {
        chunk.push(item);
        if chunk.len() == ACK_IDS_BATCH_SIZE {
            chunks.push(std::mem::take(&mut chunk));
        }
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

fn transient_rpc_error(e: &crate::Error) -> bool {
    e.is_io()
        || e.status()
            .and_then(|s| s.code)
            .is_some_and(is_transient_code)
}

fn rpc_ack_error(e: &crate::Error) -> AckError {
    use crate::error::rpc::Code;
    match e.status().and_then(|s| s.code) {
        Some(Code::PermissionDenied) => AckError::PermissionDenied,
        Some(Code::FailedPrecondition) => AckError::FailedPrecondition,
        _ => AckError::Other(e.to_string()),
    }
}

fn status_ack_error(status: AckIdStatus) -> AckError {
    match status {
        AckIdStatus::InvalidAckId => AckError::InvalidAckId,
        AckIdStatus::PermissionDenied => AckError::PermissionDenied,
        AckIdStatus::FailedPrecondition => AckError::FailedPrecondition,
        AckIdStatus::Other(message) => AckError::Other(message),
        // Successes and transient failures never reach this classification.
        AckIdStatus::Success | AckIdStatus::TransientFailure => {
            AckError::Other("unexpected status".to_string())
        }
    }
}
