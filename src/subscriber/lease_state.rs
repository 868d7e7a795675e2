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

use crate::subscriber::histogram::Histogram;
use crate::subscriber::options::FlowControl;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
// Use `tokio::time::Instant` to facilitate time-based unit testing.
use tokio::sync::Notify;
use tokio::time::Instant;

/// One message under lease management.
#[derive(Debug)]
struct LeaseRecord {
    /// When the server handed us the message.
    sent_time: Instant,
    /// The bytes the message counts against flow control.
    size: usize,
    ordering_key: String,
}

/// The set of messages this client holds but has not settled.
///
/// A lease exists iff the message is held by the client and has not been
/// acked, nacked, or dropped. The registry also owns the ack-latency
/// histogram, because the histogram's 99th percentile decides how far each
/// maintenance pass extends the remaining leases.
#[derive(Debug, Default)]
pub(crate) struct LeaseRegistry {
    inner: Mutex<Inner>,
    histogram: Mutex<Histogram>,
    /// Signalled on every removal, so a paused stream manager can recheck
    /// its watermarks.
    released: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    leases: HashMap<String, LeaseRecord>,
    bytes: usize,
}

impl LeaseRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Accept a new ack id under lease management.
    ///
    /// Returns false (and logs at debug) when the ack id is already leased;
    /// the existing lease is left untouched.
    pub(crate) fn add(&self, ack_id: String, size: usize, ordering_key: String) -> bool {
        let mut inner = self.inner.lock().expect("the lease registry mutex is never poisoned");
        if inner.leases.contains_key(&ack_id) {
            tracing::debug!(ack_id = %ack_id, "ack id is already under lease management");
            return false;
        }
        inner.bytes += size;
        inner.leases.insert(
            ack_id,
            LeaseRecord {
                sent_time: Instant::now(),
                size,
                ordering_key,
            },
        );
        true
    }

    /// Stop managing one ack id, returning the bytes it held.
    pub(crate) fn remove(&self, ack_id: &str) -> Option<usize> {
        let size = {
            let mut inner = self
                .inner
                .lock()
                .expect("the lease registry mutex is never poisoned");
            let record = inner.leases.remove(ack_id)?;
            inner.bytes -= record.size;
            record.size
        };
        self.released.notify_one();
        Some(size)
    }

    /// Drop every lease older than `max_lease_duration`, returning the
    /// dropped ack ids.
    pub(crate) fn remove_expired(&self, max_lease_duration: Duration) -> Vec<String> {
        let Some(cutoff) = Instant::now().checked_sub(max_lease_duration) else {
            return Vec::new();
        };
        let expired = {
            let mut inner = self
                .inner
                .lock()
                .expect("the lease registry mutex is never poisoned");
            let expired: Vec<String> = inner
                .leases
                .iter()
                .filter(|(_, record)| record.sent_time <= cutoff)
                .map(|(ack_id, _)| ack_id.clone())
                .collect();
            for ack_id in &expired {
                if let Some(record) = inner.leases.remove(ack_id) {
                    inner.bytes -= record.size;
                    tracing::debug!(
                        ack_id = %ack_id,
                        ordering_key = %record.ordering_key,
                        reason = "expired",
                        "dropping message held past its maximum lease duration"
                    );
                }
            }
            expired
        };
        if !expired.is_empty() {
            self.released.notify_one();
        }
        expired
    }

    /// The ack ids still under lease management.
    pub(crate) fn live_ack_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("the lease registry mutex is never poisoned")
            .leases
            .keys()
            .cloned()
            .collect()
    }

    /// The (messages, bytes) currently held.
    pub(crate) fn outstanding(&self) -> (usize, usize) {
        let inner = self
            .inner
            .lock()
            .expect("the lease registry mutex is never poisoned");
        (inner.leases.len(), inner.bytes)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.outstanding().0 == 0
    }

    /// Wait until some lease is released.
    ///
    /// A release that happens between checking [outstanding][Self::outstanding]
    /// and calling this method is not lost: the notification is buffered.
    pub(crate) async fn wait_for_release(&self) {
        self.released.notified().await
    }

    /// Record the delivery-to-ack latency of one message.
    pub(crate) fn record_ack_latency(&self, latency: Duration) {
        self.histogram
            .lock()
            .expect("the histogram mutex is never poisoned")
            .add(latency);
    }

    /// The deadline to use for the next lease extensions.
    ///
    /// The 99th percentile of observed ack latencies, clamped into the
    /// configured bounds.
    pub(crate) fn ack_deadline(&self, options: &FlowControl) -> Duration {
        let p99 = self
            .histogram
            .lock()
            .expect("the histogram mutex is never poisoned")
            .percentile(99);
        let mut deadline = p99.clamp(options.min_ack_deadline, options.max_ack_deadline);
        if options.min_duration_per_lease_extension > Duration::ZERO {
            deadline = deadline.max(options.min_duration_per_lease_extension);
        }
        if options.max_duration_per_lease_extension > Duration::ZERO {
            deadline = deadline.min(options.max_duration_per_lease_extension);
        }
        deadline
    }
}
