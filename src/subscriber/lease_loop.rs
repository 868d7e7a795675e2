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

use crate::model::AckIdStatus;
use crate::subscriber::dispatcher::ACK_IDS_BATCH_SIZE;
use crate::subscriber::lease_state::LeaseRegistry;
use crate::subscriber::options::FlowControl;
use crate::transport::{CallOptions, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

// Maintenance runs this much ahead of the target deadline, so extensions
// land before the server's deadline passes.
const MAINTENANCE_MARGIN: Duration = Duration::from_secs(5);
const MIN_MAINTENANCE_PERIOD: Duration = Duration::from_secs(1);

/// The background worker extending leases and dropping expired messages.
pub(crate) struct LeaseLoop {
    handle: JoinHandle<()>,
}

impl LeaseLoop {
    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        subscription: String,
        registry: Arc<LeaseRegistry>,
        options: FlowControl,
        exactly_once: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(run(
            transport,
            subscription,
            registry,
            options,
            exactly_once,
            shutdown,
        ));
        Self { handle }
    }

    /// Wait for the worker to observe its shutdown signal and exit.
    pub(crate) async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn run(
    transport: Arc<dyn Transport>,
    subscription: String,
    registry: Arc<LeaseRegistry>,
    options: FlowControl,
    exactly_once: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        // The period tracks the target deadline, which moves with the ack
        // latency distribution.
        let deadline = registry.ack_deadline(&options);
        let period = deadline
            .saturating_sub(MAINTENANCE_MARGIN)
            .max(MIN_MAINTENANCE_PERIOD);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(period) => {
                let eo = exactly_once.load(Ordering::Acquire);
                maintain(&transport, &subscription, &registry, &options, eo)
                    .instrument(tracing::debug_span!("lease_maintenance"))
                    .await;
            }
        }
    }
}

/// One maintenance pass: drop expired leases, extend the rest.
async fn maintain(
    transport: &Arc<dyn Transport>,
    subscription: &str,
    registry: &LeaseRegistry,
    options: &FlowControl,
    exactly_once: bool,
) {
    let expired = registry.remove_expired(options.max_lease_duration);
    if !expired.is_empty() {
        tracing::debug!(count = expired.len(), "dropped expired leases");
    }

    let live = registry.live_ack_ids();
    if live.is_empty() {
        return;
    }
    let seconds = registry.ack_deadline(options).as_secs() as i32;
    for chunk in live.chunks(ACK_IDS_BATCH_SIZE) {
        let result = transport
            .modify_ack_deadline(
                subscription.to_string(),
                chunk.to_vec(),
                seconds,
                CallOptions::default(),
            )
            .await;
        match result {
            Ok(response) if exactly_once => {
                // The server told us which leases it no longer honors.
                for (ack_id, status) in &response.statuses {
                    match status {
                        AckIdStatus::Success | AckIdStatus::TransientFailure => {}
                        status => {
                            if registry.remove(ack_id).is_some() {
                                tracing::debug!(
                                    ack_id = %ack_id,
                                    status = ?status,
                                    "dropping lease rejected by the server"
                                );
                            }
                        }
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                // The next pass retries; the server redelivers anything
                // whose deadline lapses in the meantime.
                tracing::warn!("lease extension failed: {e}");
            }
        }
    }
}
