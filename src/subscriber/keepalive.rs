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

use crate::model::StreamRequest;
use tokio::sync::mpsc::Sender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval_at};
use tokio_util::sync::CancellationToken;

pub(super) const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// Spawns a task to keep a stream alive.
///
/// This task periodically writes empty requests into a channel. The
/// receiver of this channel is the request stream for an open streaming
/// pull. Heartbeats are suppressed while the stream manager is paused on
/// flow control; a paused stream is intentionally idle.
///
/// Callers signal a graceful shutdown by cancelling the token. The task
/// also exits when the transport drops the request receiver.
pub(super) fn spawn(
    request_tx: Sender<StreamRequest>,
    period: Duration,
    mut paused: watch::Receiver<bool>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut keepalive = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = keepalive.tick() => {
                    if *paused.borrow_and_update() {
                        continue;
                    }
                    if request_tx.send(StreamRequest::default()).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
