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

use crate::model::SubscribeMessage;
use crate::subscriber::handler::{AckHandle, Disposition, MessageHandler};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::{JoinHandle, JoinSet};

/// A command sent from the stream manager to the scheduler task.
pub(crate) enum Command {
    /// Dispatch one message to the application callback.
    Schedule(SubscribeMessage, AckHandle),
    /// Resume dispatching on ordering keys paused by a nack.
    ActivateOrderingKeys(Vec<String>),
    /// Sentinel: stop accepting messages and drain active callbacks.
    Shutdown,
}

/// Dispatches application callbacks with bounded concurrency.
///
/// Messages without an ordering key run on a pool of N workers. Messages
/// sharing an ordering key run FIFO with a single active execution; a
/// nacked (or dropped) message pauses its key until the application calls
/// `activate_ordering_keys`.
pub(crate) struct Scheduler {
    tx: UnboundedSender<Command>,
    disposition_tx: UnboundedSender<Disposition>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub(crate) fn start(handler: Arc<dyn MessageHandler>, concurrency: usize) -> Self {
        let (tx, rx) = unbounded_channel();
        let (disposition_tx, disposition_rx) = unbounded_channel();
        let worker = Worker {
            handler,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            rx,
            disposition_rx,
            keys: HashMap::new(),
        };
        let handle = tokio::spawn(worker.run());
        Self {
            tx,
            disposition_tx,
            handle,
        }
    }

    pub(crate) fn sender(&self) -> UnboundedSender<Command> {
        self.tx.clone()
    }

    /// The sender ordered [AckHandle]s use to report their settlement.
    pub(crate) fn dispositions(&self) -> UnboundedSender<Disposition> {
        self.disposition_tx.clone()
    }

    /// Stop accepting messages and wait for active callbacks to finish.
    ///
    /// Messages still queued behind an ordering key are dropped, which
    /// nacks them. A sentinel marks the cut, so senders held elsewhere
    /// (e.g. by the session handle) cannot keep the worker alive.
    pub(crate) async fn stop(self) {
        let _ = self.tx.send(Command::Shutdown);
        drop(self.tx);
        drop(self.disposition_tx);
        let _ = self.handle.await;
    }
}

#[derive(Default)]
struct KeyState {
    queue: VecDeque<(SubscribeMessage, AckHandle)>,
    active: bool,
    paused: bool,
}

struct Worker {
    handler: Arc<dyn MessageHandler>,
    permits: Arc<Semaphore>,
    rx: UnboundedReceiver<Command>,
    disposition_rx: UnboundedReceiver<Disposition>,
    keys: HashMap<String, KeyState>,
}

impl Worker {
    async fn run(mut self) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                // Settlements are processed ahead of new messages, so an
                // ordered key frees up before its next message arrives.
                biased;
                disposition = self.disposition_rx.recv() => {
                    if let Some(d) = disposition {
                        self.on_disposition(&mut tasks, d);
                    }
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(Command::Schedule(message, ack)) => {
                            self.schedule(&mut tasks, message, ack);
                        }
                        Some(Command::ActivateOrderingKeys(keys)) => {
                            self.activate(&mut tasks, keys);
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }
                // Reap finished callbacks so the set stays bounded.
                _ = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }
        // Wait for active callbacks. Messages still queued for ordered keys
        // are dropped, and dropping their handles nacks them.
        while tasks.join_next().await.is_some() {}
    }

    fn schedule(&mut self, tasks: &mut JoinSet<()>, message: SubscribeMessage, ack: AckHandle) {
        let ordering_key = message.message.ordering_key.clone();
        if ordering_key.is_empty() {
            spawn_callback(&self.handler, &self.permits, tasks, message, ack);
            return;
        }
        let state = self.keys.entry(ordering_key).or_default();
        state.queue.push_back((message, ack));
        if !state.active && !state.paused {
            if let Some((message, ack)) = state.queue.pop_front() {
                state.active = true;
                spawn_callback(&self.handler, &self.permits, tasks, message, ack);
            }
        }
    }

    fn on_disposition(&mut self, tasks: &mut JoinSet<()>, disposition: Disposition) {
        if disposition.ordering_key.is_empty() {
            return;
        }
        let Some(state) = self.keys.get_mut(&disposition.ordering_key) else {
            return;
        };
        state.active = false;
        if disposition.nacked {
            state.paused = true;
            tracing::debug!(
                ordering_key = %disposition.ordering_key,
                "pausing ordering key after nack"
            );
            return;
        }
        if let Some((message, ack)) = state.queue.pop_front() {
            state.active = true;
            spawn_callback(&self.handler, &self.permits, tasks, message, ack);
        } else if !state.paused {
            // The key is idle; forget it until it is seen again.
            self.keys.remove(&disposition.ordering_key);
        }
    }

    fn activate(&mut self, tasks: &mut JoinSet<()>, keys: Vec<String>) {
        for key in keys {
            let Some(state) = self.keys.get_mut(&key) else {
                continue;
            };
            state.paused = false;
            if !state.active {
                if let Some((message, ack)) = state.queue.pop_front() {
                    state.active = true;
                    spawn_callback(&self.handler, &self.permits, tasks, message, ack);
                }
            }
        }
    }
}

fn spawn_callback(
    handler: &Arc<dyn MessageHandler>,
    permits: &Arc<Semaphore>,
    tasks: &mut JoinSet<()>,
    message: SubscribeMessage,
    ack: AckHandle,
) {
    let handler = handler.clone();
    let permits = permits.clone();
    tasks.spawn(async move {
        let _permit = permits
            .acquire_owned()
            .await
            .expect("the scheduler never closes its semaphore");
        handler.handle(message, ack).await;
    });
}
