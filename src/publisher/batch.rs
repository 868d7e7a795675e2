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

use crate::error::PublishError;
use crate::flow_control::FlowController;
use crate::model::Message;
use crate::publisher::options::BatchSettings;
use crate::retry::{
    ExponentialBackoffBuilder, RetryPolicyExt as _, TransientErrors, retry_loop,
};
use crate::transport::{CallOptions, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument as _;

// Transient publish failures are retried within these bounds, once per
// batch. Errors that outlive the budget resolve every future in the batch.
const COMMIT_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);
const COMMIT_RETRY_MAXIMUM_DELAY: Duration = Duration::from_secs(10);
const COMMIT_RETRY_TIME_LIMIT: Duration = Duration::from_secs(60);

/// Object that is passed to the sequencer tasks over the main channel. This
/// represents a single message and the sender half of the channel to resolve
/// the [PublishHandle][crate::publisher::PublishHandle].
#[derive(Debug)]
pub(crate) struct BundledMessage {
    pub msg: Message,
    pub tx: oneshot::Sender<Result<String, PublishError>>,
}

impl BundledMessage {
    pub(crate) fn size(&self) -> usize {
        self.msg.size()
    }
}

/// The open batch for one sequencer.
///
/// Accumulates messages until a threshold is crossed, then commits with one
/// publish RPC.
#[derive(Debug)]
pub(crate) struct Batch {
    messages: Vec<BundledMessage>,
    size: usize,
    first_message_at: Option<Instant>,
    settings: BatchSettings,
}

impl Batch {
    pub(crate) fn new(settings: BatchSettings) -> Self {
        Batch {
            messages: Vec::new(),
            size: 0,
            first_message_at: None,
            settings,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Whether `msg` fits without crossing a threshold.
    ///
    /// An empty batch accepts any message, even one larger than the byte
    /// threshold. Such a message becomes a single-message batch.
    pub(crate) fn can_add(&self, msg: &BundledMessage) -> bool {
        if self.is_empty() {
            return true;
        }
        (self.messages.len() as u32) < self.message_limit()
            && self.size + msg.size() <= self.settings.max_bytes
    }

    /// Whether the batch should commit without waiting for more messages.
    pub(crate) fn at_threshold(&self) -> bool {
        self.messages.len() as u32 >= self.message_limit()
            || self.size >= self.settings.max_bytes
    }

    /// When the latency threshold expires for the current contents.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.first_message_at.map(|t| t + self.settings.max_latency)
    }

    pub(crate) fn push(&mut self, msg: BundledMessage) {
        if self.messages.is_empty() {
            self.first_message_at = Some(Instant::now());
        }
        self.size += msg.size();
        self.messages.push(msg);
    }

    /// Drains the batch and spawns a task to send the messages.
    ///
    /// This leaves the batch empty so the sequencer can immediately start
    /// accumulating the next one while this one commits in the background.
    /// Returns `None` when there is nothing to send.
    pub(crate) fn flush(
        &mut self,
        transport: Arc<dyn Transport>,
        topic: String,
        flow: Arc<FlowController>,
        options: CallOptions,
    ) -> Option<JoinHandle<Result<(), PublishError>>> {
        if self.is_empty() {
            return None;
        }
        let batch_to_send = Self {
            messages: std::mem::take(&mut self.messages),
            size: std::mem::replace(&mut self.size, 0),
            first_message_at: self.first_message_at.take(),
            settings: self.settings.clone(),
        };
        let span = tracing::debug_span!(
            "publish_batch",
            topic = %topic,
            messages = batch_to_send.len(),
            bytes = batch_to_send.size(),
        );
        Some(tokio::spawn(
            async move {
                batch_to_send.send(transport, topic, flow, options).await
            }
            .instrument(span),
        ))
    }

    fn message_limit(&self) -> u32 {
        self.settings
            .max_messages
            .min(self.settings.max_messages_per_request)
    }

    /// Send the batch to the service and process the results.
    async fn send(
        self,
        transport: Arc<dyn Transport>,
        topic: String,
        flow: Arc<FlowController>,
        options: CallOptions,
    ) -> Result<(), PublishError> {
        let sizes = self.messages.iter().map(|m| m.size()).collect::<Vec<_>>();
        let (msgs, txs): (Vec<_>, Vec<_>) = self
            .messages
            .into_iter()
            .map(|msg| (msg.msg, msg.tx))
            .unzip();

        let retry = TransientErrors.with_time_limit(COMMIT_RETRY_TIME_LIMIT);
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_delay(COMMIT_RETRY_INITIAL_DELAY)
            .with_maximum_delay(COMMIT_RETRY_MAXIMUM_DELAY)
            .build()
            .expect("This is a valid configuration");
        let result = retry_loop(
            || Box::pin(transport.publish(topic.clone(), msgs.clone(), options.clone())),
            &retry,
            &backoff,
        )
        .await;

        let outcome = match result {
            Err(e) => {
                let e = PublishError::Send(Arc::new(e));
                for tx in txs {
                    // The user may have dropped the handle, so it is ok if
                    // this fails.
                    let _ = tx.send(Err(e.clone()));
                }
                Err(e)
            }
            Ok(message_ids) => {
                // Message ids are positional. Any future left unresolved by
                // a short id list observes a closed channel.
                txs.into_iter()
                    .zip(message_ids)
                    .for_each(|(tx, message_id)| {
                        let _ = tx.send(Ok(message_id));
                    });
                Ok(())
            }
        };
        sizes.into_iter().for_each(|s| flow.release(s));
        outcome
    }
}
