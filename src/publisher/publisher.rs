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
use crate::publisher::batch::BundledMessage;
use crate::publisher::options::{BatchSettings, PublishFlowControl};
use crate::publisher::sequencer::{Router, ToRouter};
use crate::transport::{CallOptions, Transport};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// A `Publisher` sends messages to a specific topic. It manages message
/// batching and sending in background tasks.
///
/// Publishers are created via a
/// [`PublisherClient`](crate::publisher::PublisherClient).
///
/// # Example
/// ```no_run
/// # use pubsub_core::publisher::PublisherClient;
/// # use pubsub_core::model::Message;
/// # async fn sample(client: PublisherClient) -> anyhow::Result<()> {
/// let publisher = client.publisher("projects/my-project/topics/my-topic").build();
/// let message_id = publisher
///     .publish(Message::new().set_data("Hello, World"))
///     .await
///     .await?;
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct Publisher {
    batch_settings: BatchSettings,
    flow: Arc<FlowController>,
    tx: UnboundedSender<ToRouter>,
}

impl Publisher {
    /// Publishes a message to the topic.
    ///
    /// The returned [PublishHandle] resolves with the server-assigned
    /// message id once the batch holding this message commits.
    ///
    /// This method suspends while the publisher is over its flow-control
    /// limits and the limits use
    /// [Block][crate::publisher::LimitExceededBehavior::Block]. Under the
    /// `Error` behavior the handle resolves immediately with
    /// [PublishError::FlowControlExceeded].
    pub async fn publish(&self, msg: Message) -> PublishHandle {
        let size = msg.size();
        let (tx, rx) = oneshot::channel();
        if let Err(e) = self.flow.acquire(size).await {
            let _ = tx.send(Err(e));
            return PublishHandle { rx };
        }
        if let Err(send_error) = self.tx.send(ToRouter::Publish(BundledMessage { msg, tx })) {
            // The router is gone, which indicates something bad has
            // happened. Return the flow-control capacity; dropping the
            // command resolves the handle with `Cancelled`.
            self.flow.release(size);
            drop(send_error);
        }
        PublishHandle { rx }
    }

    /// Flushes all outstanding messages.
    ///
    /// Sends any messages that have been published but not yet sent,
    /// regardless of the configured batching thresholds, and waits for
    /// every publish attempt in the snapshot to complete. After `flush()`
    /// returns, each corresponding [PublishHandle] holds its final result.
    ///
    /// Messages published after `flush()` is called are buffered for a
    /// subsequent batch and are not included in this flush.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(ToRouter::Flush(tx)).is_err() {
            // `tx` is dropped here if the send errors.
        }
        rx.await
            .expect("the client library should not release the sender");
    }

    /// Resumes publishing on an ordering key paused by a failed commit.
    pub fn resume_publish<K: Into<String>>(&self, ordering_key: K) {
        let _ = self.tx.send(ToRouter::ResumePublish(ordering_key.into()));
    }

    /// The batching configuration this publisher runs with.
    pub fn batch_settings(&self) -> &BatchSettings {
        &self.batch_settings
    }
}

/// The pending result of a publish operation.
///
/// Resolves with the server-assigned message id, or with the error that
/// failed the batch.
#[derive(Debug)]
pub struct PublishHandle {
    pub(crate) rx: oneshot::Receiver<Result<String, PublishError>>,
}

impl std::future::Future for PublishHandle {
    type Output = Result<String, PublishError>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|r| match r {
                Ok(result) => result,
                // The sender was dropped without a result, e.g. the client
                // shut down mid-publish.
                Err(_) => Err(PublishError::Cancelled),
            })
    }
}

/// Creates [Publisher] instances for one topic.
#[derive(Clone, Debug)]
pub struct PublisherBuilder {
    transport: Arc<dyn Transport>,
    topic: String,
    batch_settings: BatchSettings,
    flow_control: PublishFlowControl,
    call_options: CallOptions,
}

impl PublisherBuilder {
    pub(crate) fn new(transport: Arc<dyn Transport>, topic: String) -> Self {
        Self {
            transport,
            topic,
            batch_settings: BatchSettings::default(),
            flow_control: PublishFlowControl::default(),
            call_options: CallOptions::default(),
        }
    }

    /// Configure publisher batching behavior.
    ///
    /// # Example
    /// ```no_run
    /// # use pubsub_core::publisher::{BatchSettings, PublisherClient};
    /// # fn sample(client: PublisherClient) {
    /// let publisher = client
    ///     .publisher("projects/my-project/topics/my-topic")
    ///     // Disable batching by setting the batch size to 1. Messages may
    ///     // still be batched when they cannot be sent immediately, which
    ///     // can occur with ordering keys.
    ///     .with_batching(BatchSettings::new().set_max_messages(1_u32))
    ///     .build();
    /// # }
    /// ```
    pub fn with_batching(mut self, v: BatchSettings) -> Self {
        self.batch_settings = v;
        self
    }

    /// Bound the messages and bytes this publisher holds in memory.
    pub fn with_flow_control(mut self, v: PublishFlowControl) -> Self {
        self.flow_control = v;
        self
    }

    /// Set the per-attempt deadline for publish RPCs.
    pub fn with_timeout<V: Into<std::time::Duration>>(mut self, v: V) -> Self {
        self.call_options = self.call_options.set_timeout(v);
        self
    }

    /// Creates a new [Publisher] from the builder's configuration.
    ///
    /// This starts a background router task that owns the batching state.
    /// The returned `Publisher` is a lightweight handle sending commands to
    /// that task; dropping the last clone shuts the task down after a final
    /// flush.
    pub fn build(self) -> Publisher {
        let batch_settings = self.batch_settings.clamped();
        let flow = Arc::new(FlowController::new(
            self.flow_control.message_limit,
            self.flow_control.byte_limit,
            self.flow_control.limit_exceeded_behavior,
        ));
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let router = Router::new(
            self.topic,
            self.transport,
            flow.clone(),
            batch_settings.clone(),
            self.call_options,
            rx,
        );
        tokio::spawn(router.run());
        Publisher {
            batch_settings,
            flow,
            tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_control::LimitExceededBehavior;
    use crate::transport::tests::MockTransport;
    use std::time::Duration;

    static TOPIC: &str = "projects/p/topics/t";

    fn builder(mock: MockTransport) -> PublisherBuilder {
        PublisherBuilder::new(Arc::new(mock), TOPIC.to_string())
    }

    #[tokio::test]
    async fn publish_single_message() -> anyhow::Result<()> {
        let mut mock = MockTransport::new();
        mock.expect_publish()
            .times(1)
            .withf(|topic, messages, _o| {
                topic == TOPIC
                    && messages.len() == 1
                    && messages[0].data == bytes::Bytes::from("foo")
            })
            .returning(|_t, _m, _o| Ok(vec!["m1".to_string()]));

        let publisher = builder(mock)
            .with_batching(BatchSettings::new().set_max_messages(1_u32))
            .build();
        let message_id = publisher
            .publish(Message::new().set_data("foo"))
            .await
            .await?;
        assert_eq!(message_id, "m1");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn batch_by_count_is_one_rpc() -> anyhow::Result<()> {
        let mut mock = MockTransport::new();
        mock.expect_publish()
            .times(1)
            .withf(|topic, messages, _o| topic == TOPIC && messages.len() == 100)
            .returning(|_t, messages, _o| {
                Ok((0..messages.len()).map(|i| format!("id-{i}")).collect())
            });

        let publisher = builder(mock)
            .with_batching(
                BatchSettings::new()
                    .set_max_messages(100_u32)
                    .set_max_latency(Duration::from_secs(3600)),
            )
            .build();

        let mut handles = Vec::new();
        for i in 0..100 {
            handles.push(
                publisher
                    .publish(Message::new().set_data(format!("{i:010}")))
                    .await,
            );
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await?, format!("id-{i}"), "ids resolve in order");
        }
        Ok(())
    }

    #[tokio::test]
    async fn flow_control_error_policy() -> anyhow::Result<()> {
        let mut mock = MockTransport::new();
        mock.expect_publish()
            .returning(|_t, _m, _o| Ok(vec!["m1".to_string()]));

        let publisher = builder(mock)
            .with_batching(
                BatchSettings::new()
                    .set_max_messages(100_u32)
                    .set_max_latency(Duration::from_secs(3600)),
            )
            .with_flow_control(
                PublishFlowControl::new()
                    .set_message_limit(1_usize)
                    .set_limit_exceeded_behavior(LimitExceededBehavior::Error),
            )
            .build();

        let first = publisher.publish(Message::new().set_data("a")).await;
        let err = publisher
            .publish(Message::new().set_data("b"))
            .await
            .await
            .expect_err("the second publish exceeds the message limit");
        assert!(matches!(err, PublishError::FlowControlExceeded), "{err:?}");

        publisher.flush().await;
        assert_eq!(first.await?, "m1");
        Ok(())
    }

    #[tokio::test]
    async fn flow_control_conservation() -> anyhow::Result<()> {
        let mut mock = MockTransport::new();
        mock.expect_publish().returning(|_t, messages, _o| {
            Ok((0..messages.len()).map(|i| format!("id-{i}")).collect())
        });

        let publisher = builder(mock)
            .with_flow_control(
                PublishFlowControl::new()
                    .set_message_limit(100_usize)
                    .set_byte_limit(1_000_usize)
                    .set_limit_exceeded_behavior(LimitExceededBehavior::Block),
            )
            .build();

        for _ in 0..10 {
            let _ = publisher.publish(Message::new().set_data("0123456789")).await;
        }
        publisher.flush().await;
        assert_eq!(
            publisher.flow.outstanding(),
            (0, 0),
            "all capacity returns after the flush"
        );
        Ok(())
    }

    #[tokio::test]
    async fn batch_settings_are_clamped() {
        let publisher = builder(MockTransport::new())
            .with_batching(BatchSettings::new().set_max_messages(1_000_000_u32))
            .build();
        assert_eq!(
            publisher.batch_settings().max_messages,
            crate::publisher::options::MAX_MESSAGES_PER_REQUEST
        );
    }
}
