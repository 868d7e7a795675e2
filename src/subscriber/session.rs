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

use super::client::SubscribeBuilder;
use super::dispatcher::{Dispatcher, Request};
use super::handler::{AckHandle, MessageHandler};
use super::keepalive;
use super::lease_loop::LeaseLoop;
use super::lease_state::LeaseRegistry;
use super::options::FlowControl;
use super::retry_policy::StreamRetryPolicy;
use super::scheduler::{Command, Scheduler};
use super::stream;
use crate::model::{StreamRequest, StreamResponse, SubscribeMessage};
use crate::retry::{BackoffPolicy, RetryFlow};
use crate::transport::{CallOptions, MessageStream, Transport};
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc::{Sender, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

/// An open subscribe session.
///
/// The session owns the background workers serving one subscription: the
/// stream manager, the lease maintenance loop, the acknowledgement
/// dispatcher, the callback scheduler, and the heartbeater. Messages are
/// delivered to the [MessageHandler] passed to
/// [SubscribeBuilder::start][crate::subscriber::SubscribeBuilder::start].
///
/// # Example
/// ```no_run
/// # use pubsub_core::subscriber::{AckHandle, SubscriberClient};
/// # use pubsub_core::model::SubscribeMessage;
/// # async fn sample(client: SubscriberClient) -> anyhow::Result<()> {
/// let session = client
///     .subscription("projects/my-project/subscriptions/my-subscription")
///     .start(|m: SubscribeMessage, ack: AckHandle| async move {
///         println!("received {:?}", m.message.data);
///         let _ = ack.ack();
///     })
///     .await?;
/// session.join().await?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Session {
    scheduler_tx: UnboundedSender<Command>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl Session {
    pub(super) async fn start(
        builder: SubscribeBuilder,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        let registry = Arc::new(LeaseRegistry::new());
        let exactly_once = Arc::new(AtomicBool::new(builder.exactly_once_delivery));
        let shutdown = CancellationToken::new();
        let (paused_tx, paused_rx) = watch::channel(false);

        let dispatcher = Dispatcher::start(
            builder.transport.clone(),
            builder.subscription.clone(),
            registry.clone(),
            exactly_once.clone(),
        );
        let scheduler = Scheduler::start(handler, builder.concurrency);
        let lease_loop = LeaseLoop::start(
            builder.transport.clone(),
            builder.subscription.clone(),
            registry.clone(),
            builder.flow_control.clone(),
            exactly_once.clone(),
            shutdown.child_token(),
        );

        let manager = Manager {
            transport: builder.transport,
            subscription: builder.subscription,
            flow_control: builder.flow_control,
            stream_ack_deadline_seconds: builder.stream_ack_deadline.as_secs() as i32,
            heartbeat_period: builder.heartbeat_period,
            call_options: builder.call_options,
            client_id: uuid::Uuid::new_v4().to_string(),
            registry,
            queue: dispatcher.sender(),
            scheduler_tx: scheduler.sender(),
            dispositions: scheduler.dispositions(),
            exactly_once,
            paused_tx,
            paused_rx,
            shutdown: shutdown.clone(),
        };

        // Open the first stream here, so unreachable subscriptions fail the
        // start instead of retrying in the background forever.
        let backoff = stream::default_backoff();
        let opened = match stream::connect(
            &manager.transport,
            manager.initial_request(),
            manager.call_options.clone(),
            &backoff,
        )
        .await
        {
            Ok(opened) => opened,
            Err(e) => {
                // Wind down the workers spawned above.
                shutdown.cancel();
                return Err(e);
            }
        };

        let scheduler_tx = scheduler.sender();
        let handle = tokio::spawn(async move {
            manager.run(opened, dispatcher, scheduler, lease_loop).await
        });
        Ok(Self {
            scheduler_tx,
            shutdown,
            handle,
        })
    }

    /// Resume callback dispatch on ordering keys paused by a nack.
    pub fn activate_ordering_keys<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys = keys.into_iter().map(Into::into).collect();
        let _ = self.scheduler_tx.send(Command::ActivateOrderingKeys(keys));
    }

    /// Gracefully stop the session.
    ///
    /// Drains the scheduler, nacks messages the application never settled,
    /// flushes pending acknowledgements, closes the stream, and joins every
    /// worker.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(Error::cancelled()),
        }
    }

    /// Wait for the session to end on its own.
    ///
    /// In practice a session only ends with an error the stream retry
    /// policy considers terminal.
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(Error::cancelled()),
        }
    }
}

/// The streaming pull manager.
///
/// Owns the bidirectional stream: reopens it on recoverable errors, stops
/// draining it while the client holds too much, and routes each received
/// message into lease management and the scheduler.
struct Manager {
    transport: Arc<dyn Transport>,
    subscription: String,
    flow_control: FlowControl,
    stream_ack_deadline_seconds: i32,
    heartbeat_period: std::time::Duration,
    call_options: CallOptions,
    client_id: String,
    registry: Arc<LeaseRegistry>,
    queue: UnboundedSender<Request>,
    scheduler_tx: UnboundedSender<Command>,
    dispositions: UnboundedSender<super::handler::Disposition>,
    exactly_once: Arc<AtomicBool>,
    paused_tx: watch::Sender<bool>,
    paused_rx: watch::Receiver<bool>,
    shutdown: CancellationToken,
}

impl Manager {
    async fn run(
        self,
        opened: (MessageStream, Sender<StreamRequest>),
        dispatcher: Dispatcher,
        scheduler: Scheduler,
        lease_loop: LeaseLoop,
    ) -> Result<()> {
        let result = self.pump(opened).await;

        // Closing: stop the children, settle what remains, join everything.
        self.shutdown.cancel();
        scheduler.stop().await;
        // Let pending settlements drain before computing the nack set, so a
        // message acked during the drain is not also nacked.
        let (flushed_tx, flushed_rx) = tokio::sync::oneshot::channel();
        if self.queue.send(Request::Flush(flushed_tx)).is_ok() {
            let _ = flushed_rx.await;
        }
        for ack_id in self.registry.live_ack_ids() {
            let _ = self.queue.send(Request::Nack { ack_id, done: None });
        }
        lease_loop.join().await;
        drop(self.queue);
        dispatcher.stop().await;
        result
    }

    /// Drive the stream until shutdown or a terminal error.
    async fn pump(&self, opened: (MessageStream, Sender<StreamRequest>)) -> Result<()> {
        let backoff = stream::default_backoff();
        let (mut stream, request_tx) = opened;
        let mut _keepalive_guard = self.spawn_keepalive(request_tx);
        loop {
            // Honor flow control before pulling more from the stream. While
            // paused, server pushes eventually block on the transport.
            if self.wait_while_paused().await {
                return Ok(());
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                response = stream.next_message() => {
                    let error = match response {
                        Ok(Some(response)) => {
                            self.on_response(response);
                            continue;
                        }
                        Ok(None) => Error::io("stream closed by the server"),
                        Err(e) => e,
                    };
                    match StreamRetryPolicy::on_midstream_error(error) {
                        RetryFlow::Continue(e) => {
                            tracing::warn!(
                                subscription = %self.subscription,
                                "reopening stream after recoverable error: {e}"
                            );
                        }
                        RetryFlow::Permanent(e) | RetryFlow::Exhausted(e) => return Err(e),
                    }
                    match self.reconnect(&backoff).await {
                        None => return Ok(()),
                        Some(Err(e)) => return Err(e),
                        Some(Ok((new_stream, new_request_tx))) => {
                            stream = new_stream;
                            _keepalive_guard = self.spawn_keepalive(new_request_tx);
                        }
                    }
                }
            }
        }
        // `_keepalive_guard` cancels the heartbeater when the pump returns.
    }

    /// Reopen the stream, unless a shutdown arrives first.
    async fn reconnect(
        &self,
        backoff: &dyn BackoffPolicy,
    ) -> Option<Result<(MessageStream, Sender<StreamRequest>)>> {
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = stream::connect(
                &self.transport,
                self.initial_request(),
                self.call_options.clone(),
                backoff,
            ) => Some(result),
        }
    }

    /// While above the high watermark, wait for releases until the client
    /// holds little enough to resume. Returns true on shutdown.
    async fn wait_while_paused(&self) -> bool {
        if !*self.paused_tx.borrow() {
            return false;
        }
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return true,
                _ = self.registry.wait_for_release() => {
                    let (messages, bytes) = self.registry.outstanding();
                    if messages <= self.flow_control.max_messages / 2
                        && bytes <= self.flow_control.max_bytes / 2
                    {
                        tracing::debug!(
                            subscription = %self.subscription,
                            messages,
                            bytes,
                            "resuming stream below the low watermark"
                        );
                        let _ = self.paused_tx.send(false);
                        return false;
                    }
                }
            }
        }
    }

    fn on_response(&self, response: StreamResponse) {
        if let Some(enabled) = response.exactly_once_delivery_enabled {
            let was = self.exactly_once.swap(enabled, Ordering::AcqRel);
            if was != enabled {
                tracing::debug!(
                    subscription = %self.subscription,
                    exactly_once = enabled,
                    "subscription properties changed"
                );
            }
        }
        let deadline_seconds = self.registry.ack_deadline(&self.flow_control).as_secs() as i32;
        for rm in response.received_messages {
            let Some(message) = rm.message else {
                // The message field should always be present. If not, the
                // frame was corrupted in transit, or there is a bug in the
                // service. An ack id without a message can just be ignored.
                continue;
            };
            self.registry
                .add(rm.ack_id.clone(), message.size(), message.ordering_key.clone());
            // The receipt modack extends the lease to the current target
            // deadline.
            let _ = self.queue.send(Request::ModAck {
                ack_id: rm.ack_id.clone(),
                seconds: deadline_seconds,
                done: None,
            });
            let dispositions = if message.ordering_key.is_empty() {
                None
            } else {
                Some(self.dispositions.clone())
            };
            let ack = AckHandle::new(
                rm.ack_id.clone(),
                message.ordering_key.clone(),
                self.queue.clone(),
                dispositions,
            );
            let subscribe_message = SubscribeMessage {
                message,
                ack_id: rm.ack_id,
                delivery_attempt: rm.delivery_attempt,
                lease_deadline: SystemTime::now().checked_add(self.flow_control.max_lease_duration),
            };
            let _ = self
                .scheduler_tx
                .send(Command::Schedule(subscribe_message, ack));
        }

        let (messages, bytes) = self.registry.outstanding();
        if messages >= self.flow_control.max_messages || bytes >= self.flow_control.max_bytes {
            if !*self.paused_tx.borrow() {
                tracing::debug!(
                    subscription = %self.subscription,
                    messages,
                    bytes,
                    "pausing stream above the flow control limits"
                );
                let _ = self.paused_tx.send(true);
            }
        }
    }

    fn initial_request(&self) -> StreamRequest {
        StreamRequest {
            subscription: self.subscription.clone(),
            stream_ack_deadline_seconds: self.stream_ack_deadline_seconds,
            client_id: self.client_id.clone(),
            max_outstanding_messages: self.flow_control.max_messages as i64,
            max_outstanding_bytes: self.flow_control.max_bytes as i64,
        }
    }

    fn spawn_keepalive(&self, request_tx: Sender<StreamRequest>) -> DropGuard {
        let token = self.shutdown.child_token();
        keepalive::spawn(
            request_tx,
            self.heartbeat_period,
            self.paused_rx.clone(),
            token.clone(),
        );
        token.drop_guard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AckIdStatus, AckResponse, Message, ReceivedMessage};
    use crate::subscriber::SubscriberClient;
    use crate::subscriber::lease_state::tests::{sorted, test_id, test_ids};
    use crate::transport::tests::MockTransport;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc::{UnboundedReceiver, channel, unbounded_channel};

    static SUBSCRIPTION: &str = "projects/p/subscriptions/s";

    fn test_data(v: i32) -> bytes::Bytes {
        bytes::Bytes::from(format!("data-{}", test_id(v)))
    }

    type ResponseSender = tokio::sync::mpsc::Sender<crate::Result<StreamResponse>>;
    type ResponseReceiver = tokio::sync::mpsc::Receiver<crate::Result<StreamResponse>>;

    fn response_channel() -> (ResponseSender, ResponseReceiver) {
        channel(10)
    }

    fn test_response(range: std::ops::Range<i32>) -> StreamResponse {
        test_response_with_key(range, "")
    }

    fn test_response_with_key(range: std::ops::Range<i32>, key: &str) -> StreamResponse {
        StreamResponse {
            received_messages: range
                .map(|i| ReceivedMessage {
                    ack_id: test_id(i),
                    message: Some(
                        Message::new().set_data(test_data(i)).set_ordering_key(key),
                    ),
                    delivery_attempt: 1,
                })
                .collect(),
            ..Default::default()
        }
    }

    /// A handler that forwards every delivery to the test.
    fn forwarding_handler(
        delivered_tx: tokio::sync::mpsc::UnboundedSender<(SubscribeMessage, AckHandle)>,
    ) -> impl Fn(SubscribeMessage, AckHandle) -> std::future::Ready<()> + Send + Sync + 'static
    {
        move |m, ack| {
            let _ = delivered_tx.send((m, ack));
            std::future::ready(())
        }
    }

    async fn next_delivery(
        delivered_rx: &mut UnboundedReceiver<(SubscribeMessage, AckHandle)>,
    ) -> (SubscribeMessage, AckHandle) {
        delivered_rx
            .recv()
            .await
            .expect("the session delivers a message")
    }

    #[tokio::test(start_paused = true)]
    async fn receive_and_ack() -> anyhow::Result<()> {
        let (response_tx, response_rx) = response_channel();
        let (ack_tx, mut ack_rx) = unbounded_channel();
        let (modack_tx, mut modack_rx) = unbounded_channel();

        let mut mock = MockTransport::new();
        mock.expect_streaming_pull()
            .return_once(|_r, _o| Ok(Box::new(response_rx) as MessageStream));
        mock.expect_acknowledge().returning(move |_s, ack_ids, _o| {
            ack_tx.send(ack_ids).expect("the test holds the receiver");
            Ok(AckResponse::success())
        });
        mock.expect_modify_ack_deadline()
            .returning(move |_s, ack_ids, seconds, _o| {
                modack_tx
                    .send((ack_ids, seconds))
                    .expect("the test holds the receiver");
                Ok(AckResponse::success())
            });

        let (delivered_tx, mut delivered_rx) = unbounded_channel();
        let client = SubscriberClient::new(Arc::new(mock));
        let session = client
            .subscription(SUBSCRIPTION)
            .start(forwarding_handler(delivered_tx))
            .await?;

        response_tx.send(Ok(test_response(0..3))).await?;

        let mut acked = Vec::new();
        for _ in 0..3 {
            let (m, ack) = next_delivery(&mut delivered_rx).await;
            assert_eq!(m.message.data, test_data_for(&m.ack_id));
            acked.push(m.ack_id.clone());
            let _ = ack.ack();
        }
        session.shutdown().await?;

        let mut all_acked = Vec::new();
        while let Ok(ack_ids) = ack_rx.try_recv() {
            all_acked.extend(ack_ids);
        }
        assert_eq!(sorted(all_acked), test_ids(0..3));

        // Each message got a receipt modack at the target deadline.
        let mut receipt_ids = Vec::new();
        while let Ok((ack_ids, seconds)) = modack_rx.try_recv() {
            if seconds > 0 {
                receipt_ids.extend(ack_ids);
            }
        }
        assert_eq!(sorted(receipt_ids), test_ids(0..3));
        Ok(())
    }

    fn test_data_for(ack_id: &str) -> bytes::Bytes {
        bytes::Bytes::from(format!("data-{ack_id}"))
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_frames_without_a_message() -> anyhow::Result<()> {
        let (response_tx, response_rx) = response_channel();
        let mut mock = MockTransport::new();
        mock.expect_streaming_pull()
            .return_once(|_r, _o| Ok(Box::new(response_rx) as MessageStream));
        mock.expect_acknowledge()
            .returning(|_s, _a, _o| Ok(AckResponse::success()));
        mock.expect_modify_ack_deadline()
            .returning(|_s, _a, _d, _o| Ok(AckResponse::success()));

        let bad = StreamResponse {
            received_messages: vec![ReceivedMessage {
                ack_id: "ignored-ack-id".to_string(),
                message: None,
                delivery_attempt: 0,
            }],
            ..Default::default()
        };

        let (delivered_tx, mut delivered_rx) = unbounded_channel();
        let client = SubscriberClient::new(Arc::new(mock));
        let session = client
            .subscription(SUBSCRIPTION)
            .start(forwarding_handler(delivered_tx))
            .await?;

        response_tx.send(Ok(test_response(0..1))).await?;
        response_tx.send(Ok(bad)).await?;
        response_tx.send(Ok(test_response(1..2))).await?;

        for i in 0..2 {
            let (m, ack) = next_delivery(&mut delivered_rx).await;
            assert_eq!(m.ack_id, test_id(i));
            let _ = ack.ack();
        }
        session.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_stream_error_is_terminal() -> anyhow::Result<()> {
        let (response_tx, response_rx) = response_channel();
        let mut mock = MockTransport::new();
        mock.expect_streaming_pull()
            .return_once(|_r, _o| Ok(Box::new(response_rx) as MessageStream));
        mock.expect_acknowledge()
            .returning(|_s, _a, _o| Ok(AckResponse::success()));
        mock.expect_modify_ack_deadline()
            .returning(|_s, _a, _d, _o| Ok(AckResponse::success()));

        let (delivered_tx, _delivered_rx) = unbounded_channel();
        let client = SubscriberClient::new(Arc::new(mock));
        let session = client
            .subscription(SUBSCRIPTION)
            .start(forwarding_handler(delivered_tx))
            .await?;

        response_tx
            .send(Err(crate::retry::tests::permanent_error()))
            .await?;

        let err = session.join().await.expect_err("the stream failed");
        assert_eq!(
            err.status().unwrap().code,
            Some(crate::error::rpc::Code::FailedPrecondition)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_stream_error_reopens() -> anyhow::Result<()> {
        let (first_tx, first_rx) = response_channel();
        let (second_tx, second_rx) = response_channel();

        let mut seq = mockall::Sequence::new();
        let mut mock = MockTransport::new();
        mock.expect_streaming_pull()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_r, _o| Ok(Box::new(first_rx) as MessageStream));
        mock.expect_streaming_pull()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(|_r, _o| Ok(Box::new(second_rx) as MessageStream));
        mock.expect_acknowledge()
            .returning(|_s, _a, _o| Ok(AckResponse::success()));
        mock.expect_modify_ack_deadline()
            .returning(|_s, _a, _d, _o| Ok(AckResponse::success()));

        let (delivered_tx, mut delivered_rx) = unbounded_channel();
        let client = SubscriberClient::new(Arc::new(mock));
        let session = client
            .subscription(SUBSCRIPTION)
            .start(forwarding_handler(delivered_tx))
            .await?;

        first_tx.send(Ok(test_response(0..1))).await?;
        first_tx
            .send(Err(crate::retry::tests::transient_error()))
            .await?;
        second_tx.send(Ok(test_response(1..2))).await?;

        for i in 0..2 {
            let (m, ack) = next_delivery(&mut delivered_rx).await;
            assert_eq!(m.ack_id, test_id(i), "messages span the reconnect");
            let _ = ack.ack();
        }
        session.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_nacks_unsettled_messages() -> anyhow::Result<()> {
        let (response_tx, response_rx) = response_channel();
        let (modack_tx, mut modack_rx) = unbounded_channel();

        let mut mock = MockTransport::new();
        mock.expect_streaming_pull()
            .return_once(|_r, _o| Ok(Box::new(response_rx) as MessageStream));
        mock.expect_acknowledge()
            .returning(|_s, _a, _o| Ok(AckResponse::success()));
        mock.expect_modify_ack_deadline()
            .returning(move |_s, ack_ids, seconds, _o| {
                modack_tx
                    .send((ack_ids, seconds))
                    .expect("the test holds the receiver");
                Ok(AckResponse::success())
            });

        let (delivered_tx, mut delivered_rx) = unbounded_channel();
        let client = SubscriberClient::new(Arc::new(mock));
        let session = client
            .subscription(SUBSCRIPTION)
            .start(forwarding_handler(delivered_tx))
            .await?;

        response_tx.send(Ok(test_response(0..3))).await?;
        let mut held = Vec::new();
        for _ in 0..3 {
            let (_, ack) = next_delivery(&mut delivered_rx).await;
            held.push(ack);
        }

        session.shutdown().await?;

        let mut nacked = Vec::new();
        while let Ok((ack_ids, seconds)) = modack_rx.try_recv() {
            if seconds == 0 {
                nacked.extend(ack_ids);
            }
        }
        assert_eq!(
            sorted(nacked),
            test_ids(0..3),
            "held messages are nacked on shutdown"
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn flow_control_pauses_and_resumes() -> anyhow::Result<()> {
        let (response_tx, response_rx) = response_channel();
        let mut mock = MockTransport::new();
        mock.expect_streaming_pull()
            .return_once(|_r, _o| Ok(Box::new(response_rx) as MessageStream));
        mock.expect_acknowledge()
            .returning(|_s, _a, _o| Ok(AckResponse::success()));
        mock.expect_modify_ack_deadline()
            .returning(|_s, _a, _d, _o| Ok(AckResponse::success()));

        let (delivered_tx, mut delivered_rx) = unbounded_channel();
        let client = SubscriberClient::new(Arc::new(mock));
        let session = client
            .subscription(SUBSCRIPTION)
            .set_flow_control(FlowControl::new().set_max_messages(2_usize))
            .start(forwarding_handler(delivered_tx))
            .await?;

        // The first response crosses the high watermark.
        response_tx.send(Ok(test_response(0..2))).await?;
        response_tx.send(Ok(test_response(2..4))).await?;

        let (_, first) = next_delivery(&mut delivered_rx).await;
        let (_, second) = next_delivery(&mut delivered_rx).await;

        // The stream is paused: the second response is not drained.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(
            delivered_rx.try_recv().is_err(),
            "no deliveries while paused"
        );

        // Acking both messages brings us under the low watermark.
        let _ = first.ack();
        let _ = second.ack();
        for i in 2..4 {
            let (m, ack) = next_delivery(&mut delivered_rx).await;
            assert_eq!(m.ack_id, test_id(i));
            let _ = ack.ack();
        }
        session.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_once_hint_enables_ack_retries() -> anyhow::Result<()> {
        let (response_tx, response_rx) = response_channel();

        let mut seq = mockall::Sequence::new();
        let mut mock = MockTransport::new();
        mock.expect_streaming_pull()
            .return_once(|_r, _o| Ok(Box::new(response_rx) as MessageStream));
        mock.expect_modify_ack_deadline()
            .returning(|_s, _a, _d, _o| Ok(AckResponse::success()));
        mock.expect_acknowledge()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_s, ack_ids, _o| {
                Ok(AckResponse {
                    statuses: ack_ids
                        .into_iter()
                        .map(|id| (id, AckIdStatus::TransientFailure))
                        .collect::<HashMap<_, _>>(),
                })
            });
        mock.expect_acknowledge()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_s, _a, _o| Ok(AckResponse::success()));

        let (delivered_tx, mut delivered_rx) = unbounded_channel();
        let client = SubscriberClient::new(Arc::new(mock));
        let session = client
            .subscription(SUBSCRIPTION)
            .start(forwarding_handler(delivered_tx))
            .await?;

        // The server reports the subscription has exactly-once delivery.
        let mut response = test_response(0..1);
        response.exactly_once_delivery_enabled = Some(true);
        response_tx.send(Ok(response)).await?;

        let (_, ack) = next_delivery(&mut delivered_rx).await;
        let outcome = ack.ack().await;
        assert_eq!(outcome, Ok(()), "the retry confirmed the ack");
        session.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn initial_request_and_keepalives() -> anyhow::Result<()> {
        // We use this channel to surface writes (requests) from outside our
        // mock expectation.
        let (recover_writes_tx, mut recover_writes_rx) = channel(4);
        let (_response_tx, response_rx) = response_channel();

        let mut mock = MockTransport::new();
        mock.expect_streaming_pull()
            .return_once(move |mut request_rx, _o| {
                tokio::spawn(async move {
                    while let Some(request) = request_rx.recv().await {
                        recover_writes_tx
                            .send(request)
                            .await
                            .expect("forwarding writes always succeeds");
                    }
                });
                Ok(Box::new(response_rx) as MessageStream)
            });
        mock.expect_acknowledge()
            .returning(|_s, _a, _o| Ok(AckResponse::success()));
        mock.expect_modify_ack_deadline()
            .returning(|_s, _a, _d, _o| Ok(AckResponse::success()));

        let (delivered_tx, _delivered_rx) = unbounded_channel();
        let client = SubscriberClient::new(Arc::new(mock));
        let session = client
            .subscription(SUBSCRIPTION)
            .set_stream_ack_deadline(Duration::from_secs(20))
            .start(forwarding_handler(delivered_tx))
            .await?;

        let initial = recover_writes_rx
            .recv()
            .await
            .expect("the initial request is seeded");
        assert_eq!(initial.subscription, SUBSCRIPTION);
        assert_eq!(initial.stream_ack_deadline_seconds, 20);
        assert!(!initial.client_id.is_empty());
        assert!(initial.max_outstanding_messages > 0);
        assert!(initial.max_outstanding_bytes > 0);

        // The heartbeater sends an empty frame while the stream is idle.
        let keepalive = recover_writes_rx
            .recv()
            .await
            .expect("a keepalive frame arrives");
        assert_eq!(keepalive, StreamRequest::default());

        session.shutdown().await?;
        Ok(())
    }
}
