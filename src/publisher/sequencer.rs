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
use crate::publisher::batch::{Batch, BundledMessage};
use crate::publisher::options::BatchSettings;
use crate::transport::{CallOptions, Transport};
use futures::StreamExt as _;
use futures::stream::FuturesUnordered;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;

const SEQUENCER_SEND_ERROR_MSG: &str = "sequencer tasks outlive the router";

/// A command sent from the `Publisher` to the background router task.
pub(crate) enum ToRouter {
    /// A request to publish a single message.
    Publish(BundledMessage),
    /// A request to flush all outstanding messages.
    Flush(oneshot::Sender<()>),
    /// A request to resume publishing on an ordering key.
    ResumePublish(String),
}

/// A command sent from the router to a sequencer task.
enum ToSequencer {
    /// A request to publish a single message.
    Publish(BundledMessage),
    /// A request to flush all outstanding messages.
    Flush(oneshot::Sender<()>),
    /// A request to resume publishing.
    ResumePublish,
}

/// The state shared by both sequencer flavors.
struct SequencerContext {
    topic: String,
    transport: Arc<dyn Transport>,
    flow: Arc<FlowController>,
    settings: BatchSettings,
    call_options: CallOptions,
    rx: mpsc::UnboundedReceiver<ToSequencer>,
}

impl SequencerContext {
    fn flush_batch(
        &self,
        batch: &mut Batch,
    ) -> Option<JoinHandle<Result<(), PublishError>>> {
        batch.flush(
            self.transport.clone(),
            self.topic.clone(),
            self.flow.clone(),
            self.call_options.clone(),
        )
    }
}

/// The router runs in a background task and directs every publisher
/// operation to the sequencer owning the message's ordering key.
///
/// Publishes without an ordering key share the sequencer for the key `""`,
/// which commits batches concurrently.
pub(crate) struct Router {
    topic: String,
    transport: Arc<dyn Transport>,
    flow: Arc<FlowController>,
    settings: BatchSettings,
    call_options: CallOptions,
    rx: mpsc::UnboundedReceiver<ToRouter>,
}

impl Router {
    pub(crate) fn new(
        topic: String,
        transport: Arc<dyn Transport>,
        flow: Arc<FlowController>,
        settings: BatchSettings,
        call_options: CallOptions,
        rx: mpsc::UnboundedReceiver<ToRouter>,
    ) -> Self {
        Self {
            topic,
            transport,
            flow,
            settings,
            call_options,
            rx,
        }
    }

    /// The main loop of the router.
    ///
    /// 1. A `Publish` command is forwarded to the sequencer for its ordering
    ///    key, creating the sequencer on first use.
    /// 2. A `Flush` command fans out to every sequencer and resolves once
    ///    they have all drained.
    /// 3. A `ResumePublish` command is forwarded to the sequencer for its
    ///    key, if one exists.
    ///
    /// The loop terminates when the channel closes, which happens when all
    /// `Publisher` clones have been dropped. Dropping the sequencer senders
    /// makes each sequencer flush its remaining messages and exit.
    pub(crate) async fn run(mut self) {
        let mut sequencers: HashMap<String, mpsc::UnboundedSender<ToSequencer>> = HashMap::new();
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                ToRouter::Publish(msg) => {
                    let ordering_key = msg.msg.ordering_key.clone();
                    let sequencer = sequencers
                        .entry(ordering_key.clone())
                        .or_insert_with(|| self.start_sequencer(&ordering_key));
                    sequencer
                        .send(ToSequencer::Publish(msg))
                        .expect(SEQUENCER_SEND_ERROR_MSG);
                }
                ToRouter::Flush(tx) => {
                    let mut flush_set = JoinSet::new();
                    for sequencer in sequencers.values() {
                        let (tx, rx) = oneshot::channel();
                        sequencer
                            .send(ToSequencer::Flush(tx))
                            .expect(SEQUENCER_SEND_ERROR_MSG);
                        flush_set.spawn(rx);
                    }
                    flush_set.join_all().await;
                    let _ = tx.send(());
                }
                ToRouter::ResumePublish(ordering_key) => {
                    if let Some(sequencer) = sequencers.get(&ordering_key) {
                        sequencer
                            .send(ToSequencer::ResumePublish)
                            .expect(SEQUENCER_SEND_ERROR_MSG);
                    }
                }
            }
        }
    }

    fn start_sequencer(&self, ordering_key: &str) -> mpsc::UnboundedSender<ToSequencer> {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = SequencerContext {
            topic: self.topic.clone(),
            transport: self.transport.clone(),
            flow: self.flow.clone(),
            settings: self.settings.clone(),
            call_options: self.call_options.clone(),
            rx,
        };
        if ordering_key.is_empty() {
            tokio::spawn(UnorderedSequencer::new(context).run());
        } else {
            tokio::spawn(OrderedSequencer::new(context).run());
        }
        tx
    }
}

/// A sequencer that commits batches concurrently.
struct UnorderedSequencer {
    context: SequencerContext,
}

impl UnorderedSequencer {
    fn new(context: SequencerContext) -> Self {
        Self { context }
    }

    /// The main loop of the unordered sequencer.
    ///
    /// 1. A `Publish` command adds the message to the open batch, committing
    ///    first if the message does not fit and after if a threshold is
    ///    reached.
    /// 2. The latency timer commits the open batch `max_latency` after its
    ///    first message arrived.
    /// 3. A `Flush` command commits the open batch and awaits every
    ///    in-flight commit.
    ///
    /// Multiple batches may be in flight at once; the loop only tracks their
    /// handles to bound the in-flight set.
    async fn run(mut self) {
        let mut inflight: FuturesUnordered<JoinHandle<Result<(), PublishError>>> =
            FuturesUnordered::new();
        let mut batch = Batch::new(self.context.settings.clone());
        loop {
            let latency_deadline = batch.deadline().unwrap_or_else(Instant::now);
            tokio::select! {
                // Remove completed in-flight batches.
                _ = inflight.next(), if !inflight.is_empty() => continue,
                _ = tokio::time::sleep_until(latency_deadline), if batch.deadline().is_some() => {
                    if let Some(handle) = self.context.flush_batch(&mut batch) {
                        inflight.push(handle);
                    }
                }
                cmd = self.context.rx.recv() => {
                    match cmd {
                        Some(ToSequencer::Publish(msg)) => {
                            self.add_msg_and_flush(&mut inflight, &mut batch, msg);
                        }
                        Some(ToSequencer::Flush(tx)) => {
                            if let Some(handle) = self.context.flush_batch(&mut batch) {
                                inflight.push(handle);
                            }
                            while inflight.next().await.is_some() {}
                            let _ = tx.send(());
                        }
                        Some(ToSequencer::ResumePublish) => {
                            // Nothing to resume as we do not pause without an
                            // ordering key.
                        }
                        None => {
                            // This isn't guaranteed to execute if a user does
                            // not .await on the corresponding handles.
                            if let Some(handle) = self.context.flush_batch(&mut batch) {
                                inflight.push(handle);
                            }
                            while inflight.next().await.is_some() {}
                            break;
                        }
                    }
                }
            }
        }
    }

    // Move the message into the open batch respecting batch thresholds and
    // commit the batch if it is full.
    fn add_msg_and_flush(
        &mut self,
        inflight: &mut FuturesUnordered<JoinHandle<Result<(), PublishError>>>,
        batch: &mut Batch,
        msg: BundledMessage,
    ) {
        if !batch.can_add(&msg) {
            if let Some(handle) = self.context.flush_batch(batch) {
                inflight.push(handle);
            }
        }
        batch.push(msg);
        if batch.at_threshold() {
            if let Some(handle) = self.context.flush_batch(batch) {
                inflight.push(handle);
            }
        }
    }
}

/// A sequencer that commits batches one at a time, awaiting each commit
/// before starting the next.
///
/// A failed commit pauses the sequencer: every queued and subsequent publish
/// fails with [PublishError::OrderingKeyPaused] until the application calls
/// `resume_publish`.
struct OrderedSequencer {
    context: SequencerContext,
    pending_msgs: VecDeque<BundledMessage>,
    paused: bool,
}

impl OrderedSequencer {
    fn new(context: SequencerContext) -> Self {
        Self {
            context,
            pending_msgs: VecDeque::new(),
            paused: false,
        }
    }

    /// The main loop of the ordered sequencer.
    ///
    /// 1. A `Publish` command queues the message; the queue drains into the
    ///    open batch only while no batch is in flight.
    /// 2. An in-flight commit completing drains the queue into the next
    ///    batch, or pauses the sequencer if the commit failed.
    /// 3. The latency timer commits a partial batch once `max_latency`
    ///    passes, provided no batch is in flight.
    /// 4. `Flush` drains the queue with sequential commits.
    async fn run(mut self) {
        let mut inflight: JoinSet<Result<(), PublishError>> = JoinSet::new();
        let mut batch = Batch::new(self.context.settings.clone());
        loop {
            if self.paused {
                // When paused there is nothing in flight: the pause happened
                // when the last in-flight commit failed.
                match self.context.rx.recv().await {
                    Some(ToSequencer::Publish(msg)) => {
                        let _ = msg.tx.send(Err(PublishError::OrderingKeyPaused));
                    }
                    Some(ToSequencer::Flush(tx)) => {
                        // Pausing already drained the queue and the open
                        // batch.
                        let _ = tx.send(());
                    }
                    Some(ToSequencer::ResumePublish) => {
                        tracing::debug!(topic = %self.context.topic, "ordering key resumed");
                        self.paused = false;
                    }
                    None => break,
                }
                continue;
            }
            let latency_deadline = batch.deadline().unwrap_or_else(Instant::now);
            tokio::select! {
                join = inflight.join_next(), if !inflight.is_empty() => {
                    self.handle_inflight_join(join);
                    self.move_to_batch_and_flush(&mut inflight, &mut batch);
                }
                _ = tokio::time::sleep_until(latency_deadline),
                    if batch.deadline().is_some() && inflight.is_empty() =>
                {
                    if let Some(handle) = self.context.flush_batch(&mut batch) {
                        inflight.spawn(async move {
                            handle.await.unwrap_or(Err(PublishError::Cancelled))
                        });
                    }
                }
                cmd = self.context.rx.recv() => {
                    match cmd {
                        Some(ToSequencer::Publish(msg)) => {
                            self.pending_msgs.push_back(msg);
                            if inflight.is_empty() {
                                self.move_to_batch_and_flush(&mut inflight, &mut batch);
                            }
                        }
                        Some(ToSequencer::Flush(tx)) => {
                            self.flush(&mut inflight, &mut batch).await;
                            inflight = JoinSet::new();
                            let _ = tx.send(());
                        }
                        Some(ToSequencer::ResumePublish) => {
                            // Nothing to resume as we are not paused.
                        }
                        None => {
                            self.flush(&mut inflight, &mut batch).await;
                            break;
                        }
                    }
                }
            }
        }
    }

    // Drain the queue with sequential commits until everything published so
    // far has resolved.
    async fn flush(
        &mut self,
        inflight: &mut JoinSet<Result<(), PublishError>>,
        batch: &mut Batch,
    ) {
        let join = inflight.join_next().await;
        self.handle_inflight_join(join);
        while !self.pending_msgs.is_empty() {
            self.move_to_batch_and_flush(inflight, batch);
            let join = inflight.join_next().await;
            self.handle_inflight_join(join);
        }
        // Commit the open batch even if it is below every threshold.
        if let Some(handle) = self.context.flush_batch(batch) {
            inflight
                .spawn(async move { handle.await.unwrap_or(Err(PublishError::Cancelled)) });
        }
        let join = inflight.join_next().await;
        self.handle_inflight_join(join);
    }

    // Move queued messages into the open batch respecting batch thresholds
    // and commit the batch if it is full.
    fn move_to_batch_and_flush(
        &mut self,
        inflight: &mut JoinSet<Result<(), PublishError>>,
        batch: &mut Batch,
    ) {
        let mut should_flush = false;
        while let Some(next) = self.pending_msgs.front() {
            if !batch.can_add(next) {
                should_flush = true;
                break;
            }
            let publish = self
                .pending_msgs
                .pop_front()
                .expect("front returned an element");
            batch.push(publish);
            if batch.at_threshold() {
                should_flush = true;
                break;
            }
        }

        if should_flush {
            if let Some(handle) = self.context.flush_batch(batch) {
                inflight
                    .spawn(async move { handle.await.unwrap_or(Err(PublishError::Cancelled)) });
            }
        }
    }

    // Pause publish operations and fail everything queued behind the error.
    fn pause(&mut self) {
        self.paused = true;
        tracing::warn!(topic = %self.context.topic, "pausing ordering key after failed commit");
        while let Some(publish) = self.pending_msgs.pop_front() {
            // The user may have dropped the handle, so it is ok if this
            // fails.
            let _ = publish.tx.send(Err(PublishError::OrderingKeyPaused));
        }
    }

    fn handle_inflight_join(
        &mut self,
        join: Option<Result<Result<(), PublishError>, JoinError>>,
    ) {
        // On a failed or aborted commit:
        // 1. Pause publishing and fail the queued messages.
        // 2. The batch itself already failed its own messages.
        // 3. Messages still in the channel fail as they are received.
        if let Some(Err(_) | Ok(Err(_))) = join {
            self.pause();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_control::LimitExceededBehavior;
    use crate::model::Message;
    use crate::retry::tests::permanent_error;
    use crate::transport::tests::MockTransport;
    use rand::Rng as _;
    use std::time::Duration;
    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

    static TOPIC: &str = "projects/p/topics/t";
    const EXPECTED_BATCHES: usize = 5;
    const TIME_PER_BATCH: Duration = Duration::from_secs(10);

    fn test_flow() -> Arc<FlowController> {
        Arc::new(FlowController::new(
            100_000,
            1024 * 1024 * 1024,
            LimitExceededBehavior::Ignore,
        ))
    }

    fn start_router(
        transport: Arc<dyn Transport>,
        settings: BatchSettings,
    ) -> UnboundedSender<ToRouter> {
        let (tx, rx) = unbounded_channel();
        tokio::spawn(
            Router::new(
                TOPIC.to_string(),
                transport,
                test_flow(),
                settings.clamped(),
                CallOptions::default(),
                rx,
            )
            .run(),
        );
        tx
    }

    /// A transport that takes a fixed time per publish and reports the
    /// messages it saw, in order.
    #[derive(Debug)]
    struct SlowTransport {
        delay: Duration,
        published: UnboundedSender<Message>,
    }

    #[async_trait::async_trait]
    impl Transport for SlowTransport {
        async fn publish(
            &self,
            _topic: String,
            messages: Vec<Message>,
            _options: CallOptions,
        ) -> crate::Result<Vec<String>> {
            tokio::time::sleep(self.delay).await;
            let ids = messages
                .iter()
                .map(|m| String::from_utf8(m.data.to_vec()).unwrap())
                .collect();
            for m in messages {
                self.published
                    .send(m)
                    .expect("the test holds the receiver open");
            }
            Ok(ids)
        }

        async fn streaming_pull(
            &self,
            _requests: mpsc::Receiver<crate::model::StreamRequest>,
            _options: CallOptions,
        ) -> crate::Result<crate::transport::MessageStream> {
            unreachable!("publisher tests never open streams")
        }

        async fn acknowledge(
            &self,
            _subscription: String,
            _ack_ids: Vec<String>,
            _options: CallOptions,
        ) -> crate::Result<crate::model::AckResponse> {
            unreachable!("publisher tests never acknowledge")
        }

        async fn modify_ack_deadline(
            &self,
            _subscription: String,
            _ack_ids: Vec<String>,
            _ack_deadline_seconds: i32,
            _options: CallOptions,
        ) -> crate::Result<crate::model::AckResponse> {
            unreachable!("publisher tests never modify deadlines")
        }
    }

    fn generate_random_data() -> String {
        rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(16)
            .map(char::from)
            .collect()
    }

    fn publish(
        router: &UnboundedSender<ToRouter>,
        key: &str,
    ) -> (String, oneshot::Receiver<Result<String, PublishError>>) {
        let (tx, rx) = oneshot::channel();
        let data = generate_random_data();
        router
            .send(ToRouter::Publish(BundledMessage {
                msg: Message::new().set_data(data.clone()).set_ordering_key(key),
                tx,
            }))
            .expect("the router is running");
        (data, rx)
    }

    async fn flush(router: &UnboundedSender<ToRouter>) {
        let (tx, rx) = oneshot::channel();
        router
            .send(ToRouter::Flush(tx))
            .expect("the router is running");
        rx.await.expect("the router resolves flushes");
    }

    #[tokio::test(start_paused = true)]
    async fn unordered_batches_commit_concurrently() -> anyhow::Result<()> {
        let (published_tx, _published_rx) = unbounded_channel();
        let transport = Arc::new(SlowTransport {
            delay: TIME_PER_BATCH,
            published: published_tx,
        });
        let router = start_router(
            transport,
            BatchSettings::new()
                .set_max_messages(2_u32)
                .set_max_latency(Duration::from_secs(3600)),
        );

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..(2 * EXPECTED_BATCHES) {
            handles.push(publish(&router, ""));
        }
        for (data, rx) in handles {
            assert_eq!(rx.await??, data);
        }
        assert_eq!(
            start.elapsed(),
            TIME_PER_BATCH,
            "all batches should have committed concurrently"
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_batches_commit_sequentially() -> anyhow::Result<()> {
        let (published_tx, mut published_rx) = unbounded_channel();
        let transport = Arc::new(SlowTransport {
            delay: TIME_PER_BATCH,
            published: published_tx,
        });
        let router = start_router(
            transport,
            BatchSettings::new()
                .set_max_messages(2_u32)
                .set_max_latency(Duration::from_secs(3600)),
        );

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..(2 * EXPECTED_BATCHES) {
            handles.push(publish(&router, "k"));
        }
        for (data, rx) in handles {
            assert_eq!(rx.await??, data);
            // The transport observes messages in enqueue order.
            let sent = published_rx.try_recv()?;
            assert_eq!(sent.data, bytes::Bytes::from(data), "published out of order");
        }
        assert_eq!(
            start.elapsed(),
            TIME_PER_BATCH * EXPECTED_BATCHES as u32,
            "ordered batches commit one at a time"
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn flush_commits_partial_batches() -> anyhow::Result<()> {
        let (published_tx, _published_rx) = unbounded_channel();
        let transport = Arc::new(SlowTransport {
            delay: TIME_PER_BATCH,
            published: published_tx,
        });
        let router = start_router(
            transport,
            BatchSettings::new()
                .set_max_messages(100_u32)
                .set_max_latency(Duration::from_secs(3600)),
        );

        // Flush with nothing outstanding.
        flush(&router).await;

        let unordered = publish(&router, "");
        let ordered = publish(&router, "k");
        flush(&router).await;

        let (data, rx) = unordered;
        assert_eq!(rx.await??, data);
        let (data, rx) = ordered;
        assert_eq!(rx.await??, data);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn latency_timer_commits_partial_batches() -> anyhow::Result<()> {
        const MAX_LATENCY: Duration = Duration::from_millis(10);

        let (published_tx, _published_rx) = unbounded_channel();
        let transport = Arc::new(SlowTransport {
            delay: Duration::from_millis(1),
            published: published_tx,
        });
        let router = start_router(
            transport,
            BatchSettings::new()
                .set_max_messages(100_u32)
                .set_max_latency(MAX_LATENCY),
        );

        let start = Instant::now();
        let (data, rx) = publish(&router, "");
        assert_eq!(rx.await??, data);
        assert!(
            start.elapsed() >= MAX_LATENCY,
            "the batch should wait out the latency threshold, elapsed={:?}",
            start.elapsed()
        );

        let start = Instant::now();
        let (data, rx) = publish(&router, "k");
        assert_eq!(rx.await??, data);
        assert!(
            start.elapsed() >= MAX_LATENCY,
            "ordered batches also wait out the latency threshold, elapsed={:?}",
            start.elapsed()
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn batch_full_commits_without_timer() -> anyhow::Result<()> {
        let mut mock = MockTransport::new();
        mock.expect_publish()
            .withf(|topic, messages, _o| topic == TOPIC && messages.len() == 10)
            .returning(|_t, messages, _o| {
                Ok(messages
                    .iter()
                    .map(|m| String::from_utf8(m.data.to_vec()).unwrap())
                    .collect())
            });
        let router = start_router(
            Arc::new(mock),
            BatchSettings::new()
                .set_max_messages(10_u32)
                .set_max_latency(Duration::from_secs(3600)),
        );

        let mut handles = Vec::new();
        for _ in 0..10 {
            handles.push(publish(&router, ""));
        }
        for (data, rx) in handles {
            assert_eq!(rx.await??, data);
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_failure_pauses_until_resume() -> anyhow::Result<()> {
        let mut seq = mockall::Sequence::new();
        let mut mock = MockTransport::new();
        mock.expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_t, messages, _o| {
                Ok(messages
                    .iter()
                    .map(|m| String::from_utf8(m.data.to_vec()).unwrap())
                    .collect())
            });
        mock.expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_t, _m, _o| Err(permanent_error()));
        mock.expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_t, messages, _o| {
                Ok(messages
                    .iter()
                    .map(|m| String::from_utf8(m.data.to_vec()).unwrap())
                    .collect())
            });

        let router = start_router(
            Arc::new(mock),
            BatchSettings::new()
                .set_max_messages(1_u32)
                .set_max_latency(Duration::from_secs(3600)),
        );

        // Resume on a key that is not paused is a no-op.
        router
            .send(ToRouter::ResumePublish("k".to_string()))
            .expect("the router is running");

        // The first publish succeeds.
        let (data, rx) = publish(&router, "k");
        assert_eq!(rx.await??, data);

        // The second publish fails and pauses the key.
        let (_, rx) = publish(&router, "k");
        let err = rx.await?.expect_err("the commit failed");
        assert!(matches!(err, PublishError::Send(_)), "{err:?}");

        // Publishes while paused fail fast.
        for _ in 0..5 {
            let (_, rx) = publish(&router, "k");
            let err = rx.await?.expect_err("the key is paused");
            assert!(matches!(err, PublishError::OrderingKeyPaused), "{err:?}");
        }

        // After resuming, publishes succeed again.
        router
            .send(ToRouter::ResumePublish("k".to_string()))
            .expect("the router is running");
        let (data, rx) = publish(&router, "k");
        assert_eq!(rx.await??, data);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_remaining_messages() -> anyhow::Result<()> {
        let (published_tx, _published_rx) = unbounded_channel();
        let transport = Arc::new(SlowTransport {
            delay: Duration::from_millis(1),
            published: published_tx,
        });
        let router = start_router(
            transport,
            BatchSettings::new()
                .set_max_messages(100_u32)
                .set_max_latency(Duration::from_secs(3600)),
        );

        let unordered = publish(&router, "");
        let ordered = publish(&router, "k");

        // Dropping the router sender shuts everything down, flushing first.
        drop(router);

        let (data, rx) = unordered;
        assert_eq!(rx.await??, data);
        let (data, rx) = ordered;
        assert_eq!(rx.await??, data);
        Ok(())
    }
}
