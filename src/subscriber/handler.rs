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

//! Handlers for processing, acknowledging, and rejecting messages.
//!
//! To acknowledge (ack) a message, call [`AckHandle::ack()`].
//!
//! To reject (nack) a message, call [`AckHandle::nack()`] or
//! [`drop()`][Drop::drop] the handle. The message will be redelivered.

use crate::error::AckError;
use crate::model::SubscribeMessage;
use crate::subscriber::dispatcher::{AckOutcome, Request};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// The application callback invoked once per delivered message.
///
/// Implemented for async closures of the right shape, so most applications
/// can pass a closure:
///
/// ```no_run
/// # use pubsub_core::model::SubscribeMessage;
/// # use pubsub_core::subscriber::AckHandle;
/// let handler = |m: SubscribeMessage, ack: AckHandle| async move {
///     println!("received {:?}", m.message.data);
///     let _ = ack.ack();
/// };
/// # let _ = handler;
/// ```
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: SubscribeMessage, ack: AckHandle);
}

#[async_trait::async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(SubscribeMessage, AckHandle) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: SubscribeMessage, ack: AckHandle) {
        self(message, ack).await
    }
}

/// How an application settled a message with an ordering key. The scheduler
/// uses this to start (or pause) the key's next message.
#[derive(Debug, PartialEq)]
pub(crate) struct Disposition {
    pub(crate) ordering_key: String,
    pub(crate) nacked: bool,
}

/// A handle for acknowledging or rejecting one delivered message.
///
/// Dropping the handle without acking rejects the message, removing it from
/// lease management; the service will redeliver it, possibly to another
/// client.
#[derive(Debug)]
pub struct AckHandle {
    inner: Option<AckHandleInner>,
}

#[derive(Debug)]
struct AckHandleInner {
    ack_id: String,
    ordering_key: String,
    received_at: Instant,
    queue: UnboundedSender<Request>,
    dispositions: Option<UnboundedSender<Disposition>>,
}

impl AckHandleInner {
    fn settle(self, nacked: bool, done: oneshot::Sender<AckOutcome>) {
        let request = if nacked {
            Request::Nack {
                ack_id: self.ack_id,
                done: Some(done),
            }
        } else {
            Request::Ack {
                ack_id: self.ack_id,
                elapsed: Some(self.received_at.elapsed()),
                done: Some(done),
            }
        };
        // The subscriber may have shut down; the future then resolves as
        // cancelled when `done` drops with the request.
        let _ = self.queue.send(request);
        if let Some(dispositions) = self.dispositions {
            let _ = dispositions.send(Disposition {
                ordering_key: self.ordering_key,
                nacked,
            });
        }
    }
}

impl AckHandle {
    pub(crate) fn new(
        ack_id: String,
        ordering_key: String,
        queue: UnboundedSender<Request>,
        dispositions: Option<UnboundedSender<Disposition>>,
    ) -> Self {
        Self {
            inner: Some(AckHandleInner {
                ack_id,
                ordering_key,
                received_at: Instant::now(),
                queue,
                dispositions,
            }),
        }
    }

    /// The opaque token identifying this delivery.
    pub fn ack_id(&self) -> &str {
        self.inner
            .as_ref()
            .map(|i| i.ack_id.as_str())
            .unwrap_or_default()
    }

    /// Acknowledge the message associated with this handle.
    ///
    /// Without exactly-once delivery the acknowledgement is best effort and
    /// the returned future resolves successfully once the request is sent;
    /// the message may still be redelivered. With exactly-once delivery a
    /// successful resolution means the server persisted the
    /// acknowledgement.
    pub fn ack(mut self) -> AckFuture {
        let (done, rx) = oneshot::channel();
        if let Some(inner) = self.inner.take() {
            inner.settle(false, done);
        }
        AckFuture { rx }
    }

    /// Reject the message associated with this handle.
    ///
    /// The message is removed from lease management and the service
    /// redelivers it.
    pub fn nack(mut self) -> AckFuture {
        let (done, rx) = oneshot::channel();
        if let Some(inner) = self.inner.take() {
            inner.settle(true, done);
        }
        AckFuture { rx }
    }
}

impl Drop for AckHandle {
    /// Rejects the message associated with this handle.
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let (done, _rx) = oneshot::channel();
            inner.settle(true, done);
        }
    }
}

/// The pending result of an ack or nack.
///
/// Only exactly-once subscriptions report failures here; see
/// [AckError] for the per-id classifications.
#[derive(Debug)]
pub struct AckFuture {
    rx: oneshot::Receiver<AckOutcome>,
}

impl std::future::Future for AckFuture {
    type Output = Result<(), AckError>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|r| match r {
                Ok(outcome) => outcome,
                Err(_) => Err(AckError::Cancelled),
            })
    }
}
