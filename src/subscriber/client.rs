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

use super::handler::MessageHandler;
use super::options::FlowControl;
use super::session::Session;
use crate::Result;
use crate::transport::{CallOptions, Transport};
use std::sync::Arc;
use std::time::Duration;

/// Creates subscribe [Session]s.
///
/// A single `SubscriberClient` can serve many subscriptions over one
/// transport.
#[derive(Clone, Debug)]
pub struct SubscriberClient {
    transport: Arc<dyn Transport>,
}

impl SubscriberClient {
    /// Creates a client over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Creates a builder for a streaming pull on `subscription`.
    pub fn subscription<T: Into<String>>(&self, subscription: T) -> SubscribeBuilder {
        SubscribeBuilder::new(self.transport.clone(), subscription.into())
    }
}

/// Configures and starts a subscribe [Session].
pub struct SubscribeBuilder {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) subscription: String,
    pub(super) flow_control: FlowControl,
    pub(super) stream_ack_deadline: Duration,
    pub(super) exactly_once_delivery: bool,
    pub(super) concurrency: usize,
    pub(super) heartbeat_period: Duration,
    pub(super) call_options: CallOptions,
}

impl SubscribeBuilder {
    pub(super) fn new(transport: Arc<dyn Transport>, subscription: String) -> Self {
        Self {
            transport,
            subscription,
            flow_control: FlowControl::default(),
            stream_ack_deadline: Duration::from_secs(10),
            exactly_once_delivery: false,
            concurrency: 10,
            heartbeat_period: super::keepalive::KEEPALIVE_PERIOD,
            call_options: CallOptions::default(),
        }
    }

    /// Bound the messages and bytes this session holds, and shape its lease
    /// extensions.
    pub fn set_flow_control(mut self, v: FlowControl) -> Self {
        self.flow_control = v;
        self
    }

    /// Set the ack deadline carried on the initial stream request.
    ///
    /// This is how long the server waits for an ack before redelivering,
    /// until the per-message lease extensions take over. The service
    /// accepts values between 10 seconds and 600 seconds.
    pub fn set_stream_ack_deadline<V: Into<Duration>>(mut self, v: V) -> Self {
        self.stream_ack_deadline = v.into();
        self
    }

    /// Start the session assuming the subscription has exactly-once
    /// delivery.
    ///
    /// The server's subscription properties, when present on the stream,
    /// override this value.
    pub fn set_exactly_once_delivery(mut self, v: bool) -> Self {
        self.exactly_once_delivery = v;
        self
    }

    /// Set how many application callbacks may run concurrently.
    pub fn set_concurrency<V: Into<usize>>(mut self, v: V) -> Self {
        self.concurrency = v.into();
        self
    }

    /// Set the keep-alive period for an idle stream.
    pub fn set_heartbeat_period<V: Into<Duration>>(mut self, v: V) -> Self {
        self.heartbeat_period = v.into();
        self
    }

    /// Set the per-attempt deadline for the session's RPCs.
    pub fn set_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.call_options = self.call_options.set_timeout(v);
        self
    }

    /// Open the stream and start delivering messages to `handler`.
    pub async fn start<H: MessageHandler>(self, handler: H) -> Result<Session> {
        Session::start(self, Arc::new(handler)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::MockTransport;

    #[test]
    fn reasonable_defaults() {
        let client = SubscriberClient::new(Arc::new(MockTransport::new()));
        let builder = client.subscription("projects/p/subscriptions/s");
        assert_eq!(builder.subscription, "projects/p/subscriptions/s");
        assert_eq!(builder.stream_ack_deadline, Duration::from_secs(10));
        assert!(!builder.exactly_once_delivery);
        assert!(builder.concurrency > 0);
        assert_eq!(builder.heartbeat_period, Duration::from_secs(30));
    }

    #[test]
    fn builder_options() {
        let client = SubscriberClient::new(Arc::new(MockTransport::new()));
        let builder = client
            .subscription("projects/p/subscriptions/s")
            .set_flow_control(FlowControl::new().set_max_messages(12_usize))
            .set_stream_ack_deadline(Duration::from_secs(20))
            .set_exactly_once_delivery(true)
            .set_concurrency(3_usize)
            .set_heartbeat_period(Duration::from_secs(15))
            .set_timeout(Duration::from_secs(5));
        assert_eq!(builder.flow_control.max_messages, 12);
        assert_eq!(builder.stream_ack_deadline, Duration::from_secs(20));
        assert!(builder.exactly_once_delivery);
        assert_eq!(builder.concurrency, 3);
        assert_eq!(builder.heartbeat_period, Duration::from_secs(15));
        assert_eq!(builder.call_options.timeout, Some(Duration::from_secs(5)));
    }
}
