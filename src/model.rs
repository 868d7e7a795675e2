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

//! The message model shared by the publisher and subscriber pipelines.
//!
//! These are plain data types. Encoding them on the wire is the transport's
//! job, see [Transport][crate::transport::Transport].

use std::collections::HashMap;
use std::time::SystemTime;

/// A message to publish, or the payload of a delivered message.
///
/// # Example
/// ```
/// # use pubsub_core::model::Message;
/// let message = Message::new()
///     .set_data("hello world")
///     .set_ordering_key("user-1234");
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Message {
    /// The message payload.
    pub data: bytes::Bytes,

    /// Application-defined attributes.
    pub attributes: HashMap<String, String>,

    /// Messages with the same non-empty ordering key are delivered in
    /// publish order.
    pub ordering_key: String,

    /// The server-assigned id. Empty until the message is published.
    pub message_id: String,

    /// The time the service accepted the message. Set by the server.
    pub publish_time: Option<SystemTime>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message payload.
    pub fn set_data<V>(mut self, v: V) -> Self
    where
        V: Into<bytes::Bytes>,
    {
        self.data = v.into();
        self
    }

    /// Set the message attributes.
    pub fn set_attributes<I, K, V>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes = v.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Set the ordering key.
    pub fn set_ordering_key<V: Into<String>>(mut self, v: V) -> Self {
        self.ordering_key = v.into();
        self
    }

    /// Set the server-assigned message id. Only transports decoding
    /// delivered messages populate this.
    pub fn set_message_id<V: Into<String>>(mut self, v: V) -> Self {
        self.message_id = v.into();
        self
    }

    /// Set the publish time. Only transports decoding delivered messages
    /// populate this.
    pub fn set_publish_time<V: Into<SystemTime>>(mut self, v: V) -> Self {
        self.publish_time = Some(v.into());
        self
    }

    /// The bytes this message counts against batch and flow-control budgets.
    pub(crate) fn size(&self) -> usize {
        self.data.len()
            + self.ordering_key.len()
            + self
                .attributes
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// A message delivered to a [MessageHandler][crate::subscriber::MessageHandler].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SubscribeMessage {
    /// The message payload and attributes.
    pub message: Message,

    /// The opaque token identifying this delivery.
    pub ack_id: String,

    /// The number of times the service has attempted to deliver this
    /// message, starting at 1. Zero when the subscription does not track
    /// delivery attempts.
    pub delivery_attempt: i32,

    /// The wall-clock time after which the client stops extending this
    /// message's lease.
    pub lease_deadline: Option<SystemTime>,
}

/// The first request on a streaming pull. Subsequent empty requests act as
/// keep-alive frames.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct StreamRequest {
    /// The subscription to pull from. Only set on the initial request.
    pub subscription: String,

    /// How long the server waits for an ack before redelivering, until the
    /// client modifies the deadline per message.
    pub stream_ack_deadline_seconds: i32,

    /// A unique id for this client, so the server can allocate ordered
    /// deliveries across stream reconnects.
    pub client_id: String,

    /// Server-side flow control: maximum outstanding messages.
    pub max_outstanding_messages: i64,

    /// Server-side flow control: maximum outstanding bytes.
    pub max_outstanding_bytes: i64,
}

/// One frame pushed by the server on a streaming pull.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct StreamResponse {
    /// The delivered messages.
    pub received_messages: Vec<ReceivedMessage>,

    /// When present, the server's current value for the subscription's
    /// exactly-once delivery mode.
    pub exactly_once_delivery_enabled: Option<bool>,
}

impl StreamResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delivered messages.
    pub fn set_received_messages<I>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = ReceivedMessage>,
    {
        self.received_messages = v.into_iter().collect();
        self
    }

    /// Set the exactly-once delivery hint.
    pub fn set_exactly_once_delivery_enabled(mut self, v: bool) -> Self {
        self.exactly_once_delivery_enabled = Some(v);
        self
    }
}

/// One delivery inside a [StreamResponse].
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct ReceivedMessage {
    /// The opaque token used to ack or nack this delivery.
    pub ack_id: String,

    /// The message. Absent only if the frame was corrupted in transit.
    pub message: Option<Message>,

    /// Delivery attempt counter, when the subscription tracks it.
    pub delivery_attempt: i32,
}

impl ReceivedMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ack id.
    pub fn set_ack_id<V: Into<String>>(mut self, v: V) -> Self {
        self.ack_id = v.into();
        self
    }

    /// Set the message.
    pub fn set_message(mut self, v: Message) -> Self {
        self.message = Some(v);
        self
    }

    /// Set the delivery attempt counter.
    pub fn set_delivery_attempt<V: Into<i32>>(mut self, v: V) -> Self {
        self.delivery_attempt = v.into();
        self
    }
}

/// The per-acknowledgement-id outcome of an `acknowledge` or
/// `modify_ack_deadline` call.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum AckIdStatus {
    /// The service persisted the request for this id.
    Success,
    /// The service failed temporarily; the request may be retried.
    TransientFailure,
    /// The id is malformed or refers to an expired delivery.
    InvalidAckId,
    /// The caller may not acknowledge this message.
    PermissionDenied,
    /// A server-side precondition failed for this id.
    FailedPrecondition,
    /// An unrecognized failure.
    Other(String),
}

impl AckIdStatus {
    /// Transient failures are the only statuses worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, AckIdStatus::TransientFailure)
    }
}

/// The response to an `acknowledge` or `modify_ack_deadline` call.
///
/// Ids missing from `statuses` succeeded. Transports for subscriptions
/// without exactly-once delivery typically return an empty response.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct AckResponse {
    pub statuses: HashMap<String, AckIdStatus>,
}

impl AckResponse {
    /// A response where every id succeeded.
    pub fn success() -> Self {
        Self::default()
    }

    /// Set the per-id statuses.
    pub fn set_statuses<I, K>(mut self, v: I) -> Self
    where
        I: IntoIterator<Item = (K, AckIdStatus)>,
        K: Into<String>,
    {
        self.statuses = v.into_iter().map(|(k, s)| (k.into(), s)).collect();
        self
    }

    /// The recorded status for `ack_id`; missing ids succeeded.
    pub fn status(&self, ack_id: &str) -> AckIdStatus {
        self.statuses
            .get(ack_id)
            .cloned()
            .unwrap_or(AckIdStatus::Success)
    }
}
