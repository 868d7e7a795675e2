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

//! The transport contract consumed by the client core.
//!
//! The core does not encode requests on the wire. Applications (or the
//! surrounding client library) provide a [Transport] implementation backed
//! by their RPC stack, and the publisher and subscriber pipelines drive it.

use crate::Result;
use crate::model::{AckResponse, Message, StreamRequest, StreamResponse};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

/// The environment variable naming an emulator endpoint, as `host:port`.
pub const EMULATOR_HOST_VAR: &str = "PUBSUB_EMULATOR_HOST";

/// Returns the insecure endpoint to target when the environment requests an
/// emulator.
pub fn emulator_endpoint() -> Option<String> {
    emulator_endpoint_from(std::env::var(EMULATOR_HOST_VAR).ok().as_deref())
}

fn emulator_endpoint_from(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.is_empty())
        .map(|host_port| format!("http://{host_port}"))
}

/// Per-call options accepted by the transport.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct CallOptions {
    /// The deadline for this attempt. `None` uses the transport's default.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt deadline.
    pub fn set_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.timeout = Some(v.into());
        self
    }
}

/// The server half of an open streaming pull.
#[async_trait::async_trait]
pub trait ResponseStream: std::fmt::Debug + Send {
    /// The next frame pushed by the server.
    ///
    /// `None` marks a clean end of stream. Errors are classified by the
    /// stream retry policy: transient errors reopen the stream, the rest
    /// terminate the session.
    async fn next_message(&mut self) -> Result<Option<StreamResponse>>;
}

/// A streaming pull, as returned by the transport.
pub type MessageStream = Box<dyn ResponseStream>;

/// The calls the client core issues against the service.
///
/// `MessageId`s are server-assigned opaque strings. The per-id statuses in
/// [AckResponse] distinguish success, transient failure, and permanent
/// failure.
#[async_trait::async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync + 'static {
    /// Publish a batch of messages to one topic, returning one message id
    /// per message, in order.
    async fn publish(
        &self,
        topic: String,
        messages: Vec<Message>,
        options: CallOptions,
    ) -> Result<Vec<String>>;

    /// Open a bidirectional stream. The first value on `requests` is the
    /// initial request; later values are keep-alive frames.
    async fn streaming_pull(
        &self,
        requests: Receiver<StreamRequest>,
        options: CallOptions,
    ) -> Result<MessageStream>;

    /// Acknowledge a batch of deliveries.
    async fn acknowledge(
        &self,
        subscription: String,
        ack_ids: Vec<String>,
        options: CallOptions,
    ) -> Result<AckResponse>;

    /// Change the ack deadline for a batch of deliveries. Zero seconds
    /// requests immediate redelivery (a nack).
    async fn modify_ack_deadline(
        &self,
        subscription: String,
        ack_ids: Vec<String>,
        ack_deadline_seconds: i32,
        options: CallOptions,
    ) -> Result<AckResponse>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Allow tests to stand in a channel for the server half of a stream.
    #[async_trait::async_trait]
    impl ResponseStream for Receiver<Result<StreamResponse>> {
        async fn next_message(&mut self) -> Result<Option<StreamResponse>> {
            self.recv().await.transpose()
        }
    }

    mockall::mock! {
        #[derive(Debug)]
        pub(crate) Transport {}
        #[async_trait::async_trait]
        impl Transport for Transport {
            async fn publish(
                &self,
                topic: String,
                messages: Vec<Message>,
                options: CallOptions,
            ) -> Result<Vec<String>>;
            async fn streaming_pull(
                &self,
                requests: Receiver<StreamRequest>,
                options: CallOptions,
            ) -> Result<MessageStream>;
            async fn acknowledge(
                &self,
                subscription: String,
                ack_ids: Vec<String>,
                options: CallOptions,
            ) -> Result<AckResponse>;
            async fn modify_ack_deadline(
                &self,
                subscription: String,
                ack_ids: Vec<String>,
                ack_deadline_seconds: i32,
                options: CallOptions,
            ) -> Result<AckResponse>;
        }
    }

    #[test]
    fn emulator_endpoint_parsing() {
        assert_eq!(super::emulator_endpoint_from(None), None);
        assert_eq!(super::emulator_endpoint_from(Some("")), None);
        assert_eq!(
            super::emulator_endpoint_from(Some("localhost:8085")),
            Some("http://localhost:8085".to_string())
        );
    }

    #[tokio::test]
    async fn channel_backed_stream() -> anyhow::Result<()> {
        let (response_tx, response_rx) = tokio::sync::mpsc::channel(4);
        response_tx.send(Ok(StreamResponse::default())).await?;
        drop(response_tx);

        let mut stream: MessageStream = Box::new(response_rx);
        assert_eq!(
            stream.next_message().await?,
            Some(StreamResponse::default())
        );
        assert_eq!(stream.next_message().await?, None);
        Ok(())
    }
}
