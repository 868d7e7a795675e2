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

use crate::publisher::publisher::PublisherBuilder;
use crate::transport::Transport;
use std::sync::Arc;

/// Creates [`Publisher`](crate::publisher::Publisher) instances.
///
/// A single `PublisherClient` can create publishers for many topics over one
/// transport.
///
/// # Example
/// ```no_run
/// # use pubsub_core::publisher::PublisherClient;
/// # use pubsub_core::model::Message;
/// # async fn sample(transport: std::sync::Arc<dyn pubsub_core::transport::Transport>) -> anyhow::Result<()> {
/// let client = PublisherClient::new(transport);
/// let publisher = client.publisher("projects/my-project/topics/my-topic").build();
/// let handle = publisher.publish(Message::new().set_data("hello world")).await;
/// let message_id = handle.await?;
/// println!("Message sent with ID: {message_id}");
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct PublisherClient {
    transport: Arc<dyn Transport>,
}

impl PublisherClient {
    /// Creates a client over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Creates a builder for a new [`Publisher`](crate::publisher::Publisher)
    /// for the given topic.
    pub fn publisher<T: Into<String>>(&self, topic: T) -> PublisherBuilder {
        PublisherBuilder::new(self.transport.clone(), topic.into())
    }
}
