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

//! The subscriber streaming-pull pipeline.
//!
//! A subscribe session maintains a long-lived bidirectional stream,
//! extends message leases based on observed ack latencies, enforces
//! client-side flow control, dispatches application callbacks with bounded
//! concurrency and per-ordering-key FIFO, and batches acknowledgement
//! traffic with exactly-once retry support.

mod client;
mod dispatcher;
/// Handlers for processing, acknowledging, and rejecting messages.
pub mod handler;
mod histogram;
mod keepalive;
mod lease_loop;
mod lease_state;
mod options;
mod retry_policy;
mod scheduler;
/// The subscribe session returned by
/// [SubscribeBuilder::start][crate::subscriber::SubscribeBuilder::start].
pub mod session;
mod stream;

pub use client::{SubscribeBuilder, SubscriberClient};
pub use handler::{AckFuture, AckHandle, MessageHandler};
pub use options::FlowControl;
pub use session::Session;
