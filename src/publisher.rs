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

//! The publisher batching pipeline.
//!
//! Messages published to a topic are coalesced into batches by a per-topic
//! (and, with ordering keys, per-key) sequencer, committed with bounded
//! publish RPCs, and bounded in memory by a flow controller.

mod batch;
mod client;
mod options;
pub(crate) mod publisher;
mod sequencer;

pub use client::PublisherClient;
pub use options::{BatchSettings, LimitExceededBehavior, PublishFlowControl};
pub use publisher::{PublishHandle, Publisher, PublisherBuilder};
