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

//! Client-side core for a high-throughput publish/subscribe service.
//!
//! This crate implements the two pipelines that carry a pub/sub client's
//! engineering weight:
//!
//! - The [publisher] batching pipeline coalesces many small publishes into
//!   bounded server calls while preserving per-ordering-key order.
//! - The [subscriber] streaming-pull pipeline maintains a long-lived
//!   bidirectional stream, manages per-message lease extensions driven by
//!   an ack-latency histogram, enforces flow control, and retries
//!   fine-grained acknowledgement operations under exactly-once delivery.
//!
//! The crate does not talk to the network itself: callers supply an
//! implementation of [transport::Transport] backed by their RPC stack, and
//! the pipelines drive it. Wire encoding, authentication, and endpoint
//! selection live behind that trait.
//!
//! Workers log through [tracing]; publish commits and lease maintenance
//! run inside `tracing` spans so an application-installed subscriber can
//! export them. No exporter is installed here.

pub(crate) mod flow_control;

pub mod error;
pub mod model;
pub mod publisher;
pub mod retry;
pub mod subscriber;
pub mod transport;

pub use error::{AckError, Error, PublishError, Result};

mod info {
    const NAME: &str = env!("CARGO_PKG_NAME");
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    lazy_static::lazy_static! {
        pub(crate) static ref CLIENT_INFO: String = format!("{NAME}/{VERSION}");
    }
}

/// The default client identification string, e.g. for transports that
/// attach client metadata to every request.
///
/// Initialized once; read-only afterwards.
pub fn client_info() -> &'static str {
    info::CLIENT_INFO.as_str()
}
