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

//! Options for configuring subscriber flow control and lease management.

use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// Options for bounding the messages a subscriber holds and for shaping
/// lease extensions.
///
/// # Example
/// ```
/// # use pubsub_core::subscriber::FlowControl;
/// # use std::time::Duration;
/// let settings = FlowControl::new()
///     .set_max_messages(2_000_usize)
///     .set_max_lease_duration(Duration::from_secs(1800));
/// ```
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct FlowControl {
    /// Stop pulling from the stream while this many messages are held.
    pub max_messages: usize,

    /// Stop pulling from the stream while this many bytes are held.
    pub max_bytes: usize,

    /// Stop extending a message's lease this long after it was received.
    /// The message is dropped and the server redelivers it.
    pub max_lease_duration: Duration,

    /// Never extend a lease by less than this. Zero leaves the lower bound
    /// at the ack-deadline minimum.
    pub min_duration_per_lease_extension: Duration,

    /// Never extend a lease by more than this. Zero leaves the upper bound
    /// at the ack-deadline maximum.
    pub max_duration_per_lease_extension: Duration,

    /// The smallest ack deadline the histogram may choose.
    pub min_ack_deadline: Duration,

    /// The largest ack deadline the histogram may choose.
    pub max_ack_deadline: Duration,
}

impl FlowControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the [FlowControl::max_messages] field.
    pub fn set_max_messages<V: Into<usize>>(mut self, v: V) -> Self {
        self.max_messages = v.into();
        self
    }

    /// Set the [FlowControl::max_bytes] field.
    pub fn set_max_bytes<V: Into<usize>>(mut self, v: V) -> Self {
        self.max_bytes = v.into();
        self
    }

    /// Set the [FlowControl::max_lease_duration] field.
    pub fn set_max_lease_duration<V: Into<Duration>>(mut self, v: V) -> Self {
        self.max_lease_duration = v.into();
        self
    }

    /// Set the [FlowControl::min_duration_per_lease_extension] field.
    pub fn set_min_duration_per_lease_extension<V: Into<Duration>>(mut self, v: V) -> Self {
        self.min_duration_per_lease_extension = v.into();
        self
    }

    /// Set the [FlowControl::max_duration_per_lease_extension] field.
    pub fn set_max_duration_per_lease_extension<V: Into<Duration>>(mut self, v: V) -> Self {
        self.max_duration_per_lease_extension = v.into();
        self
    }

    /// Set the [FlowControl::min_ack_deadline] field.
    pub fn set_min_ack_deadline<V: Into<Duration>>(mut self, v: V) -> Self {
        self.min_ack_deadline = v.into();
        self
    }

    /// Set the [FlowControl::max_ack_deadline] field.
    pub fn set_max_ack_deadline<V: Into<Duration>>(mut self, v: V) -> Self {
        self.max_ack_deadline = v.into();
        self
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            max_messages: 1000,
            max_bytes: 100 * MIB,
            max_lease_duration: Duration::from_secs(3600),
            min_duration_per_lease_extension: Duration::ZERO,
            max_duration_per_lease_extension: Duration::ZERO,
            min_ack_deadline: super::histogram::MIN_ACK_DEADLINE,
            max_ack_deadline: super::histogram::MAX_ACK_DEADLINE,
        }
    }
}
