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

//! Options for configuring publisher batching and flow control.

pub use crate::flow_control::LimitExceededBehavior;
use std::time::Duration;

// These limits match the service quotas on batch publishing. The client
// clamps user-provided settings so a batch never exceeds them.
pub(crate) const MAX_MESSAGES_PER_REQUEST: u32 = 1000;
pub(crate) const MAX_BYTES: usize = 10_000_000; // 10 MB
pub(crate) const MAX_LATENCY: Duration = Duration::from_secs(60 * 60 * 24);

/// Options for configuring publisher batching behavior.
///
/// To turn off batching, set `max_messages` to 1.
///
/// # Example
/// ```
/// # use pubsub_core::publisher::BatchSettings;
/// # use std::time::Duration;
/// let settings = BatchSettings::new()
///     .set_max_messages(500_u32)
///     .set_max_latency(Duration::from_millis(20));
/// ```
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct BatchSettings {
    /// Commit the open batch once it holds this many messages.
    pub max_messages: u32,

    /// Commit the open batch once it holds this many bytes.
    pub max_bytes: usize,

    /// Commit the open batch this long after its first message arrived.
    pub max_latency: Duration,

    /// Never put more than this many messages in a single publish RPC.
    pub max_messages_per_request: u32,
}

impl BatchSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the [BatchSettings::max_messages] field.
    pub fn set_max_messages<V: Into<u32>>(mut self, v: V) -> Self {
        self.max_messages = v.into();
        self
    }

    /// Set the [BatchSettings::max_bytes] field.
    pub fn set_max_bytes<V: Into<usize>>(mut self, v: V) -> Self {
        self.max_bytes = v.into();
        self
    }

    /// Set the [BatchSettings::max_latency] field.
    pub fn set_max_latency<V: Into<Duration>>(mut self, v: V) -> Self {
        self.max_latency = v.into();
        self
    }

    /// Set the [BatchSettings::max_messages_per_request] field.
    pub fn set_max_messages_per_request<V: Into<u32>>(mut self, v: V) -> Self {
        self.max_messages_per_request = v.into();
        self
    }

    /// Clamp user-provided settings to the service limits.
    pub(crate) fn clamped(&self) -> Self {
        Self {
            max_messages: self.max_messages.clamp(1, MAX_MESSAGES_PER_REQUEST),
            max_bytes: self.max_bytes.clamp(1, MAX_BYTES),
            max_latency: self.max_latency.min(MAX_LATENCY),
            max_messages_per_request: self
                .max_messages_per_request
                .clamp(1, MAX_MESSAGES_PER_REQUEST),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_messages: 100,
            max_bytes: 1024 * 1024,
            max_latency: Duration::from_millis(10),
            max_messages_per_request: MAX_MESSAGES_PER_REQUEST,
        }
    }
}

/// Options for bounding the messages a publisher may hold in memory.
///
/// # Example
/// ```
/// # use pubsub_core::publisher::{LimitExceededBehavior, PublishFlowControl};
/// let settings = PublishFlowControl::new()
///     .set_message_limit(100_usize)
///     .set_limit_exceeded_behavior(LimitExceededBehavior::Block);
/// ```
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct PublishFlowControl {
    /// The maximum number of unpublished messages held at once.
    pub message_limit: usize,

    /// The maximum number of unpublished bytes held at once.
    pub byte_limit: usize,

    /// What happens to a publish that would exceed a limit.
    pub limit_exceeded_behavior: LimitExceededBehavior,
}

impl PublishFlowControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the [PublishFlowControl::message_limit] field.
    pub fn set_message_limit<V: Into<usize>>(mut self, v: V) -> Self {
        self.message_limit = v.into();
        self
    }

    /// Set the [PublishFlowControl::byte_limit] field.
    pub fn set_byte_limit<V: Into<usize>>(mut self, v: V) -> Self {
        self.byte_limit = v.into();
        self
    }

    /// Set the [PublishFlowControl::limit_exceeded_behavior] field.
    pub fn set_limit_exceeded_behavior(mut self, v: LimitExceededBehavior) -> Self {
        self.limit_exceeded_behavior = v;
        self
    }
}

impl Default for PublishFlowControl {
    fn default() -> Self {
        Self {
            message_limit: 1000,
            byte_limit: 100 * 1024 * 1024,
            limit_exceeded_behavior: LimitExceededBehavior::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_settings_builders() {
        let settings = BatchSettings::new()
            .set_max_messages(123_u32)
            .set_max_bytes(1_234_usize)
            .set_max_latency(Duration::from_millis(12))
            .set_max_messages_per_request(55_u32);
        assert_eq!(settings.max_messages, 123);
        assert_eq!(settings.max_bytes, 1_234);
        assert_eq!(settings.max_latency, Duration::from_millis(12));
        assert_eq!(settings.max_messages_per_request, 55);
    }

    #[test]
    fn batch_settings_clamped() {
        let settings = BatchSettings::new()
            .set_max_messages(1_000_000_u32)
            .set_max_bytes(usize::MAX)
            .set_max_latency(Duration::from_secs(u64::MAX))
            .set_max_messages_per_request(0_u32)
            .clamped();
        assert_eq!(settings.max_messages, MAX_MESSAGES_PER_REQUEST);
        assert_eq!(settings.max_bytes, MAX_BYTES);
        assert_eq!(settings.max_latency, MAX_LATENCY);
        assert_eq!(settings.max_messages_per_request, 1);
    }

    #[test]
    fn flow_control_builders() {
        let settings = PublishFlowControl::new()
            .set_message_limit(10_usize)
            .set_byte_limit(1_000_usize)
            .set_limit_exceeded_behavior(LimitExceededBehavior::Error);
        assert_eq!(settings.message_limit, 10);
        assert_eq!(settings.byte_limit, 1_000);
        assert_eq!(
            settings.limit_exceeded_behavior,
            LimitExceededBehavior::Error
        );
    }

    #[test]
    fn flow_control_defaults_ignore() {
        let settings = PublishFlowControl::default();
        assert_eq!(
            settings.limit_exceeded_behavior,
            LimitExceededBehavior::Ignore
        );
        assert!(settings.message_limit >= 100);
        assert!(settings.byte_limit >= 1024 * 1024);
    }
}
