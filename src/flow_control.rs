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

//! Bounds the bytes and messages outstanding across all publish batches.

use crate::error::PublishError;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// What [FlowController::acquire] does when a limit is reached.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[non_exhaustive]
pub enum LimitExceededBehavior {
    /// Admit the message anyway. The counters still track usage.
    #[default]
    Ignore,
    /// Suspend the caller until enough capacity is released.
    Block,
    /// Fail the publish with [PublishError::FlowControlExceeded].
    Error,
}

/// Tracks outstanding bytes and messages against configured limits.
///
/// Waiters under [LimitExceededBehavior::Block] are served in FIFO order; a
/// waiter that is cancelled (its future dropped) gives its place back
/// without consuming capacity.
#[derive(Debug)]
pub(crate) struct FlowController {
    behavior: LimitExceededBehavior,
    byte_limit: usize,
    message_permits: Semaphore,
    byte_permits: Semaphore,
    outstanding_messages: AtomicUsize,
    outstanding_bytes: AtomicUsize,
}

impl FlowController {
    pub(crate) fn new(
        message_limit: usize,
        byte_limit: usize,
        behavior: LimitExceededBehavior,
    ) -> Self {
        // `Semaphore::acquire_many` takes a `u32` count.
        let byte_limit = byte_limit.min(u32::MAX as usize);
        Self {
            behavior,
            byte_limit,
            message_permits: Semaphore::new(message_limit),
            byte_permits: Semaphore::new(byte_limit),
            outstanding_messages: AtomicUsize::new(0),
            outstanding_bytes: AtomicUsize::new(0),
        }
    }

    /// Admit one message of `bytes` bytes, per the configured behavior.
    pub(crate) async fn acquire(&self, bytes: usize) -> Result<(), PublishError> {
        let bytes = self.clamp(bytes) as u32;
        match self.behavior {
            LimitExceededBehavior::Ignore => {}
            LimitExceededBehavior::Error => {
                let message_permit = self
                    .message_permits
                    .try_acquire()
                    .map_err(|_| PublishError::FlowControlExceeded)?;
                match self.byte_permits.try_acquire_many(bytes) {
                    Ok(byte_permit) => {
                        message_permit.forget();
                        byte_permit.forget();
                    }
                    Err(_) => {
                        // `message_permit` drops here, returning its slot.
                        return Err(PublishError::FlowControlExceeded);
                    }
                }
            }
            LimitExceededBehavior::Block => {
                // Hold the message permit while waiting for bytes. If the
                // caller cancels mid-wait, both permits return on drop.
                let message_permit = self
                    .message_permits
                    .acquire()
                    .await
                    .expect("the flow controller never closes its semaphores");
                let byte_permit = self
                    .byte_permits
                    .acquire_many(bytes)
                    .await
                    .expect("the flow controller never closes its semaphores");
                message_permit.forget();
                byte_permit.forget();
            }
        }
        self.outstanding_messages.fetch_add(1, Ordering::AcqRel);
        self.outstanding_bytes
            .fetch_add(bytes as usize, Ordering::AcqRel);
        Ok(())
    }

    /// Return the capacity held by one message of `bytes` bytes.
    pub(crate) fn release(&self, bytes: usize) {
        let bytes = self.clamp(bytes);
        if self.behavior != LimitExceededBehavior::Ignore {
            self.message_permits.add_permits(1);
            self.byte_permits.add_permits(bytes);
        }
        self.outstanding_messages.fetch_sub(1, Ordering::AcqRel);
        self.outstanding_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// The (messages, bytes) currently outstanding.
    pub(crate) fn outstanding(&self) -> (usize, usize) {
        (
            self.outstanding_messages.load(Ordering::Acquire),
            self.outstanding_bytes.load(Ordering::Acquire),
        )
    }

    // A message larger than the whole byte budget reserves the full budget
    // instead of waiting forever.
    fn clamp(&self, bytes: usize) -> usize {
        bytes.min(self.byte_limit)
    }
}
