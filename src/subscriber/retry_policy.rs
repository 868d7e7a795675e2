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

use crate::Error;
use crate::retry::{RetryFlow, RetryPolicy, RetryState, is_transient_code};

/// The subscriber's retry policy for the streaming pull RPC.
///
/// The same policy applies to opening a stream and to resuming one after a
/// mid-stream error: I/O failures and the transient status codes restart
/// the stream, everything else is terminal.
#[derive(Debug)]
pub(super) struct StreamRetryPolicy;

impl StreamRetryPolicy {
    pub(super) fn on_midstream_error(error: Error) -> RetryFlow {
        let s = Self;
        s.on_error(&RetryState::default(), error)
    }
}

impl RetryPolicy for StreamRetryPolicy {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryFlow {
        if error.is_io() {
            return RetryFlow::Continue(error);
        }
        match error.status().and_then(|s| s.code) {
            Some(code) if is_transient_code(code) => RetryFlow::Continue(error),
            _ => RetryFlow::Permanent(error),
        }
    }
}
