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

use std::collections::BTreeMap;
use std::time::Duration;

/// The shortest ack deadline the service accepts.
pub(crate) const MIN_ACK_DEADLINE: Duration = Duration::from_secs(10);

/// The longest ack deadline the service accepts.
pub(crate) const MAX_ACK_DEADLINE: Duration = Duration::from_secs(600);

/// A distribution of ack latencies, in integer seconds.
///
/// Latencies are clamped into the valid ack-deadline range, so the histogram
/// holds at most 591 buckets. The 99th percentile of this distribution
/// drives the deadline used for lease extensions.
#[derive(Debug, Default)]
pub(crate) struct Histogram {
    buckets: BTreeMap<u64, u64>,
    len: u64,
}

impl Histogram {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record one ack latency.
    pub(crate) fn add(&mut self, latency: Duration) {
        let seconds = latency
            .as_secs()
            .clamp(MIN_ACK_DEADLINE.as_secs(), MAX_ACK_DEADLINE.as_secs());
        *self.buckets.entry(seconds).or_insert(0) += 1;
        self.len += 1;
    }

    /// The value below which `percent`% of the recorded latencies fall.
    ///
    /// An empty histogram reports the minimum. The result rounds to the
    /// bucket holding the target sample, scanning from the largest bucket
    /// down.
    pub(crate) fn percentile(&self, percent: u64) -> Duration {
        let percent = percent.min(100);
        let target = self.len - self.len * percent / 100;
        let mut index = 0;
        for (&seconds, &count) in self.buckets.iter().rev() {
            index += count;
            if index >= target {
                return Duration::from_secs(seconds);
            }
        }
        MIN_ACK_DEADLINE
    }
}
