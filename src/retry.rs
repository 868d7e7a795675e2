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

//! Retry policies and truncated exponential backoff.
//!
//! Batch commits, stream reopens, and exactly-once acknowledgement retries
//! all run through [retry_loop] with a [RetryPolicy] deciding which errors
//! continue the loop and a [BackoffPolicy] pacing the attempts.

use crate::error::rpc::Code;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// The result of a retry policy decision.
#[derive(Debug)]
pub enum RetryFlow {
    /// Stop the retry loop because this is a permanent error.
    Permanent(Error),
    /// Stop the retry loop. The error is retryable, but the retry budget is
    /// spent.
    Exhausted(Error),
    /// The error was retryable, continue the retry loop.
    Continue(Error),
}

impl RetryFlow {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

/// The progress of one retry loop.
#[derive(Clone, Copy, Debug)]
pub struct RetryState {
    /// When the loop started. A `tokio` instant so tests can drive it with
    /// virtual time.
    pub loop_start: tokio::time::Instant,
    /// How many attempts have failed so far.
    pub attempt_count: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            loop_start: tokio::time::Instant::now(),
            attempt_count: 0,
        }
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides whether an error is worth another attempt.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    fn on_error(&self, state: &RetryState, error: Error) -> RetryFlow;

    /// How much of the loop's time budget remains. `None` means unbounded.
    fn remaining_time(&self, _state: &RetryState) -> Option<Duration> {
        None
    }
}

/// Decorators for composing retry policies.
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Stop retrying after `limit` failed attempts.
    fn with_attempt_limit(self, limit: u32) -> LimitedAttemptCount<Self> {
        LimitedAttemptCount {
            inner: self,
            limit,
        }
    }

    /// Stop retrying after `limit` has elapsed since the loop started.
    fn with_time_limit(self, limit: Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime {
            inner: self,
            limit,
        }
    }
}

impl<T: RetryPolicy + Sized> RetryPolicyExt for T {}

/// A retry policy decorated with an attempt limit.
#[derive(Debug)]
pub struct LimitedAttemptCount<P> {
    inner: P,
    limit: u32,
}

impl<P: RetryPolicy> RetryPolicy for LimitedAttemptCount<P> {
    fn on_error(&self, state: &RetryState, error: Error) -> RetryFlow {
        match self.inner.on_error(state, error) {
            RetryFlow::Continue(e) if state.attempt_count >= self.limit => RetryFlow::Exhausted(e),
            flow => flow,
        }
    }

    fn remaining_time(&self, state: &RetryState) -> Option<Duration> {
        self.inner.remaining_time(state)
    }
}

/// A retry policy decorated with an elapsed-time limit.
#[derive(Debug)]
pub struct LimitedElapsedTime<P> {
    inner: P,
    limit: Duration,
}

impl<P: RetryPolicy> RetryPolicy for LimitedElapsedTime<P> {
    fn on_error(&self, state: &RetryState, error: Error) -> RetryFlow {
        match self.inner.on_error(state, error) {
            RetryFlow::Continue(e) if state.loop_start.elapsed() >= self.limit => {
                RetryFlow::Exhausted(e)
            }
            flow => flow,
        }
    }

    fn remaining_time(&self, state: &RetryState) -> Option<Duration> {
        let elapsed = state.loop_start.elapsed();
        let mine = self.limit.saturating_sub(elapsed);
        match self.inner.remaining_time(state) {
            Some(inner) => Some(inner.min(mine)),
            None => Some(mine),
        }
    }
}

/// Returns true for the status codes that are safe to retry.
pub(crate) fn is_transient_code(code: Code) -> bool {
    matches!(
        code,
        Code::ResourceExhausted | Code::Aborted | Code::Internal | Code::Unavailable
    )
}

/// Retries I/O errors and transient service codes.
#[derive(Debug)]
pub struct TransientErrors;

impl RetryPolicy for TransientErrors {
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

/// Paces retry attempts.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    fn on_failure(&self, state: &RetryState) -> Duration;
}

/// Builds truncated exponential backoff policies with jitter.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
}

impl ExponentialBackoffBuilder {
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            maximum_delay: Duration::from_secs(60),
            scaling: 2.0,
        }
    }

    /// Change the delay before the first retry.
    pub fn with_initial_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial_delay = v.into();
        self
    }

    /// Change the cap on the delay between retries.
    pub fn with_maximum_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.maximum_delay = v.into();
        self
    }

    /// Change the growth factor between consecutive delays.
    pub fn with_scaling<V: Into<f64>>(mut self, v: V) -> Self {
        self.scaling = v.into();
        self
    }

    pub fn build(self) -> Result<ExponentialBackoff> {
        if let Some(error) = self.validate() {
            return Err(error);
        }
        Ok(ExponentialBackoff {
            initial_delay: self.initial_delay,
            maximum_delay: self.maximum_delay,
            scaling: self.scaling,
        })
    }

    fn validate(&self) -> Option<Error> {
        if self.scaling < 1.0 {
            return Some(Error::io(format!(
                "scaling ({}) must be >= 1.0",
                self.scaling
            )));
        }
        if self.initial_delay.is_zero() {
            return Some(Error::io(format!(
                "initial delay must be greater than zero, got={:?}",
                self.initial_delay
            )));
        }
        if self.maximum_delay < self.initial_delay {
            return Some(Error::io(format!(
                "maximum delay ({:?}) must be greater or equal to the initial delay ({:?})",
                self.maximum_delay, self.initial_delay
            )));
        }
        None
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncated exponential backoff with jitter.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
}

impl ExponentialBackoff {
    fn delay(&self, attempt_count: u32) -> Duration {
        let exp = std::cmp::min(i32::MAX as u32, attempt_count) as i32;
        let exp = exp.saturating_sub(1);
        let scaling = self.scaling.powi(exp);
        if scaling >= self.maximum_delay.div_duration_f64(self.initial_delay) {
            self.maximum_delay
        } else {
            self.initial_delay.mul_f64(scaling)
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, state: &RetryState) -> Duration {
        use rand::Rng;
        let delay = self.delay(state.attempt_count);
        // Sample the delay from [delay / 2, delay]. Full jitter makes tests
        // and lease timing too loose; half jitter still decorrelates
        // clients.
        let nanos = delay.as_nanos() as u64;
        Duration::from_nanos(rand::rng().random_range(nanos / 2..=nanos))
    }
}

/// Runs `attempt` until it succeeds, the policy stops the loop, or the time
/// budget cannot cover the next delay.
pub(crate) async fn retry_loop<F, Fut, T>(
    mut attempt: F,
    retry_policy: &dyn RetryPolicy,
    backoff_policy: &dyn BackoffPolicy,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>> + Send,
{
    let mut state = RetryState::new();
    loop {
        match attempt().await {
            Ok(response) => return Ok(response),
            Err(error) => {
                state.attempt_count += 1;
                match retry_policy.on_error(&state, error) {
                    RetryFlow::Permanent(e) => return Err(e),
                    RetryFlow::Exhausted(e) => return Err(Error::exhausted(e)),
                    RetryFlow::Continue(e) => {
                        let delay = backoff_policy.on_failure(&state);
                        if retry_policy
                            .remaining_time(&state)
                            .is_some_and(|remaining| remaining < delay)
                        {
                            return Err(Error::exhausted(e));
                        }
                        tracing::debug!(
                            attempt = state.attempt_count,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after error: {e}"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
