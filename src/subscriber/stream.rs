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

use super::retry_policy::StreamRetryPolicy;
use crate::model::StreamRequest;
use crate::retry::{BackoffPolicy, ExponentialBackoffBuilder, retry_loop};
use crate::transport::{CallOptions, MessageStream, Transport};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(super) const INITIAL_DELAY: Duration = Duration::from_millis(100);
pub(super) const MAXIMUM_DELAY: Duration = Duration::from_secs(60);

/// One attempt to open a streaming pull.
///
/// Returns the server half of the stream along with the sender feeding the
/// client half. The initial request is already written; later sends are
/// keep-alive frames.
pub(super) async fn open(
    transport: &Arc<dyn Transport>,
    initial_req: StreamRequest,
    options: CallOptions,
) -> Result<(MessageStream, mpsc::Sender<StreamRequest>)> {
    // The only writes after the initial request are keepalives, which are
    // sent so infrequently that we don't fear back pressure on this
    // channel.
    let (request_tx, request_rx) = mpsc::channel(1);
    request_tx
        .send(initial_req)
        .await
        .map_err(|_| Error::io("the transport dropped the request stream"))?;

    let stream = transport.streaming_pull(request_rx, options).await?;
    Ok((stream, request_tx))
}

/// Open a streaming pull, retrying recoverable failures.
pub(super) async fn connect(
    transport: &Arc<dyn Transport>,
    initial_req: StreamRequest,
    options: CallOptions,
    backoff: &dyn BackoffPolicy,
) -> Result<(MessageStream, mpsc::Sender<StreamRequest>)> {
    retry_loop(
        || Box::pin(open(transport, initial_req.clone(), options.clone())),
        &StreamRetryPolicy,
        backoff,
    )
    .await
}

pub(super) fn default_backoff() -> impl BackoffPolicy {
    ExponentialBackoffBuilder::new()
        .with_initial_delay(INITIAL_DELAY)
        .with_maximum_delay(MAXIMUM_DELAY)
        .with_scaling(4.0)
        .build()
        .expect("This is a valid configuration")
}
