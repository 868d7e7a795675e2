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

//! Error types for the publish/subscribe client core.
//!
//! [Error] represents failures reported by the transport. The per-operation
//! error enums ([PublishError], [AckError]) are what applications observe on
//! publish handles and acknowledgement futures.

use std::sync::Arc;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Status codes and status payloads reported by the service.
pub mod rpc {
    /// A subset of the canonical RPC status codes, as surfaced by the
    /// transport.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[non_exhaustive]
    pub enum Code {
        Cancelled,
        Unknown,
        InvalidArgument,
        DeadlineExceeded,
        NotFound,
        PermissionDenied,
        ResourceExhausted,
        FailedPrecondition,
        Aborted,
        Unavailable,
        Internal,
        Unauthenticated,
        DataLoss,
    }

    impl Code {
        /// Returns true for the auth-class codes that benefit from
        /// credential-source annotations.
        pub fn is_auth_class(&self) -> bool {
            matches!(
                self,
                Code::Unauthenticated | Code::PermissionDenied | Code::NotFound
            )
        }
    }

    /// The error payload reported by the service for a failed RPC.
    #[derive(Clone, Debug, Default, PartialEq)]
    pub struct Status {
        pub code: Option<Code>,
        pub message: String,
    }

    impl Status {
        /// Set the status code.
        pub fn set_code(mut self, v: Code) -> Self {
            self.code = Some(v);
            self
        }

        /// Set the status message.
        pub fn set_message<T: Into<String>>(mut self, v: T) -> Self {
            self.message = v.into();
            self
        }
    }
}

/// An error reported while talking to the service.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    credential_source: Option<String>,
}

#[derive(Debug)]
enum ErrorKind {
    /// The service rejected the request with a status.
    Service(rpc::Status),
    /// The request never produced a service response.
    Io(String),
    /// The operation was cancelled locally.
    Cancelled,
    /// A retry loop gave up on a retryable error.
    Exhausted(Box<Error>),
}

impl Error {
    /// The service rejected the request.
    pub fn service(status: rpc::Status) -> Self {
        Self {
            kind: ErrorKind::Service(status),
            credential_source: None,
        }
    }

    /// The request failed before a service response was received.
    pub fn io<T: Into<String>>(message: T) -> Self {
        Self {
            kind: ErrorKind::Io(message.into()),
            credential_source: None,
        }
    }

    /// The operation was cancelled by a local shutdown or explicit cancel.
    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            credential_source: None,
        }
    }

    /// The retry budget was exhausted; `source` is the last retryable error.
    pub fn exhausted(source: Error) -> Self {
        Self {
            kind: ErrorKind::Exhausted(Box::new(source)),
            credential_source: None,
        }
    }

    /// Annotate an auth-class error with the source of the credentials used
    /// for the request.
    pub fn with_credential_source<T: Into<String>>(mut self, source: T) -> Self {
        self.credential_source = Some(source.into());
        self
    }

    /// The credential source recorded for this error, if any.
    pub fn credential_source(&self) -> Option<&str> {
        self.credential_source.as_deref()
    }

    /// The service status, if the service rejected the request.
    pub fn status(&self) -> Option<&rpc::Status> {
        match &self.kind {
            ErrorKind::Service(status) => Some(status),
            ErrorKind::Exhausted(source) => source.status(),
            _ => None,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::Exhausted(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ErrorKind::Service(status) => {
                write!(f, "the service reported {:?}: {}", status.code, status.message)?;
            }
            ErrorKind::Io(message) => {
                write!(f, "the request failed before a response arrived: {message}")?;
            }
            ErrorKind::Cancelled => write!(f, "the operation was cancelled")?,
            ErrorKind::Exhausted(source) => {
                write!(f, "the retry budget was exhausted, last error: {source}")?;
            }
        }
        if let Some(source) = &self.credential_source {
            write!(f, " (credentials from {source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Exhausted(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Represents an error that can occur when publishing a message.
#[derive(thiserror::Error, Clone, Debug)]
#[non_exhaustive]
pub enum PublishError {
    /// Publish operation failed sending the RPC.
    #[error("the publish operation was interrupted by an error: {0}")]
    Send(#[source] Arc<Error>),

    /// Publish is paused for the ordering key.
    ///
    /// A previous message with this ordering key has failed to send. To
    /// prevent messages from being sent out of order, the `Publisher` paused
    /// messages for this ordering key.
    ///
    /// To resume publishing messages with this ordering key, call
    /// `Publisher::resume_publish(...)`.
    #[error("the ordering key was paused")]
    OrderingKeyPaused,

    /// The configured publish flow control limits were exceeded.
    #[error("the publish flow control limits were exceeded")]
    FlowControlExceeded,

    /// The publisher was shut down before the message was sent.
    #[error("the publisher was shut down before the message was sent")]
    Cancelled,
}

/// Represents the per-acknowledgement-id errors reported under exactly-once
/// delivery.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum AckError {
    /// The acknowledgement id is malformed or refers to an expired delivery.
    #[error("the acknowledgement id is invalid")]
    InvalidAckId,

    /// The caller does not have permission to acknowledge this message.
    #[error("permission denied acknowledging this message")]
    PermissionDenied,

    /// The acknowledgement failed a server-side precondition.
    #[error("the acknowledgement failed a precondition")]
    FailedPrecondition,

    /// The same acknowledgement id was submitted more than once in a batch.
    #[error("duplicate acknowledgement id")]
    Duplicate,

    /// The retry deadline elapsed before the server confirmed the request.
    #[error("the acknowledgement retry deadline was exhausted")]
    Exhausted,

    /// The subscriber was shut down before the acknowledgement completed.
    #[error("the subscriber was shut down before the acknowledgement completed")]
    Cancelled,

    /// The service reported an unrecognized failure for this id.
    #[error("the acknowledgement failed: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc::{Code, Status};

    #[test]
    fn service_error() {
        let err = Error::service(
            Status::default()
                .set_code(Code::Unavailable)
                .set_message("try again"),
        );
        let status = err.status().unwrap();
        assert_eq!(status.code, Some(Code::Unavailable));
        assert_eq!(status.message, "try again");
        assert!(!err.is_io());
        assert!(err.to_string().contains("try again"), "{err}");
    }

    #[test]
    fn io_error() {
        let err = Error::io("connection reset");
        assert!(err.is_io());
        assert!(err.status().is_none());
        assert!(err.to_string().contains("connection reset"), "{err}");
    }

    #[test]
    fn exhausted_preserves_status() {
        let err = Error::exhausted(Error::service(
            Status::default()
                .set_code(Code::Internal)
                .set_message("fail"),
        ));
        assert!(err.is_exhausted());
        assert_eq!(err.status().unwrap().code, Some(Code::Internal));
        use std::error::Error as _;
        assert!(err.source().is_some());
    }

    #[test]
    fn credential_annotation() {
        let err = Error::service(Status::default().set_code(Code::Unauthenticated))
            .with_credential_source("metadata-server");
        assert_eq!(err.credential_source(), Some("metadata-server"));
        assert!(err.to_string().contains("metadata-server"), "{err}");
        assert!(Code::Unauthenticated.is_auth_class());
        assert!(!Code::Unavailable.is_auth_class());
    }
}
