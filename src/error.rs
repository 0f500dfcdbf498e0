//! # Error model
//!
//! Every failure a caller can observe is an [`ImapClientError`]: a
//! [`FailureType`] discriminator, the id of the session that produced it,
//! and an optional cause chain. The session itself never panics or throws
//! past its driver task; errors travel through command futures.

use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Discriminates the ways an IMAP client operation can fail.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FailureType {
    /// The request has no multi-round or terminate protocol.
    OperationNotSupportedForCommand,
    /// A command is already in flight on this session.
    CommandInProgress,
    /// The server greeting was not an untagged OK.
    ConnectionFailedWithoutOkResponse,
    /// The transport failed before or during greeting processing.
    ConnectionFailedException,
    /// No bytes arrived within the configured read-idle limit.
    ConnectionFailedExceedIdleMax,
    /// The channel closed before the operation could complete.
    ConnectionInactive,
    /// Tagged completion with status NO.
    ServerResponseNo,
    /// Tagged completion with status BAD.
    ServerResponseBad,
    /// An untagged BYE arrived outside of a LOGOUT exchange.
    ServerResponseByeUnexpected,
    /// A malformed or out-of-sequence server response.
    ProtocolViolation,
    /// The caller cancelled the future.
    Cancelled,
}

impl Display for FailureType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OperationNotSupportedForCommand => "operation not supported for this command",
            Self::CommandInProgress => "another command is in progress",
            Self::ConnectionFailedWithoutOkResponse => "server greeting was not OK",
            Self::ConnectionFailedException => "connection failed due to an exception",
            Self::ConnectionFailedExceedIdleMax => "no data within the read-idle limit",
            Self::ConnectionInactive => "connection is inactive",
            Self::ServerResponseNo => "server responded NO",
            Self::ServerResponseBad => "server responded BAD",
            Self::ServerResponseByeUnexpected => "unexpected BYE from server",
            Self::ProtocolViolation => "protocol violation",
            Self::Cancelled => "cancelled by caller",
        })
    }
}

/// The error type surfaced through command futures and `connect`.
#[derive(Debug, Error)]
#[error("[{session_id}] {kind}")]
pub struct ImapClientError {
    kind: FailureType,
    session_id: u64,
    #[source]
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl ImapClientError {
    pub fn new(kind: FailureType, session_id: u64) -> Self {
        Self {
            kind,
            session_id,
            cause: None,
        }
    }

    pub fn with_cause(
        kind: FailureType,
        session_id: u64,
        cause: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            session_id,
            cause: Some(cause.into()),
        }
    }

    pub fn kind(&self) -> FailureType {
        self.kind
    }

    /// Id of the session this error originated from, for log correlation.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}
