//! Client request model.
//!
//! Every IMAP command the session can carry implements [`ImapRequest`]: it
//! serializes its initial line, optionally participates in the `+ …`
//! continuation protocol, optionally supports mid-stream termination
//! (IDLE's `DONE`), and knows whether the frame it last produced carried a
//! secret. Tagging is not a request concern; the session prefixes the tag.

use std::fmt::Debug;

use tokio::sync::mpsc;

use crate::error::{FailureType, ImapClientError};
use crate::response::{ContinuationRequest, UntaggedResponse};
use crate::session::SessionLogger;

mod auth;
mod idle;
mod simple;

pub use auth::{AuthOauthBearerCommand, AuthPlainCommand, AuthXoauth2Command};
pub use idle::IdleCommand;
pub use simple::SimpleCommand;

/// Producer half of a request's streaming queue. The session pushes every
/// untagged response attributed to the command into this queue while the
/// command is pending; the consumer polls the receiving half from any task.
pub type StreamingSender = mpsc::UnboundedSender<UntaggedResponse>;

/// Discriminates commands for dispatch and logging.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommandType {
    Login,
    Logout,
    Noop,
    Capability,
    Namespace,
    Select,
    Examine,
    Status,
    Create,
    Delete,
    Rename,
    List,
    Lsub,
    Subscribe,
    Unsubscribe,
    Check,
    Close,
    Expunge,
    Compress,
    Authenticate,
    Idle,
}

/// One IMAP command request.
///
/// # Ordering contract
///
/// [`command_line`](Self::command_line) is called exactly once, before any
/// other serialization hook. The session then emits `tag SP line` and waits
/// for a tagged completion, a `+ …` continuation (routed to
/// [`next_line_after_continuation`](Self::next_line_after_continuation)),
/// or untagged responses. Sensitivity is re-read after every
/// serialization call, and [`cleanup`](Self::cleanup) runs once the
/// command's future has been completed, on every path.
pub trait ImapRequest: Debug + Send {
    /// Serializes the initial command line, CRLF included, tag excluded.
    fn command_line(&mut self) -> Result<Vec<u8>, ImapClientError>;

    /// Produces the next client line in response to a `+ …` continuation.
    ///
    /// Commands that enter a passive phase on continuation (IDLE) return an
    /// empty frame; the session then writes nothing. The default fails with
    /// [`FailureType::OperationNotSupportedForCommand`].
    fn next_line_after_continuation(
        &mut self,
        response: &ContinuationRequest,
        logger: &SessionLogger,
    ) -> Result<Vec<u8>, ImapClientError> {
        let _ = response;
        Err(ImapClientError::new(
            FailureType::OperationNotSupportedForCommand,
            logger.session_id(),
        ))
    }

    /// Serializes the frame that asks the server to finish a long-running
    /// command (`DONE` for IDLE). Unsupported by default.
    fn terminate_line(&self) -> Result<Vec<u8>, ImapClientError> {
        Err(ImapClientError::new(
            FailureType::OperationNotSupportedForCommand,
            0,
        ))
    }

    /// Queue for untagged responses the caller wants to observe live.
    fn streaming_queue(&self) -> Option<&StreamingSender> {
        None
    }

    fn command_type(&self) -> CommandType;

    /// Whether the most recently serialized frame carried a secret. While
    /// true, the raw frame must never reach a debug sink.
    fn is_sensitive(&self) -> bool {
        false
    }

    /// Redaction-safe replacement for the raw frame in debug logs.
    fn debug_line(&self) -> String;

    /// Drops owned secret-bearing state. Idempotent; runs after the
    /// command's future completes, on success, failure, and cancellation.
    fn cleanup(&mut self) {}
}
