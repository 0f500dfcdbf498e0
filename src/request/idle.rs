//! `IDLE` (RFC 2177).
//!
//! Two phases: the client sends `IDLE` and the server answers with a `+ `
//! continuation; from then on the server pushes untagged responses until
//! the client sends `DONE`, upon which the tagged completion arrives.
//!
//! The command owns a streaming queue. Every untagged response that
//! arrives while it is pending is appended there for the consumer to poll.

use tokio::sync::mpsc;

use crate::error::ImapClientError;
use crate::request::{CommandType, ImapRequest, StreamingSender};
use crate::response::{ContinuationRequest, UntaggedResponse};
use crate::session::SessionLogger;

#[derive(Debug)]
pub struct IdleCommand {
    queue: StreamingSender,
}

impl IdleCommand {
    /// Creates the command and the receiving half of its streaming queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UntaggedResponse>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        (Self { queue }, receiver)
    }
}

impl ImapRequest for IdleCommand {
    fn command_line(&mut self) -> Result<Vec<u8>, ImapClientError> {
        Ok(b"IDLE\r\n".to_vec())
    }

    /// The `+ idling` acknowledgement opens the passive phase; there is no
    /// next client line until termination.
    fn next_line_after_continuation(
        &mut self,
        _response: &ContinuationRequest,
        _logger: &SessionLogger,
    ) -> Result<Vec<u8>, ImapClientError> {
        Ok(Vec::new())
    }

    fn terminate_line(&self) -> Result<Vec<u8>, ImapClientError> {
        Ok(b"DONE\r\n".to_vec())
    }

    fn streaming_queue(&self) -> Option<&StreamingSender> {
        Some(&self.queue)
    }

    fn command_type(&self) -> CommandType {
        CommandType::Idle
    }

    fn debug_line(&self) -> String {
        "IDLE".to_owned()
    }
}
