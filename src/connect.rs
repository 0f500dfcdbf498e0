//! Greeting negotiation.
//!
//! A freshly established transport (TCP, TLS, or anything else that is
//! `AsyncRead + AsyncWrite`) is promoted into an [`ImapSession`] once the
//! server's greeting is observed. Only an untagged `OK` qualifies; a `BYE`
//! or `PREAUTH` greeting, transport errors, end-of-stream, and the
//! read-idle timer all fail the attempt with their own failure type.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::codec::Decoder;

use crate::capability::Capability;
use crate::codec::ResponseFramer;
use crate::error::{FailureType, ImapClientError};
use crate::response::{ResponseCode, ServerResponse, UntaggedResponse};
use crate::session::{ImapSession, SessionConfig};

/// Connects a greeted session over `io`.
///
/// On success returns the running session together with the greeting line;
/// a capability set announced in an `OK [CAPABILITY …]` greeting code is
/// seeded into the session. Bytes the server sent after its greeting are
/// handed over unconsumed.
pub async fn connect<T>(
    mut io: T,
    config: SessionConfig,
) -> Result<(ImapSession, UntaggedResponse), ImapClientError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session_id = config.session_id;
    let mut framer = ResponseFramer::new();
    let mut buf = BytesMut::with_capacity(4096);
    let deadline = config
        .read_idle_timeout
        .map(|timeout| tokio::time::Instant::now() + timeout);

    loop {
        match framer.decode(&mut buf) {
            Ok(Some(ServerResponse::Untagged(greeting))) if greeting.is_status("OK") => {
                let capabilities = match &greeting.code {
                    Some(ResponseCode::Capability(tokens)) => Some(Capability::from_tokens(
                        tokens.iter().map(String::as_str),
                    )),
                    _ => None,
                };
                let session = ImapSession::spawn(io, config, buf, capabilities);
                return Ok((session, greeting));
            }
            Ok(Some(_)) => {
                return Err(ImapClientError::new(
                    FailureType::ConnectionFailedWithoutOkResponse,
                    session_id,
                ));
            }
            Ok(None) => {}
            Err(cause) => {
                return Err(ImapClientError::with_cause(
                    FailureType::ProtocolViolation,
                    session_id,
                    cause,
                ));
            }
        }

        let read = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, io.read_buf(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        return Err(ImapClientError::new(
                            FailureType::ConnectionFailedExceedIdleMax,
                            session_id,
                        ));
                    }
                }
            }
            None => io.read_buf(&mut buf).await,
        };

        match read {
            Ok(0) => {
                return Err(ImapClientError::new(
                    FailureType::ConnectionInactive,
                    session_id,
                ));
            }
            Ok(_) => {}
            Err(cause) => {
                return Err(ImapClientError::with_cause(
                    FailureType::ConnectionFailedException,
                    session_id,
                    cause,
                ));
            }
        }
    }
}
