//! # Asynchronous IMAP4rev1 client session engine
//!
//! This crate drives a single authenticated IMAP conversation over a
//! full-duplex byte stream: it serializes commands, tags them, matches
//! server responses back to the command in flight, routes `+ …`
//! continuation rounds (including multi-round SASL authentication),
//! streams IDLE notifications, and splices DEFLATE stages into the
//! transport pipeline when `COMPRESS=DEFLATE` is negotiated.
//!
//! It does **not** open sockets or perform TLS handshakes; any transport
//! implementing [`tokio::io::AsyncRead`] + [`tokio::io::AsyncWrite`] can be
//! handed to [`connect`]. Likewise it does not interpret mailbox data
//! beyond the wire-level record shapes; untagged payloads are surfaced
//! close to the wire.
//!
//! ## Example
//!
//! ```no_run
//! use imap_session::{connect, AuthPlainCommand, SessionConfig, SimpleCommand};
//!
//! # async fn demo(tls_stream: tokio::io::DuplexStream) -> Result<(), Box<dyn std::error::Error>> {
//! // `tls_stream` is any AsyncRead + AsyncWrite transport.
//! let (session, greeting) = connect(tls_stream, SessionConfig::default()).await?;
//! println!("greeted: {}", greeting.text);
//!
//! let capability = session.submit(SimpleCommand::capability())?.await?;
//! assert!(capability.is_ok());
//! let snapshot = session.capabilities().expect("capabilities refreshed");
//!
//! let login = session.submit(AuthPlainCommand::new(
//!     "alice",
//!     "secret",
//!     &snapshot,
//!     session.session_id(),
//! ))?;
//! let response = login.await?;
//! assert!(response.is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Each session runs a single driver task that owns the transport and all
//! request state; handles are cheap clones that queue submissions over to
//! it. One command is in flight at a time: submitting while the slot is
//! occupied fails immediately with
//! [`FailureType::CommandInProgress`]. IDLE occupies the slot until
//! [`ImapSession::terminate_pending`] sends `DONE`.

#![forbid(unsafe_code)]
#![deny(missing_debug_implementations)]

mod capability;
mod codec;
mod compress;
mod connect;
mod core;
mod error;
mod future;
mod mailbox;
mod request;
mod response;
mod secret;
mod session;

pub use capability::{Capability, AUTH, COMPRESS, IDLE, SASL_IR};
pub use connect::connect;
pub use crate::core::Tag;
pub use error::{FailureType, ImapClientError};
pub use future::ImapFuture;
pub use mailbox::{decode_utf7, encode_utf7};
pub use request::{
    AuthOauthBearerCommand, AuthPlainCommand, AuthXoauth2Command, CommandType, IdleCommand,
    ImapRequest, SimpleCommand, StreamingSender,
};
pub use response::{
    CommandResponse, ContinuationRequest, ResponseCode, ResponseStatus, ServerResponse,
    TaggedResponse, UntaggedResponse,
};
pub use session::{DebugMode, ImapSession, SessionConfig, SessionLogger};
