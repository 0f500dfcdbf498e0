//! `AUTHENTICATE` command family: PLAIN (RFC 4616), XOAUTH2, and
//! OAUTHBEARER (RFC 7628).
//!
//! All three share the same shape. When the server advertises `SASL-IR`
//! (RFC 4959) the base64 client response rides on the `AUTHENTICATE` line
//! itself; otherwise the initial line is bare and the client response is
//! sent after the server's `+ ` continuation. If the server answers the
//! client response with *another* continuation, it is a failure challenge:
//! the challenge is decoded for debug logging and the exchange is aborted
//! with `*`, after which a tagged NO/BAD is expected.

use base64::{engine::general_purpose::STANDARD as base64, Engine};

use crate::capability::{Capability, SASL_IR};
use crate::error::{FailureType, ImapClientError};
use crate::request::{CommandType, ImapRequest};
use crate::response::ContinuationRequest;
use crate::secret::Secret;
use crate::session::SessionLogger;

const SOH: char = '\u{1}';

/// Continuation-protocol state shared by every `AUTHENTICATE` variant.
#[derive(Debug)]
struct SaslExchange {
    /// Whether the server allows the one-line form (RFC 4959).
    sasl_ir_enabled: bool,
    client_response_sent: bool,
    aborted: bool,
    sensitive: bool,
    /// Id of the session this command was built for; embedded in every
    /// error the command produces.
    session_id: u64,
}

impl SaslExchange {
    fn new(capability: &Capability, session_id: u64) -> Self {
        Self {
            sasl_ir_enabled: capability.has(SASL_IR),
            client_response_sent: false,
            aborted: false,
            sensitive: true,
            session_id,
        }
    }

    /// Builds the initial `AUTHENTICATE <mechanism>[ <ir>]` line.
    fn initial_line(&mut self, mechanism: &str, client_response: &str) -> Vec<u8> {
        let mut line = Vec::with_capacity(mechanism.len() + client_response.len() + 16);
        line.extend_from_slice(b"AUTHENTICATE ");
        line.extend_from_slice(mechanism.as_bytes());

        if self.sasl_ir_enabled {
            self.sensitive = true;
            self.client_response_sent = true;
            line.push(b' ');
            line.extend_from_slice(client_response.as_bytes());
        } else {
            // Nothing secret leaves the client yet.
            self.sensitive = false;
        }

        line.extend_from_slice(b"\r\n");
        line
    }

    /// Handles a `+ …` round: emits the client response if it is still
    /// owed, aborts on a failure challenge, and rejects anything after the
    /// abort as out-of-sequence.
    fn continuation_line(
        &mut self,
        debug_prefix: &str,
        client_response: &str,
        response: &ContinuationRequest,
        logger: &SessionLogger,
    ) -> Result<Vec<u8>, ImapClientError> {
        if self.aborted {
            return Err(ImapClientError::new(
                FailureType::ProtocolViolation,
                self.session_id,
            ));
        }

        if self.client_response_sent {
            // The server challenged the client response: a base64-encoded
            // failure payload. Surface it (debug only), then bail out.
            if logger.is_debug_enabled() {
                logger.debug(&format!(
                    "{debug_prefix}server challenge:{}",
                    decode_challenge(&response.text)
                ));
            }
            self.sensitive = false;
            self.aborted = true;
            return Ok(b"*\r\n".to_vec());
        }

        self.sensitive = true;
        self.client_response_sent = true;
        let mut line = Vec::with_capacity(client_response.len() + 2);
        line.extend_from_slice(client_response.as_bytes());
        line.extend_from_slice(b"\r\n");
        Ok(line)
    }
}

/// Failure challenges are base64-encoded; undecodable ones are surfaced
/// verbatim.
fn decode_challenge(text: &str) -> String {
    base64
        .decode(text.trim())
        .map(|decoded| String::from_utf8_lossy(&decoded).into_owned())
        .unwrap_or_else(|_| text.to_owned())
}

fn secret_gone(session_id: u64) -> ImapClientError {
    // Serialization after cleanup means the session sequenced calls wrong.
    ImapClientError::new(FailureType::ProtocolViolation, session_id)
}

/// `AUTHENTICATE PLAIN` (RFC 4616): `[authzid] NUL authcid NUL password`,
/// UTF-8, base64-encoded.
#[derive(Debug)]
pub struct AuthPlainCommand {
    authzid: Option<String>,
    username: String,
    password: Option<Secret>,
    exchange: SaslExchange,
}

impl AuthPlainCommand {
    pub fn new(
        username: &str,
        password: &str,
        capability: &Capability,
        session_id: u64,
    ) -> Self {
        Self::with_authzid(None, username, password, capability, session_id)
    }

    pub fn with_authzid(
        authzid: Option<&str>,
        username: &str,
        password: &str,
        capability: &Capability,
        session_id: u64,
    ) -> Self {
        Self {
            authzid: authzid.map(str::to_owned),
            username: username.to_owned(),
            password: Some(Secret::new(password)),
            exchange: SaslExchange::new(capability, session_id),
        }
    }

    fn client_response(&self) -> Option<String> {
        let password = self.password.as_ref()?;
        let mut payload = String::new();
        if let Some(authzid) = &self.authzid {
            payload.push_str(authzid);
        }
        payload.push('\0');
        payload.push_str(&self.username);
        payload.push('\0');
        payload.push_str(password.reveal());
        Some(base64.encode(payload))
    }
}

impl ImapRequest for AuthPlainCommand {
    fn command_line(&mut self) -> Result<Vec<u8>, ImapClientError> {
        let response = self
            .client_response()
            .ok_or_else(|| secret_gone(self.exchange.session_id))?;
        Ok(self.exchange.initial_line("PLAIN", &response))
    }

    fn next_line_after_continuation(
        &mut self,
        response: &ContinuationRequest,
        logger: &SessionLogger,
    ) -> Result<Vec<u8>, ImapClientError> {
        let client_response = self
            .client_response()
            .ok_or_else(|| secret_gone(self.exchange.session_id))?;
        self.exchange.continuation_line(
            "AuthPlainCommand:",
            &client_response,
            response,
            logger,
        )
    }

    fn command_type(&self) -> CommandType {
        CommandType::Authenticate
    }

    fn is_sensitive(&self) -> bool {
        self.exchange.sensitive
    }

    fn debug_line(&self) -> String {
        format!("AUTHENTICATE PLAIN DATA FOR USER:{}", self.username)
    }

    fn cleanup(&mut self) {
        self.authzid = None;
        self.password = None;
    }
}

/// `AUTHENTICATE XOAUTH2`: `user=<user>\x01auth=Bearer <token>\x01\x01`,
/// base64-encoded.
#[derive(Debug)]
pub struct AuthXoauth2Command {
    username: String,
    token: Option<Secret>,
    exchange: SaslExchange,
}

impl AuthXoauth2Command {
    pub fn new(username: &str, token: &str, capability: &Capability, session_id: u64) -> Self {
        Self {
            username: username.to_owned(),
            token: Some(Secret::new(token)),
            exchange: SaslExchange::new(capability, session_id),
        }
    }

    fn client_response(&self) -> Option<String> {
        let token = self.token.as_ref()?;
        let payload = format!(
            "user={}{SOH}auth=Bearer {}{SOH}{SOH}",
            self.username,
            token.reveal()
        );
        Some(base64.encode(payload))
    }
}

impl ImapRequest for AuthXoauth2Command {
    fn command_line(&mut self) -> Result<Vec<u8>, ImapClientError> {
        let response = self
            .client_response()
            .ok_or_else(|| secret_gone(self.exchange.session_id))?;
        Ok(self.exchange.initial_line("XOAUTH2", &response))
    }

    fn next_line_after_continuation(
        &mut self,
        response: &ContinuationRequest,
        logger: &SessionLogger,
    ) -> Result<Vec<u8>, ImapClientError> {
        let client_response = self
            .client_response()
            .ok_or_else(|| secret_gone(self.exchange.session_id))?;
        self.exchange.continuation_line(
            "AuthXoauth2Command:",
            &client_response,
            response,
            logger,
        )
    }

    fn command_type(&self) -> CommandType {
        CommandType::Authenticate
    }

    fn is_sensitive(&self) -> bool {
        self.exchange.sensitive
    }

    fn debug_line(&self) -> String {
        format!("AUTHENTICATE XOAUTH2 DATA FOR USER:{}", self.username)
    }

    fn cleanup(&mut self) {
        self.token = None;
    }
}

/// `AUTHENTICATE OAUTHBEARER` (RFC 7628):
/// `n,a=<user>,\x01host=<host>\x01port=<port>\x01auth=Bearer <token>\x01\x01`,
/// base64-encoded.
#[derive(Debug)]
pub struct AuthOauthBearerCommand {
    username: String,
    host: String,
    port: u16,
    token: Option<Secret>,
    exchange: SaslExchange,
}

impl AuthOauthBearerCommand {
    pub fn new(
        username: &str,
        host: &str,
        port: u16,
        token: &str,
        capability: &Capability,
        session_id: u64,
    ) -> Self {
        Self {
            username: username.to_owned(),
            host: host.to_owned(),
            port,
            token: Some(Secret::new(token)),
            exchange: SaslExchange::new(capability, session_id),
        }
    }

    fn client_response(&self) -> Option<String> {
        let token = self.token.as_ref()?;
        let payload = format!(
            "n,a={},{SOH}host={}{SOH}port={}{SOH}auth=Bearer {}{SOH}{SOH}",
            self.username,
            self.host,
            self.port,
            token.reveal()
        );
        Some(base64.encode(payload))
    }
}

impl ImapRequest for AuthOauthBearerCommand {
    fn command_line(&mut self) -> Result<Vec<u8>, ImapClientError> {
        let response = self
            .client_response()
            .ok_or_else(|| secret_gone(self.exchange.session_id))?;
        Ok(self.exchange.initial_line("OAUTHBEARER", &response))
    }

    fn next_line_after_continuation(
        &mut self,
        response: &ContinuationRequest,
        logger: &SessionLogger,
    ) -> Result<Vec<u8>, ImapClientError> {
        let client_response = self
            .client_response()
            .ok_or_else(|| secret_gone(self.exchange.session_id))?;
        self.exchange.continuation_line(
            "AuthOauthBearerCommand:",
            &client_response,
            response,
            logger,
        )
    }

    fn command_type(&self) -> CommandType {
        CommandType::Authenticate
    }

    fn is_sensitive(&self) -> bool {
        self.exchange.sensitive
    }

    fn debug_line(&self) -> String {
        format!("AUTHENTICATE OAUTHBEARER DATA FOR USER:{}", self.username)
    }

    fn cleanup(&mut self) {
        self.token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DebugMode;

    const OAUTHBEARER_B64: &str =
        "bixhPXVzZXJAZXhhbXBsZS5jb20sAWhvc3Q9c2VydmVyLmV4YW1wbGUuY29tAXBvcnQ9OTkzAWF1dGg9QmVhcmVyIHNlbGZkcml2aW5nAQE=";

    fn with_sasl_ir() -> Capability {
        Capability::from_tokens(["IMAP4rev1", SASL_IR])
    }

    fn logger() -> SessionLogger {
        SessionLogger::new(1, DebugMode::DebugWithRedaction)
    }

    fn oauth_bearer(capability: &Capability) -> AuthOauthBearerCommand {
        AuthOauthBearerCommand::new(
            "user@example.com",
            "server.example.com",
            993,
            "selfdriving",
            capability,
            1,
        )
    }

    #[test]
    fn test_oauth_bearer_with_sasl_ir() {
        let mut command = oauth_bearer(&with_sasl_ir());

        let line = command.command_line().unwrap();
        assert_eq!(
            line,
            format!("AUTHENTICATE OAUTHBEARER {OAUTHBEARER_B64}\r\n").into_bytes()
        );
        assert!(command.is_sensitive());
        assert_eq!(
            command.debug_line(),
            "AUTHENTICATE OAUTHBEARER DATA FOR USER:user@example.com"
        );
    }

    #[test]
    fn test_oauth_bearer_without_sasl_ir() {
        let mut command = oauth_bearer(&Capability::default());

        let line = command.command_line().unwrap();
        assert_eq!(line, b"AUTHENTICATE OAUTHBEARER\r\n");
        assert!(!command.is_sensitive());

        let continuation = ContinuationRequest {
            text: String::new(),
        };
        let next = command
            .next_line_after_continuation(&continuation, &logger())
            .unwrap();
        assert_eq!(next, format!("{OAUTHBEARER_B64}\r\n").into_bytes());
        assert!(command.is_sensitive());
    }

    #[test]
    fn test_oauth_bearer_failure_challenge_aborts() {
        let mut command = oauth_bearer(&with_sasl_ir());
        command.command_line().unwrap();

        let challenge = ContinuationRequest {
            text: "eyJzdGF0dXMiOiI0MDAiLCJzY2hlbWVzIjoiQmVhcmVyIiwic2NvcGUiOiJodHRwczovL21haWwuZ29vZ2xlLmNvbS8ifQ=="
                .to_owned(),
        };
        let next = command
            .next_line_after_continuation(&challenge, &logger())
            .unwrap();
        assert_eq!(next, b"*\r\n");
        assert!(!command.is_sensitive());
    }

    #[test]
    fn test_challenge_is_decoded_for_logging() {
        let challenge = "eyJzdGF0dXMiOiI0MDAiLCJzY2hlbWVzIjoiQmVhcmVyIiwic2NvcGUiOiJodHRwczovL21haWwuZ29vZ2xlLmNvbS8ifQ==";
        assert_eq!(
            decode_challenge(challenge),
            r#"{"status":"400","schemes":"Bearer","scope":"https://mail.google.com/"}"#
        );
        // Not base64: passed through untouched.
        assert_eq!(decode_challenge("?!"), "?!");
    }

    #[test]
    fn test_continuation_after_abort_is_a_protocol_violation() {
        let mut command = oauth_bearer(&with_sasl_ir());
        command.command_line().unwrap();

        let challenge = ContinuationRequest {
            text: "eyJmYWlsIjoieWVzIn0=".to_owned(),
        };
        command
            .next_line_after_continuation(&challenge, &logger())
            .unwrap();

        let error = command
            .next_line_after_continuation(&challenge, &logger())
            .unwrap_err();
        assert_eq!(error.kind(), FailureType::ProtocolViolation);
    }

    #[test]
    fn test_plain_with_sasl_ir() {
        let mut command = AuthPlainCommand::new("bob", "munchkin", &with_sasl_ir(), 1);

        let line = command.command_line().unwrap();
        // base64("\0bob\0munchkin")
        assert_eq!(line, b"AUTHENTICATE PLAIN AGJvYgBtdW5jaGtpbg==\r\n");
        assert!(command.is_sensitive());
        assert_eq!(command.debug_line(), "AUTHENTICATE PLAIN DATA FOR USER:bob");
    }

    #[test]
    fn test_plain_with_authzid() {
        let mut command =
            AuthPlainCommand::with_authzid(Some("admin"), "bob", "munchkin", &with_sasl_ir(), 1);

        let line = command.command_line().unwrap();
        // base64("admin\0bob\0munchkin")
        assert_eq!(line, b"AUTHENTICATE PLAIN YWRtaW4AYm9iAG11bmNoa2lu\r\n");
    }

    #[test]
    fn test_plain_without_sasl_ir() {
        let mut command = AuthPlainCommand::new("bob", "munchkin", &Capability::default(), 1);

        assert_eq!(command.command_line().unwrap(), b"AUTHENTICATE PLAIN\r\n");
        assert!(!command.is_sensitive());

        let continuation = ContinuationRequest {
            text: String::new(),
        };
        let next = command
            .next_line_after_continuation(&continuation, &logger())
            .unwrap();
        assert_eq!(next, b"AGJvYgBtdW5jaGtpbg==\r\n");
        assert!(command.is_sensitive());
    }

    #[test]
    fn test_xoauth2_payload() {
        let mut command = AuthXoauth2Command::new("someuser@example.com", "ya29.token", &with_sasl_ir(), 1);

        let line = command.command_line().unwrap();
        let expected = format!(
            "AUTHENTICATE XOAUTH2 {}\r\n",
            base64.encode("user=someuser@example.com\u{1}auth=Bearer ya29.token\u{1}\u{1}")
        );
        assert_eq!(line, expected.into_bytes());
    }

    #[test]
    fn test_cleanup_drops_secrets() {
        let mut command = oauth_bearer(&with_sasl_ir());
        command.cleanup();
        assert!(command.token.is_none());
        // Serialization is refused once the secret is gone, and the error
        // is attributed to the session the command was built for.
        let error = command.command_line().unwrap_err();
        assert_eq!(error.kind(), FailureType::ProtocolViolation);
        assert_eq!(error.session_id(), 1);
        command.cleanup();

        let mut plain = AuthPlainCommand::with_authzid(Some("a"), "b", "c", &with_sasl_ir(), 1);
        plain.cleanup();
        assert!(plain.password.is_none());
        assert!(plain.authzid.is_none());
    }

    #[test]
    fn test_terminate_is_unsupported() {
        let command = oauth_bearer(&with_sasl_ir());
        assert_eq!(
            command.terminate_line().unwrap_err().kind(),
            FailureType::OperationNotSupportedForCommand
        );
        assert!(command.streaming_queue().is_none());
    }
}
