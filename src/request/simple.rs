//! The one-line command family.
//!
//! Everything that fits in a single `NAME [args] CRLF` frame: mailbox
//! management, LOGIN, NOOP, LOGOUT, CAPABILITY, NAMESPACE, and the
//! COMPRESS trigger. None of these stream or take continuations; they
//! differ only in their serialized line, their sensitivity, and their
//! command type.

use crate::core::write_string_arg;
use crate::error::{FailureType, ImapClientError};
use crate::mailbox::encode_utf7;
use crate::request::{CommandType, ImapRequest};

/// A stateless one-line command.
#[derive(Debug)]
pub struct SimpleCommand {
    kind: CommandType,
    line: Vec<u8>,
    sensitive: bool,
    debug: String,
    emitted: bool,
}

#[derive(Debug, Default)]
struct LineBuilder {
    line: Vec<u8>,
}

impl LineBuilder {
    fn new(name: &str) -> Self {
        Self {
            line: name.as_bytes().to_vec(),
        }
    }

    /// Appends a string argument: atom, quoted, or literal as needed.
    fn arg(mut self, value: &str) -> Self {
        self.line.push(b' ');
        write_string_arg(&mut self.line, value);
        self
    }

    /// Appends a mailbox name, modified-UTF-7 encoded first.
    fn mailbox(self, name: &str) -> Self {
        self.arg(&encode_utf7(name))
    }

    /// Appends a raw token verbatim, e.g. a parenthesized list.
    fn raw(mut self, token: &str) -> Self {
        self.line.push(b' ');
        self.line.extend_from_slice(token.as_bytes());
        self
    }

    /// Appends a LIST/LSUB pattern. The list wildcards `%` and `*` stay
    /// bare; anything a pattern token cannot carry falls back to the
    /// regular string forms.
    fn list_pattern(self, pattern: &str) -> Self {
        let is_pattern_char = |byte: u8| {
            byte == b'%' || byte == b'*' || (byte.is_ascii_graphic() && !b"(){\"\\]".contains(&byte))
        };
        if !pattern.is_empty() && pattern.bytes().all(is_pattern_char) {
            self.raw(pattern)
        } else {
            self.arg(pattern)
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.line.extend_from_slice(b"\r\n");
        self.line
    }
}

impl SimpleCommand {
    fn new(kind: CommandType, builder: LineBuilder) -> Self {
        let line = builder.finish();
        let debug = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
        Self {
            kind,
            line,
            sensitive: false,
            debug,
            emitted: false,
        }
    }

    /// `LOGIN user password`. The password never reaches a debug sink.
    pub fn login(username: &str, password: &str) -> Self {
        let mut command = Self::new(
            CommandType::Login,
            LineBuilder::new("LOGIN").arg(username).arg(password),
        );
        command.sensitive = true;
        command.debug = format!("LOGIN FOR USER:{username}");
        command
    }

    pub fn capability() -> Self {
        Self::new(CommandType::Capability, LineBuilder::new("CAPABILITY"))
    }

    pub fn noop() -> Self {
        Self::new(CommandType::Noop, LineBuilder::new("NOOP"))
    }

    pub fn logout() -> Self {
        Self::new(CommandType::Logout, LineBuilder::new("LOGOUT"))
    }

    pub fn namespace() -> Self {
        Self::new(CommandType::Namespace, LineBuilder::new("NAMESPACE"))
    }

    pub fn select(mailbox: &str) -> Self {
        Self::new(
            CommandType::Select,
            LineBuilder::new("SELECT").mailbox(mailbox),
        )
    }

    pub fn examine(mailbox: &str) -> Self {
        Self::new(
            CommandType::Examine,
            LineBuilder::new("EXAMINE").mailbox(mailbox),
        )
    }

    /// `STATUS mailbox (ITEM …)`, e.g. `status("INBOX", &["MESSAGES", "UIDNEXT"])`.
    pub fn status(mailbox: &str, items: &[&str]) -> Self {
        Self::new(
            CommandType::Status,
            LineBuilder::new("STATUS")
                .mailbox(mailbox)
                .raw(&format!("({})", items.join(" "))),
        )
    }

    pub fn create(mailbox: &str) -> Self {
        Self::new(
            CommandType::Create,
            LineBuilder::new("CREATE").mailbox(mailbox),
        )
    }

    pub fn delete(mailbox: &str) -> Self {
        Self::new(
            CommandType::Delete,
            LineBuilder::new("DELETE").mailbox(mailbox),
        )
    }

    pub fn rename(from: &str, to: &str) -> Self {
        Self::new(
            CommandType::Rename,
            LineBuilder::new("RENAME").mailbox(from).mailbox(to),
        )
    }

    pub fn list(reference: &str, pattern: &str) -> Self {
        Self::new(
            CommandType::List,
            LineBuilder::new("LIST")
                .mailbox(reference)
                .list_pattern(pattern),
        )
    }

    pub fn lsub(reference: &str, pattern: &str) -> Self {
        Self::new(
            CommandType::Lsub,
            LineBuilder::new("LSUB")
                .mailbox(reference)
                .list_pattern(pattern),
        )
    }

    pub fn subscribe(mailbox: &str) -> Self {
        Self::new(
            CommandType::Subscribe,
            LineBuilder::new("SUBSCRIBE").mailbox(mailbox),
        )
    }

    pub fn unsubscribe(mailbox: &str) -> Self {
        Self::new(
            CommandType::Unsubscribe,
            LineBuilder::new("UNSUBSCRIBE").mailbox(mailbox),
        )
    }

    pub fn check() -> Self {
        Self::new(CommandType::Check, LineBuilder::new("CHECK"))
    }

    pub fn close() -> Self {
        Self::new(CommandType::Close, LineBuilder::new("CLOSE"))
    }

    pub fn expunge() -> Self {
        Self::new(CommandType::Expunge, LineBuilder::new("EXPUNGE"))
    }

    /// `COMPRESS DEFLATE` (RFC 4978). On its OK completion the session
    /// splices DEFLATE stages into the transport pipeline.
    pub fn compress_deflate() -> Self {
        Self::new(
            CommandType::Compress,
            LineBuilder::new("COMPRESS").raw("DEFLATE"),
        )
    }
}

impl ImapRequest for SimpleCommand {
    fn command_line(&mut self) -> Result<Vec<u8>, ImapClientError> {
        if self.emitted {
            return Err(ImapClientError::new(
                FailureType::OperationNotSupportedForCommand,
                0,
            ));
        }
        self.emitted = true;
        Ok(self.line.clone())
    }

    fn command_type(&self) -> CommandType {
        self.kind
    }

    fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    fn debug_line(&self) -> String {
        self.debug.clone()
    }

    fn cleanup(&mut self) {
        // LOGIN is the only secret-bearing member; dropping the serialized
        // line releases the password bytes for everyone.
        self.line = Vec::new();
    }
}
