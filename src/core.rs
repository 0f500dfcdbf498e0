//! Core wire-level building blocks: command tags and argument encoding.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};

/// A command tag, e.g. `A000001`.
///
/// Tags are allocated by the session and prefixed to every outbound command
/// line; the server echoes the tag in its completion line.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Tag(String);

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic tag source. Tags are never reused within a session.
#[derive(Debug)]
pub(crate) struct TagGenerator {
    seq: u64,
}

impl TagGenerator {
    pub(crate) fn new() -> Self {
        Self { seq: 0 }
    }

    pub(crate) fn next_tag(&mut self) -> Tag {
        self.seq += 1;
        Tag(format!("A{:06}", self.seq))
    }
}

/// Escapes `\` and `"` for use inside a quoted string.
pub(crate) fn escape_quoted(unescaped: &str) -> Cow<'_, str> {
    if unescaped.contains('\\') || unescaped.contains('"') {
        Cow::Owned(unescaped.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        Cow::Borrowed(unescaped)
    }
}

fn is_atom_char(byte: u8) -> bool {
    // atom-specials plus `]` kept conservative: anything outside this set
    // goes through the quoted or literal form.
    matches!(byte, 0x21 | 0x23 | 0x24 | 0x26..=0x27 | 0x2b..=0x5b | 0x5e..=0x7a | 0x7c | 0x7e)
}

fn is_atom(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(is_atom_char)
}

/// Appends one command argument, choosing atom, quoted, or literal form.
///
/// Atoms pass through verbatim. Values containing SP, specials, or nothing
/// at all are quoted with `\`-escaping. Values a quoted string cannot carry
/// (CR, LF, or non-ASCII bytes) fall back to a synchronizing literal.
pub(crate) fn write_string_arg(out: &mut Vec<u8>, value: &str) {
    if is_atom(value) {
        out.extend_from_slice(value.as_bytes());
    } else if value.is_ascii() && !value.contains(['\r', '\n']) {
        out.push(b'"');
        out.extend_from_slice(escape_quoted(value).as_bytes());
        out.push(b'"');
    } else {
        out.extend_from_slice(format!("{{{}}}\r\n", value.len()).as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
}
