//! Credential material for the password- and token-bearing commands.

use std::fmt::{Debug, Formatter};

/// A password or bearer token owned by a LOGIN or AUTHENTICATE command.
///
/// Commands hold their credential behind this wrapper so that no `Debug`
/// dump of a request, pending entry, or session can leak it. The raw
/// material is handed out only through [`reveal`](Secret::reveal), at the
/// payload serialization sites, which keeps every use greppable. There is
/// deliberately no equality or display: the engine serializes credentials,
/// it never compares or prints them.
#[derive(Clone)]
pub(crate) struct Secret(String);

impl Secret {
    pub(crate) fn new(material: impl Into<String>) -> Self {
        Self(material.into())
    }

    /// The raw credential, for building a wire payload.
    pub(crate) fn reveal(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}
