//! Server capability snapshot.
//!
//! A [`Capability`] is created once from a `* CAPABILITY …` data line (or an
//! `OK [CAPABILITY …]` response code) and is immutable for as long as it is
//! held; the session replaces its snapshot wholesale after commands that
//! invalidate it (LOGIN, AUTHENTICATE).

use std::collections::HashMap;

use crate::response::{CommandResponse, ResponseCode};

/// Capability advertising that the client may send its SASL initial
/// response on the `AUTHENTICATE` line itself (RFC 4959).
pub const SASL_IR: &str = "SASL-IR";

/// Capability name carrying the supported SASL mechanisms, e.g. `AUTH=PLAIN`.
pub const AUTH: &str = "AUTH";

/// Capability advertising DEFLATE compression (RFC 4978).
pub const COMPRESS: &str = "COMPRESS";

/// Capability advertising IDLE support (RFC 2177).
pub const IDLE: &str = "IDLE";

/// Parsed set of capabilities advertised by the server.
///
/// Names are stored upper-cased; membership tests are case-insensitive.
/// Capabilities of the form `NAME=PARAM` collect their parameters in
/// advertisement order under `NAME`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Capability {
    entries: HashMap<String, Vec<String>>,
}

impl Capability {
    /// Builds a capability set from whitespace-split tokens.
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let mut entries: HashMap<String, Vec<String>> = HashMap::new();

        for token in tokens {
            match token.split_once('=') {
                Some((name, param)) if !param.is_empty() => {
                    entries
                        .entry(name.to_ascii_uppercase())
                        .or_default()
                        .push(param.to_owned());
                }
                _ => {
                    entries.entry(token.to_ascii_uppercase()).or_default();
                }
            }
        }

        Self { entries }
    }

    /// Extracts the capability set from a completed CAPABILITY (or any other)
    /// exchange: an untagged `CAPABILITY` data line wins, otherwise an
    /// `OK [CAPABILITY …]` response code on the completion line.
    pub fn from_response(response: &CommandResponse) -> Option<Self> {
        for untagged in &response.untagged {
            if untagged.keyword.eq_ignore_ascii_case("CAPABILITY") {
                return Some(Self::from_tokens(untagged.text.split_ascii_whitespace()));
            }
        }

        match &response.code {
            Some(ResponseCode::Capability(tokens)) => {
                Some(Self::from_tokens(tokens.iter().map(String::as_str)))
            }
            _ => None,
        }
    }

    /// Case-insensitive membership test on the capability name.
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_uppercase())
    }

    /// Case-insensitive test for a parameterized capability, e.g.
    /// `has_param(AUTH, "PLAIN")` for `AUTH=PLAIN`.
    pub fn has_param(&self, name: &str, param: &str) -> bool {
        self.params(name)
            .map(|params| params.iter().any(|have| have.eq_ignore_ascii_case(param)))
            .unwrap_or(false)
    }

    /// Parameters advertised for `name`, in advertisement order.
    pub fn params(&self, name: &str) -> Option<&[String]> {
        self.entries
            .get(&name.to_ascii_uppercase())
            .map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_is_case_insensitive() {
        let capability =
            Capability::from_tokens("IMAP4rev1 SASL-IR AUTH=PLAIN AUTH=XOAUTH2".split(' '));

        assert!(capability.has("imap4rev1"));
        assert!(capability.has(SASL_IR));
        assert!(capability.has("auth"));
        assert!(!capability.has("COMPRESS"));
    }

    #[test]
    fn test_parameters_keep_order() {
        let capability =
            Capability::from_tokens("AUTH=PLAIN AUTH=XOAUTH2 AUTH=OAUTHBEARER".split(' '));

        assert_eq!(
            capability.params(AUTH).unwrap(),
            &["PLAIN", "XOAUTH2", "OAUTHBEARER"]
        );
        assert!(capability.has_param(AUTH, "xoauth2"));
        assert!(!capability.has_param(AUTH, "LOGIN"));
    }

    #[test]
    fn test_empty_set() {
        let capability = Capability::default();
        assert!(!capability.has(SASL_IR));
        assert!(capability.params(AUTH).is_none());
    }
}
