//! Wire-level server response records.
//!
//! The session classifies every framed record as exactly one of three
//! shapes: a command continuation request (`+ …`), a tagged completion
//! (`A000001 OK …`), or untagged data (`* …`). Anything the response
//! framer hands over that fits none of these is a protocol violation.
//!
//! Untagged payloads are deliberately kept close to the wire (keyword,
//! optional leading number, raw bytes); interpreting mailbox data is the
//! caller's business, not the session's.

use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case, take_while1},
    character::streaming::digit1,
    combinator::{map, map_res, opt, value},
    sequence::{delimited, terminated, tuple},
    IResult,
};

use crate::error::{FailureType, ImapClientError};

/// Status of a tagged completion line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseStatus {
    Ok,
    No,
    Bad,
}

/// A bracketed response code on a status line. Only `[CAPABILITY …]` is
/// interpreted; everything else is carried verbatim.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResponseCode {
    Capability(Vec<String>),
    Other(String),
}

/// `+ …`: the server demands more client input before completing the
/// command in progress.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContinuationRequest {
    /// Everything after `+ `, without the trailing CRLF. For SASL failure
    /// challenges this is the base64-encoded challenge.
    pub text: String,
}

/// A tagged completion line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaggedResponse {
    pub tag: String,
    pub status: ResponseStatus,
    pub code: Option<ResponseCode>,
    pub text: String,
}

/// An untagged (`* …`) data or status line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UntaggedResponse {
    /// Upper-cased response keyword: `CAPABILITY`, `LIST`, `BYE`, `OK`,
    /// `EXISTS`, …
    pub keyword: String,
    /// Leading message count or sequence number for `* <n> EXISTS`-shaped
    /// lines.
    pub number: Option<u32>,
    /// Response code, for status-shaped lines (`OK`, `NO`, `BAD`, `BYE`,
    /// `PREAUTH`).
    pub code: Option<ResponseCode>,
    /// Remainder of the line after the keyword (lossily decoded; may span
    /// literal bytes).
    pub text: String,
    /// The complete record as received, including CRLF and any literals.
    pub raw: Vec<u8>,
}

impl UntaggedResponse {
    /// Whether this record is a status response of the given keyword, e.g.
    /// the `OK` greeting.
    pub fn is_status(&self, keyword: &str) -> bool {
        self.keyword.eq_ignore_ascii_case(keyword)
    }
}

/// One classified server record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServerResponse {
    Continuation(ContinuationRequest),
    Tagged(TaggedResponse),
    Untagged(UntaggedResponse),
}

/// Result payload of a completed command: the tagged status line plus the
/// untagged responses attributed to the command.
#[derive(Debug)]
pub struct CommandResponse {
    pub tag: String,
    pub status: ResponseStatus,
    pub code: Option<ResponseCode>,
    pub text: String,
    pub untagged: Vec<UntaggedResponse>,
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Converts a NO or BAD completion into its typed error; OK passes
    /// through. For callers that treat non-OK as failure.
    pub fn into_result(self, session_id: u64) -> Result<Self, ImapClientError> {
        match self.status {
            ResponseStatus::Ok => Ok(self),
            ResponseStatus::No => Err(ImapClientError::new(
                FailureType::ServerResponseNo,
                session_id,
            )),
            ResponseStatus::Bad => Err(ImapClientError::new(
                FailureType::ServerResponseBad,
                session_id,
            )),
        }
    }
}

// ----- Parsers -----------------------------------------------------------

/// Rest-of-record text. Only the final CRLF is stripped; a record may span
/// literals with embedded line breaks.
fn record_text(input: &[u8]) -> String {
    let text = input.strip_suffix(b"\r\n").unwrap_or(input);
    String::from_utf8_lossy(text).into_owned()
}

fn number(input: &[u8]) -> IResult<&[u8], u32> {
    map_res(digit1, |digits: &[u8]| {
        // Digits only, so from_utf8 cannot fail.
        String::from_utf8_lossy(digits).parse::<u32>()
    })(input)
}

fn status_kind(input: &[u8]) -> IResult<&[u8], ResponseStatus> {
    alt((
        value(ResponseStatus::Ok, tag_no_case("OK")),
        value(ResponseStatus::No, tag_no_case("NO")),
        value(ResponseStatus::Bad, tag_no_case("BAD")),
    ))(input)
}

fn response_code(input: &[u8]) -> IResult<&[u8], ResponseCode> {
    map(
        delimited(tag("["), take_while1(|byte| byte != b']'), tag("]")),
        |inner: &[u8]| {
            let inner = String::from_utf8_lossy(inner);
            match inner.split_once(' ') {
                Some((name, rest)) if name.eq_ignore_ascii_case("CAPABILITY") => {
                    ResponseCode::Capability(
                        rest.split_ascii_whitespace().map(str::to_owned).collect(),
                    )
                }
                _ => ResponseCode::Other(inner.into_owned()),
            }
        },
    )(input)
}

fn keyword_token(input: &[u8]) -> IResult<&[u8], String> {
    map(
        take_while1(|byte: u8| byte != b' ' && byte != b'\r' && byte != b'\n'),
        |token: &[u8]| String::from_utf8_lossy(token).to_ascii_uppercase(),
    )(input)
}

fn tag_token(input: &[u8]) -> IResult<&[u8], String> {
    map(
        take_while1(|byte: u8| byte.is_ascii_alphanumeric()),
        |token: &[u8]| String::from_utf8_lossy(token).into_owned(),
    )(input)
}

fn continuation(input: &[u8]) -> IResult<&[u8], ServerResponse> {
    let (rest, _) = tuple((tag("+"), opt(tag(" "))))(input)?;
    let text = record_text(rest);
    Ok((
        b"",
        ServerResponse::Continuation(ContinuationRequest { text }),
    ))
}

fn untagged(record: &[u8]) -> IResult<&[u8], ServerResponse> {
    let (rest, _) = tag("* ")(record)?;

    // `* 23 EXISTS` carries the number before the keyword.
    let (rest, leading_number) = opt(terminated(number, tag(" ")))(rest)?;
    let (rest, keyword) = keyword_token(rest)?;

    let is_status = matches!(keyword.as_str(), "OK" | "NO" | "BAD" | "BYE" | "PREAUTH");
    let (rest, code) = if is_status {
        opt(delimited(tag(" "), response_code, opt(tag(" "))))(rest)?
    } else {
        (rest, None)
    };

    let rest = rest.strip_prefix(b" ".as_slice()).unwrap_or(rest);
    let text = record_text(rest);

    Ok((
        b"",
        ServerResponse::Untagged(UntaggedResponse {
            keyword,
            number: leading_number,
            code,
            text,
            raw: record.to_vec(),
        }),
    ))
}

fn tagged(input: &[u8]) -> IResult<&[u8], ServerResponse> {
    let (rest, (tag_value, _, status)) = tuple((tag_token, tag(" "), status_kind))(input)?;
    let (rest, code) = opt(delimited(tag(" "), response_code, opt(tag(" "))))(rest)?;
    let rest = rest.strip_prefix(b" ".as_slice()).unwrap_or(rest);
    let text = record_text(rest);

    Ok((
        b"",
        ServerResponse::Tagged(TaggedResponse {
            tag: tag_value,
            status,
            code,
            text,
        }),
    ))
}

/// Classifies one complete record (line plus any literals, CRLF included).
pub(crate) fn parse_response(record: &[u8]) -> Option<ServerResponse> {
    alt((continuation, untagged, tagged))(record)
        .ok()
        .map(|(_, response)| response)
}
