//! Response framing.
//!
//! All interactions transmitted by client and server are in the form of
//! lines, except that a line may announce a literal (`{N}` before its CRLF)
//! in which case the next `N` octets belong to the same record, followed by
//! the rest of the line. The framer accumulates bytes until one complete
//! record is available and then hands it to the response classifier.
//!
//! The framer implements [`tokio_util::codec::Decoder`] but is driven by
//! hand from the session so that a DEFLATE stage can be spliced into the
//! byte path between transport and framer without losing buffered bytes.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

use crate::response::{parse_response, ServerResponse};

/// Hard ceiling on a single literal; a server announcing more than this is
/// treated as misbehaving rather than buffered indefinitely.
const MAX_LITERAL_LENGTH: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("expected `\\r\\n`, got a bare `\\n`")]
    NotCrLf,
    #[error("literal of {length} bytes exceeds the maximum of {max_length}")]
    LiteralTooLarge { length: u32, max_length: u32 },
    #[error("server response could not be classified")]
    ResponseUnclassifiable,
}

impl PartialEq for FramingError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Io(left), Self::Io(right)) => left.kind() == right.kind(),
            (Self::NotCrLf, Self::NotCrLf) => true,
            (Self::ResponseUnclassifiable, Self::ResponseUnclassifiable) => true,
            (
                Self::LiteralTooLarge {
                    length: left_length,
                    max_length: left_max,
                },
                Self::LiteralTooLarge {
                    length: right_length,
                    max_length: right_max,
                },
            ) => left_length == right_length && left_max == right_max,
            _ => false,
        }
    }
}

/// ... reading a line, or reading a counted sequence of octets followed by
/// the rest of the line.
#[derive(Clone, Debug, Eq, PartialEq)]
enum FramingState {
    ReadLine { to_consume_acc: usize },
    ReadLiteral { to_consume_acc: usize, length: u32 },
}

#[derive(Debug)]
pub(crate) struct ResponseFramer {
    state: FramingState,
}

impl ResponseFramer {
    pub(crate) fn new() -> Self {
        Self {
            state: FramingState::ReadLine { to_consume_acc: 0 },
        }
    }
}

/// Skip the first `skip` bytes of `buf` and count how many more bytes are
/// needed to cover the next `\r\n`. `Ok(None)` means no complete line yet;
/// `Err(_)` flags a bare `\n`.
fn find_crlf_inclusive(skip: usize, buf: &[u8]) -> Result<Option<usize>, FramingError> {
    match buf.iter().skip(skip).position(|byte| *byte == b'\n') {
        Some(position) => {
            if position > 0 && buf[skip + position - 1] == b'\r' {
                Ok(Some(position + 1))
            } else {
                Err(FramingError::NotCrLf)
            }
        }
        None => Ok(None),
    }
}

/// Length of the literal announced at the end of `line` (sans CRLF), i.e. a
/// trailing `{N}` or `{N+}`.
fn trailing_literal_length(line: &[u8]) -> Option<u32> {
    let line = line.strip_suffix(b"}")?;
    let open = line.iter().rposition(|byte| *byte == b'{')?;
    let digits = line[open + 1..].strip_suffix(b"+").unwrap_or(&line[open + 1..]);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

impl Decoder for ResponseFramer {
    type Item = ServerResponse;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                FramingState::ReadLine {
                    ref mut to_consume_acc,
                } => match find_crlf_inclusive(*to_consume_acc, src)? {
                    Some(to_consume) => {
                        *to_consume_acc += to_consume;

                        match trailing_literal_length(&src[..*to_consume_acc - 2]) {
                            Some(length) => {
                                if length > MAX_LITERAL_LENGTH {
                                    src.advance(*to_consume_acc);
                                    self.state = FramingState::ReadLine { to_consume_acc: 0 };
                                    return Err(FramingError::LiteralTooLarge {
                                        length,
                                        max_length: MAX_LITERAL_LENGTH,
                                    });
                                }

                                src.reserve(length as usize);
                                self.state = FramingState::ReadLiteral {
                                    to_consume_acc: *to_consume_acc,
                                    length,
                                };
                            }
                            None => {
                                let record = &src[..*to_consume_acc];
                                let outcome = parse_response(record)
                                    .ok_or(FramingError::ResponseUnclassifiable);
                                src.advance(*to_consume_acc);
                                self.state = FramingState::ReadLine { to_consume_acc: 0 };
                                return outcome.map(Some);
                            }
                        }
                    }
                    None => return Ok(None),
                },
                FramingState::ReadLiteral {
                    to_consume_acc,
                    length,
                } => {
                    if to_consume_acc + length as usize <= src.len() {
                        self.state = FramingState::ReadLine {
                            to_consume_acc: to_consume_acc + length as usize,
                        };
                    } else {
                        return Ok(None);
                    }
                }
            }
        }
    }
}
