//! Mailbox-name encoding.
//!
//! IMAP4rev1 transmits non-ASCII mailbox names in modified UTF-7
//! (RFC 3501 §5.1.3): printable ASCII passes through, `&` becomes `&-`, and
//! any other run of characters is encoded as modified base64 (the standard
//! alphabet with `,` instead of `/`, no padding) wrapped in `&…-`.

const MODIFIED_BASE64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+,";

fn modified_base64_rank(byte: u8) -> Option<u32> {
    MODIFIED_BASE64
        .iter()
        .position(|&candidate| candidate == byte)
        .map(|rank| rank as u32)
}

/// Encodes a mailbox name into its modified UTF-7 wire form.
///
/// Printable ASCII (including SP) is left alone; quoting is a separate,
/// later concern of argument encoding.
pub fn encode_utf7(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut shifted = false;

    let mut flush = |out: &mut String, acc: u32, bits: u32| {
        if bits > 0 {
            out.push(char::from(
                MODIFIED_BASE64[((acc << (6 - bits)) & 0x3f) as usize],
            ));
        }
        out.push('-');
    };

    for ch in name.chars() {
        if (' '..='~').contains(&ch) {
            if shifted {
                flush(&mut out, acc, bits);
                shifted = false;
                acc = 0;
                bits = 0;
            }
            if ch == '&' {
                out.push_str("&-");
            } else {
                out.push(ch);
            }
        } else {
            if !shifted {
                out.push('&');
                shifted = true;
            }
            // Characters outside the BMP encode as a UTF-16 surrogate pair.
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                acc = (acc << 16) | u32::from(*unit);
                bits += 16;
                while bits >= 6 {
                    out.push(char::from(
                        MODIFIED_BASE64[((acc >> (bits - 6)) & 0x3f) as usize],
                    ));
                    bits -= 6;
                }
            }
        }
    }

    if shifted {
        flush(&mut out, acc, bits);
    }

    out
}

/// Decodes a modified UTF-7 mailbox name. Returns `None` on malformed input
/// (bad base64 alphabet, dangling shifts, or invalid UTF-16).
pub fn decode_utf7(encoded: &str) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(encoded.len());
    let mut acc: u32 = 0;
    let mut bits = 0;
    let mut shifted = false;
    let mut bytes = encoded.bytes().peekable();

    while let Some(byte) = bytes.next() {
        if shifted {
            if byte == b'-' {
                // Leftover bits must be zero padding.
                if bits >= 6 || (acc & ((1 << bits) - 1)) != 0 {
                    return None;
                }
                shifted = false;
                acc = 0;
                bits = 0;
            } else {
                acc = (acc << 6) | modified_base64_rank(byte)?;
                bits += 6;
                if bits >= 16 {
                    units.push(((acc >> (bits - 16)) & 0xffff) as u16);
                    bits -= 16;
                }
            }
        } else if byte == b'&' {
            if bytes.peek() == Some(&b'-') {
                units.push(u16::from(b'&'));
                bytes.next();
            } else {
                shifted = true;
            }
        } else if byte.is_ascii() {
            units.push(u16::from(byte));
        } else {
            return None;
        }
    }

    if shifted {
        return None;
    }

    String::from_utf16(&units).ok()
}
