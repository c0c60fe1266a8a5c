//! Payload escaping.
//!
//! Inside a DATA payload the separator `/` is written as `\/` and the escape
//! character `\` as `\\`. Nothing else is escaped.

use crate::error::WireError;
use crate::message::{ESCAPE, SEPARATOR};
use bytes::{BufMut, Bytes, BytesMut};

#[inline]
fn needs_escape(b: u8) -> bool {
    b == SEPARATOR || b == ESCAPE
}

/// Length of `raw` once escaped.
pub fn escaped_len(raw: &[u8]) -> usize {
    raw.len() + raw.iter().filter(|&&b| needs_escape(b)).count()
}

/// Append the escaped form of `raw` to `buf`.
pub fn escape_into(buf: &mut BytesMut, raw: &[u8]) {
    buf.reserve(escaped_len(raw));
    for &b in raw {
        if needs_escape(b) {
            buf.put_u8(ESCAPE);
        }
        buf.put_u8(b);
    }
}

/// Escape `raw` into a new buffer.
pub fn escape(raw: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(escaped_len(raw));
    escape_into(&mut buf, raw);
    buf.freeze()
}

/// Resolve escapes in an on-wire payload.
///
/// Fails if a raw separator remains or an escape character is not followed
/// by `/` or `\`.
pub fn unescape(escaped: &[u8]) -> Result<Bytes, WireError> {
    let mut out = BytesMut::with_capacity(escaped.len());
    let mut iter = escaped.iter().copied();
    while let Some(b) = iter.next() {
        match b {
            SEPARATOR => return Err(WireError::Escape),
            ESCAPE => match iter.next() {
                Some(next) if needs_escape(next) => out.put_u8(next),
                _ => return Err(WireError::Escape),
            },
            other => out.put_u8(other),
        }
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_special_bytes() {
        assert_eq!(&escape(b"a/b\\c")[..], b"a\\/b\\\\c");
        assert_eq!(escaped_len(b"a/b\\c"), 7);
        assert_eq!(&escape(b"plain text\n")[..], b"plain text\n");
    }

    #[test]
    fn test_unescape_inverts_escape() {
        let samples: [&[u8]; 6] = [
            b"",
            b"hello\n",
            b"/",
            b"\\",
            b"\\/\\//\\\\",
            &[0, 255, b'/', 10, b'\\', 13],
        ];
        for raw in samples {
            let escaped = escape(raw);
            assert_eq!(escaped.len(), escaped_len(raw));
            assert_eq!(&unescape(&escaped).unwrap()[..], raw);
        }
    }

    #[test]
    fn test_escaped_output_has_no_bare_specials() {
        let escaped = escape(b"//\\x/\\");
        let mut i = 0;
        while i < escaped.len() {
            if escaped[i] == ESCAPE {
                assert!(needs_escape(escaped[i + 1]));
                i += 2;
            } else {
                assert_ne!(escaped[i], SEPARATOR);
                i += 1;
            }
        }
    }

    #[test]
    fn test_unescape_rejects_bare_separator() {
        assert_eq!(unescape(b"foo/bar"), Err(WireError::Escape));
    }

    #[test]
    fn test_unescape_rejects_dangling_or_unknown_escape() {
        assert_eq!(unescape(b"foo\\"), Err(WireError::Escape));
        assert_eq!(unescape(b"foo\\n"), Err(WireError::Escape));
    }
}
