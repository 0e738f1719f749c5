/// IRC line codec: frames a byte stream into IRC messages.
///
/// Lines may end in `\r\n`, a bare `\n` or a bare `\r`; empty lines are
/// skipped. A bad line is yielded as an item-level [`LineError`] instead of
/// a stream error, so one garbled line never tears down the connection.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, ParseError};

/// Maximum line length including the `\r\n` terminator (RFC 2812).
pub const MAX_LINE_LENGTH: usize = 512;

/// Longest line body accepted, terminator excluded.
const MAX_BODY: usize = MAX_LINE_LENGTH - 2;

/// A single line that could not be turned into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    TooLong,
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A tokio codec that frames IRC messages on line boundaries.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
}

fn terminator(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|b| *b == b'\n' || *b == b'\r')
}

impl LineCodec {
    /// Consume `pos` bytes of line plus its terminator (`\r\n` counts once).
    fn take_line(src: &mut BytesMut, pos: usize) -> BytesMut {
        let line = src.split_to(pos);
        let first = src[0];
        src.advance(1);
        if first == b'\r' && src.first() == Some(&b'\n') {
            src.advance(1);
        }
        line
    }
}

impl Decoder for LineCodec {
    type Item = Result<Message, LineError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = terminator(src) else {
                if self.discarding {
                    src.clear();
                    return Ok(None);
                }
                if src.len() > MAX_BODY {
                    src.clear();
                    self.discarding = true;
                    return Ok(Some(Err(LineError::TooLong)));
                }
                return Ok(None);
            };

            let line = Self::take_line(src, pos);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.is_empty() {
                continue;
            }
            if line.len() > MAX_BODY {
                return Ok(Some(Err(LineError::TooLong)));
            }

            let text = String::from_utf8_lossy(&line);
            return Ok(Some(Message::parse(&text).map_err(LineError::from)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        // Unterminated final line: accept it rather than erroring the stream.
        if src.is_empty() || self.discarding {
            src.clear();
            return Ok(None);
        }
        let line = src.split();
        let text = String::from_utf8_lossy(&line);
        Ok(Some(Message::parse(&text).map_err(LineError::from)))
    }
}

impl Encoder<Message> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;

    fn next(codec: &mut LineCodec, buf: &mut BytesMut) -> Option<Result<Message, LineError>> {
        codec.decode(buf).unwrap()
    }

    // ── Decoder ──────────────────────────────────────────────────

    #[test]
    fn decode_crlf_line() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("NICK alice\r\n");
        let msg = next(&mut codec, &mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_bare_terminators() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("NICK alice\nUSER a 0 * :A\rPING x\r\n");
        assert_eq!(next(&mut codec, &mut buf).unwrap().unwrap().command, "NICK");
        assert_eq!(next(&mut codec, &mut buf).unwrap().unwrap().command, "USER");
        assert_eq!(next(&mut codec, &mut buf).unwrap().unwrap().command, "PING");
        assert!(next(&mut codec, &mut buf).is_none());
    }

    #[test]
    fn decode_crlf_split_across_reads() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("NICK alice\r");
        assert_eq!(next(&mut codec, &mut buf).unwrap().unwrap().command, "NICK");

        // The dangling `\n` shows up as an empty line and is skipped.
        buf.extend_from_slice(b"\nLIST\r\n");
        assert_eq!(next(&mut codec, &mut buf).unwrap().unwrap().command, "LIST");
    }

    #[test]
    fn decode_partial_line_waits() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("JOIN #r");
        assert!(next(&mut codec, &mut buf).is_none());
        buf.extend_from_slice(b"ust\r\n");
        let msg = next(&mut codec, &mut buf).unwrap().unwrap();
        assert_eq!(msg.params, vec!["#rust"]);
    }

    #[test]
    fn decode_skips_blank_lines() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("\r\n\r\n\nLIST\r\n");
        assert_eq!(next(&mut codec, &mut buf).unwrap().unwrap().command, "LIST");
    }

    #[test]
    fn decode_malformed_line_is_item_error() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(":onlyprefix\r\nLIST\r\n");
        assert_eq!(
            next(&mut codec, &mut buf),
            Some(Err(LineError::Parse(ParseError::MissingCommand)))
        );
        assert_eq!(next(&mut codec, &mut buf).unwrap().unwrap().command, "LIST");
    }

    #[test]
    fn decode_oversized_complete_line_then_recovers() {
        let mut codec = LineCodec::default();
        let mut raw = vec![b'A'; MAX_LINE_LENGTH];
        raw.extend_from_slice(b"\r\nLIST\r\n");
        let mut buf = BytesMut::from(raw.as_slice());
        assert_eq!(next(&mut codec, &mut buf), Some(Err(LineError::TooLong)));
        assert_eq!(next(&mut codec, &mut buf).unwrap().unwrap().command, "LIST");
    }

    #[test]
    fn decode_oversized_partial_line_discards_remainder() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 1].as_slice());
        assert_eq!(next(&mut codec, &mut buf), Some(Err(LineError::TooLong)));
        assert!(buf.is_empty());

        // Rest of the oversized line, then a good one.
        buf.extend_from_slice(b"AAAA\r\nPING t\r\n");
        let msg = next(&mut codec, &mut buf).unwrap().unwrap();
        assert_eq!(msg.command, "PING");
    }

    #[test]
    fn decode_lossy_utf8() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from(&b"PRIVMSG #a :caf\xe9\r\n"[..]);
        let msg = next(&mut codec, &mut buf).unwrap().unwrap();
        assert_eq!(msg.params[1], "caf\u{fffd}");
    }

    #[test]
    fn decode_eof_flushes_unterminated_line() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::from("QUIT :gone");
        let msg = codec.decode_eof(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(msg.command, "QUIT");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    // ── Encoder ──────────────────────────────────────────────────

    #[test]
    fn encode_appends_crlf() {
        let mut codec = LineCodec::default();
        let mut buf = BytesMut::new();
        let msg = Message::new(
            Some("alice!al@127.0.0.1".into()),
            "PRIVMSG",
            vec!["#a".into(), "hi".into()],
        );
        codec.encode(msg, &mut buf).unwrap();
        assert_eq!(&buf[..], b":alice!al@127.0.0.1 PRIVMSG #a :hi\r\n");
    }
}
