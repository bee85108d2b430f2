//! Line-based codec for tokio.
//!
//! Reads and writes IRC lines on top of a byte stream. Output is always
//! CRLF-terminated; input accepts CRLF, lone CR, or lone LF. Incoming
//! bytes are decoded with the configured encoding; the default is UTF-8
//! with a byte-preserving Latin-1 fallback, so no inbound line is ever
//! rejected for its encoding alone.

use bytes::{Buf, BufMut, BytesMut};
use encoding_rs::Encoding;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{self, ProtocolError};

/// Maximum length of a full line including tags, excluding CRLF.
pub const MAX_LINE_LEN: usize = 8191;

/// Maximum length of the tag-free payload including CRLF.
pub const MAX_PAYLOAD_LEN: usize = 512;

/// How incoming bytes become strings.
enum Decode {
    /// UTF-8, falling back to Latin-1 (each byte maps to U+00XX).
    Utf8Latin1,
    /// A fixed encoding from the WHATWG registry.
    Fixed(&'static Encoding),
}

/// Line codec handling terminator framing and character encoding.
pub struct LineCodec {
    decode: Decode,
    /// Index of the next byte to check for a terminator.
    next_index: usize,
    /// Set after an over-long line; bytes are dropped until the next
    /// terminator.
    discarding: bool,
    max_len: usize,
}

impl LineCodec {
    /// Create a new codec for the given encoding label.
    ///
    /// `"utf-8"` (the default) enables the Latin-1 fallback; any other
    /// label from the WHATWG encoding registry is used as-is.
    pub fn new(label: &str) -> error::Result<Self> {
        let decode = if label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8") {
            Decode::Utf8Latin1
        } else {
            match Encoding::for_label(label.as_bytes()) {
                Some(enc) => Decode::Fixed(enc),
                None => return Err(ProtocolError::UnknownEncoding(label.to_string())),
            }
        };
        Ok(Self {
            decode,
            next_index: 0,
            discarding: false,
            max_len: MAX_LINE_LEN,
        })
    }

    /// Create a codec with a custom maximum line length.
    pub fn with_max_len(label: &str, max_len: usize) -> error::Result<Self> {
        let mut codec = Self::new(label)?;
        codec.max_len = max_len;
        Ok(codec)
    }

    fn decode_bytes(&self, bytes: &[u8]) -> String {
        match self.decode {
            Decode::Utf8Latin1 => match std::str::from_utf8(bytes) {
                Ok(s) => s.to_string(),
                // Latin-1 is total on bytes, so nothing is lost.
                Err(_) => bytes.iter().map(|&b| b as char).collect(),
            },
            Decode::Fixed(enc) => enc.decode(bytes).0.into_owned(),
        }
    }

    fn encode_bytes(&self, s: &str, dst: &mut BytesMut) {
        match self.decode {
            Decode::Utf8Latin1 => dst.put_slice(s.as_bytes()),
            Decode::Fixed(enc) => dst.put_slice(&enc.encode(s).0),
        }
    }

    /// Find the first CR or LF at or after `from`.
    ///
    /// Returns `(line_end, bytes_to_consume)`. A CR as the very last
    /// buffered byte is ambiguous (CRLF may be split across reads), so
    /// it reports "no terminator yet".
    fn find_terminator(buf: &[u8], from: usize) -> Option<(usize, usize)> {
        for (offset, &byte) in buf[from..].iter().enumerate() {
            let i = from + offset;
            match byte {
                b'\n' => return Some((i, i + 1)),
                b'\r' => {
                    if i + 1 < buf.len() {
                        let consume = if buf[i + 1] == b'\n' { i + 2 } else { i + 1 };
                        return Some((i, consume));
                    }
                    return None;
                }
                _ => {}
            }
        }
        None
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<String>> {
        loop {
            match Self::find_terminator(src, self.next_index) {
                Some((line_end, consume)) => {
                    self.next_index = 0;
                    if self.discarding {
                        let dropped = consume;
                        src.advance(dropped);
                        self.discarding = false;
                        return Err(ProtocolError::MessageTooLong {
                            actual: self.max_len + dropped,
                            limit: self.max_len,
                        });
                    }
                    let line = src.split_to(consume);
                    let line = &line[..line_end];
                    if line.len() > self.max_len {
                        return Err(ProtocolError::MessageTooLong {
                            actual: line.len(),
                            limit: self.max_len,
                        });
                    }
                    if line.is_empty() {
                        // Empty lines between messages are tolerated.
                        continue;
                    }
                    return Ok(Some(self.decode_bytes(line)));
                }
                None => {
                    if self.discarding {
                        src.advance(src.len());
                        self.next_index = 0;
                    } else if src.len() > self.max_len {
                        // Over-long partial line: drop what we have and
                        // keep dropping until the next terminator.
                        src.advance(src.len());
                        self.next_index = 0;
                        self.discarding = true;
                    } else {
                        self.next_index = src.len().saturating_sub(1).max(self.next_index);
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> error::Result<Option<String>> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                // Flush an unterminated final line.
                if src.is_empty() || self.discarding {
                    self.discarding = false;
                    src.advance(src.len());
                    return Ok(None);
                }
                let line = src.split_to(src.len());
                self.next_index = 0;
                Ok(Some(self.decode_bytes(&line)))
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: String, dst: &mut BytesMut) -> error::Result<()> {
        self.encode_bytes(&msg, dst);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
