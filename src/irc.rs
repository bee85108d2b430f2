//! IRC message codec for tokio.
//!
//! Wraps [`LineCodec`] and parses lines into [`Message`] values. Lines
//! that fail to parse are logged and skipped; only transport-level
//! faults surface as stream errors. Outgoing messages are validated
//! against the wire limits before they reach the socket.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::{self, ProtocolError};
use crate::line::{LineCodec, MAX_LINE_LEN, MAX_PAYLOAD_LEN};
use crate::message::Message;

/// Tokio codec for encoding and decoding IRC messages.
pub struct IrcCodec {
    inner: LineCodec,
}

impl IrcCodec {
    /// Create a new codec with the specified encoding label.
    pub fn new(label: &str) -> error::Result<Self> {
        LineCodec::new(label).map(|codec| Self { inner: codec })
    }

    /// Payload length (everything after the tag segment) of a wire line.
    fn payload_len(line: &str) -> usize {
        if let Some(rest) = line.strip_prefix('@') {
            match rest.find(' ') {
                Some(idx) => rest.len() - idx - 1,
                None => rest.len(),
            }
        } else {
            line.len()
        }
    }
}

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<Message>> {
        loop {
            let line = match self.inner.decode(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(ProtocolError::MessageTooLong { actual, limit }) => {
                    warn!(actual, limit, "dropping over-long line");
                    continue;
                }
                Err(err) => return Err(err),
            };

            // The payload budget excludes tags; CRLF accounts for 2.
            if Self::payload_len(&line) + 2 > MAX_PAYLOAD_LEN {
                warn!(len = line.len(), "dropping line with over-long payload");
                continue;
            }

            match line.parse::<Message>() {
                Ok(msg) => return Ok(Some(msg)),
                Err(cause) => {
                    warn!(%line, %cause, "skipping malformed line");
                    continue;
                }
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> error::Result<()> {
        let line = msg.to_wire().map_err(|cause| ProtocolError::MalformedLine {
            line: msg.to_string(),
            cause,
        })?;

        if line.len() + 2 > MAX_LINE_LEN {
            return Err(ProtocolError::MessageTooLong {
                actual: line.len() + 2,
                limit: MAX_LINE_LEN,
            });
        }
        if Self::payload_len(&line) + 2 > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::MessageTooLong {
                actual: Self::payload_len(&line) + 2,
                limit: MAX_PAYLOAD_LEN,
            });
        }

        self.inner.encode(line, dst)
    }
}
