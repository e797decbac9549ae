//! Line codec.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::common::error::TransportError;

/// Longest inbound line accepted, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 8191;

/// Splits the byte stream on `\n`, dropping the optional `\r`.
///
/// Lines that are not valid UTF-8 are decoded as Latin-1, which never fails.
#[derive(Debug, Clone)]
pub struct IrcLineCodec {
    max_length: usize,
}

impl IrcLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Default for IrcLineCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

impl Decoder for IrcLineCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(end) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_length {
                    return Err(TransportError::LineTooLong { max: self.max_length });
                }
                return Ok(None);
            };

            let line = src.split_to(end + 1);
            let mut body = &line[..end];
            if let Some(stripped) = body.strip_suffix(b"\r") {
                body = stripped;
            }
            if body.len() > self.max_length {
                return Err(TransportError::LineTooLong { max: self.max_length });
            }
            if !body.is_empty() {
                return Ok(Some(decode_text(body)));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Unterminated last line
        let rest = src.split();
        let text = decode_text(&rest);
        let text = text.trim_end_matches('\r');
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

impl Encoder<String> for IrcLineCodec {
    type Error = TransportError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // A line break inside would smuggle a second command
        let line = item.split(['\r', '\n']).next().unwrap_or_default();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
