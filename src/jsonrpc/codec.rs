//! Newline-delimited JSON framing for the backend's stdio.
//!
//! One JSON document per line, `\n` terminated. Decoding never fails on bad
//! content: a malformed or oversized line becomes a [`Frame::Malformed`]
//! and the decoder resynchronizes on the next newline. Only I/O errors end
//! the stream.

use std::{cmp, io};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::jsonrpc::message::Message;

/// One decoded line.
#[derive(Debug)]
pub enum Frame {
    Message(Message),
    Malformed(FrameError),
}

/// Why a line was discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("line exceeds {max} bytes")]
    TooLong { max: usize },
    #[error("invalid JSON-RPC message: {0}")]
    Invalid(String),
}

/// Codec for newline-delimited JSON-RPC.
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    max_line_bytes: usize,
    /// Bytes already scanned for a newline.
    next_index: usize,
    /// Inside an oversized line; drop bytes until the next newline.
    discarding: bool,
}

impl JsonLineCodec {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
            discarding: false,
        }
    }

    fn parse(line: &[u8]) -> Frame {
        match serde_json::from_slice::<Message>(line) {
            Ok(message) => Frame::Message(message),
            Err(e) => Frame::Malformed(FrameError::Invalid(e.to_string())),
        }
    }
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end]
}

impl Decoder for JsonLineCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            let read_to = cmp::min(self.max_line_bytes.saturating_add(1), buf.len());
            let newline = buf[self.next_index..read_to].iter().position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(offset + self.next_index + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(Frame::Malformed(FrameError::TooLong {
                        max: self.max_line_bytes,
                    })));
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = offset + self.next_index;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    let line = trim(&line[..end]);
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(Self::parse(line)));
                }
                (false, None) if buf.len() > self.max_line_bytes => {
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(Some(Frame::Malformed(FrameError::TooLong {
                max: self.max_line_bytes,
            })));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split();
        let line = trim(&line);
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::parse(line)))
    }
}

impl Encoder<Message> for JsonLineCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), io::Error> {
        // serde_json escapes control characters, so the document never
        // contains a raw newline.
        serde_json::to_writer((&mut *buf).writer(), &message)?;
        buf.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(codec: &mut JsonLineCodec, input: &[u8]) -> Vec<Frame> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        while let Some(frame) = codec.decode_eof(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_garbage_line_does_not_end_stream() {
        let mut codec = JsonLineCodec::new(1024);
        let frames = decode_all(
            &mut codec,
            b"{\"id\":1,\"result\":\"a\"}\nnot json at all\n{\"method\":\"tick\"}\n",
        );

        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], Frame::Message(Message::Response(_))));
        assert!(matches!(frames[1], Frame::Malformed(FrameError::Invalid(_))));
        assert!(matches!(frames[2], Frame::Message(Message::Notification(_))));
    }

    #[test]
    fn test_invalid_envelope_is_malformed() {
        let mut codec = JsonLineCodec::new(1024);
        let frames = decode_all(&mut codec, b"{\"hello\":\"world\"}\n");
        assert!(matches!(frames[0], Frame::Malformed(FrameError::Invalid(_))));
    }

    #[test]
    fn test_partial_line_waits_for_more_bytes() {
        let mut codec = JsonLineCodec::new(1024);
        let mut buf = BytesMut::from(&b"{\"id\":1,\"res"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ult\":true}\r\n");
        match codec.decode(&mut buf).unwrap() {
            Some(Frame::Message(message)) => assert_eq!(message, Message::response(1i64, json!(true))),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut codec = JsonLineCodec::new(1024);
        let frames = decode_all(&mut codec, b"\n   \n{\"method\":\"a\"}\n\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_oversized_line_is_discarded_up_to_newline() {
        let mut codec = JsonLineCodec::new(16);
        let mut input = vec![b'x'; 40];
        input.extend_from_slice(b"\n{\"method\":\"ok\"}\n");

        let frames = decode_all(&mut codec, &input);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Malformed(FrameError::TooLong { max: 16 })));
        assert!(matches!(frames[1], Frame::Message(Message::Notification(_))));
    }

    #[test]
    fn test_unterminated_final_line_is_parsed_at_eof() {
        let mut codec = JsonLineCodec::new(1024);
        let frames = decode_all(&mut codec, b"{\"id\":\"x\",\"result\":1}");
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Message(Message::Response(_))));
    }

    #[test]
    fn test_encode_appends_single_newline() {
        let mut codec = JsonLineCodec::new(1024);
        let mut buf = BytesMut::new();
        let params = json!({"text": "line one\nline two"});
        codec
            .encode(Message::request(7i64, "echo", Some(params)), &mut buf)
            .unwrap();

        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(buf.last(), Some(&b'\n'));
        let decoded: serde_json::Value = serde_json::from_slice(&buf[..buf.len() - 1]).unwrap();
        assert_eq!(decoded["params"]["text"], "line one\nline two");
    }
}
