// Wire framing: every message is `[json_control_dict, body_frame_0, ...]`
// (§6.1). Over a real byte stream (rather than a message-oriented transport
// like the original's zeromq sockets) this needs explicit length prefixes:
//
//   u32 LE  total frame length (excludes these 4 bytes)
//   u32 LE  control length
//   <control length> bytes of control, utf-8 JSON
//   u32 LE  body frame count
//   for each body frame:
//     u32 LE  body length
//     <body length> bytes
//
// Trailing empty body frames are never emitted: a message with no body
// frames has a body frame count of zero rather than one empty frame.

use base::{err, Error};
use serde_json::Value;

#[derive(Clone, Debug)]
pub struct Frame {
    pub control: Value,
    pub bodies: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new(control: Value) -> Self {
        Self {
            control,
            bodies: Vec::new(),
        }
    }

    pub fn with_bodies(control: Value, bodies: Vec<Vec<u8>>) -> Self {
        // Drop empty trailing frames so body.is_empty() in `bodies` round-trips
        // as a clean zero-length frame list, matching the original's
        // suppression of zero-size bodies.
        let mut bodies = bodies;
        while matches!(bodies.last(), Some(b) if b.is_empty()) {
            bodies.pop();
        }
        Self { control, bodies }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let control_bytes = serde_json::to_vec(&self.control)?;
        let mut inner = Vec::with_capacity(control_bytes.len() + 16);
        inner.extend_from_slice(&(control_bytes.len() as u32).to_le_bytes());
        inner.extend_from_slice(&control_bytes);
        inner.extend_from_slice(&(self.bodies.len() as u32).to_le_bytes());
        for body in &self.bodies {
            inner.extend_from_slice(&(body.len() as u32).to_le_bytes());
            inner.extend_from_slice(body);
        }
        let mut out = Vec::with_capacity(inner.len() + 4);
        out.extend_from_slice(&(inner.len() as u32).to_le_bytes());
        out.extend_from_slice(&inner);
        Ok(out)
    }
}

const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// Accumulates bytes arriving from a non-blocking socket and yields
/// complete frames as they become available.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode as many complete frames as are currently buffered.
    pub fn drain_complete(&mut self) -> Result<Vec<Frame>, Error> {
        let mut frames = Vec::new();
        loop {
            match self.try_decode_one()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }

    fn try_decode_one(&mut self) -> Result<Option<Frame>, Error> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let total_len = u32::from_le_bytes(self.buf[0..4].try_into().unwrap());
        if total_len > MAX_FRAME_LEN {
            return Err(err("frame exceeds maximum size"));
        }
        let total_len = total_len as usize;
        if self.buf.len() < 4 + total_len {
            return Ok(None);
        }
        let inner = self.buf[4..4 + total_len].to_vec();
        let frame = decode_inner(&inner)?;
        self.buf.drain(0..4 + total_len);
        Ok(Some(frame))
    }
}

fn decode_inner(inner: &[u8]) -> Result<Frame, Error> {
    let mut pos = 0usize;
    let control_len = read_u32(inner, &mut pos)? as usize;
    if pos + control_len > inner.len() {
        return Err(err("truncated control frame"));
    }
    let control: Value = serde_json::from_slice(&inner[pos..pos + control_len])?;
    pos += control_len;

    let body_count = read_u32(inner, &mut pos)?;
    let mut bodies = Vec::with_capacity(body_count as usize);
    for _ in 0..body_count {
        let body_len = read_u32(inner, &mut pos)? as usize;
        if pos + body_len > inner.len() {
            return Err(err("truncated body frame"));
        }
        bodies.push(inner[pos..pos + body_len].to_vec());
        pos += body_len;
    }
    Ok(Frame { control, bodies })
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, Error> {
    if *pos + 4 > buf.len() {
        return Err(err("truncated frame header"));
    }
    let value = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_with_no_body() {
        let frame = Frame::new(json!({"message-type": "ack", "message-id": "abc"}));
        let bytes = frame.encode().unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        let decoded = decoder.drain_complete().unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].control, frame.control);
        assert!(decoded[0].bodies.is_empty());
    }

    #[test]
    fn round_trips_with_multiple_bodies() {
        let frame = Frame::with_bodies(
            json!({"message-type": "archive-key-start"}),
            vec![b"hello".to_vec(), b"world".to_vec()],
        );
        let bytes = frame.encode().unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        let decoded = decoder.drain_complete().unwrap();
        assert_eq!(decoded[0].bodies, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn suppresses_trailing_empty_bodies() {
        let frame = Frame::with_bodies(json!({}), vec![b"x".to_vec(), Vec::new()]);
        assert_eq!(frame.bodies, vec![b"x".to_vec()]);
    }

    #[test]
    fn decoder_handles_partial_delivery() {
        let frame = Frame::new(json!({"a": 1}));
        let bytes = frame.encode().unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..bytes.len() - 2]);
        assert!(decoder.drain_complete().unwrap().is_empty());
        decoder.push(&bytes[bytes.len() - 2..]);
        assert_eq!(decoder.drain_complete().unwrap().len(), 1);
    }

    #[test]
    fn decoder_handles_two_frames_in_one_push() {
        let a = Frame::new(json!({"n": 1})).encode().unwrap();
        let b = Frame::new(json!({"n": 2})).encode().unwrap();
        let mut combined = a.clone();
        combined.extend_from_slice(&b);
        let mut decoder = FrameDecoder::new();
        decoder.push(&combined);
        let frames = decoder.drain_complete().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].control, json!({"n": 1}));
        assert_eq!(frames[1].control, json!({"n": 2}));
    }
}
