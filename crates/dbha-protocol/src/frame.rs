//! Report framing.
//!
//! ```text
//! HEADER\r\n
//! <engine-type>\r\n
//! <body-length>\r\n
//! <body-bytes>
//! ```
//!
//! The decoder is a byte-level state machine fed with whatever a single
//! socket read returned. Any malformed byte discards the partial frame
//! and the decoder re-scans byte by byte for the next `HEADER`.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::FrameError;

/// Literal that opens every frame.
pub const HEADER: &[u8] = b"HEADER";

/// Acknowledgement written back after each accepted frame.
pub const ACK: &[u8; 2] = b"OK";

/// Largest accepted body.
pub const MAX_BODY_LEN: usize = 128 * 1024;

/// Longest accepted engine-type line.
const MAX_TYPE_LEN: usize = 64;

/// Decoder position within the frame grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Idle,
    ParseHeader,
    ParseHeaderLf,
    ParseType,
    ParseTypeLf,
    ParseLength,
    ParseLengthLf,
    ParseBody,
}

/// One complete report as received from a detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub engine_type: String,
    pub body: Bytes,
}

impl Frame {
    pub fn new(engine_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            engine_type: engine_type.into(),
            body: body.into(),
        }
    }

    /// Encode into the wire form.
    pub fn encode(&self) -> Bytes {
        encode_frame(&self.engine_type, &self.body)
    }
}

/// Encode an `(engine-type, body)` pair into the wire form.
pub fn encode_frame(engine_type: &str, body: &[u8]) -> Bytes {
    let length = body.len().to_string();
    let mut buf =
        BytesMut::with_capacity(HEADER.len() + engine_type.len() + length.len() + body.len() + 6);
    buf.put_slice(HEADER);
    buf.put_slice(b"\r\n");
    buf.put_slice(engine_type.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(length.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(body);
    buf.freeze()
}

/// Incremental frame decoder for one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    /// Bytes of `HEADER` matched so far.
    header_pos: usize,
    engine_type: Vec<u8>,
    length: usize,
    length_digits: usize,
    body: BytesMut,
    /// Engine types with a registered implementation.
    known: Arc<HashSet<String>>,
    max_body: usize,
}

impl FrameDecoder {
    pub fn new(known: Arc<HashSet<String>>) -> Self {
        Self::with_max_body(known, MAX_BODY_LEN)
    }

    pub fn with_max_body(known: Arc<HashSet<String>>, max_body: usize) -> Self {
        Self {
            state: DecodeState::Idle,
            header_pos: 0,
            engine_type: Vec::new(),
            length: 0,
            length_digits: 0,
            body: BytesMut::new(),
            known,
            max_body,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Feed bytes from one read. Returns every frame completed by this
    /// input, interleaved with the errors met along the way.
    pub fn decode(&mut self, mut input: &[u8]) -> Vec<Result<Frame, FrameError>> {
        let mut out = Vec::new();

        while !input.is_empty() {
            if self.state == DecodeState::ParseBody {
                let wanted = self.length - self.body.len();
                let take = wanted.min(input.len());
                self.body.extend_from_slice(&input[..take]);
                input = &input[take..];
                if self.body.len() == self.length {
                    out.push(Ok(self.finish()));
                }
                continue;
            }

            let byte = input[0];
            input = &input[1..];
            match self.step(byte) {
                Ok(Some(frame)) => out.push(Ok(frame)),
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "discarding partial frame");
                    self.reset();
                    // The offending byte may start the next header.
                    if byte == HEADER[0] {
                        self.state = DecodeState::ParseHeader;
                        self.header_pos = 1;
                    }
                    out.push(Err(e));
                }
            }
        }

        out
    }

    fn step(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        match self.state {
            DecodeState::Idle => {
                if byte == HEADER[0] {
                    self.state = DecodeState::ParseHeader;
                    self.header_pos = 1;
                }
                Ok(None)
            }
            DecodeState::ParseHeader => {
                if self.header_pos < HEADER.len() {
                    if byte != HEADER[self.header_pos] {
                        return Err(self.malformed(byte));
                    }
                    self.header_pos += 1;
                } else if byte == b'\r' {
                    self.state = DecodeState::ParseHeaderLf;
                } else {
                    return Err(self.malformed(byte));
                }
                Ok(None)
            }
            DecodeState::ParseHeaderLf => {
                self.expect_lf(byte, DecodeState::ParseType)?;
                Ok(None)
            }
            DecodeState::ParseType => {
                if byte == b'\r' && !self.engine_type.is_empty() {
                    self.state = DecodeState::ParseTypeLf;
                } else if byte.is_ascii_graphic() && self.engine_type.len() < MAX_TYPE_LEN {
                    self.engine_type.push(byte);
                } else {
                    return Err(self.malformed(byte));
                }
                Ok(None)
            }
            DecodeState::ParseTypeLf => {
                self.expect_lf(byte, DecodeState::ParseLength)?;
                let engine_type = String::from_utf8_lossy(&self.engine_type);
                if !self.known.contains(engine_type.as_ref()) {
                    return Err(FrameError::UnknownEngine(engine_type.into_owned()));
                }
                Ok(None)
            }
            DecodeState::ParseLength => {
                if byte.is_ascii_digit() {
                    self.length = self
                        .length
                        .saturating_mul(10)
                        .saturating_add(usize::from(byte - b'0'));
                    self.length_digits += 1;
                    if self.length > self.max_body {
                        return Err(FrameError::BodyTooLarge {
                            len: self.length,
                            max: self.max_body,
                        });
                    }
                } else if byte == b'\r' && self.length_digits > 0 {
                    self.state = DecodeState::ParseLengthLf;
                } else {
                    return Err(self.malformed(byte));
                }
                Ok(None)
            }
            DecodeState::ParseLengthLf => {
                self.expect_lf(byte, DecodeState::ParseBody)?;
                if self.length == 0 {
                    return Ok(Some(self.finish()));
                }
                self.body.reserve(self.length);
                Ok(None)
            }
            DecodeState::ParseBody => unreachable!("body bytes are consumed in bulk"),
        }
    }

    fn expect_lf(&mut self, byte: u8, next: DecodeState) -> Result<(), FrameError> {
        if byte != b'\n' {
            return Err(self.malformed(byte));
        }
        self.state = next;
        Ok(())
    }

    fn malformed(&self, byte: u8) -> FrameError {
        FrameError::Malformed {
            state: self.state,
            byte,
        }
    }

    fn finish(&mut self) -> Frame {
        let frame = Frame {
            engine_type: String::from_utf8_lossy(&self.engine_type).into_owned(),
            body: self.body.split().freeze(),
        };
        self.reset();
        frame
    }

    fn reset(&mut self) {
        self.state = DecodeState::Idle;
        self.header_pos = 0;
        self.engine_type.clear();
        self.length = 0;
        self.length_digits = 0;
        self.body.clear();
    }
}
