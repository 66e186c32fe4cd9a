// MIT License - Copyright (c) 2026 Peter Wright
// SIA DC-09 frame codec

use tracing::debug;

use crate::constants::{CR, CRC_FIELD_LEN, CRC_TABLE, FRAME_HEADER_LEN, LF, MAX_FRAME_SIZE};
use crate::error::{Result, SiaError};

/// Compute the DC-09 CRC (CRC-16/ARC, initial value 0) over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc = (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u16) & 0xFF) as usize];
    }
    crc
}

/// A validated frame with its header fields stripped.
///
/// The body starts at the opening quote of the message ID and runs up to,
/// but not including, the CR terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// CRC declared by the sender (already checked against the body).
    pub crc: u16,
    /// Body length declared by the sender (already checked).
    pub length: usize,
    /// Frame body.
    pub body: Vec<u8>,
}

impl Frame {
    /// Parse and validate a raw frame.
    ///
    /// `raw` may include the LF/CR delimiters or just the bytes between
    /// them. Checks the header fields, the declared length and the CRC.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let raw = raw.strip_prefix(&[LF]).unwrap_or(raw);
        let raw = raw.strip_suffix(&[CR]).unwrap_or(raw);

        if raw.len() > MAX_FRAME_SIZE {
            return Err(SiaError::FrameTooLarge {
                size: raw.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        if raw.len() < FRAME_HEADER_LEN {
            return Err(SiaError::malformed(format!(
                "frame of {} bytes is shorter than its header",
                raw.len()
            )));
        }

        let crc = parse_hex_field(&raw[..CRC_FIELD_LEN], "CRC")?;
        let length = parse_hex_field(&raw[CRC_FIELD_LEN..FRAME_HEADER_LEN], "length")? as usize;
        let body = &raw[FRAME_HEADER_LEN..];

        if body.len() != length {
            return Err(SiaError::malformed(format!(
                "declared length {} but body has {} bytes",
                length,
                body.len()
            )));
        }

        let computed = crc16(body);
        if computed != crc {
            debug!("CRC Not Ok (computed {:04X}, frame says {:04X})", computed, crc);
            return Err(SiaError::ChecksumError {
                computed,
                received: crc,
            });
        }

        Ok(Self {
            crc,
            length,
            body: body.to_vec(),
        })
    }

    /// Encode this frame back into wire form.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&self.body)
    }
}

fn parse_hex_field(field: &[u8], name: &str) -> Result<u16> {
    std::str::from_utf8(field)
        .ok()
        .filter(|text| text.bytes().all(|b| b.is_ascii_hexdigit()))
        .and_then(|text| u16::from_str_radix(text, 16).ok())
        .ok_or_else(|| SiaError::malformed(format!("{} field is not hex", name)))
}

/// Build the wire form `<LF><crc><0LLL><body><CR>` for a body.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + FRAME_HEADER_LEN + 2);
    out.push(LF);
    out.extend_from_slice(format!("{:04X}{:04X}", crc16(body), body.len()).as_bytes());
    out.extend_from_slice(body);
    out.push(CR);
    out
}

/// Reassembles frames from a byte stream.
///
/// Bytes are buffered until a CR terminates the frame that started at the
/// last LF. Garbage before an LF is discarded. A frame that outgrows
/// `max_frame_size` fails with [`SiaError::FrameTooLarge`] and the decoder
/// resynchronises on the next LF.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_size,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Extract the next complete frame, if any.
    ///
    /// Returns `None` when more data is needed. Each `Some(Err(_))` consumes
    /// the offending bytes, so callers can keep looping.
    pub fn next_frame(&mut self) -> Option<Result<Frame>> {
        // Drop anything before the start of a frame.
        match self.buf.iter().position(|&b| b == LF) {
            Some(0) => {}
            Some(start) => {
                debug!("Discarding {} bytes before frame start", start);
                self.buf.drain(..start);
            }
            None => {
                if !self.buf.is_empty() {
                    debug!("Discarding {} bytes without frame start", self.buf.len());
                    self.buf.clear();
                }
                return None;
            }
        }

        let boundary = self.buf[1..]
            .iter()
            .position(|&b| b == CR || b == LF)
            .map(|i| i + 1);

        match boundary {
            Some(end) if self.buf[end] == CR => {
                let raw: Vec<u8> = self.buf.drain(..=end).collect();
                let content = &raw[1..raw.len() - 1];
                if content.len() > self.max_frame_size {
                    return Some(Err(SiaError::FrameTooLarge {
                        size: content.len(),
                        max: self.max_frame_size,
                    }));
                }
                Some(Frame::parse(content))
            }
            Some(next_start) => {
                // A new frame started before this one was terminated.
                self.buf.drain(..next_start);
                Some(Err(SiaError::malformed("frame truncated before terminator")))
            }
            None if self.buf.len() - 1 > self.max_frame_size => {
                let size = self.buf.len() - 1;
                self.buf.clear();
                Some(Err(SiaError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                }))
            }
            None => None,
        }
    }
}
