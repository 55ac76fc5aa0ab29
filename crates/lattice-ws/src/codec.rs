//! RFC 6455 frame codec: parsing a frame header out of a byte slice,
//! formatting one into an owned buffer, masking, and deriving the
//! `Sec-WebSocket-Accept` key from a handshake key.

use base64::Engine;
use sha1::{Digest, Sha1};

const MIN_HEADER_SIZE: usize = 2;
const MASK_SIZE: usize = 4;
const EXTLEN16_SIZE: usize = 2;
const EXTLEN64_SIZE: usize = 8;
const EXTLEN16_MARK: u8 = 126;
const EXTLEN64_MARK: u8 = 127;

const FIN_FLAG: u8 = 0x80;
const MASK_FLAG: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const PAYLOAD_LEN_MASK: u8 = 0x7F;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x0 => Some(Opcode::Continue),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn raw(self) -> u8 {
        match self {
            Opcode::Continue => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// Standard close codes (RFC 6455 §7.4.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    ProtocolError = 1002,
    NotAllowed = 1003,
    WrongType = 1007,
    PolicyViolation = 1008,
    MessageTooBig = 1009,
    UnexpectedError = 1011,
}

/// A parsed frame header: `payload` indexes directly into the buffer
/// that was parsed, `frame_len` is the header plus payload length so the
/// caller knows how much to cut once it's consumed.
#[derive(Debug)]
pub struct Frame<'a> {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: &'a [u8],
    pub frame_len: usize,
}

/// Either a fully parsed frame, or how many more bytes are needed before
/// trying again.
pub enum ParseOutcome<'a> {
    Frame(Frame<'a>),
    NeedMore(usize),
}

pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % MASK_SIZE];
    }
}

/// Parses the frame at the start of `data`, if a whole one is present.
pub fn parse_frame(data: &[u8]) -> ParseOutcome<'_> {
    if data.len() < MIN_HEADER_SIZE {
        return ParseOutcome::NeedMore(MIN_HEADER_SIZE);
    }

    let fin = data[0] & FIN_FLAG == FIN_FLAG;
    let opcode = match Opcode::from_raw(data[0] & OPCODE_MASK) {
        Some(opcode) => opcode,
        None => return ParseOutcome::NeedMore(usize::MAX), // malformed; caller should close
    };
    let masked = data[1] & MASK_FLAG == MASK_FLAG;

    let mut expected = MIN_HEADER_SIZE;
    let mut mask_offset = MIN_HEADER_SIZE;
    let mut payload_offset = MIN_HEADER_SIZE;
    if masked {
        expected += MASK_SIZE;
        payload_offset += MASK_SIZE;
    }

    let short_len = data[1] & PAYLOAD_LEN_MASK;
    if short_len == EXTLEN16_MARK {
        expected += EXTLEN16_SIZE;
        payload_offset += EXTLEN16_SIZE;
        mask_offset += EXTLEN16_SIZE;
    } else if short_len == EXTLEN64_MARK {
        expected += EXTLEN64_SIZE;
        payload_offset += EXTLEN64_SIZE;
        mask_offset += EXTLEN64_SIZE;
    }

    if data.len() < expected {
        return ParseOutcome::NeedMore(expected);
    }

    let payload_length: usize = if short_len == EXTLEN16_MARK {
        u16::from_be_bytes([data[2], data[3]]) as usize
    } else if short_len == EXTLEN64_MARK {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[2..10]);
        u64::from_be_bytes(raw) as usize
    } else {
        short_len as usize
    };

    let frame_len = expected + payload_length;
    if data.len() < frame_len {
        return ParseOutcome::NeedMore(frame_len);
    }

    let mask = if masked {
        let mut m = [0u8; 4];
        m.copy_from_slice(&data[mask_offset..mask_offset + MASK_SIZE]);
        Some(m)
    } else {
        None
    };

    ParseOutcome::Frame(Frame { fin, opcode, mask, payload: &data[payload_offset..frame_len], frame_len })
}

/// Formats one frame. `mask` is `Some` for client-originated frames
/// (which RFC 6455 requires to be masked) and `None` for server frames.
pub fn format_frame(opcode: Opcode, fin: bool, mask: Option<[u8; 4]>, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    let fin_bit = if fin { FIN_FLAG } else { 0 };
    out.push(fin_bit | opcode.raw());

    let mask_bit = if mask.is_some() { MASK_FLAG } else { 0 };
    let len = payload.len();
    if len > 0xFFFF {
        out.push(EXTLEN64_MARK | mask_bit);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    } else if len >= EXTLEN16_MARK as usize {
        out.push(EXTLEN16_MARK | mask_bit);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(len as u8 | mask_bit);
    }

    if let Some(mask) = mask {
        out.extend_from_slice(&mask);
        let start = out.len();
        out.extend_from_slice(payload);
        apply_mask(&mut out[start..], mask);
    } else {
        out.extend_from_slice(payload);
    }

    out
}

/// Derives `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`.
pub fn calculate_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Generates a fresh, base64-encoded 16-byte handshake key.
pub fn generate_key() -> String {
    use rand::RngCore;
    let mut raw = [0u8; 16];
    rand::rng().fill_bytes(&mut raw);
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Generates a fresh 4-byte masking key for a client-originated frame.
pub fn generate_mask() -> [u8; 4] {
    use rand::RngCore;
    let mut mask = [0u8; 4];
    rand::rng().fill_bytes(&mut mask);
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_unmasked_text_frame() {
        let raw = format_frame(Opcode::Text, true, None, b"hello");
        match parse_frame(&raw) {
            ParseOutcome::Frame(frame) => {
                assert!(frame.fin);
                assert_eq!(frame.opcode, Opcode::Text);
                assert_eq!(frame.mask, None);
                assert_eq!(frame.payload, b"hello");
                assert_eq!(frame.frame_len, raw.len());
            }
            ParseOutcome::NeedMore(_) => panic!("expected a full frame"),
        }
    }

    #[test]
    fn round_trips_a_masked_frame_and_unmasks_on_parse() {
        let mask = [0x11, 0x22, 0x33, 0x44];
        let raw = format_frame(Opcode::Binary, true, Some(mask), b"payload");
        match parse_frame(&raw) {
            ParseOutcome::Frame(frame) => {
                assert_eq!(frame.mask, Some(mask));
                let mut payload = frame.payload.to_vec();
                apply_mask(&mut payload, mask);
                assert_eq!(payload, b"payload");
            }
            ParseOutcome::NeedMore(_) => panic!("expected a full frame"),
        }
    }

    #[test]
    fn large_payload_uses_extended_length() {
        let payload = vec![0u8; 70_000];
        let raw = format_frame(Opcode::Binary, true, None, &payload);
        assert_eq!(raw[1] & PAYLOAD_LEN_MASK, EXTLEN64_MARK);
        match parse_frame(&raw) {
            ParseOutcome::Frame(frame) => assert_eq!(frame.payload.len(), 70_000),
            ParseOutcome::NeedMore(_) => panic!("expected a full frame"),
        }
    }

    #[test]
    fn incomplete_header_requests_more_bytes() {
        match parse_frame(&[0x81]) {
            ParseOutcome::NeedMore(n) => assert_eq!(n, MIN_HEADER_SIZE),
            ParseOutcome::Frame(_) => panic!("should not parse from one byte"),
        }
    }

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // The example key/accept pair from RFC 6455 section 1.3.
        assert_eq!(calculate_accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
