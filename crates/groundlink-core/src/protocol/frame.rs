//! Frame encoding/decoding
//!
//! One frame is one discrete request or response unit on the wire.
//! Requests are an opcode byte followed by a payload. Responses are either a
//! declared fixed length, or length-prefixed flash records:
//! - 1 byte: payload length (0 = end-of-data sentinel, no CRC follows)
//! - N bytes: payload
//! - 4 bytes: CRC32 of the payload (little-endian)

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher;

/// How many response bytes a command expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLen {
    /// No response is read; the device stays silent.
    None,
    /// Exactly this many bytes.
    Fixed(usize),
    /// A length byte, then `len` payload bytes and a 4-byte CRC32.
    Prefixed,
}

/// An encoded device command, ready to transmit.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    /// Command opcode from the active device profile.
    pub opcode: u8,
    /// Payload bytes following the opcode.
    pub payload: Vec<u8>,
    /// Expected response shape.
    pub expect: ResponseLen,
}

impl CommandFrame {
    /// Frame with an empty payload.
    pub fn new(opcode: u8, expect: ResponseLen) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
            expect,
        }
    }

    /// Frame with a prebuilt payload.
    pub fn with_payload(opcode: u8, payload: Vec<u8>, expect: ResponseLen) -> Self {
        Self {
            opcode,
            payload,
            expect,
        }
    }

    /// Append a single byte to the payload.
    pub fn push_u8(mut self, v: u8) -> Self {
        self.payload.push(v);
        self
    }

    /// Append a 16-bit value (little-endian).
    pub fn push_u16_le(mut self, v: u16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, v);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Append a 32-bit value (little-endian).
    pub fn push_u32_le(mut self, v: u32) -> Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, v);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Append raw bytes.
    pub fn push_bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Encode the frame for transmission: opcode then payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.payload.len());
        bytes.push(self.opcode);
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// What came back from the device for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A complete response; payload framing already stripped.
    Ok(Vec<u8>),
    /// Some bytes arrived, then the deadline hit. Carries the partial read.
    Incomplete(Vec<u8>),
    /// Nothing arrived before the deadline. Recoverable; caller may retry.
    Timeout,
    /// The response violated framing (e.g. oversized declared length).
    Malformed,
}

/// A device response plus its read outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Read outcome for this response.
    pub outcome: Outcome,
}

impl ResponseFrame {
    /// A complete response.
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            outcome: Outcome::Ok(payload),
        }
    }

    /// A partial response cut off by the deadline.
    pub fn incomplete(partial: Vec<u8>) -> Self {
        Self {
            outcome: Outcome::Incomplete(partial),
        }
    }

    /// An empty-handed timeout.
    pub fn timeout() -> Self {
        Self {
            outcome: Outcome::Timeout,
        }
    }

    /// A framing violation.
    pub fn malformed() -> Self {
        Self {
            outcome: Outcome::Malformed,
        }
    }

    /// The complete payload, if the read finished.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.outcome {
            Outcome::Ok(p) => Some(p),
            _ => None,
        }
    }
}

/// CRC32 of a flash record payload.
pub fn record_crc(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Encode a flash record for the wire: length byte, payload, CRC32.
///
/// Used by the bench simulator and tests; the firmware produces the same
/// layout.
pub fn encode_record(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= u8::MAX as usize);
    let mut bytes = Vec::with_capacity(1 + payload.len() + 4);
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(payload);
    let mut crc = [0u8; 4];
    LittleEndian::write_u32(&mut crc, record_crc(payload));
    bytes.extend_from_slice(&crc);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_start_with_opcode() {
        let frame = CommandFrame::new(0x20, ResponseLen::Fixed(2))
            .push_u8(3)
            .push_u16_le(0x1234);
        let bytes = frame.to_bytes();
        assert_eq!(bytes, vec![0x20, 3, 0x34, 0x12]);
    }

    #[test]
    fn record_encoding_layout() {
        let payload = vec![1, 2, 3];
        let encoded = encode_record(&payload);
        assert_eq!(encoded[0], 3);
        assert_eq!(&encoded[1..4], &payload[..]);
        assert_eq!(
            LittleEndian::read_u32(&encoded[4..8]),
            record_crc(&payload)
        );
    }

    #[test]
    fn empty_record_is_sentinel_length() {
        let encoded = encode_record(&[]);
        assert_eq!(encoded[0], 0);
    }

    #[test]
    fn response_payload_accessor() {
        assert_eq!(ResponseFrame::ok(vec![7]).payload(), Some(&[7u8][..]));
        assert_eq!(ResponseFrame::timeout().payload(), None);
        assert_eq!(ResponseFrame::incomplete(vec![1]).payload(), None);
    }
}
