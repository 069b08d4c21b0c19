//! Addressed, checksummed frame codec.
//!
//! Wire layout:
//!
//! ```text
//! [0]      destination address (board id)
//! [1]      byte count (payload length + 2 bytes of overhead)
//! [2..N-1] payload, message-type opcode first
//! [N-1]    checksum over all preceding bytes
//! ```

use snafu::{Snafu, ensure};
use tracing::trace;

use crate::opcodes::MessageType;

/// Address byte plus length byte.
pub const FRAME_OVERHEAD: usize = 2;

/// The length byte is 8 bits wide, bounding the payload.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - FRAME_OVERHEAD;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum FrameError {
    #[snafu(display("frame truncated at {len} bytes"))]
    TooShort { len: usize },

    #[snafu(display("length byte says {declared} bytes but {actual} arrived"))]
    LengthMismatch { declared: usize, actual: usize },

    #[snafu(display("checksum {received:#04x} does not match computed {computed:#04x}"))]
    ChecksumMismatch { received: u8, computed: u8 },

    #[snafu(display("frame carries no payload"))]
    EmptyPayload,

    #[snafu(display("payload of {len} bytes exceeds the {MAX_PAYLOAD_LEN}-byte limit"))]
    PayloadTooLong { len: usize },
}

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub destination: u8,
    pub payload: Vec<u8>,
}

/// Sum of every byte before the checksum slot, modulo 256. This is the
/// algorithm the board firmware family validates against.
fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

impl Frame {
    pub fn new(destination: u8, payload: Vec<u8>) -> Self {
        Self {
            destination,
            payload,
        }
    }

    /// The opcode in payload byte 0, if the payload is non-empty and the
    /// opcode is known.
    pub fn message_type(&self) -> Option<MessageType> {
        self.payload
            .first()
            .and_then(|&b| MessageType::try_from(b).ok())
    }

    /// Lays out `[destination][byte_count][payload...][checksum]`.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        ensure!(!self.payload.is_empty(), EmptyPayloadSnafu);
        ensure!(
            self.payload.len() <= MAX_PAYLOAD_LEN,
            PayloadTooLongSnafu {
                len: self.payload.len()
            }
        );

        let byte_count = self.payload.len() + FRAME_OVERHEAD;
        let mut raw = Vec::with_capacity(byte_count + 1);
        raw.push(self.destination);
        raw.push(byte_count as u8);
        raw.extend_from_slice(&self.payload);
        raw.push(checksum(&raw));

        trace!(dest = self.destination, bytes = ?raw, "encoded frame");
        Ok(raw)
    }

    /// Validates and strips the framing of a received byte sequence. A frame
    /// that fails any check is discarded whole; there is no partial recovery.
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        ensure!(raw.len() >= FRAME_OVERHEAD + 2, TooShortSnafu { len: raw.len() });

        let declared = usize::from(raw[1]);
        ensure!(
            raw.len() == declared + 1,
            LengthMismatchSnafu {
                declared,
                actual: raw.len().saturating_sub(1)
            }
        );

        let computed = checksum(&raw[..raw.len() - 1]);
        let received = raw[raw.len() - 1];
        ensure!(
            received == computed,
            ChecksumMismatchSnafu { received, computed }
        );

        Ok(Self {
            destination: raw[0],
            payload: raw[FRAME_OVERHEAD..raw.len() - 1].to_vec(),
        })
    }

    /// Total wire size of the encoded frame: declared byte count plus the
    /// trailing checksum.
    pub fn wire_len(raw_header: &[u8]) -> Option<usize> {
        raw_header.get(1).map(|&count| usize::from(count) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_destination_type_and_payload() {
        let frame = Frame::new(2, vec![MessageType::Values as u8, 0xDE, 0xAD, 0xBE]);
        let raw = frame.encode().unwrap();
        let decoded = Frame::decode(&raw).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.message_type(), Some(MessageType::Values));
    }

    #[test]
    fn known_layout() {
        let frame = Frame::new(1, vec![2, 32, 0]);
        // byte count = 3 + 2, checksum = 1 + 5 + 2 + 32 = 40.
        assert_eq!(frame.encode().unwrap(), vec![1, 5, 2, 32, 0, 40]);
    }

    #[test]
    fn detects_any_single_bit_flip() {
        let raw = Frame::new(1, vec![2, 32, 0]).encode().unwrap();
        // Flip every bit of the length byte and the payload, leaving the
        // recorded checksum untouched.
        for byte in 1..raw.len() - 1 {
            for bit in 0..8 {
                let mut corrupted = raw.clone();
                corrupted[byte] ^= 1 << bit;
                let result = Frame::decode(&corrupted);
                assert!(
                    matches!(
                        result,
                        Err(FrameError::ChecksumMismatch { .. })
                            | Err(FrameError::LengthMismatch { .. })
                            | Err(FrameError::TooShort { .. })
                    ),
                    "byte {byte} bit {bit} slipped through: {result:?}"
                );
            }
        }
    }

    #[test]
    fn rejects_truncation_and_empty_payloads() {
        assert_eq!(Frame::decode(&[1, 2]), Err(FrameError::TooShort { len: 2 }));
        assert_eq!(
            Frame::new(1, vec![]).encode(),
            Err(FrameError::EmptyPayload)
        );
        let raw = Frame::new(1, vec![2, 0]).encode().unwrap();
        assert_eq!(
            Frame::decode(&raw[..raw.len() - 1]),
            Err(FrameError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        );
    }
}
