// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! UBX frame envelope helpers used by the generated packet codecs
//! and test strategies.

/// First synchronization byte of every UBX frame.
pub const SYNC_CHAR_1: u8 = 0xb5;
/// Second synchronization byte of every UBX frame.
pub const SYNC_CHAR_2: u8 = 0x62;

/// Number of envelope bytes surrounding the payload:
/// two sync bytes, class, id, two length bytes, two checksum bytes.
pub const FRAME_OVERHEAD: usize = 8;

/// Maximum payload length representable in the 16-bit length field.
pub const MAX_PAYLOAD_LEN: usize = 0xffff;

/// Type of frame level errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has {got} bytes, the envelope alone requires {FRAME_OVERHEAD}")]
    TooShort { got: usize },
    #[error("invalid sync bytes {actual:#04x?}, expected [0xb5, 0x62]")]
    BadSync { actual: [u8; 2] },
    #[error("length field declares {declared} payload bytes but {got} are present")]
    LengthMismatch { declared: usize, got: usize },
    #[error("checksum {actual:#04x?} does not match computed {computed:#04x?}")]
    BadChecksum { actual: [u8; 2], computed: [u8; 2] },
}

/// Calculate the UBX checksum for a message.
///
/// The checksum is the 8-bit Fletcher algorithm run over class, id,
/// the little-endian length bytes, and the payload.
pub fn checksum(class: u8, id: u8, payload: &[u8]) -> (u8, u8) {
    let len = (payload.len() as u16).to_le_bytes();
    checksum_over([class, id, len[0], len[1]].iter().chain(payload.iter()))
}

/// Run the Fletcher sums over an arbitrary byte sequence.
pub fn checksum_over<'a>(bytes: impl Iterator<Item = &'a u8>) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;
    for &byte in bytes {
        ck_a = ck_a.wrapping_add(byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// Build a complete UBX frame from class, id, and payload.
///
/// Returns the full wire representation: sync bytes, class, id,
/// little-endian length, payload, and the two checksum bytes.
pub fn build_frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let (ck_a, ck_b) = checksum(class, id, payload);
    let len = (payload.len() as u16).to_le_bytes();

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.push(SYNC_CHAR_1);
    frame.push(SYNC_CHAR_2);
    frame.push(class);
    frame.push(id);
    frame.extend_from_slice(&len);
    frame.extend_from_slice(payload);
    frame.push(ck_a);
    frame.push(ck_b);
    frame
}

/// A UBX frame split into its envelope parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub class: u8,
    pub id: u8,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Split a byte buffer holding exactly one frame.
    ///
    /// Validates the sync bytes, the declared payload length against
    /// the buffer size, and the trailing checksum.
    pub fn parse(buf: &'a [u8]) -> Result<Frame<'a>, FrameError> {
        if buf.len() < FRAME_OVERHEAD {
            return Err(FrameError::TooShort { got: buf.len() });
        }
        if buf[0] != SYNC_CHAR_1 || buf[1] != SYNC_CHAR_2 {
            return Err(FrameError::BadSync { actual: [buf[0], buf[1]] });
        }
        let class = buf[2];
        let id = buf[3];
        let declared = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        let got = buf.len() - FRAME_OVERHEAD;
        if declared != got {
            return Err(FrameError::LengthMismatch { declared, got });
        }
        let payload = &buf[6..6 + declared];
        let computed = checksum(class, id, payload);
        let actual = [buf[buf.len() - 2], buf[buf.len() - 1]];
        if actual != [computed.0, computed.1] {
            return Err(FrameError::BadChecksum {
                actual,
                computed: [computed.0, computed.1],
            });
        }
        Ok(Frame { class, id, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn checksum_empty_payload() {
        let (ck_a, ck_b) = checksum(0x01, 0x07, &[]);
        // class=0x01, id=0x07, len=0x00,0x00
        // ck_a = 0x01 + 0x07 + 0x00 + 0x00 = 0x08
        // ck_b = 0x01 + 0x08 + 0x08 + 0x08 = 0x19
        assert_eq!(ck_a, 0x08);
        assert_eq!(ck_b, 0x19);
    }

    #[test]
    fn frame_structure() {
        let payload = vec![0x01, 0x02, 0x03];
        let frame = build_frame(0x0a, 0x09, &payload);

        assert_eq!(frame[0], 0xb5);
        assert_eq!(frame[1], 0x62);
        assert_eq!(frame[2], 0x0a);
        assert_eq!(frame[3], 0x09);
        assert_eq!(frame[4], 0x03); // length low byte
        assert_eq!(frame[5], 0x00); // length high byte
        assert_eq!(&frame[6..9], &payload[..]);
        assert_eq!(frame.len(), FRAME_OVERHEAD + payload.len());
    }

    #[test]
    fn parse_rejects_bad_sync() {
        let mut frame = build_frame(0x05, 0x01, &[0, 0]);
        frame[0] = 0xff;
        assert_eq!(
            Frame::parse(&frame),
            Err(FrameError::BadSync { actual: [0xff, 0x62] })
        );
    }

    #[test]
    fn parse_rejects_corrupted_checksum() {
        let mut frame = build_frame(0x05, 0x01, &[1, 2, 3, 4]);
        let end = frame.len() - 1;
        frame[end] = frame[end].wrapping_add(1);
        assert!(matches!(
            Frame::parse(&frame),
            Err(FrameError::BadChecksum { .. })
        ));
    }

    #[test]
    fn parse_rejects_truncated_payload() {
        let mut frame = build_frame(0x05, 0x01, &[1, 2, 3, 4]);
        frame.truncate(frame.len() - 3);
        // Still above the overhead, but one payload byte short.
        assert_eq!(
            Frame::parse(&frame),
            Err(FrameError::LengthMismatch { declared: 4, got: 1 })
        );
    }

    proptest! {
        #[test]
        fn build_then_parse_roundtrips(
            class in any::<u8>(),
            id in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let frame = build_frame(class, id, &payload);
            let parsed = Frame::parse(&frame).unwrap();
            prop_assert_eq!(parsed.class, class);
            prop_assert_eq!(parsed.id, id);
            prop_assert_eq!(parsed.payload, &payload[..]);
        }

        #[test]
        fn checksum_matches_trailing_bytes(
            class in any::<u8>(),
            id in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let frame = build_frame(class, id, &payload);
            let (ck_a, ck_b) = checksum_over(frame[2..frame.len() - 2].iter());
            prop_assert_eq!(frame[frame.len() - 2], ck_a);
            prop_assert_eq!(frame[frame.len() - 1], ck_b);
        }
    }
}
