//! Wire framing for the cooker link.
//!
//! A message is an ASCII line. On the wire it becomes
//!
//! ```text
//! 'h' | length | rotated payload bytes | checksum
//! ```
//!
//! followed by a single `0x16` delimiter. The payload is the message with a
//! trailing `\r`; byte `i` is rotated left by `(i + 1) % 7` bits, and the
//! checksum is the modulo-256 sum of the rotated bytes.

use thiserror::Error;

/// SYN byte terminating every frame on the wire.
pub const DELIMITER: u8 = 0x16;

/// Longest payload the one-byte length field can describe.
pub const MAX_PAYLOAD: usize = 255;

const HEADER: u8 = b'h';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("message of {0} bytes does not fit the one-byte length field")]
    MessageTooLong(usize),
    #[error("frame too short to carry header, payload and checksum")]
    FrameTooShort,
    #[error("invalid header byte {0:#04x}")]
    InvalidHeader(u8),
    #[error("declared payload length {declared} exceeds {available} available bytes")]
    LengthMismatch { declared: usize, available: usize },
    #[error("checksum mismatch: computed {computed:#04x}, frame carries {received:#04x}")]
    ChecksumMismatch { computed: u8, received: u8 },
}

fn rotation(index: usize) -> u32 {
    ((index + 1) % 7) as u32
}

/// Encodes a message into a frame, without the trailing [`DELIMITER`].
///
/// A `\r` is appended to the payload unless the message already ends with
/// one. Fails if the resulting payload does not fit the length field.
pub fn encode(message: &str) -> Result<Vec<u8>, CodecError> {
    let mut payload = message.as_bytes().to_vec();
    if !payload.ends_with(b"\r") {
        payload.push(b'\r');
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(CodecError::MessageTooLong(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(HEADER);
    frame.push(payload.len() as u8);

    let mut checksum = 0u8;
    for (i, &byte) in payload.iter().enumerate() {
        let rotated = byte.rotate_left(rotation(i));
        checksum = checksum.wrapping_add(rotated);
        frame.push(rotated);
    }
    frame.push(checksum);

    Ok(frame)
}

/// Decodes one frame back into its message, stripping the trailing `\r`.
///
/// A trailing [`DELIMITER`] is tolerated and removed first.
pub fn decode(data: &[u8]) -> Result<String, CodecError> {
    let data = match data.split_last() {
        Some((&DELIMITER, rest)) => rest,
        _ => data,
    };

    if data.len() < 3 {
        return Err(CodecError::FrameTooShort);
    }
    if data[0] != HEADER {
        return Err(CodecError::InvalidHeader(data[0]));
    }

    let declared = data[1] as usize;
    if data.len() < declared + 3 {
        return Err(CodecError::LengthMismatch {
            declared,
            available: data.len() - 3,
        });
    }

    let rotated = &data[2..2 + declared];
    let received = data[2 + declared];

    let mut computed = 0u8;
    let mut bytes = Vec::with_capacity(declared);
    for (i, &byte) in rotated.iter().enumerate() {
        computed = computed.wrapping_add(byte);
        bytes.push(byte.rotate_right(rotation(i)));
    }

    if computed != received {
        return Err(CodecError::ChecksumMismatch { computed, received });
    }

    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_end_matches('\r').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frames captured from real cooker traffic, delimiter included.
    const CORPUS: &[(&[u8], &str)] = &[
        (
            &[0x68, 0x03, 0xDE, 0xAD, 0x68, 0xF3, 0x16],
            "ok",
        ),
        (
            &[
                0x68, 0x07, 0xE6, 0xD1, 0x0B, 0x47, 0xAE, 0xDC, 0x0D, 0xA0, 0x16,
            ],
            "status",
        ),
        (
            &[
                0x68, 0x0C, 0xCE, 0x95, 0xA3, 0x02, 0x2D, 0x19, 0x20, 0xC6, 0x85,
                0x93, 0x46, 0xA1, 0x33, 0x16,
            ],
            "get id card",
        ),
        (
            &[
                0x68, 0x0A, 0xD8, 0xBD, 0xBB, 0x02, 0xEE, 0x58, 0x74, 0xCA, 0xC9,
                0x68, 0x07, 0x16,
            ],
            "low water",
        ),
    ];

    #[test]
    fn corpus_decodes() {
        for (bytes, expected) in CORPUS {
            assert_eq!(decode(bytes).unwrap(), *expected);
        }
    }

    #[test]
    fn corpus_reencodes_byte_identically() {
        for (bytes, message) in CORPUS {
            let mut encoded = encode(message).unwrap();
            encoded.push(DELIMITER);
            assert_eq!(&encoded, bytes, "frame mismatch for {message:?}");
        }
    }

    #[test]
    fn round_trips_arbitrary_messages() {
        let longest = "x".repeat(254);
        let messages = [
            "",
            "read temp",
            "set temp 60.5",
            "server para 192.168.1.15 8080",
            "event wifi time finish",
            longest.as_str(),
        ];
        for message in messages {
            let mut frame = encode(message).unwrap();
            frame.push(DELIMITER);
            assert_eq!(decode(&frame).unwrap(), message);
        }
    }

    #[test]
    fn rejects_overlong_message() {
        let message = "y".repeat(255); // 256 with the implied \r
        assert_eq!(encode(&message), Err(CodecError::MessageTooLong(256)));
    }

    #[test]
    fn keeps_existing_carriage_return() {
        assert_eq!(encode("stop\r").unwrap(), encode("stop").unwrap());
    }

    #[test]
    fn rejects_short_frame() {
        assert_eq!(decode(&[0x68, 0x00]), Err(CodecError::FrameTooShort));
    }

    #[test]
    fn rejects_bad_header() {
        let mut frame = encode("ok").unwrap();
        frame[0] = b'x';
        assert_eq!(decode(&frame), Err(CodecError::InvalidHeader(b'x')));
    }

    #[test]
    fn rejects_truncated_payload() {
        let frame = encode("get id card").unwrap();
        assert!(matches!(
            decode(&frame[..5]),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn any_payload_bit_flip_fails_checksum() {
        let frame = encode("read set temp").unwrap();
        let payload_len = frame[1] as usize;
        for byte_index in 2..2 + payload_len {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte_index] ^= 1 << bit;
                assert!(
                    matches!(
                        decode(&corrupted),
                        Err(CodecError::ChecksumMismatch { .. })
                    ),
                    "bit {bit} of byte {byte_index} slipped through"
                );
            }
        }
    }

    #[test]
    fn checksum_bit_flip_fails() {
        let mut frame = encode("start").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert!(matches!(
            decode(&frame),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }
}
