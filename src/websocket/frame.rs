use crate::error::FrameError;

/// Largest payload a short-form (7-bit) length can describe.
pub const MAX_SHORT_PAYLOAD: usize = 125;

const FIN: u8 = 0x80;
const MASK: u8 = 0x80;
const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_CLOSE: u8 = 0x8;

/// A decoded client frame. Only unfragmented text and close are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

impl Frame {
    /// Decodes one client frame from the front of `buf`, returning it with
    /// the number of bytes consumed.
    ///
    /// `FrameError::Truncated` means `buf` ends before the declared frame
    /// does; every other error is final for the connection.
    pub fn decode(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
        if buf.len() < 2 {
            return Err(FrameError::Truncated {
                needed: 2,
                available: buf.len(),
            });
        }

        let opcode = buf[0] & 0x0F;
        if opcode == OPCODE_CLOSE {
            // Close payloads (status code, reason) are not interpreted.
            let len = usize::from(buf[1] & 0x7F);
            let consumed = if buf[1] & MASK != 0 { 6 + len } else { 2 + len };
            return Ok((Frame::Close, consumed.min(buf.len())));
        }
        if buf[0] & FIN == 0 || opcode == OPCODE_CONTINUATION {
            return Err(FrameError::Fragmented);
        }
        if opcode != OPCODE_TEXT {
            return Err(FrameError::UnsupportedOpcode(opcode));
        }
        if buf[1] & MASK == 0 {
            return Err(FrameError::Unmasked);
        }

        let len = buf[1] & 0x7F;
        if len >= 126 {
            return Err(FrameError::ExtendedLength(len));
        }
        let len = usize::from(len);
        let needed = 6 + len;
        if buf.len() < needed {
            return Err(FrameError::Truncated {
                needed,
                available: buf.len(),
            });
        }

        let mask_key = [buf[2], buf[3], buf[4], buf[5]];
        let mut payload = buf[6..needed].to_vec();
        apply_mask(&mut payload, mask_key);
        let text = String::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)?;
        Ok((Frame::Text(text), needed))
    }
}

/// XORs `payload` with the repeating 4-byte key. Applying it twice restores
/// the input.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Builds an unmasked server text frame: 0x81, length, UTF-8 payload.
pub fn encode_text(text: &str) -> Result<Vec<u8>, FrameError> {
    let payload = text.as_bytes();
    if payload.len() > MAX_SHORT_PAYLOAD {
        return Err(FrameError::PayloadTooLong(payload.len()));
    }
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.push(FIN | OPCODE_TEXT);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Builds a masked client text frame, the way a browser would send it.
pub fn encode_masked_text(text: &str, mask_key: [u8; 4]) -> Result<Vec<u8>, FrameError> {
    let mut payload = text.as_bytes().to_vec();
    if payload.len() > MAX_SHORT_PAYLOAD {
        return Err(FrameError::PayloadTooLong(payload.len()));
    }
    apply_mask(&mut payload, mask_key);
    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.push(FIN | OPCODE_TEXT);
    frame.push(MASK | payload.len() as u8);
    frame.extend_from_slice(&mask_key);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn test_mask_is_self_inverse() {
        let payloads: [&[u8]; 4] = [b"", b"a", b"Hello", b"\x00\xff\x10 odd length!"];
        for payload in payloads {
            for key in [[0, 0, 0, 0], KEY, [0xff, 0xff, 0xff, 0xff]] {
                let mut data = payload.to_vec();
                apply_mask(&mut data, key);
                apply_mask(&mut data, key);
                assert_eq!(data, payload);
            }
        }
    }

    #[test]
    fn test_decode_rfc_masked_hello() {
        // RFC 6455 section 5.7: a single-frame masked text message "Hello".
        let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (frame, used) = Frame::decode(&bytes).unwrap();
        assert_eq!(frame, Frame::Text("Hello".to_string()));
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_decode_leaves_following_frames() {
        let mut bytes = encode_masked_text("alice", KEY).unwrap();
        bytes.extend(encode_masked_text("hi", KEY).unwrap());

        let (first, used) = Frame::decode(&bytes).unwrap();
        assert_eq!(first, Frame::Text("alice".to_string()));
        let (second, rest) = Frame::decode(&bytes[used..]).unwrap();
        assert_eq!(second, Frame::Text("hi".to_string()));
        assert_eq!(used + rest, bytes.len());
    }

    #[test]
    fn test_close_frame() {
        let bytes = [0x88, 0x82, 1, 2, 3, 4, 0x03 ^ 1, 0xe8 ^ 2];
        let (frame, used) = Frame::decode(&bytes).unwrap();
        assert_eq!(frame, Frame::Close);
        assert_eq!(used, bytes.len());

        assert_eq!(Frame::decode(&[0x88, 0x82]).unwrap().0, Frame::Close);
    }

    #[test]
    fn test_truncated_buffers_are_errors() {
        assert_eq!(
            Frame::decode(&[]),
            Err(FrameError::Truncated { needed: 2, available: 0 })
        );
        assert_eq!(
            Frame::decode(&[0x81]),
            Err(FrameError::Truncated { needed: 2, available: 1 })
        );

        let bytes = encode_masked_text("Hello", KEY).unwrap();
        assert_eq!(
            Frame::decode(&bytes[..7]),
            Err(FrameError::Truncated { needed: 11, available: 7 })
        );
    }

    #[test]
    fn test_extended_lengths_fail_fast() {
        assert_eq!(
            Frame::decode(&[0x81, 0x80 | 126, 0, 200]),
            Err(FrameError::ExtendedLength(126))
        );
        assert_eq!(
            Frame::decode(&[0x81, 0x80 | 127]),
            Err(FrameError::ExtendedLength(127))
        );
    }

    #[test]
    fn test_unsupported_frames() {
        assert_eq!(Frame::decode(&[0x01, 0x80]), Err(FrameError::Fragmented));
        assert_eq!(Frame::decode(&[0x80, 0x80]), Err(FrameError::Fragmented));
        assert_eq!(Frame::decode(&[0x89, 0x80]), Err(FrameError::UnsupportedOpcode(0x9)));
        assert_eq!(Frame::decode(&[0x82, 0x80]), Err(FrameError::UnsupportedOpcode(0x2)));
        assert_eq!(Frame::decode(&[0x81, 0x02, b'h', b'i']), Err(FrameError::Unmasked));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut payload = vec![0xff, 0xfe];
        apply_mask(&mut payload, KEY);
        let mut bytes = vec![0x81, 0x82];
        bytes.extend_from_slice(&KEY);
        bytes.extend(payload);
        assert_eq!(Frame::decode(&bytes), Err(FrameError::InvalidUtf8));
    }

    #[test]
    fn test_empty_text_frame() {
        let (frame, used) = Frame::decode(&[0x81, 0x80, 1, 2, 3, 4]).unwrap();
        assert_eq!(frame, Frame::Text(String::new()));
        assert_eq!(used, 6);

        assert_eq!(
            Frame::decode(&[0x81, 0x80]),
            Err(FrameError::Truncated { needed: 6, available: 2 })
        );
    }

    #[test]
    fn test_encode_text() {
        assert_eq!(encode_text("hi").unwrap(), vec![0x81, 2, b'h', b'i']);
        assert_eq!(encode_text("").unwrap(), vec![0x81, 0]);

        let max = "x".repeat(MAX_SHORT_PAYLOAD);
        assert_eq!(encode_text(&max).unwrap().len(), 2 + MAX_SHORT_PAYLOAD);

        let too_long = "x".repeat(MAX_SHORT_PAYLOAD + 1);
        assert_eq!(
            encode_text(&too_long),
            Err(FrameError::PayloadTooLong(MAX_SHORT_PAYLOAD + 1))
        );
    }

    #[test]
    fn test_encode_counts_bytes_not_chars() {
        let frame = encode_text("héllo").unwrap();
        assert_eq!(frame[1], 6);
    }
}
