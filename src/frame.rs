//! # Frame
//!
//! Wire frames for the push protocol, shaped as defined in
//! [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//! Every message travels as a single frame:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key, if MASK set  |          Payload Data         |
//! +-------------------------------+ - - - - - - - - - - - - - - - +
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! Only two opcodes carry meaning here: text (`0x1`) for messages and close
//! (`0x8`) for teardown. Inbound frames with any other opcode decode to
//! [`Inbound::Ignored`] and are skipped by the relay. The FIN bit is never
//! consulted on decode and always set on encode: fragmentation is not part
//! of this protocol.
//!
//! [`Frame`] is the outbound, buildable side. Client-side senders (in this
//! crate, the test suite) mask a frame before sending it; the server never
//! does. [`Inbound`] is what the decoder hands the relay once a frame has
//! been parsed, unmasked and classified.

use bytes::BytesMut;

use crate::Result;

/// Largest serialized frame header: 2 fixed bytes, an 8 byte extended
/// length and a 4 byte masking key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// Frame opcodes understood by the relay.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    /// Text message frame (0x1).
    Text,
    /// Connection close frame (0x8).
    Close,
}

impl OpCode {
    /// Classifies the low 4 bits of a frame's first byte.
    ///
    /// Returns `None` for every opcode the relay does not handle; the
    /// decoder turns those frames into [`Inbound::Ignored`].
    pub fn from_bits(bits: u8) -> Option<OpCode> {
        match bits {
            0x1 => Some(OpCode::Text),
            0x8 => Some(OpCode::Close),
            _ => None,
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Text => 0x1,
            OpCode::Close => 0x8,
        }
    }
}

/// Classification of one fully decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame, unmasked and decoded best-effort as UTF-8.
    Text(String),
    /// A close frame. Any close payload is discarded.
    Close,
    /// A frame with an opcode the relay does not handle, carrying the raw
    /// opcode bits.
    Ignored(u8),
}

/// An outbound frame.
///
/// Frames built by the server are written unmasked. Client-side senders in
/// this crate mask the frame with `Frame::mask` before handing it to the
/// encoder.
pub struct Frame {
    /// The frame opcode.
    pub opcode: OpCode,
    /// Masking key, if the payload is (or is to be) masked.
    mask: Option<[u8; 4]>,
    /// The payload of the frame.
    pub payload: BytesMut,
}

impl Frame {
    /// Creates a frame with an explicit opcode and optional masking key.
    ///
    /// The payload bytes are copied into the frame's buffer. When a key is
    /// present it is only applied by `Frame::mask`, so the caller controls
    /// when the XOR pass happens.
    pub fn new(opcode: OpCode, mask: Option<[u8; 4]>, payload: impl AsRef<[u8]>) -> Self {
        Self {
            opcode,
            mask,
            payload: BytesMut::from(payload.as_ref()),
        }
    }

    /// Creates an unmasked text frame.
    pub fn text(payload: impl AsRef<[u8]>) -> Self {
        Self::new(OpCode::Text, None, payload)
    }

    /// Creates an unmasked close frame with an empty payload.
    pub fn close() -> Self {
        Self::new(OpCode::Close, None, BytesMut::new())
    }

    /// Creates a text frame carrying the compact JSON serialization of
    /// `value`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedMessage`](crate::RelayError::MalformedMessage)
    /// when the value cannot be serialized.
    pub fn json(value: &serde_json::Value) -> Result<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::text(payload))
    }

    /// Masks the payload in place.
    ///
    /// Uses the stored key when one is present, otherwise generates a random
    /// key and stores it so the encoder writes it into the header.
    pub(crate) fn mask(&mut self) {
        let payload = &mut self.payload;
        if let Some(mask) = self.mask {
            crate::mask::apply_mask(payload, mask);
        } else {
            let mask: [u8; 4] = rand::random();
            crate::mask::apply_mask(payload, mask);
            self.mask = Some(mask);
        }
    }

    /// Unmasks the payload in place and drops the key, if one is set.
    pub(crate) fn unmask(&mut self) {
        if let Some(mask) = self.mask.take() {
            crate::mask::apply_mask(&mut self.payload, mask);
        }
    }

    /// Formats the frame header into the beginning of `head` and returns the
    /// number of bytes written.
    ///
    /// Byte 0 is `0x80 | opcode`: every outbound frame is final. The length
    /// field uses the shortest of the three encodings that fits the payload,
    /// and the masking key follows when one is set.
    ///
    /// # Panics
    ///
    /// Panics when `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = 0x80 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod opcode_tests {
        use super::*;

        #[test]
        fn test_from_bits() {
            assert_eq!(OpCode::from_bits(0x1), Some(OpCode::Text));
            assert_eq!(OpCode::from_bits(0x8), Some(OpCode::Close));
        }

        #[test]
        fn test_from_bits_unknown() {
            for bits in [0x0, 0x2, 0x9, 0xA, 0xF] {
                assert_eq!(OpCode::from_bits(bits), None);
            }
        }

        #[test]
        fn test_into_bits() {
            assert_eq!(u8::from(OpCode::Text), 0x1);
            assert_eq!(u8::from(OpCode::Close), 0x8);
        }
    }

    mod frame_tests {
        use super::*;

        #[test]
        fn test_text_frame() {
            let frame = Frame::text("Hello");
            assert_eq!(frame.opcode, OpCode::Text);
            assert_eq!(&frame.payload[..], b"Hello");
        }

        #[test]
        fn test_text_frame_from_owned_payloads() {
            let frame = Frame::text(b"from a vec".to_vec());
            assert_eq!(&frame.payload[..], b"from a vec");

            let frame = Frame::text(String::from("from a string"));
            assert_eq!(&frame.payload[..], b"from a string");
        }

        #[test]
        fn test_close_frame_is_empty() {
            let frame = Frame::close();
            assert_eq!(frame.opcode, OpCode::Close);
            assert!(frame.payload.is_empty());
        }

        #[test]
        fn test_json_frame() {
            let value = serde_json::json!({"kind": "greeting", "body": "hi"});
            let frame = Frame::json(&value).unwrap();

            assert_eq!(frame.opcode, OpCode::Text);
            let parsed: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
            assert_eq!(parsed, value);
        }

        #[test]
        fn test_mask_unmask_roundtrip() {
            let mut frame = Frame::text("masked payload");
            frame.mask();
            assert_ne!(&frame.payload[..], b"masked payload");

            frame.unmask();
            assert_eq!(&frame.payload[..], b"masked payload");
        }

        #[test]
        fn test_mask_uses_stored_key() {
            let key = [1, 2, 3, 4];
            let mut frame = Frame::new(OpCode::Text, Some(key), "abcd");
            frame.mask();

            assert_eq!(
                &frame.payload[..],
                &[b'a' ^ 1, b'b' ^ 2, b'c' ^ 3, b'd' ^ 4]
            );
        }
    }

    mod head_tests {
        use super::*;

        #[test]
        fn test_fmt_head_small_payload() {
            let frame = Frame::text("Hello");
            let mut head = [0u8; MAX_HEAD_SIZE];
            let size = frame.fmt_head(&mut head);

            assert_eq!(size, 2);
            assert_eq!(head[0], 0x81);
            assert_eq!(head[1], 5);
        }

        #[test]
        fn test_fmt_head_sets_fin_on_close() {
            let frame = Frame::close();
            let mut head = [0u8; MAX_HEAD_SIZE];
            frame.fmt_head(&mut head);

            assert_eq!(head[0], 0x88);
            assert_eq!(head[1], 0);
        }

        #[test]
        fn test_fmt_head_extended_16bit_length() {
            let frame = Frame::text(vec![0u8; 130]);
            let mut head = [0u8; MAX_HEAD_SIZE];
            let size = frame.fmt_head(&mut head);

            assert_eq!(size, 4);
            assert_eq!(head[1], 126);
            assert_eq!(u16::from_be_bytes([head[2], head[3]]), 130);
        }

        #[test]
        fn test_fmt_head_extended_64bit_length() {
            let frame = Frame::text(vec![0u8; 70_000]);
            let mut head = [0u8; MAX_HEAD_SIZE];
            let size = frame.fmt_head(&mut head);

            assert_eq!(size, 10);
            assert_eq!(head[1], 127);
            let mut length = [0u8; 8];
            length.copy_from_slice(&head[2..10]);
            assert_eq!(u64::from_be_bytes(length), 70_000);
        }

        #[test]
        fn test_fmt_head_length_class_boundaries() {
            for (len, expected) in [(125, 2), (126, 4), (65535, 4), (65536, 10)] {
                let frame = Frame::text(vec![0u8; len]);
                let mut head = [0u8; MAX_HEAD_SIZE];
                assert_eq!(frame.fmt_head(&mut head), expected, "payload of {len}");
            }
        }

        #[test]
        fn test_fmt_head_with_mask() {
            let key = [0xde, 0xad, 0xbe, 0xef];
            let frame = Frame::new(OpCode::Text, Some(key), "Hello");
            let mut head = [0u8; MAX_HEAD_SIZE];
            let size = frame.fmt_head(&mut head);

            assert_eq!(size, 6);
            assert_eq!(head[0], 0x81);
            assert_eq!(head[1], 0x80 | 5);
            assert_eq!(&head[2..6], &key);
        }
    }
}
