//! Incremental frame codec.
//!
//! The decoder is a small state machine that consumes bytes as they arrive
//! over the upgraded socket, carrying its position across reads: first the
//! two fixed header bytes, then the extended length and masking key the
//! header announced, then the payload. Once a whole frame is buffered it is
//! unmasked and classified into an [`Inbound`] value for the relay.
//!
//! The encoder writes [`Frame`]s back out: a header formatted with
//! [`Frame::fmt_head`] followed by the payload, verbatim.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, Inbound, OpCode, MAX_HEAD_SIZE},
    mask::apply_mask,
    RelayError,
};

/// Largest accepted inbound payload (1 MiB).
///
/// A frame announcing more than this fails decoding with
/// [`RelayError::FrameTooLarge`] and ends the connection.
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// Represents the reading state of a frame in transit.
enum ReadState {
    /// The fixed header bytes are parsed, the announced extension bytes are
    /// still outstanding.
    Header(Header),
    /// The whole header is parsed, the payload is still outstanding.
    Payload(HeaderAndMask),
}

/// Fields parsed from the two fixed header bytes.
struct Header {
    /// Raw low 4 bits of the first header byte.
    opcode: u8,
    /// Indicates if the frame is masked.
    masked: bool,
    /// Encoded length of the payload.
    length_code: u8,
    /// Size of the extended length field, if one follows.
    extra: usize,
    /// Total size of the remaining header fields.
    header_size: usize,
}

/// Fully parsed header fields, ready for payload extraction.
struct HeaderAndMask {
    /// Raw low 4 bits of the first header byte.
    opcode: u8,
    /// The masking key of the frame, if any.
    mask: Option<[u8; 4]>,
    /// Exact length of the payload.
    payload_len: usize,
}

/// Decodes inbound frames from a raw byte stream.
pub struct Decoder {
    /// The current read state, if a frame is mid-parse.
    state: Option<ReadState>,
    /// Maximum accepted payload size.
    max_payload: usize,
}

impl Decoder {
    /// Creates a decoder that rejects payloads larger than `max_payload`
    /// bytes.
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: None,
            max_payload,
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD)
    }
}

impl codec::Decoder for Decoder {
    type Item = Inbound;
    type Error = RelayError;

    /// Decodes at most one frame from `src`.
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a frame; the
    /// parse position is kept and the next call resumes where this one
    /// stopped. The FIN and RSV bits are not consulted, only the opcode
    /// bits of the first byte matter.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let opcode = src[0] & 0x0F;
                    let masked = src[1] & 0x80 != 0;
                    let length_code = src[1] & 0x7F;
                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        opcode,
                        masked,
                        length_code,
                        extra,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len = match header.extra {
                        2 => usize::from(src.get_u16()),
                        8 => usize::try_from(src.get_u64())
                            .map_err(|_| RelayError::FrameTooLarge)?,
                        _ => usize::from(header.length_code),
                    };

                    let mask = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    if payload_len > self.max_payload {
                        return Err(RelayError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        opcode: header.opcode,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header)) => {
                    if src.remaining() < header.payload_len {
                        self.state = Some(ReadState::Payload(header));
                        return Ok(None);
                    }

                    let mut payload = src.split_to(header.payload_len);

                    let inbound = match OpCode::from_bits(header.opcode) {
                        Some(OpCode::Close) => Inbound::Close,
                        Some(OpCode::Text) => {
                            if let Some(mask) = header.mask {
                                apply_mask(&mut payload, mask);
                            }
                            Inbound::Text(String::from_utf8_lossy(&payload).into_owned())
                        }
                        None => Inbound::Ignored(header.opcode),
                    };

                    return Ok(Some(inbound));
                }
            }
        }
    }
}

/// Encodes outbound frames onto a raw byte stream.
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = RelayError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut head = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut head);

        dst.extend_from_slice(&head[..size]);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// Combined frame codec for use with [`tokio_util::codec::Framed`].
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates a codec with the default [`MAX_PAYLOAD`] read limit.
    pub fn new() -> Self {
        Self::from((Decoder::default(), Encoder))
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = Inbound;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = RelayError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(frame, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        Encoder.encode(frame, &mut buf).unwrap();
        buf
    }

    fn decode_one(buf: &mut BytesMut) -> Inbound {
        Decoder::default()
            .decode(buf)
            .unwrap()
            .expect("a whole frame was buffered")
    }

    fn assert_json_roundtrip(value: &serde_json::Value) -> BytesMut {
        let mut buf = encode(Frame::json(value).unwrap());
        let wire = buf.clone();

        match decode_one(&mut buf) {
            Inbound::Text(text) => {
                let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(&parsed, value);
            }
            other => panic!("expected a text message, got {other:?}"),
        }
        assert!(buf.is_empty());
        wire
    }

    // The three payload sizes pin the three length-encoding branches: a 10
    // byte payload fits the 7 bit field, 130 bytes need the 16 bit field,
    // 70,000 bytes the 64 bit field.
    #[test]
    fn test_json_roundtrip_small() {
        let value = serde_json::Value::String("x".repeat(8));
        let wire = assert_json_roundtrip(&value);
        assert_eq!(wire[1], 10);
    }

    #[test]
    fn test_json_roundtrip_extended_16bit() {
        let value = serde_json::Value::String("x".repeat(128));
        let wire = assert_json_roundtrip(&value);
        assert_eq!(wire[1], 126);
    }

    #[test]
    fn test_json_roundtrip_extended_64bit() {
        let value = serde_json::Value::String("y".repeat(69_998));
        let wire = assert_json_roundtrip(&value);
        assert_eq!(wire[1], 127);
    }

    #[test]
    fn test_masked_frame_is_unmasked() {
        let mut frame = Frame::text(r#"{"kind":"chat"}"#);
        frame.mask();
        let mut buf = encode(frame);
        assert_ne!(&buf[6..], br#"{"kind":"chat"}"#);

        match decode_one(&mut buf) {
            Inbound::Text(text) => assert_eq!(text, r#"{"kind":"chat"}"#),
            other => panic!("expected a text message, got {other:?}"),
        }
    }

    #[test]
    fn test_close_frame() {
        let mut buf = encode(Frame::close());
        assert_eq!(decode_one(&mut buf), Inbound::Close);
    }

    #[test]
    fn test_close_payload_is_discarded() {
        let mut buf = BytesMut::from(&[0x88, 0x02, 0x03, 0xe8][..]);
        assert_eq!(decode_one(&mut buf), Inbound::Close);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_opcode_is_ignored_and_stream_continues() {
        let mut decoder = Decoder::default();
        // A ping frame followed by a text frame.
        let mut buf = BytesMut::from(&[0x89, 0x00, 0x81, 0x02, b'h', b'i'][..]);

        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Inbound::Ignored(0x9)));
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Inbound::Text("hi".into()))
        );
    }

    #[test]
    fn test_fin_bit_not_consulted() {
        let mut buf = BytesMut::from(&[0x01, 0x02, b'h', b'i'][..]);
        assert_eq!(decode_one(&mut buf), Inbound::Text("hi".into()));
    }

    #[test]
    fn test_partial_header_keeps_state() {
        let mut decoder = Decoder::default();
        let frame = encode(Frame::text("incremental"));

        let mut buf = BytesMut::new();
        for byte in &frame[..frame.len() - 1] {
            buf.extend_from_slice(&[*byte]);
            assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        }

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Inbound::Text("incremental".into()))
        );
    }

    #[test]
    fn test_partial_masked_header_keeps_state() {
        let mut decoder = Decoder::default();
        let mut frame = Frame::text("split across reads");
        frame.mask();
        let wire = encode(frame);

        // Fixed bytes first, then the key and payload in a second read.
        let mut buf = BytesMut::from(&wire[..2]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&wire[2..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Inbound::Text("split across reads".into()))
        );
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut decoder = Decoder::default();
        let mut buf = encode(Frame::text("first"));
        buf.extend_from_slice(&encode(Frame::text("second")));

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Inbound::Text("first".into()))
        );
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Inbound::Text("second".into()))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_extended_length_is_exact() {
        let mut decoder = Decoder::default();
        // The 16 bit length must bound the payload; the trailing close frame
        // must survive as the next frame.
        let payload = "z".repeat(200);
        let mut buf = encode(Frame::text(payload.clone()));
        buf.extend_from_slice(&encode(Frame::close()));

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Inbound::Text(payload))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Inbound::Close));
    }

    #[test]
    fn test_frame_too_large() {
        let mut decoder = Decoder::new(16);
        let mut buf = encode(Frame::text("seventeen bytes!!"));

        assert!(matches!(
            decoder.decode(&mut buf),
            Err(RelayError::FrameTooLarge)
        ));
    }

    #[test]
    fn test_payload_at_limit_is_accepted() {
        let mut decoder = Decoder::new(16);
        let mut buf = encode(Frame::text("sixteen bytes ok"));

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Inbound::Text("sixteen bytes ok".into()))
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buf = BytesMut::from(&[0x81, 0x03, b'h', 0xFF, b'i'][..]);

        match decode_one(&mut buf) {
            Inbound::Text(text) => assert_eq!(text, "h\u{FFFD}i"),
            other => panic!("expected a text message, got {other:?}"),
        }
    }
}
