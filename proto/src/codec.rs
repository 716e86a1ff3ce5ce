//! Frame codec for the radio link
//!
//! Every plaintext frame is laid out as:
//! ```text
//! [ 2 bytes: magic "PT" ][ 1 byte: version ][ N bytes: JSON frame body ]
//! ```
//!
//! The magic and version sit in front of the body so that garbage payloads
//! and wrong-key decrypts are rejected deterministically before any JSON
//! parsing is attempted. The body is self-describing JSON; it must stay
//! stable within one rover/base deployment but is not frozen across
//! firmware versions.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frame::Frame;
use crate::protocol::{FRAME_MAGIC, FRAME_VERSION};

/// Maximum encoded frame size; the radio's payload limit
pub const MAX_FRAME_SIZE: usize = 255;

/// Errors that can occur during frame encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    /// Encoded frame would not fit in one radio payload
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    /// Frame fails schema validation (empty id, out-of-range coordinates)
    #[error("invalid frame field: {0}")]
    InvalidField(&'static str),

    /// Payload is too short, has the wrong magic, or an unknown version
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// Body is not valid JSON for the frame schema
    #[error("frame body error: {0}")]
    Body(#[from] serde_json::Error),
}

/// Encode a frame into its plaintext wire representation
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    if !frame.is_valid() {
        return Err(CodecError::InvalidField(
            "device_id empty/oversized or coordinates out of range",
        ));
    }

    let body = serde_json::to_vec(frame)?;
    let total = FRAME_MAGIC.len() + 1 + body.len();
    if total > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(total));
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_slice(&FRAME_MAGIC);
    buf.put_u8(FRAME_VERSION);
    buf.put_slice(&body);

    Ok(buf.freeze())
}

/// Decode a plaintext wire payload back into a frame
///
/// Rejects anything that is not a complete, well-formed frame; a partially
/// populated frame must never escape this function.
pub fn decode(payload: &[u8]) -> Result<Frame, CodecError> {
    if payload.len() < FRAME_MAGIC.len() + 1 {
        return Err(CodecError::Malformed("payload shorter than header"));
    }

    if payload[..FRAME_MAGIC.len()] != FRAME_MAGIC {
        return Err(CodecError::Malformed("bad magic"));
    }

    let version = payload[FRAME_MAGIC.len()];
    if version != FRAME_VERSION {
        return Err(CodecError::Malformed("unsupported frame version"));
    }

    let frame: Frame = serde_json::from_slice(&payload[FRAME_MAGIC.len() + 1..])?;

    if !frame.is_valid() {
        return Err(CodecError::InvalidField(
            "device_id empty/oversized or coordinates out of range",
        ));
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{decrypt, encrypt};

    fn test_frame() -> Frame {
        Frame {
            device_id: "rv1".into(),
            latitude: 36.15,
            longitude: -95.99,
            timestamp: 1000,
            satellites: Some(7),
            altitude: Some(198.2),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = test_frame();

        let encoded = encode(&original).expect("encode failed");
        assert_eq!(&encoded[..2], b"PT");
        assert_eq!(encoded[2], FRAME_VERSION);

        let decoded = decode(&encoded).expect("decode failed");
        assert_eq!(decoded.device_id, original.device_id);
        assert!((decoded.latitude - original.latitude).abs() < 1e-9);
        assert!((decoded.longitude - original.longitude).abs() < 1e-9);
        assert_eq!(decoded.timestamp, original.timestamp);
        assert_eq!(decoded.satellites, original.satellites);
    }

    #[test]
    fn test_full_wire_roundtrip() {
        let original = test_frame();
        let key = b"secret";

        let wire = encrypt(&encode(&original).expect("encode failed"), key)
            .expect("encrypt failed");
        let plain = decrypt(&wire, key).expect("decrypt failed");
        let decoded = decode(&plain).expect("decode failed");

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_wrong_key_rejected_as_malformed() {
        let wire = encrypt(&encode(&test_frame()).expect("encode failed"), b"secret")
            .expect("encrypt failed");
        let plain = decrypt(&wire, b"hunter2").expect("decrypt failed");

        let err = decode(&plain).expect_err("wrong key must not decode");
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode(b"").is_err());
        assert!(decode(b"P").is_err());
        assert!(decode(b"XX\x01{}").is_err());
        assert!(decode(b"PT\x7f{}").is_err());
        assert!(decode(b"PT\x01not json at all").is_err());
        assert!(decode(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_missing_device_id_rejected() {
        let mut buf = Vec::from(&b"PT\x01"[..]);
        buf.extend_from_slice(br#"{"lat":1.0,"lon":2.0,"ut":3}"#);
        assert!(matches!(decode(&buf), Err(CodecError::Body(_))));
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let mut buf = Vec::from(&b"PT\x01"[..]);
        buf.extend_from_slice(br#"{"device_id":"rv1","lat":91.0,"lon":0.0,"ut":3}"#);
        assert!(matches!(decode(&buf), Err(CodecError::InvalidField(_))));
    }

    #[test]
    fn test_invalid_frame_refused_on_encode() {
        let frame = Frame::new("", 36.15, -95.99, 1000);
        assert!(matches!(encode(&frame), Err(CodecError::InvalidField(_))));
    }

    #[test]
    fn test_optional_fields_absent() {
        let frame = Frame::new("rv1", 1.5, 2.5, 42);
        let encoded = encode(&frame).expect("encode failed");
        let decoded = decode(&encoded).expect("decode failed");
        assert_eq!(decoded.satellites, None);
        assert_eq!(decoded.altitude, None);
    }
}
