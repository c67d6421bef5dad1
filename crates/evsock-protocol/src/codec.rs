//! Codec for encoding and decoding evsock envelopes.
//!
//! Text envelopes are plain JSON. Binary envelopes attach a metadata string to
//! the raw payload using a length-suffixed layout:
//!
//! ```text
//! +-----------------+------------------------+---------------------+
//! | payload (N)     | metadata UTF-8 (M)     | M as u32 big-endian |
//! +-----------------+------------------------+---------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;

use crate::envelope::{BinaryMeta, Envelope, OutboundEnvelope, Payload, TextEnvelope};
use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Metadata length suffix size in bytes.
pub const LENGTH_SUFFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Binary frame too short to hold the metadata suffix.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// Metadata length points outside the frame.
    #[error("Metadata length {metadata} exceeds frame body {available}")]
    MetadataOutOfBounds { metadata: usize, available: usize },

    /// Metadata is not valid UTF-8.
    #[error("Metadata is not valid UTF-8")]
    MetadataEncoding(#[from] std::str::Utf8Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a text envelope.
///
/// # Errors
///
/// Returns an error if `data` cannot be serialized or the result is too large.
pub fn encode_text<T: Serialize + ?Sized>(event: &str, data: &T) -> Result<Frame, ProtocolError> {
    let text = serde_json::to_string(&OutboundEnvelope { event, data })?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(Frame::Text(text))
}

/// Decode a text envelope.
///
/// # Errors
///
/// Returns an error if the text is not a JSON object with an `event` string.
pub fn decode_text(text: &str) -> Result<Envelope, ProtocolError> {
    let TextEnvelope { event, data } = serde_json::from_str(text)?;
    Ok(Envelope::new(event, Payload::Json(data)))
}

/// Attach a metadata string to a binary payload.
///
/// # Errors
///
/// Returns an error if the combined frame is too large.
pub fn attach_string(payload: &[u8], metadata: &str) -> Result<Bytes, ProtocolError> {
    let total = payload.len() + metadata.len() + LENGTH_SUFFIX_SIZE;
    if total > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(total));
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(metadata.as_bytes());
    buf.put_u32(metadata.len() as u32);

    Ok(buf.freeze())
}

/// Split a binary frame into its payload and metadata regions.
fn split_binary(data: &Bytes) -> Result<(Bytes, Bytes), ProtocolError> {
    if data.len() < LENGTH_SUFFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_SUFFIX_SIZE - data.len()));
    }

    let body_len = data.len() - LENGTH_SUFFIX_SIZE;
    let suffix = &data[body_len..];
    let metadata_len = u32::from_be_bytes([suffix[0], suffix[1], suffix[2], suffix[3]]) as usize;

    if metadata_len > body_len {
        return Err(ProtocolError::MetadataOutOfBounds {
            metadata: metadata_len,
            available: body_len,
        });
    }

    let payload_len = body_len - metadata_len;
    Ok((data.slice(..payload_len), data.slice(payload_len..body_len)))
}

/// Extract the metadata string from a binary frame.
///
/// # Errors
///
/// Returns an error if the layout is invalid or the metadata is not UTF-8.
pub fn extract_string(data: &Bytes) -> Result<String, ProtocolError> {
    let (_, metadata) = split_binary(data)?;
    Ok(std::str::from_utf8(&metadata)?.to_owned())
}

/// Detach the metadata from a binary frame, returning the payload bytes.
///
/// # Errors
///
/// Returns an error if the layout is invalid.
pub fn detach_string(data: &Bytes) -> Result<Bytes, ProtocolError> {
    let (payload, _) = split_binary(data)?;
    Ok(payload)
}

/// Encode a binary envelope.
///
/// # Errors
///
/// Returns an error if the metadata cannot be serialized or the frame is too large.
pub fn encode_binary(event: &str, payload: &[u8]) -> Result<Frame, ProtocolError> {
    let metadata = serde_json::to_string(&BinaryMeta {
        event: event.to_owned(),
    })?;
    Ok(Frame::Binary(attach_string(payload, &metadata)?))
}

/// Decode a binary envelope.
///
/// # Errors
///
/// Returns an error if the layout is invalid or the metadata is not `{event}` JSON.
pub fn decode_binary(data: &Bytes) -> Result<Envelope, ProtocolError> {
    let metadata = extract_string(data)?;
    let payload = detach_string(data)?;
    let BinaryMeta { event } = serde_json::from_str(&metadata)?;
    Ok(Envelope::new(event, Payload::Binary(payload)))
}

/// Decode any frame into an envelope.
///
/// # Errors
///
/// Returns an error if the frame body is malformed.
pub fn decode(frame: &Frame) -> Result<Envelope, ProtocolError> {
    match frame {
        Frame::Text(text) => decode_text(text),
        Frame::Binary(data) => decode_binary(data),
    }
}

/// Encode a payload under `event`, choosing the frame kind from the payload.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_payload(event: &str, payload: &Payload) -> Result<Frame, ProtocolError> {
    match payload {
        Payload::Json(value) => encode_text(event, value),
        Payload::Binary(data) => encode_binary(event, data),
    }
}
