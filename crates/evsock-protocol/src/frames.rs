//! Wire frames exchanged with the transport.
//!
//! A frame is what the socket actually carries: either a UTF-8 text frame
//! holding a JSON envelope, or a binary frame holding raw bytes with an
//! attached metadata string.

use bytes::Bytes;

/// Frame kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Text,
    Binary,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameKind::Text => f.write_str("text"),
            FrameKind::Binary => f.write_str("binary"),
        }
    }
}

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame carrying a JSON envelope.
    Text(String),
    /// A binary frame carrying payload bytes plus attached metadata.
    Binary(Bytes),
}

impl Frame {
    /// Get the frame kind.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Text(_) => FrameKind::Text,
            Frame::Binary(_) => FrameKind::Binary,
        }
    }

    /// Create a new text frame.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Frame::Text(text.into())
    }

    /// Create a new binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Frame::Binary(data.into())
    }

    /// Size of the frame body in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    /// Whether the frame body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the text body, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }
}
