#![forbid(unsafe_code)]

//! Wire envelope for the confab gateway. Every frame in either direction is
//! a JSON object of the shape `{"type": <kind>, "payload": <object>}`.

use serde::{Deserialize, Serialize};

/// Maximum allowed bytes for a single gateway frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Gateway frame envelope. All traffic uses `{ type, payload }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub payload: T,
}

/// Frame kind identifier with a strict character allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameKind(String);

impl FrameKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_frame_kind(&value)?;
        Ok(Self(value))
    }
}

impl From<FrameKind> for String {
    fn from(value: FrameKind) -> Self {
        value.0
    }
}

/// Parse and validate an inbound frame at the network boundary.
///
/// # Errors
/// Returns [`ProtocolError`] if the payload exceeds [`MAX_FRAME_BYTES`], is
/// malformed JSON, or carries an invalid frame kind.
pub fn parse_frame(input: &[u8]) -> Result<Envelope<serde_json::Value>, ProtocolError> {
    if input.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::OversizedPayload {
            max: MAX_FRAME_BYTES,
            actual: input.len(),
        });
    }

    let envelope: Envelope<serde_json::Value> = serde_json::from_slice(input)?;
    Ok(envelope)
}

pub(crate) fn validate_frame_kind(value: &str) -> Result<(), ProtocolError> {
    const MAX_LEN: usize = 64;

    if value.is_empty() || value.len() > MAX_LEN {
        return Err(ProtocolError::InvalidFrameKind);
    }

    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == ':' || c == '-' || c == '_')
    {
        return Ok(());
    }

    Err(ProtocolError::InvalidFrameKind)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload exceeds max size: max={max} bytes actual={actual} bytes")]
    OversizedPayload { max: usize, actual: usize },
    #[error("invalid frame kind")]
    InvalidFrameKind,
    #[error("invalid json payload")]
    InvalidJson,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}
