use thiserror::Error;

/// A backend frame that could not be decoded. The relay logs these and drops
/// the frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("binary frame too short: {len} bytes, header needs 8")]
    TooShort { len: usize },

    #[error("malformed JSON frame: {0}")]
    Json(String),
}

/// A browser/server message that does not follow the protocol.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("invalid '{kind}' payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
