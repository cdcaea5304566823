//! Error types for the neuroplace-wire crate.

/// Errors raised while decoding or encoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The text is not a JSON document.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The JSON object has no string `type` tag.
    #[error("message has no type tag")]
    MissingType,

    /// The tag is known but the payload does not match its shape.
    #[error("invalid {kind} payload: {reason}")]
    Payload {
        /// The `type` tag of the rejected message.
        kind: String,
        /// Decoder diagnostic.
        reason: String,
    },

    /// A color string could not be parsed.
    #[error("invalid color: {0:?}")]
    InvalidColor(String),

    /// Serialization of an outbound message failed.
    #[error("encode error: {0}")]
    Encode(String),
}

/// Convenience type alias for wire results.
pub type Result<T> = std::result::Result<T, WireError>;
