//! Error types for signaling and recording coordination

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating a capture session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown action or leg name on the wire
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Malformed offer for a single leg
    #[error("Negotiation error: {0}")]
    NegotiationError(String),

    /// Media Engine failed to create a transport, stream or recorder
    #[error("Resource error: {0}")]
    ResourceError(String),

    /// Start/stop issued out of sequence
    #[error("Lifecycle error: {0}")]
    LifecycleError(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Session registry is at capacity
    #[error("Session limit reached: {0}")]
    SessionLimitReached(usize),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl Error {
    /// Whether the session can no longer be used after this error
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::ResourceError(_) | Error::WebRtcError(_) | Error::IoError(_)
        )
    }

    /// Errors that are logged and swallowed rather than reported
    pub fn is_silent(&self) -> bool {
        matches!(self, Error::LifecycleError(_))
    }

    /// Code carried by the `ERROR` envelope on the wire
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ProtocolError(_) | Error::SerializationError(_) => "PROTOCOL_ERROR",
            Error::NegotiationError(_) => "NEGOTIATION_ERROR",
            Error::ResourceError(_) | Error::WebRtcError(_) | Error::IoError(_) => {
                "RESOURCE_ERROR"
            }
            Error::LifecycleError(_) => "LIFECYCLE_ERROR",
            Error::SessionLimitReached(_) => "SESSION_LIMIT",
            _ => "INTERNAL_ERROR",
        }
    }
}
