//! Call-control error types.

use thiserror::Error;

/// Camera or microphone unavailable or denied. Never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture device not found")]
    NotFound,
    #[error("capture permission denied")]
    Denied,
    #[error("capture device busy: {0}")]
    Busy(String),
    #[error("capture failed: {0}")]
    Other(String),
}

/// Remote description or connectivity setup failed. Fatal to the current call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("failed to create local descriptor: {0}")]
    CreateDescriptor(String),
    #[error("remote descriptor rejected: {0}")]
    RemoteDescriptor(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("no negotiation context")]
    NoContext,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
    #[error("connect failed: {0}")]
    Connect(String),
}

/// A control message that could not be understood. Logged and discarded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedMessage {
    #[error("control message is not valid JSON: {0}")]
    Json(String),
    #[error("control message has no recognised tag")]
    UnknownShape,
    #[error("control frame is not valid UTF-8")]
    Utf8,
    #[error("binary frame is empty")]
    EmptyFrame,
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{message} cannot be expressed in the {dialect} dialect")]
    Unrepresentable {
        message: &'static str,
        dialect: &'static str,
    },
    #[error("serialization failed: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition {attempted} in state {current_state}")]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Malformed(#[from] MalformedMessage),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("controller is not running")]
    ControllerGone,
}
