use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the call this process plays. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Places calls (the visitor page).
    #[serde(alias = "visitor")]
    Caller,
    /// Receives calls (the agent console).
    #[serde(alias = "agent")]
    Callee,
}

impl Role {
    pub fn is_caller(&self) -> bool {
        matches!(self, Self::Caller)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => write!(f, "caller"),
            Self::Callee => write!(f, "callee"),
        }
    }
}

/// Opaque reference to a local capture resource owned by the media pipeline.
///
/// The session holds at most one of these at a time and hands it back
/// to the pipeline exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(pub u64);

impl fmt::Display for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    Offer,
    Answer,
}

/// Session description exchanged to establish the direct media transport.
///
/// Serializes the way browsers serialize `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "type")]
    pub kind: DescriptorKind,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescriptor {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptorKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind == DescriptorKind::Offer
    }
}

/// An ICE candidate received from or to be sent to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The candidate line (e.g. "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host")
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    pub fn with_sdp_mid(mut self, sdp_mid: impl Into<String>) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self
    }

    pub fn with_sdp_m_line_index(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }
}

/// Connection state reported by the media pipeline's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Failed,
    Closed,
}

/// Why a call left the live states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Local user hung up.
    LocalHangUp,
    /// Peer sent an end message.
    RemoteEnded,
    /// Callee declined (either side's view).
    Declined,
    /// Peer cancelled or the ring timed out before an answer.
    Cancelled,
    /// Capture device unavailable or denied.
    CaptureFailed,
    /// Descriptor or connectivity setup failed.
    NegotiationFailed,
    /// Connectivity layer reported failure after setup.
    ConnectionFailed,
    /// Signaling channel went away.
    ChannelClosed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LocalHangUp => "local hang-up",
            Self::RemoteEnded => "remote ended",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::CaptureFailed => "capture failed",
            Self::NegotiationFailed => "negotiation failed",
            Self::ConnectionFailed => "connection failed",
            Self::ChannelClosed => "channel closed",
        };
        f.write_str(s)
    }
}
