//! Signaling message taxonomy and its wire dialects.
//!
//! A call is driven by five control messages. They travel as JSON text over
//! whatever relay connects the two parties, and three encodings are in use:
//!
//! - [`Dialect::Native`]: a `type`-tagged union, the one this crate speaks by default.
//! - [`Dialect::Room`]: the pub/sub room shape, where the message kind is implied by
//!   which key is present (`sdp`, `candidate`, `endCall`).
//! - [`Dialect::Socket`]: the raw relay-socket shape (`incoming_call`, `call_accepted`,
//!   `call_denied`, `call_ended`), which carries no descriptors at all.
//!
//! Decoding accepts every dialect; encoding uses the one the codec was built with.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

use crate::error::{CodecError, MalformedMessage};
use crate::types::{DescriptorKind, IceCandidate, SessionDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// Start of call (caller → callee).
    Invite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        descriptor: Option<SessionDescriptor>,
    },
    /// Call accepted, carrying the negotiation response (callee → caller).
    Accept {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        descriptor: Option<SessionDescriptor>,
    },
    /// Incremental connectivity information (either direction).
    Candidate { candidate: IceCandidate },
    /// Call rejected (callee → caller).
    Decline,
    /// Call terminated (either direction).
    End,
}

impl SignalMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Invite { .. } => "invite",
            Self::Accept { .. } => "accept",
            Self::Candidate { .. } => "candidate",
            Self::Decline => "decline",
            Self::End => "end",
        }
    }
}

impl fmt::Display for SignalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Native,
    Room,
    Socket,
}

impl Dialect {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Room => "room",
            Self::Socket => "socket",
        }
    }
}

const SOCKET_INVITE: &str = "incoming_call";
const SOCKET_ACCEPT: &str = "call_accepted";
const SOCKET_DECLINE: &str = "call_denied";
const SOCKET_END: &str = "call_ended";

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalCodec {
    dialect: Dialect,
}

impl SignalCodec {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Encode a message into the JSON value for this codec's dialect.
    pub fn encode_value(&self, message: &SignalMessage) -> Result<Value, CodecError> {
        match self.dialect {
            Dialect::Native => {
                serde_json::to_value(message).map_err(|e| CodecError::Serialize(e.to_string()))
            }
            Dialect::Room => encode_room(message),
            Dialect::Socket => encode_socket(message),
        }
    }

    pub fn encode(&self, message: &SignalMessage) -> Result<String, CodecError> {
        let value = self.encode_value(message)?;
        serde_json::to_string(&value).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    /// Decode a control message in any dialect.
    pub fn decode(&self, text: &str) -> Result<SignalMessage, MalformedMessage> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| MalformedMessage::Json(e.to_string()))?;
        self.decode_value(value)
    }

    pub fn decode_value(&self, value: Value) -> Result<SignalMessage, MalformedMessage> {
        let Value::Object(obj) = value else {
            return Err(MalformedMessage::UnknownShape);
        };

        let tag = obj.get("type").and_then(Value::as_str).map(str::to_owned);
        if let Some(tag) = tag {
            match tag.as_str() {
                SOCKET_INVITE => return Ok(SignalMessage::Invite { descriptor: None }),
                SOCKET_ACCEPT => return Ok(SignalMessage::Accept { descriptor: None }),
                SOCKET_DECLINE => return Ok(SignalMessage::Decline),
                SOCKET_END => return Ok(SignalMessage::End),
                _ => {}
            }
            // A recognised native tag with a bad payload is malformed; an unknown
            // tag may still be a room-shaped message with a stray `type` field.
            if matches!(
                tag.as_str(),
                "invite" | "accept" | "candidate" | "decline" | "end"
            ) {
                return serde_json::from_value(Value::Object(obj))
                    .map_err(|e| MalformedMessage::Json(e.to_string()));
            }
        }

        decode_room(obj)
    }
}

fn encode_room(message: &SignalMessage) -> Result<Value, CodecError> {
    let unrepresentable = |message: &'static str| CodecError::Unrepresentable {
        message,
        dialect: Dialect::Room.name(),
    };
    match message {
        SignalMessage::Invite { descriptor } => {
            let descriptor = descriptor.as_ref().ok_or(unrepresentable("invite without offer"))?;
            Ok(json!({ "sdp": to_json(descriptor)? }))
        }
        SignalMessage::Accept { descriptor } => {
            let descriptor = descriptor
                .as_ref()
                .ok_or(unrepresentable("accept without answer"))?;
            Ok(json!({ "sdp": to_json(descriptor)? }))
        }
        SignalMessage::Candidate { candidate } => Ok(json!({ "candidate": to_json(candidate)? })),
        // The room protocol folds a decline into a plain end.
        SignalMessage::Decline | SignalMessage::End => Ok(json!({ "endCall": true })),
    }
}

fn encode_socket(message: &SignalMessage) -> Result<Value, CodecError> {
    let tag = match message {
        SignalMessage::Invite { .. } => SOCKET_INVITE,
        SignalMessage::Accept { .. } => SOCKET_ACCEPT,
        SignalMessage::Decline => SOCKET_DECLINE,
        SignalMessage::End => SOCKET_END,
        SignalMessage::Candidate { .. } => {
            return Err(CodecError::Unrepresentable {
                message: "candidate",
                dialect: Dialect::Socket.name(),
            });
        }
    };
    Ok(json!({ "type": tag }))
}

fn decode_room(mut obj: Map<String, Value>) -> Result<SignalMessage, MalformedMessage> {
    if let Some(sdp) = obj.remove("sdp") {
        let descriptor: SessionDescriptor =
            serde_json::from_value(sdp).map_err(|e| MalformedMessage::Json(e.to_string()))?;
        return Ok(match descriptor.kind {
            DescriptorKind::Offer => SignalMessage::Invite {
                descriptor: Some(descriptor),
            },
            DescriptorKind::Answer => SignalMessage::Accept {
                descriptor: Some(descriptor),
            },
        });
    }
    if let Some(candidate) = obj.remove("candidate") {
        let candidate: IceCandidate = serde_json::from_value(candidate)
            .map_err(|e| MalformedMessage::Json(e.to_string()))?;
        return Ok(SignalMessage::Candidate { candidate });
    }
    if let Some(Value::Bool(true)) = obj.get("endCall") {
        return Ok(SignalMessage::End);
    }
    Err(MalformedMessage::UnknownShape)
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CodecError> {
    serde_json::to_value(value).map_err(|e| CodecError::Serialize(e.to_string()))
}
