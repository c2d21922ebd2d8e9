//! Classification of frames on a mixed-content channel.
//!
//! The relayed-media variant carries control text and media bytes over the same
//! socket. Tagged framing puts one leading byte in front of every binary frame
//! so the two never need to be guessed apart.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::MalformedMessage;

pub const TAG_CONTROL: u8 = 0x00;
pub const TAG_MEDIA: u8 = 0x01;

/// Size below which an untagged binary frame is treated as control text.
pub const LEGACY_TEXT_THRESHOLD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FramingMode {
    /// Every binary frame starts with [`TAG_CONTROL`] or [`TAG_MEDIA`].
    Tagged,
    /// Untagged peers: short binary frames are control text, the rest is media.
    ///
    /// A legitimately small media chunk is misrouted under this mode.
    LegacySizeHeuristic { threshold: usize },
}

impl Default for FramingMode {
    fn default() -> Self {
        Self::Tagged
    }
}

impl FramingMode {
    pub fn legacy() -> Self {
        Self::LegacySizeHeuristic {
            threshold: LEGACY_TEXT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Control(String),
    Media(Bytes),
}

/// Route a binary frame to the control or media path.
pub fn classify_binary(data: Bytes, mode: FramingMode) -> Result<Frame, MalformedMessage> {
    match mode {
        FramingMode::Tagged => {
            let Some(&tag) = data.first() else {
                return Err(MalformedMessage::EmptyFrame);
            };
            let body = data.slice(1..);
            match tag {
                TAG_CONTROL => String::from_utf8(body.to_vec())
                    .map(Frame::Control)
                    .map_err(|_| MalformedMessage::Utf8),
                TAG_MEDIA => Ok(Frame::Media(body)),
                other => Err(MalformedMessage::UnknownTag(other)),
            }
        }
        FramingMode::LegacySizeHeuristic { threshold } => {
            if data.len() < threshold {
                String::from_utf8(data.to_vec())
                    .map(Frame::Control)
                    .map_err(|_| MalformedMessage::Utf8)
            } else {
                Ok(Frame::Media(data))
            }
        }
    }
}

/// Prepare an outbound media chunk for the wire.
pub fn frame_media(chunk: &[u8], mode: FramingMode) -> Bytes {
    match mode {
        FramingMode::Tagged => {
            let mut out = BytesMut::with_capacity(chunk.len() + 1);
            out.put_u8(TAG_MEDIA);
            out.extend_from_slice(chunk);
            out.freeze()
        }
        FramingMode::LegacySizeHeuristic { .. } => Bytes::copy_from_slice(chunk),
    }
}

/// Prepare control text for a binary-only transport.
pub fn frame_control(text: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(text.len() + 1);
    out.put_u8(TAG_CONTROL);
    out.extend_from_slice(text.as_bytes());
    out.freeze()
}
