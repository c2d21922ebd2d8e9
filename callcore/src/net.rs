use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ChannelError;

/// An event produced by the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is open.
    Connected,
    /// A text frame (always control) arrived.
    Text(String),
    /// Control text a relay attributed to a named sender.
    Relayed { from: String, text: String },
    /// A binary frame arrived. May be media or control depending on framing.
    Binary(Bytes),
    /// The channel closed. No further events follow.
    Closed,
}

/// The out-of-band message transport between the two parties.
///
/// Delivery is ordered per direction. Nothing is redelivered across a reconnect,
/// and nothing is deduplicated.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), ChannelError>;

    async fn send_binary(&self, data: Bytes) -> Result<(), ChannelError>;

    /// Closes the channel.
    async fn close(&self);
}

/// A factory responsible for opening new channels.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Opens a channel and returns it, along with its stream of events.
    async fn open(
        &self,
    ) -> Result<(Arc<dyn SignalingChannel>, mpsc::Receiver<ChannelEvent>), ChannelError>;
}
