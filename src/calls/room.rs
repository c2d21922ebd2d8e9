//! Pub/sub room adapter over a plain signaling channel.
//!
//! A room relay fans every published message out to all subscribers of the
//! room, the publisher included. Outbound control text is wrapped in a publish
//! envelope; inbound envelopes are unwrapped, tagged with their sender, and
//! our own echoes are dropped. Text that is not an envelope passes through
//! unchanged, as do binary frames.

use async_trait::async_trait;
use bytes::Bytes;
use callcore::error::ChannelError;
use callcore::net::{ChannelEvent, SignalingChannel};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<Value>,
}

#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Deliver { from: Option<String>, text: String },
    Drop(&'static str),
}

impl Inbound {
    fn deliver(from: Option<String>, text: impl Into<String>) -> Self {
        Self::Deliver {
            from,
            text: text.into(),
        }
    }
}

pub struct RoomChannel {
    inner: Arc<dyn SignalingChannel>,
    room: String,
    client_id: String,
}

impl RoomChannel {
    /// Subscribe to `room` over `inner` and return the room-scoped channel with
    /// its filtered event stream.
    pub async fn join(
        inner: Arc<dyn SignalingChannel>,
        inner_rx: mpsc::Receiver<ChannelEvent>,
        room: impl Into<String>,
        client_id: impl Into<String>,
        buffer: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<ChannelEvent>), ChannelError> {
        let channel = Arc::new(Self {
            inner,
            room: room.into(),
            client_id: client_id.into(),
        });

        let subscribe = channel.envelope("subscribe", None)?;
        channel.inner.send_text(&subscribe).await?;
        debug!("joined room {} as {}", channel.room, channel.client_id);

        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(filter_pump(
            inner_rx,
            tx,
            channel.room.clone(),
            channel.client_id.clone(),
        ));
        Ok((channel, rx))
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn envelope(&self, kind: &str, message: Option<Value>) -> Result<String, ChannelError> {
        let envelope = Envelope {
            kind: Some(kind.to_string()),
            room: self.room.clone(),
            from: Some(self.client_id.clone()),
            message,
        };
        serde_json::to_string(&envelope).map_err(|e| ChannelError::Send(e.to_string()))
    }
}

#[async_trait]
impl SignalingChannel for RoomChannel {
    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        let message = serde_json::from_str::<Value>(text)
            .unwrap_or_else(|_| Value::String(text.to_string()));
        let wrapped = self.envelope("publish", Some(message))?;
        self.inner.send_text(&wrapped).await
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), ChannelError> {
        self.inner.send_binary(data).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

fn unwrap_inbound(text: String, room: &str, own_id: &str) -> Inbound {
    let Ok(envelope) = serde_json::from_str::<Envelope>(&text) else {
        return Inbound::deliver(None, text);
    };
    if envelope.room != room {
        return Inbound::Drop("other room");
    }
    if envelope.from.as_deref() == Some(own_id) {
        return Inbound::Drop("own echo");
    }
    match envelope.message {
        Some(Value::String(s)) => Inbound::deliver(envelope.from, s),
        Some(message) => Inbound::deliver(envelope.from, message.to_string()),
        None => Inbound::Drop("no payload"),
    }
}

async fn filter_pump(
    mut inner_rx: mpsc::Receiver<ChannelEvent>,
    tx: mpsc::Sender<ChannelEvent>,
    room: String,
    client_id: String,
) {
    while let Some(event) = inner_rx.recv().await {
        let closed = event == ChannelEvent::Closed;
        let forwarded = match event {
            ChannelEvent::Text(text) => match unwrap_inbound(text, &room, &client_id) {
                Inbound::Deliver {
                    from: Some(from),
                    text,
                } => ChannelEvent::Relayed { from, text },
                Inbound::Deliver { from: None, text } => ChannelEvent::Text(text),
                Inbound::Drop(reason) => {
                    trace!("room {room}: dropping message ({reason})");
                    continue;
                }
            },
            other => other,
        };
        if tx.send(forwarded).await.is_err() {
            warn!("room {room}: event receiver dropped");
            break;
        }
        if closed {
            break;
        }
    }
}
