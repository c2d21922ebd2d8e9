/// Tokio-based WebSocket signaling channel for peercall
///
/// This crate provides a concrete implementation of the SignalingChannel
/// trait using tokio-tungstenite.
use async_trait::async_trait;
use bytes::Bytes;
use callcore::error::ChannelError;
use callcore::net::{ChannelEvent, ChannelFactory, SignalingChannel};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const DEFAULT_EVENT_BUFFER: usize = 100;

/// WebSocket signaling channel
pub struct WebSocketChannel {
    ws_sink: Mutex<Option<WsSink>>,
}

impl WebSocketChannel {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Mutex::new(Some(sink)),
        }
    }

    async fn send_message(&self, msg: Message) -> Result<(), ChannelError> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(ChannelError::Closed)?;
        sink.send(msg)
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        debug!("--> Sending text: {} bytes", text.len());
        self.send_message(Message::text(text.to_owned())).await
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), ChannelError> {
        trace!("--> Sending binary: {} bytes", data.len());
        self.send_message(Message::binary(data)).await
    }

    async fn close(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("websocket close: {e}");
            }
        }
    }
}

/// Factory for opening WebSocket signaling channels to a relay
pub struct WebSocketChannelFactory {
    url: String,
    event_buffer: usize,
}

impl WebSocketChannelFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChannelFactory for WebSocketChannelFactory {
    async fn open(
        &self,
    ) -> Result<(Arc<dyn SignalingChannel>, mpsc::Receiver<ChannelEvent>), ChannelError> {
        info!("Dialing {}", self.url);
        let (client, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        let (sink, stream) = client.split();

        // Create event channel
        let (event_tx, event_rx) = mpsc::channel(self.event_buffer);
        let channel = Arc::new(WebSocketChannel::new(sink));

        // Connected goes first so it is never behind a frame from the read pump.
        let _ = event_tx.send(ChannelEvent::Connected).await;
        tokio::task::spawn(read_pump(stream, event_tx));

        Ok((channel, event_rx))
    }
}

enum Flow {
    Deliver(ChannelEvent),
    Skip,
    Stop,
}

fn classify(msg: Message) -> Flow {
    match msg {
        Message::Text(text) => {
            debug!("<-- Received text: {} bytes", text.len());
            Flow::Deliver(ChannelEvent::Text(text.as_str().to_owned()))
        }
        Message::Binary(data) => {
            trace!("<-- Received binary: {} bytes", data.len());
            Flow::Deliver(ChannelEvent::Binary(data))
        }
        Message::Close(frame) => {
            trace!("Received close frame: {frame:?}");
            Flow::Stop
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Flow::Skip,
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<ChannelEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => match classify(msg) {
                Flow::Deliver(event) => {
                    if event_tx.send(event).await.is_err() {
                        warn!("Event receiver dropped, closing read pump");
                        break;
                    }
                }
                Flow::Skip => {}
                Flow::Stop => break,
            },
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(ChannelEvent::Closed).await;
}
