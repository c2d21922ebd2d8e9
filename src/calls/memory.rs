//! In-process signaling channel pair.

use async_trait::async_trait;
use bytes::Bytes;
use callcore::error::ChannelError;
use callcore::net::{ChannelEvent, SignalingChannel};
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

/// One end of a [`memory_pair`]. Whatever one end sends, the other receives.
pub struct MemoryChannel {
    peer_tx: Mutex<Option<mpsc::Sender<ChannelEvent>>>,
    own_tx: mpsc::Sender<ChannelEvent>,
    fail_sends: AtomicBool,
}

pub type MemoryEnd = (Arc<MemoryChannel>, mpsc::Receiver<ChannelEvent>);

/// Two connected ends, each already holding a `Connected` event.
pub fn memory_pair(buffer: usize) -> (MemoryEnd, MemoryEnd) {
    let buffer = buffer.max(2);
    let (a_tx, a_rx) = mpsc::channel(buffer);
    let (b_tx, b_rx) = mpsc::channel(buffer);
    let _ = a_tx.try_send(ChannelEvent::Connected);
    let _ = b_tx.try_send(ChannelEvent::Connected);

    let a = Arc::new(MemoryChannel {
        peer_tx: Mutex::new(Some(b_tx.clone())),
        own_tx: a_tx.clone(),
        fail_sends: AtomicBool::new(false),
    });
    let b = Arc::new(MemoryChannel {
        peer_tx: Mutex::new(Some(a_tx)),
        own_tx: b_tx,
        fail_sends: AtomicBool::new(false),
    });
    ((a, a_rx), (b, b_rx))
}

impl MemoryChannel {
    /// Make every following send fail as if the link had dropped.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    async fn deliver(&self, event: ChannelEvent) -> Result<(), ChannelError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::Send("link down".into()));
        }
        let guard = self.peer_tx.lock().await;
        let tx = guard.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(event).await.map_err(|_| ChannelError::Closed)
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        trace!("memory --> {text}");
        self.deliver(ChannelEvent::Text(text.to_owned())).await
    }

    async fn send_binary(&self, data: Bytes) -> Result<(), ChannelError> {
        self.deliver(ChannelEvent::Binary(data)).await
    }

    async fn close(&self) {
        if let Some(peer) = self.peer_tx.lock().await.take() {
            let _ = peer.send(ChannelEvent::Closed).await;
            let _ = self.own_tx.send(ChannelEvent::Closed).await;
        }
    }
}
