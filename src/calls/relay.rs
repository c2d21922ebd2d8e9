//! Media relayed over the signaling channel itself.
//!
//! Instead of a direct peer transport, the local recorder produces encoded
//! chunks on a fixed timeslice and the controller forwards them as binary
//! frames. Received chunks are fed through a [`ChunkAssembler`] into a sink
//! that appends them to a recording file. There is nothing to negotiate, so
//! descriptors are empty and candidates are ignored.

use async_trait::async_trait;
use bytes::Bytes;
use callcore::chunk::ChunkAssembler;
use callcore::error::{CaptureError, NegotiationError};
use callcore::media::{MediaEvent, MediaPipeline, MediaSink, SinkRejected};
use callcore::types::{
    CaptureHandle, ConnectionState, IceCandidate, SessionDescriptor,
};
use log::{debug, info, trace, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::CallConfig;

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// File read as the local capture. Without one the recorder produces nothing.
    pub source: Option<PathBuf>,
    /// File the remote chunks are appended to. Without one they are discarded.
    pub record: Option<PathBuf>,
    pub chunk_interval: Duration,
    pub chunk_size: usize,
    pub mime_type: String,
}

impl RelaySettings {
    pub fn from_config(config: &CallConfig, source: Option<PathBuf>, record: Option<PathBuf>) -> Self {
        Self {
            source,
            record,
            chunk_interval: config.chunk_interval(),
            chunk_size: config.chunk_size(),
            mime_type: config.mime_type.clone(),
        }
    }
}

/// Appends chunks to a file. One chunk is accepted at a time; the pipeline
/// writes it and then reports the update as finished.
#[derive(Debug, Default)]
struct FileSink {
    path: Option<PathBuf>,
    file: Option<File>,
    in_flight: Option<Bytes>,
    written: u64,
}

impl FileSink {
    fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    async fn write(&mut self, chunk: &[u8]) {
        let Some(path) = &self.path else {
            return;
        };
        if self.file.is_none() {
            match File::create(path).await {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    warn!("cannot open recording {}: {e}", path.display());
                    self.path = None;
                    return;
                }
            }
        }
        if let Some(file) = self.file.as_mut() {
            match file.write_all(chunk).await {
                Ok(()) => self.written += chunk.len() as u64,
                Err(e) => warn!("recording write failed: {e}"),
            }
        }
    }

    async fn finish(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                warn!("recording flush failed: {e}");
            }
            debug!("recording closed after {} bytes", self.written);
        }
        self.in_flight = None;
        self.written = 0;
    }
}

impl MediaSink for FileSink {
    fn is_ready(&self) -> bool {
        self.in_flight.is_none()
    }

    fn append(&mut self, chunk: Bytes) -> Result<(), SinkRejected> {
        if self.in_flight.is_some() {
            return Err(SinkRejected(chunk));
        }
        self.in_flight = Some(chunk);
        Ok(())
    }
}

#[derive(Debug)]
struct Playback {
    assembler: ChunkAssembler,
    sink: FileSink,
    track_announced: bool,
}

pub struct RelayedMedia {
    settings: RelaySettings,
    events: mpsc::Sender<MediaEvent>,
    next_handle: AtomicU64,
    capture: Mutex<Option<CaptureHandle>>,
    recorder: Mutex<Option<JoinHandle<()>>>,
    playback: Mutex<Playback>,
}

impl RelayedMedia {
    /// Build the pipeline together with the event stream the controller listens on.
    pub fn new(settings: RelaySettings, buffer: usize) -> (Self, mpsc::Receiver<MediaEvent>) {
        let (events, rx) = mpsc::channel(buffer.max(1));
        let sink = FileSink::new(settings.record.clone());
        let media = Self {
            settings,
            events,
            next_handle: AtomicU64::new(1),
            capture: Mutex::new(None),
            recorder: Mutex::new(None),
            playback: Mutex::new(Playback {
                assembler: ChunkAssembler::new(),
                sink,
                track_announced: false,
            }),
        };
        (media, rx)
    }

    async fn stop_recorder(&self) {
        if let Some(task) = self.recorder.lock().await.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl MediaPipeline for RelayedMedia {
    async fn acquire_local_capture(&self) -> Result<CaptureHandle, CaptureError> {
        if let Some(source) = &self.settings.source {
            let meta = tokio::fs::metadata(source).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CaptureError::NotFound,
                std::io::ErrorKind::PermissionDenied => CaptureError::Denied,
                _ => CaptureError::Other(e.to_string()),
            })?;
            if !meta.is_file() {
                return Err(CaptureError::NotFound);
            }
        }
        let mut capture = self.capture.lock().await;
        if let Some(held) = *capture {
            return Err(CaptureError::Busy(format!("{held} still held")));
        }
        let handle = CaptureHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        *capture = Some(handle);
        debug!("acquired {handle}");
        Ok(handle)
    }

    async fn release_capture(&self, handle: CaptureHandle) {
        let mut capture = self.capture.lock().await;
        if *capture == Some(handle) {
            *capture = None;
            drop(capture);
            self.stop_recorder().await;
            debug!("released {handle}");
        } else {
            warn!("release of unknown {handle}");
        }
    }

    async fn begin_negotiation(
        &self,
        remote: Option<&SessionDescriptor>,
    ) -> Result<SessionDescriptor, NegotiationError> {
        Ok(match remote {
            Some(_) => SessionDescriptor::answer(""),
            None => SessionDescriptor::offer(""),
        })
    }

    async fn apply_remote_descriptor(
        &self,
        _descriptor: &SessionDescriptor,
    ) -> Result<(), NegotiationError> {
        Ok(())
    }

    async fn apply_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        trace!("relayed media ignores candidate {}", candidate.candidate);
        Ok(())
    }

    async fn start_streaming(&self) -> Option<ConnectionState> {
        let mut recorder = self.recorder.lock().await;
        if recorder.is_some() {
            return Some(ConnectionState::Connected);
        }
        if let Some(source) = self.settings.source.clone() {
            info!(
                "recording {} as {} every {:?}",
                source.display(),
                self.settings.mime_type,
                self.settings.chunk_interval
            );
            *recorder = Some(tokio::spawn(record(
                source,
                self.settings.chunk_size,
                self.settings.chunk_interval,
                self.events.clone(),
            )));
        }
        // The relay is the transport, and it is already up.
        Some(ConnectionState::Connected)
    }

    async fn push_remote_chunk(&self, chunk: Bytes) {
        let mut playback = self.playback.lock().await;
        if !playback.track_announced {
            playback.track_announced = true;
            // The controller reading this stream is the caller; never wait on it.
            if let Err(e) = self.events.try_send(MediaEvent::RemoteTrack) {
                warn!("remote track not announced: {e}");
            }
        }

        let Playback {
            assembler, sink, ..
        } = &mut *playback;
        assembler.push(chunk, sink);
        while let Some(chunk) = sink.in_flight.take() {
            sink.write(&chunk).await;
            assembler.on_update_end(sink);
        }
    }

    async fn close(&self) {
        self.stop_recorder().await;
        let mut playback = self.playback.lock().await;
        playback.assembler.clear();
        playback.sink.finish().await;
        playback.track_announced = false;
    }
}

async fn record(
    source: PathBuf,
    chunk_size: usize,
    interval: Duration,
    events: mpsc::Sender<MediaEvent>,
) {
    let mut file = match File::open(&source).await {
        Ok(file) => file,
        Err(e) => {
            warn!("cannot open capture source {}: {e}", source.display());
            return;
        }
    };
    let mut ticker = tokio::time::interval(interval);
    let mut buf = vec![0u8; chunk_size];
    loop {
        ticker.tick().await;
        match file.read(&mut buf).await {
            Ok(0) => {
                debug!("capture source exhausted");
                break;
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if events.send(MediaEvent::LocalChunk(chunk)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("capture read failed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(source: Option<PathBuf>, record: Option<PathBuf>) -> RelaySettings {
        RelaySettings {
            source,
            record,
            chunk_interval: Duration::from_millis(10),
            chunk_size: 4,
            mime_type: "video/webm".into(),
        }
    }

    #[tokio::test]
    async fn missing_source_is_capture_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (media, _rx) = RelayedMedia::new(settings(Some(dir.path().join("nope.webm")), None), 8);
        assert_eq!(
            media.acquire_local_capture().await,
            Err(CaptureError::NotFound)
        );
    }

    #[tokio::test]
    async fn capture_is_exclusive_until_released() {
        let (media, _rx) = RelayedMedia::new(settings(None, None), 8);
        let first = media.acquire_local_capture().await.unwrap();
        assert!(matches!(
            media.acquire_local_capture().await,
            Err(CaptureError::Busy(_))
        ));
        media.release_capture(first).await;
        let second = media.acquire_local_capture().await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn streaming_reports_connected_then_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("local.webm");
        std::fs::write(&source, b"abcdefghij").unwrap();

        let (media, mut rx) = RelayedMedia::new(settings(Some(source), None), 8);
        media.acquire_local_capture().await.unwrap();
        assert_eq!(
            media.start_streaming().await,
            Some(ConnectionState::Connected)
        );

        let mut got = Vec::new();
        while got.len() < 10 {
            match rx.recv().await {
                Some(MediaEvent::LocalChunk(chunk)) => got.extend_from_slice(&chunk),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(got, b"abcdefghij");
    }

    #[tokio::test]
    async fn remote_chunks_are_recorded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("remote.webm");
        let (media, mut rx) = RelayedMedia::new(settings(None, Some(record.clone())), 8);

        media.push_remote_chunk(Bytes::from_static(b"one-")).await;
        media.push_remote_chunk(Bytes::from_static(b"two-")).await;
        media.push_remote_chunk(Bytes::from_static(b"three")).await;
        media.close().await;

        assert!(matches!(rx.recv().await, Some(MediaEvent::RemoteTrack)));
        assert_eq!(std::fs::read(&record).unwrap(), b"one-two-three");
    }

    /// A full event buffer must not stall the caller of the pipeline.
    #[tokio::test]
    async fn full_event_buffer_never_blocks() {
        let (media, mut rx) = RelayedMedia::new(settings(None, None), 1);
        media.events.try_send(MediaEvent::RemoteTrack).unwrap();

        let pushed = tokio::time::timeout(Duration::from_secs(5), async {
            media.push_remote_chunk(Bytes::from_static(b"init")).await;
            media.start_streaming().await
        })
        .await;
        assert_eq!(pushed.unwrap(), Some(ConnectionState::Connected));

        assert!(matches!(rx.recv().await, Some(MediaEvent::RemoteTrack)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn negotiation_is_trivial() {
        let (media, _rx) = RelayedMedia::new(settings(None, None), 8);
        assert!(media.begin_negotiation(None).await.unwrap().is_offer());
        let offer = SessionDescriptor::offer("");
        assert!(!media.begin_negotiation(Some(&offer)).await.unwrap().is_offer());
        assert!(media.apply_remote_candidate(&IceCandidate::new("c")).await.is_ok());
    }
}
