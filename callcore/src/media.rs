//! Media pipeline capability contract.
//!
//! Capture, transport and rendering of audio/video live outside this crate.
//! The session controller drives them through [`MediaPipeline`] and hears back
//! through the [`MediaEvent`] stream the pipeline was built with.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{CaptureError, NegotiationError};
use crate::types::{CaptureHandle, ConnectionState, IceCandidate, SessionDescriptor};

/// Events a pipeline pushes back to the controller.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// A local connectivity candidate was gathered and should be relayed.
    LocalCandidate(IceCandidate),
    /// The remote party's stream is attached to the rendering sink.
    RemoteTrack,
    /// The media transport changed state.
    ConnectionState(ConnectionState),
    /// An encoded chunk of local media, for transports that relay media bytes.
    LocalChunk(Bytes),
}

#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Open camera and microphone.
    async fn acquire_local_capture(&self) -> Result<CaptureHandle, CaptureError>;

    /// Stop and release a capture obtained from [`acquire_local_capture`](Self::acquire_local_capture).
    async fn release_capture(&self, handle: CaptureHandle);

    /// Start negotiation. Without a remote descriptor this produces an offer;
    /// with the peer's offer it applies it and produces the answer.
    async fn begin_negotiation(
        &self,
        remote: Option<&SessionDescriptor>,
    ) -> Result<SessionDescriptor, NegotiationError>;

    /// Apply the peer's answer to a previously created offer.
    async fn apply_remote_descriptor(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<(), NegotiationError>;

    async fn apply_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), NegotiationError>;

    /// Start sending local media. Called once the call is accepted.
    ///
    /// A pipeline that knows its transport state right away returns it here;
    /// others report it later as [`MediaEvent::ConnectionState`].
    async fn start_streaming(&self) -> Option<ConnectionState> {
        None
    }

    /// Hand a relayed chunk of remote media to the rendering sink.
    async fn push_remote_chunk(&self, _chunk: Bytes) {}

    /// Tear down the transport and rendering side of the call.
    async fn close(&self);
}

/// Returned by a sink that cannot take a chunk right now. Carries the chunk back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRejected(pub Bytes);

/// An incremental demuxer that accepts appended media bytes.
pub trait MediaSink: Send {
    /// Whether the sink is open and not busy consuming a previous chunk.
    fn is_ready(&self) -> bool;

    /// Submit one chunk. The sink signals completion out of band.
    fn append(&mut self, chunk: Bytes) -> Result<(), SinkRejected>;
}
