//! Ordered hand-off of relayed media chunks to an incremental rendering sink.

use bytes::Bytes;
use log::{debug, trace};
use std::collections::VecDeque;

use crate::media::{MediaSink, SinkRejected};

/// Buffers relayed media chunks in front of an incremental rendering sink.
///
/// Invariants:
/// - chunks reach the sink in arrival order;
/// - at most one chunk is in flight to the sink at a time;
/// - a rejected chunk goes back to the front of the queue, never dropped.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    pending: VecDeque<Bytes>,
    in_flight: bool,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a chunk from the channel and submit it if the sink can take it now.
    pub fn push<S: MediaSink + ?Sized>(&mut self, chunk: Bytes, sink: &mut S) {
        trace!("queueing {} byte chunk ({} pending)", chunk.len(), self.pending.len());
        self.pending.push_back(chunk);
        self.pump(sink);
    }

    /// The sink finished consuming the in-flight chunk and is ready for more.
    pub fn on_update_end<S: MediaSink + ?Sized>(&mut self, sink: &mut S) {
        self.in_flight = false;
        self.pump(sink);
    }

    /// The sink became ready (e.g. its source opened) without a chunk in flight.
    pub fn on_sink_ready<S: MediaSink + ?Sized>(&mut self, sink: &mut S) {
        self.pump(sink);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Drop everything queued, e.g. when the call is torn down.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight = false;
    }

    fn pump<S: MediaSink + ?Sized>(&mut self, sink: &mut S) {
        if self.in_flight || !sink.is_ready() {
            return;
        }
        let Some(chunk) = self.pending.pop_front() else {
            return;
        };
        match sink.append(chunk) {
            Ok(()) => self.in_flight = true,
            Err(SinkRejected(chunk)) => {
                debug!("sink rejected {} byte chunk, requeueing", chunk.len());
                self.pending.push_front(chunk);
            }
        }
    }
}
