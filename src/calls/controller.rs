//! Single-owner driver for a [`CallSession`].
//!
//! The controller task owns the session and is the only thing that mutates it.
//! Commands, channel events, media events and the completions of the async
//! work it spawns are all funnelled into one `select!` loop, so every
//! transition observes the effects of the previous one.

use bytes::Bytes;
use callcore::error::CallError;
use callcore::framing::{self, Frame, FramingMode};
use callcore::media::{MediaEvent, MediaPipeline};
use callcore::net::{ChannelEvent, SignalingChannel};
use callcore::session::{CallSession, CallState, Effect, SessionEvent, UiEvent};
use callcore::signal::{Dialect, SignalCodec, SignalMessage};
use callcore::types::Role;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::CallConfig;

#[derive(Clone)]
pub struct ControllerConfig {
    pub dialect: Dialect,
    pub framing: FramingMode,
    pub ring_timeout: Duration,
    pub tick_interval: Duration,
    pub event_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            framing: FramingMode::default(),
            ring_timeout: Duration::from_secs(45),
            tick_interval: Duration::from_secs(1),
            event_buffer: 100,
        }
    }
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("dialect", &self.dialect.name())
            .field("framing", &self.framing)
            .field("ring_timeout_secs", &self.ring_timeout.as_secs())
            .field("tick_interval_ms", &self.tick_interval.as_millis())
            .finish()
    }
}

impl From<&CallConfig> for ControllerConfig {
    fn from(config: &CallConfig) -> Self {
        Self {
            dialect: config.dialect,
            framing: config.framing,
            ring_timeout: config.ring_timeout(),
            tick_interval: config.tick_interval(),
            event_buffer: config.event_buffer.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    Dial,
    Accept,
    Decline,
    HangUp,
    Shutdown,
}

/// What the controller reports to whoever renders the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallNotification {
    Ui(UiEvent),
    StateChanged(CallState),
}

/// Cloneable handle for issuing user actions to a running controller.
#[derive(Clone)]
pub struct CallHandle {
    cmd_tx: mpsc::Sender<CallCommand>,
}

impl CallHandle {
    pub async fn send(&self, command: CallCommand) -> Result<(), CallError> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| CallError::ControllerGone)
    }

    pub async fn dial(&self) -> Result<(), CallError> {
        self.send(CallCommand::Dial).await
    }

    pub async fn accept(&self) -> Result<(), CallError> {
        self.send(CallCommand::Accept).await
    }

    pub async fn decline(&self) -> Result<(), CallError> {
        self.send(CallCommand::Decline).await
    }

    pub async fn hang_up(&self) -> Result<(), CallError> {
        self.send(CallCommand::HangUp).await
    }

    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.send(CallCommand::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Spawn a controller task and return its command handle and notification stream.
pub fn spawn_controller(
    role: Role,
    config: ControllerConfig,
    channel: (Arc<dyn SignalingChannel>, mpsc::Receiver<ChannelEvent>),
    media: (Arc<dyn MediaPipeline>, mpsc::Receiver<MediaEvent>),
) -> (CallHandle, mpsc::Receiver<CallNotification>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.event_buffer);
    let (notify_tx, notify_rx) = mpsc::channel(config.event_buffer);
    let mut controller = SessionController::new(role, config, channel, media, cmd_rx, notify_tx);
    tokio::spawn(async move { controller.run().await });
    (CallHandle { cmd_tx }, notify_rx)
}

pub struct SessionController {
    session: CallSession,
    config: ControllerConfig,
    codec: SignalCodec,
    channel: Arc<dyn SignalingChannel>,
    channel_rx: Option<mpsc::Receiver<ChannelEvent>>,
    channel_open: bool,
    media: Arc<dyn MediaPipeline>,
    media_rx: mpsc::Receiver<MediaEvent>,
    cmd_rx: mpsc::Receiver<CallCommand>,
    notify_tx: mpsc::Sender<CallNotification>,
    completion_tx: mpsc::Sender<SessionEvent>,
    completion_rx: mpsc::Receiver<SessionEvent>,
    ring_deadline: Option<(u64, Instant)>,
    ticker: Option<Interval>,
    clock_base: DateTime<Utc>,
    clock_anchor: Instant,
}

impl SessionController {
    pub fn new(
        role: Role,
        config: ControllerConfig,
        channel: (Arc<dyn SignalingChannel>, mpsc::Receiver<ChannelEvent>),
        media: (Arc<dyn MediaPipeline>, mpsc::Receiver<MediaEvent>),
        cmd_rx: mpsc::Receiver<CallCommand>,
        notify_tx: mpsc::Sender<CallNotification>,
    ) -> Self {
        if let FramingMode::LegacySizeHeuristic { threshold } = config.framing {
            warn!(
                "legacy size framing enabled: binary frames under {threshold} bytes are read as control text"
            );
        }
        let (completion_tx, completion_rx) = mpsc::channel(config.event_buffer);
        Self {
            session: CallSession::new(role),
            codec: SignalCodec::new(config.dialect),
            config,
            channel: channel.0,
            channel_rx: Some(channel.1),
            channel_open: true,
            media: media.0,
            media_rx: media.1,
            cmd_rx,
            notify_tx,
            completion_tx,
            completion_rx,
            ring_deadline: None,
            ticker: None,
            clock_base: Utc::now(),
            clock_anchor: Instant::now(),
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    /// Wall-clock time advanced by the runtime's monotonic clock, so the
    /// session timer agrees with the ticker that drives it.
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.clock_anchor.elapsed()).unwrap_or(TimeDelta::zero());
        self.clock_base + elapsed
    }

    pub async fn run(&mut self) {
        info!(
            "SessionController started as {} ({:?})",
            self.session.role(),
            self.config
        );
        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    let event = match command {
                        Some(CallCommand::Dial) => SessionEvent::LocalDial,
                        Some(CallCommand::Accept) => SessionEvent::LocalAccept,
                        Some(CallCommand::Decline) => SessionEvent::LocalDecline,
                        Some(CallCommand::HangUp) => SessionEvent::LocalHangUp,
                        Some(CallCommand::Shutdown) | None => break,
                    };
                    self.dispatch(event).await;
                }
                Some(event) = self.completion_rx.recv() => self.dispatch(event).await,
                event = recv_channel(&mut self.channel_rx) => self.on_channel_event(event).await,
                Some(event) = self.media_rx.recv() => self.on_media_event(event).await,
                _ = next_tick(&mut self.ticker) => self.dispatch(SessionEvent::Tick).await,
                attempt = ring_expiry(self.ring_deadline) => {
                    self.ring_deadline = None;
                    self.dispatch(SessionEvent::RingTimeout { attempt }).await;
                }
            }
        }

        // Leave nothing held behind on shutdown.
        self.dispatch(SessionEvent::LocalHangUp).await;
        self.channel.close().await;
        info!("SessionController stopped");
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let before = self.session.state();
            let effects = match self.session.handle(event, self.now()) {
                Ok(effects) => effects,
                Err(e) => {
                    debug!("dropping event: {e}");
                    continue;
                }
            };
            let after = self.session.state();
            if after != CallState::Ringing {
                self.ring_deadline = None;
            }
            if before != after {
                if after == CallState::Ringing {
                    info!(
                        "incoming call from {}",
                        self.session.peer_id().unwrap_or("unnamed peer")
                    );
                }
                self.notify(CallNotification::StateChanged(after)).await;
            }
            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<SessionEvent> {
        trace!("effect: {effect:?}");
        match effect {
            Effect::Send(message) => return self.send_signal(&message).await,
            Effect::AcquireCapture { attempt } => {
                let media = self.media.clone();
                let tx = self.completion_tx.clone();
                tokio::spawn(async move {
                    let result = media.acquire_local_capture().await;
                    let _ = tx.send(SessionEvent::CaptureCompleted { attempt, result }).await;
                });
            }
            Effect::ReleaseCapture(handle) => self.media.release_capture(handle).await,
            Effect::BeginNegotiation { attempt, remote } => {
                let media = self.media.clone();
                let tx = self.completion_tx.clone();
                tokio::spawn(async move {
                    let result = media.begin_negotiation(remote.as_ref()).await;
                    let _ = tx
                        .send(SessionEvent::LocalDescriptorReady { attempt, result })
                        .await;
                });
            }
            Effect::ApplyRemoteDescriptor {
                attempt,
                descriptor,
            } => {
                let media = self.media.clone();
                let tx = self.completion_tx.clone();
                tokio::spawn(async move {
                    let result = media.apply_remote_descriptor(&descriptor).await;
                    let _ = tx
                        .send(SessionEvent::RemoteDescriptorApplied { attempt, result })
                        .await;
                });
            }
            Effect::ApplyCandidate(candidate) => {
                if let Err(e) = self.media.apply_remote_candidate(&candidate).await {
                    warn!("remote candidate rejected: {e}");
                }
            }
            Effect::StartStreaming => {
                return self
                    .media
                    .start_streaming()
                    .await
                    .map(SessionEvent::Connection);
            }
            Effect::CloseMedia => self.media.close().await,
            Effect::StartRingTimer { attempt } => {
                self.ring_deadline = Some((attempt, Instant::now() + self.config.ring_timeout));
            }
            Effect::StartTicker => {
                let period = self.config.tick_interval;
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
            }
            Effect::StopTicker => self.ticker = None,
            Effect::Ui(event) => self.notify(CallNotification::Ui(event)).await,
        }
        None
    }

    async fn send_signal(&mut self, message: &SignalMessage) -> Option<SessionEvent> {
        if !self.channel_open {
            debug!("channel closed, not sending {message}");
            return None;
        }
        let text = match self.codec.encode(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("not sending {message}: {e}");
                return None;
            }
        };
        debug!("--> {message}");
        match self.channel.send_text(&text).await {
            Ok(()) => None,
            Err(e) => {
                warn!("failed to send {message}: {e}");
                self.channel_open = false;
                Some(SessionEvent::ChannelClosed)
            }
        }
    }

    async fn on_channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Connected) => {
                info!("signaling channel connected");
                self.channel_open = true;
                self.dispatch(SessionEvent::ChannelOpened).await;
            }
            Some(ChannelEvent::Text(text)) => self.on_control_text(None, &text).await,
            Some(ChannelEvent::Relayed { from, text }) => {
                self.on_control_text(Some(from), &text).await
            }
            Some(ChannelEvent::Binary(data)) => match framing::classify_binary(data, self.config.framing) {
                Ok(Frame::Control(text)) => self.on_control_text(None, &text).await,
                Ok(Frame::Media(chunk)) => self.on_remote_chunk(chunk).await,
                Err(e) => warn!("discarding binary frame: {e}"),
            },
            Some(ChannelEvent::Closed) | None => {
                info!("signaling channel closed");
                self.channel_rx = None;
                self.channel_open = false;
                self.dispatch(SessionEvent::ChannelClosed).await;
            }
        }
    }

    async fn on_control_text(&mut self, from: Option<String>, text: &str) {
        match self.codec.decode(text) {
            Ok(message) => {
                match &from {
                    Some(from) => debug!("<-- {message} from {from}"),
                    None => debug!("<-- {message}"),
                }
                self.dispatch(SessionEvent::Remote { from, message }).await;
            }
            Err(e) => warn!("discarding control message: {e}"),
        }
    }

    /// Chunks can arrive as soon as the peer has accepted, ahead of our own
    /// Connected event. The pipeline's assembler holds them until its sink is ready.
    async fn on_remote_chunk(&mut self, chunk: Bytes) {
        if matches!(
            self.session.state(),
            CallState::Connecting | CallState::Active
        ) {
            self.media.push_remote_chunk(chunk).await;
        } else {
            trace!(
                "dropping {} byte media chunk in {}",
                chunk.len(),
                self.session.state()
            );
        }
    }

    async fn on_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LocalCandidate(candidate) => {
                self.dispatch(SessionEvent::LocalCandidate(candidate)).await
            }
            MediaEvent::RemoteTrack => debug!("remote media attached"),
            MediaEvent::ConnectionState(state) => {
                debug!("media connection: {state:?}");
                self.dispatch(SessionEvent::Connection(state)).await
            }
            MediaEvent::LocalChunk(chunk) => {
                if self.session.state() != CallState::Active || !self.channel_open {
                    trace!("not forwarding {} byte chunk", chunk.len());
                    return;
                }
                let frame = framing::frame_media(&chunk, self.config.framing);
                if let Err(e) = self.channel.send_binary(frame).await {
                    warn!("failed to forward media: {e}");
                    self.channel_open = false;
                    self.dispatch(SessionEvent::ChannelClosed).await;
                }
            }
        }
    }

    async fn notify(&self, notification: CallNotification) {
        if self.notify_tx.send(notification).await.is_err() {
            trace!("notification receiver dropped");
        }
    }
}

async fn recv_channel(rx: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn ring_expiry(deadline: Option<(u64, Instant)>) -> u64 {
    match deadline {
        Some((attempt, at)) => {
            tokio::time::sleep_until(at).await;
            attempt
        }
        None => std::future::pending().await,
    }
}
