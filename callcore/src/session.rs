//! Call session state machine.
//!
//! [`CallSession`] is sans-IO: it consumes [`SessionEvent`]s and returns the
//! [`Effect`]s the driver must perform, in order. Asynchronous work (capture,
//! negotiation, ring timeout) is requested through effects that carry the
//! attempt number they were issued under; a completion for any other attempt,
//! or one arriving after the session has moved on, changes nothing.

use chrono::{DateTime, TimeDelta, Utc};
use log::debug;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use crate::error::{CaptureError, InvalidTransition, NegotiationError};
use crate::signal::SignalMessage;
use crate::timer::ElapsedTimer;
use crate::types::{
    CaptureHandle, ConnectionState, EndReason, IceCandidate, Role, SessionDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum CallState {
    /// No call. A caller may be acquiring capture for a dial.
    #[default]
    Idle,
    /// Incoming call waiting for the local user's decision.
    Ringing,
    /// Outgoing call: capture held, invite out, waiting for the callee.
    AwaitingAnswer,
    /// Accepted on both sides, media transport being established.
    Connecting,
    /// Media flowing.
    Active,
    /// Teardown in progress. Never observed between events.
    Ended,
}

impl CallState {
    pub const ALL: [CallState; 6] = [
        Self::Idle,
        Self::Ringing,
        Self::AwaitingAnswer,
        Self::Connecting,
        Self::Active,
        Self::Ended,
    ];

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// States in which the local capture is held.
    pub fn holds_capture(&self) -> bool {
        matches!(self, Self::AwaitingAnswer | Self::Connecting | Self::Active)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LocalDial,
    LocalAccept,
    LocalDecline,
    LocalHangUp,
    CaptureCompleted {
        attempt: u64,
        result: Result<CaptureHandle, CaptureError>,
    },
    /// `begin_negotiation` finished: the local offer or answer is ready.
    LocalDescriptorReady {
        attempt: u64,
        result: Result<SessionDescriptor, NegotiationError>,
    },
    /// The peer's answer has been applied.
    RemoteDescriptorApplied {
        attempt: u64,
        result: Result<(), NegotiationError>,
    },
    Remote {
        from: Option<String>,
        message: SignalMessage,
    },
    LocalCandidate(IceCandidate),
    Connection(ConnectionState),
    RingTimeout {
        attempt: u64,
    },
    ChannelOpened,
    ChannelClosed,
    Tick,
}

impl SessionEvent {
    pub fn remote(message: SignalMessage) -> Self {
        Self::Remote {
            from: None,
            message,
        }
    }
}

/// Why a call failed, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    Capture(CaptureError),
    Negotiation(NegotiationError),
    Connection,
    Channel,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture(e) => write!(f, "camera not available: {e}"),
            Self::Negotiation(e) => write!(f, "call setup failed: {e}"),
            Self::Connection => write!(f, "connection lost"),
            Self::Channel => write!(f, "signaling channel unavailable"),
        }
    }
}

/// UI-visible side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Dialing,
    IncomingCall,
    PreviewStarted,
    CallConnected,
    TimerTick(String),
    Declined,
    Failed(CallFailure),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(SignalMessage),
    AcquireCapture {
        attempt: u64,
    },
    ReleaseCapture(CaptureHandle),
    BeginNegotiation {
        attempt: u64,
        remote: Option<SessionDescriptor>,
    },
    ApplyRemoteDescriptor {
        attempt: u64,
        descriptor: SessionDescriptor,
    },
    ApplyCandidate(IceCandidate),
    StartStreaming,
    CloseMedia,
    StartRingTimer {
        attempt: u64,
    },
    StartTicker,
    StopTicker,
    Ui(UiEvent),
}

/// Most candidates a callee holds while Idle; the oldest is dropped past this.
pub const EARLY_CANDIDATE_LIMIT: usize = 32;

/// Held candidates older than this when an invite arrives trail an earlier call.
const EARLY_CANDIDATE_WINDOW_MS: i64 = 5_000;

/// A candidate that reached an Idle callee ahead of its invite.
#[derive(Debug, Clone)]
struct EarlyCandidate {
    from: Option<String>,
    received_at: DateTime<Utc>,
    candidate: IceCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Capture,
    LocalDescriptor,
    RemoteDescriptor,
}

/// The single live-or-absent call of this process.
#[derive(Debug)]
pub struct CallSession {
    role: Role,
    state: CallState,
    peer_id: Option<String>,
    local_media: Option<CaptureHandle>,
    pending_candidates: Vec<IceCandidate>,
    early_candidates: VecDeque<EarlyCandidate>,
    timer: ElapsedTimer,
    attempt: u64,
    pending: Option<Pending>,
    remote_offer: Option<SessionDescriptor>,
    negotiation_ready: bool,
    media_engaged: bool,
    signaled_peer: bool,
    channel_open: bool,
    created_at: Option<DateTime<Utc>>,
    last_end: Option<EndReason>,
}

impl CallSession {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: CallState::Idle,
            peer_id: None,
            local_media: None,
            pending_candidates: Vec::new(),
            early_candidates: VecDeque::new(),
            timer: ElapsedTimer::new(),
            attempt: 0,
            pending: None,
            remote_offer: None,
            negotiation_ready: false,
            media_engaged: false,
            signaled_peer: false,
            channel_open: true,
            created_at: None,
            last_end: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn local_media(&self) -> Option<CaptureHandle> {
        self.local_media
    }

    /// Candidates queued for the current attempt.
    pub fn pending_candidates(&self) -> &[IceCandidate] {
        &self.pending_candidates
    }

    /// Candidates held by an Idle callee until an invite claims them.
    pub fn early_candidate_count(&self) -> usize {
        self.early_candidates.len()
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.timer.started_at()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn timer_display(&self) -> &str {
        self.timer.display()
    }

    pub fn last_end(&self) -> Option<EndReason> {
        self.last_end
    }

    pub fn is_channel_open(&self) -> bool {
        self.channel_open
    }

    /// Whether the capture-ownership invariant holds.
    pub fn invariants_hold(&self) -> bool {
        self.local_media.is_some() == self.state.holds_capture()
            && self.timer.is_running() == (self.state == CallState::Active)
            && self.state != CallState::Ended
    }

    /// Apply one event. Events that make no sense in the current state are
    /// rejected without touching the session.
    pub fn handle(
        &mut self,
        event: SessionEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, InvalidTransition> {
        let before = self.state;
        let label = event_label(&event);
        let result = self.dispatch(event, now);
        match &result {
            Ok(_) if before != self.state => {
                debug!("call {}: {} -> {} on {}", self.attempt, before, self.state, label)
            }
            Ok(_) => {}
            Err(e) => debug!("call {}: ignored: {}", self.attempt, e),
        }
        result
    }

    fn dispatch(
        &mut self,
        event: SessionEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, InvalidTransition> {
        use CallState::*;

        let effects = match (self.state, event) {
            (Idle, SessionEvent::LocalDial)
                if self.role.is_caller() && self.pending.is_none() =>
            {
                if !self.channel_open {
                    return Ok(vec![Effect::Ui(UiEvent::Failed(CallFailure::Channel))]);
                }
                self.begin_attempt(now);
                self.pending = Some(Pending::Capture);
                vec![
                    Effect::Ui(UiEvent::Dialing),
                    Effect::AcquireCapture {
                        attempt: self.attempt,
                    },
                ]
            }

            (Idle, SessionEvent::Remote { from, message: SignalMessage::Invite { descriptor } })
                if !self.role.is_caller() && self.pending.is_none() =>
            {
                self.begin_attempt(now);
                self.adopt_early_candidates(from.as_deref(), now);
                self.state = Ringing;
                self.peer_id = from;
                self.remote_offer = descriptor;
                vec![
                    Effect::Ui(UiEvent::IncomingCall),
                    Effect::StartRingTimer {
                        attempt: self.attempt,
                    },
                ]
            }

            (Ringing, SessionEvent::LocalAccept) if self.pending.is_none() => {
                self.pending = Some(Pending::Capture);
                vec![Effect::AcquireCapture {
                    attempt: self.attempt,
                }]
            }

            (Ringing, SessionEvent::LocalDecline | SessionEvent::LocalHangUp) => {
                self.finish(EndReason::Declined, Some(SignalMessage::Decline), vec![])
            }

            (Ringing, SessionEvent::RingTimeout { attempt })
                if attempt == self.attempt && self.pending.is_none() =>
            {
                self.finish(EndReason::Cancelled, None, vec![])
            }

            (_, SessionEvent::RingTimeout { .. }) => vec![],

            (_, SessionEvent::CaptureCompleted { attempt, result }) => {
                self.on_capture(attempt, result)
            }

            (_, SessionEvent::LocalDescriptorReady { attempt, result }) => {
                self.on_local_descriptor(attempt, result)
            }

            (_, SessionEvent::RemoteDescriptorApplied { attempt, result }) => {
                self.on_remote_descriptor(attempt, result)
            }

            (AwaitingAnswer, SessionEvent::Remote { from, message: SignalMessage::Accept { descriptor } })
                if self.signaled_peer =>
            {
                self.state = Connecting;
                if from.is_some() {
                    self.peer_id = from;
                }
                match descriptor {
                    Some(descriptor) => {
                        self.pending = Some(Pending::RemoteDescriptor);
                        vec![Effect::ApplyRemoteDescriptor {
                            attempt: self.attempt,
                            descriptor,
                        }]
                    }
                    // Relays that carry no descriptors have nothing to negotiate.
                    None => self.negotiation_established(vec![]),
                }
            }

            (AwaitingAnswer, SessionEvent::Remote { message: SignalMessage::Decline, .. }) => {
                self.finish(
                    EndReason::Declined,
                    None,
                    vec![Effect::Ui(UiEvent::Declined)],
                )
            }

            (Idle, SessionEvent::Remote { from, message: SignalMessage::Candidate { candidate } }) => {
                if self.role.is_caller() {
                    // No invite of ours is out, so this trails a finished call.
                    debug!("dropping candidate received while idle");
                } else {
                    self.hold_early_candidate(from, candidate, now);
                }
                vec![]
            }

            (_, SessionEvent::Remote { message: SignalMessage::Candidate { candidate }, .. }) => {
                if self.negotiation_ready && matches!(self.state, Connecting | Active) {
                    vec![Effect::ApplyCandidate(candidate)]
                } else {
                    self.pending_candidates.push(candidate);
                    vec![]
                }
            }

            (Idle, SessionEvent::Remote { message: SignalMessage::End, .. }) => vec![],

            (Ringing, SessionEvent::Remote { message: SignalMessage::End, .. }) => {
                self.finish(EndReason::Cancelled, None, vec![])
            }

            (AwaitingAnswer | Connecting | Active, SessionEvent::Remote { message: SignalMessage::End, .. }) => {
                self.finish(EndReason::RemoteEnded, None, vec![])
            }

            (Idle, SessionEvent::LocalHangUp) => {
                if self.pending == Some(Pending::Capture) {
                    // Dial cancelled while capture was still being acquired.
                    self.finish(EndReason::LocalHangUp, None, vec![])
                } else {
                    vec![]
                }
            }

            (AwaitingAnswer | Connecting | Active, SessionEvent::LocalHangUp) => {
                let notify = if self.signaled_peer {
                    Some(SignalMessage::End)
                } else if self.role.is_caller() {
                    None
                } else {
                    // Accepted locally but the answer never went out.
                    Some(SignalMessage::Decline)
                };
                self.finish(EndReason::LocalHangUp, notify, vec![])
            }

            (AwaitingAnswer | Connecting | Active, SessionEvent::LocalCandidate(candidate)) => {
                vec![Effect::Send(SignalMessage::Candidate { candidate })]
            }

            (Connecting, SessionEvent::Connection(ConnectionState::Connected)) => {
                self.state = Active;
                self.timer.start(now);
                vec![
                    Effect::Ui(UiEvent::CallConnected),
                    Effect::Ui(UiEvent::TimerTick(self.timer.display().to_string())),
                    Effect::StartTicker,
                ]
            }

            (Active, SessionEvent::Connection(ConnectionState::Connected)) => vec![],

            (Idle, SessionEvent::Connection(ConnectionState::Failed | ConnectionState::Closed)) => {
                vec![]
            }

            (_, SessionEvent::Connection(ConnectionState::Failed | ConnectionState::Closed)) => self
                .finish(
                    EndReason::ConnectionFailed,
                    None,
                    vec![Effect::Ui(UiEvent::Failed(CallFailure::Connection))],
                ),

            (_, SessionEvent::ChannelOpened) => {
                self.channel_open = true;
                vec![]
            }

            (state, SessionEvent::ChannelClosed) => {
                self.channel_open = false;
                if state.is_idle() && self.pending.is_none() {
                    vec![]
                } else {
                    self.finish(
                        EndReason::ChannelClosed,
                        None,
                        vec![Effect::Ui(UiEvent::Failed(CallFailure::Channel))],
                    )
                }
            }

            (Active, SessionEvent::Tick) => match self.timer.tick(now) {
                Some(text) => vec![Effect::Ui(UiEvent::TimerTick(text.to_string()))],
                None => vec![],
            },

            (_, SessionEvent::Tick) => vec![],

            (state, event) => {
                return Err(InvalidTransition {
                    current_state: state.to_string(),
                    attempted: event_label(&event).to_string(),
                });
            }
        };
        Ok(effects)
    }

    fn on_capture(
        &mut self,
        attempt: u64,
        result: Result<CaptureHandle, CaptureError>,
    ) -> Vec<Effect> {
        let current = self.pending == Some(Pending::Capture) && attempt == self.attempt;
        if !current {
            // The dial or accept this capture was for is gone; hand it straight back.
            debug!("stale capture completion for attempt {attempt}");
            return match result {
                Ok(handle) => vec![Effect::ReleaseCapture(handle)],
                Err(_) => vec![],
            };
        }
        self.pending = None;

        match (self.state, result) {
            (CallState::Idle, Ok(handle)) => {
                self.local_media = Some(handle);
                self.state = CallState::AwaitingAnswer;
                self.pending = Some(Pending::LocalDescriptor);
                self.media_engaged = true;
                vec![
                    Effect::Ui(UiEvent::PreviewStarted),
                    Effect::BeginNegotiation {
                        attempt: self.attempt,
                        remote: None,
                    },
                ]
            }
            (CallState::Ringing, Ok(handle)) => {
                self.local_media = Some(handle);
                self.state = CallState::Connecting;
                self.pending = Some(Pending::LocalDescriptor);
                self.media_engaged = true;
                vec![
                    Effect::Ui(UiEvent::PreviewStarted),
                    Effect::BeginNegotiation {
                        attempt: self.attempt,
                        remote: self.remote_offer.clone(),
                    },
                ]
            }
            (CallState::Idle, Err(e)) => self.finish(
                EndReason::CaptureFailed,
                None,
                vec![Effect::Ui(UiEvent::Failed(CallFailure::Capture(e)))],
            ),
            (CallState::Ringing, Err(e)) => self.finish(
                EndReason::CaptureFailed,
                Some(SignalMessage::Decline),
                vec![Effect::Ui(UiEvent::Failed(CallFailure::Capture(e)))],
            ),
            (_, Ok(handle)) => vec![Effect::ReleaseCapture(handle)],
            (_, Err(_)) => vec![],
        }
    }

    fn on_local_descriptor(
        &mut self,
        attempt: u64,
        result: Result<SessionDescriptor, NegotiationError>,
    ) -> Vec<Effect> {
        if self.pending != Some(Pending::LocalDescriptor) || attempt != self.attempt {
            debug!("stale local descriptor for attempt {attempt}");
            return vec![];
        }
        self.pending = None;

        match (self.state, result) {
            (CallState::AwaitingAnswer, Ok(offer)) => {
                self.signaled_peer = true;
                vec![Effect::Send(SignalMessage::Invite {
                    descriptor: Some(offer),
                })]
            }
            (CallState::Connecting, Ok(answer)) => {
                self.signaled_peer = true;
                let effects = vec![Effect::Send(SignalMessage::Accept {
                    descriptor: Some(answer),
                })];
                self.negotiation_established(effects)
            }
            (CallState::AwaitingAnswer, Err(e)) => self.finish(
                EndReason::NegotiationFailed,
                None,
                vec![Effect::Ui(UiEvent::Failed(CallFailure::Negotiation(e)))],
            ),
            (CallState::Connecting, Err(e)) => self.finish(
                EndReason::NegotiationFailed,
                Some(SignalMessage::End),
                vec![Effect::Ui(UiEvent::Failed(CallFailure::Negotiation(e)))],
            ),
            _ => vec![],
        }
    }

    fn on_remote_descriptor(
        &mut self,
        attempt: u64,
        result: Result<(), NegotiationError>,
    ) -> Vec<Effect> {
        if self.pending != Some(Pending::RemoteDescriptor)
            || attempt != self.attempt
            || self.state != CallState::Connecting
        {
            debug!("stale remote descriptor completion for attempt {attempt}");
            return vec![];
        }
        self.pending = None;

        match result {
            Ok(()) => self.negotiation_established(vec![]),
            Err(e) => self.finish(
                EndReason::NegotiationFailed,
                Some(SignalMessage::End),
                vec![Effect::Ui(UiEvent::Failed(CallFailure::Negotiation(e)))],
            ),
        }
    }

    /// Negotiation context exists: drain the candidate queue exactly once, in
    /// arrival order, and let media flow.
    fn negotiation_established(&mut self, mut effects: Vec<Effect>) -> Vec<Effect> {
        self.negotiation_ready = true;
        effects.extend(self.pending_candidates.drain(..).map(Effect::ApplyCandidate));
        effects.push(Effect::StartStreaming);
        effects
    }

    fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.attempt += 1;
        self.created_at = Some(now);
        self.last_end = None;
        self.pending_candidates.clear();
    }

    fn hold_early_candidate(
        &mut self,
        from: Option<String>,
        candidate: IceCandidate,
        now: DateTime<Utc>,
    ) {
        if self.early_candidates.len() == EARLY_CANDIDATE_LIMIT {
            self.early_candidates.pop_front();
        }
        self.early_candidates.push_back(EarlyCandidate {
            from,
            received_at: now,
            candidate,
        });
    }

    /// Move the held candidates that belong to this invite onto the attempt's
    /// queue, keeping arrival order. Everything else is dropped.
    fn adopt_early_candidates(&mut self, from: Option<&str>, now: DateTime<Utc>) {
        let window = TimeDelta::milliseconds(EARLY_CANDIDATE_WINDOW_MS);
        let held = std::mem::take(&mut self.early_candidates);
        let before = held.len();
        let queued = self.pending_candidates.len();
        self.pending_candidates.extend(
            held.into_iter()
                .filter(|c| c.from.as_deref() == from && now - c.received_at <= window)
                .map(|c| c.candidate),
        );
        let dropped = before - (self.pending_candidates.len() - queued);
        if dropped > 0 {
            debug!("dropped {dropped} early candidates not meant for this invite");
        }
    }

    /// Tear the call down from any state and return to Idle.
    ///
    /// `notify` goes out before anything is released, and only while the channel is open.
    fn finish(
        &mut self,
        reason: EndReason,
        notify: Option<SignalMessage>,
        ui: Vec<Effect>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(message) = notify
            && self.channel_open
        {
            effects.push(Effect::Send(message));
        }

        self.state = CallState::Ended;
        if let Some(handle) = self.local_media.take() {
            effects.push(Effect::ReleaseCapture(handle));
        }
        if self.media_engaged {
            effects.push(Effect::CloseMedia);
        }
        if self.timer.is_running() {
            self.timer.stop();
            effects.push(Effect::StopTicker);
        }
        self.pending_candidates.clear();
        self.last_end = Some(reason);
        debug!("call {} ended: {}", self.attempt, reason);

        effects.extend(ui);
        effects.push(Effect::Ui(UiEvent::Reset));
        self.reset();
        effects
    }

    fn reset(&mut self) {
        self.state = CallState::Idle;
        self.peer_id = None;
        self.local_media = None;
        self.pending_candidates.clear();
        self.early_candidates.clear();
        self.timer.stop();
        self.pending = None;
        self.remote_offer = None;
        self.negotiation_ready = false;
        self.media_engaged = false;
        self.signaled_peer = false;
        self.created_at = None;
    }
}

fn event_label(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::LocalDial => "LocalDial",
        SessionEvent::LocalAccept => "LocalAccept",
        SessionEvent::LocalDecline => "LocalDecline",
        SessionEvent::LocalHangUp => "LocalHangUp",
        SessionEvent::CaptureCompleted { .. } => "CaptureCompleted",
        SessionEvent::LocalDescriptorReady { .. } => "LocalDescriptorReady",
        SessionEvent::RemoteDescriptorApplied { .. } => "RemoteDescriptorApplied",
        SessionEvent::Remote { message, .. } => match message {
            SignalMessage::Invite { .. } => "Remote(invite)",
            SignalMessage::Accept { .. } => "Remote(accept)",
            SignalMessage::Candidate { .. } => "Remote(candidate)",
            SignalMessage::Decline => "Remote(decline)",
            SignalMessage::End => "Remote(end)",
        },
        SessionEvent::LocalCandidate(_) => "LocalCandidate",
        SessionEvent::Connection(_) => "Connection",
        SessionEvent::RingTimeout { .. } => "RingTimeout",
        SessionEvent::ChannelOpened => "ChannelOpened",
        SessionEvent::ChannelClosed => "ChannelClosed",
        SessionEvent::Tick => "Tick",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn sends(effects: &[Effect]) -> Vec<&SignalMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn offer() -> SessionDescriptor {
        SessionDescriptor::offer("v=0 offer")
    }

    fn answer() -> SessionDescriptor {
        SessionDescriptor::answer("v=0 answer")
    }

    fn cand(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 UDP 2130706431 10.0.0.{n} 5000 typ host"))
    }

    /// Caller driven to AwaitingAnswer with the invite sent.
    fn caller_awaiting() -> CallSession {
        let mut s = CallSession::new(Role::Caller);
        s.handle(SessionEvent::LocalDial, t0()).unwrap();
        let attempt = s.attempt();
        s.handle(
            SessionEvent::CaptureCompleted {
                attempt,
                result: Ok(CaptureHandle(1)),
            },
            t0(),
        )
        .unwrap();
        s.handle(
            SessionEvent::LocalDescriptorReady {
                attempt,
                result: Ok(offer()),
            },
            t0(),
        )
        .unwrap();
        s
    }

    fn caller_active() -> CallSession {
        let mut s = caller_awaiting();
        let attempt = s.attempt();
        s.handle(
            SessionEvent::remote(SignalMessage::Accept {
                descriptor: Some(answer()),
            }),
            t0(),
        )
        .unwrap();
        s.handle(
            SessionEvent::RemoteDescriptorApplied {
                attempt,
                result: Ok(()),
            },
            t0(),
        )
        .unwrap();
        s.handle(SessionEvent::Connection(ConnectionState::Connected), t0())
            .unwrap();
        s
    }

    fn callee_ringing() -> CallSession {
        let mut s = CallSession::new(Role::Callee);
        s.handle(
            SessionEvent::Remote {
                from: Some("visitor-1".into()),
                message: SignalMessage::Invite {
                    descriptor: Some(offer()),
                },
            },
            t0(),
        )
        .unwrap();
        s
    }

    #[test]
    fn caller_happy_path_and_timer() {
        let mut s = CallSession::new(Role::Caller);

        let fx = s.handle(SessionEvent::LocalDial, t0()).unwrap();
        assert!(fx.contains(&Effect::AcquireCapture { attempt: 1 }));
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.local_media(), None);

        let fx = s
            .handle(
                SessionEvent::CaptureCompleted {
                    attempt: 1,
                    result: Ok(CaptureHandle(7)),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(s.state(), CallState::AwaitingAnswer);
        assert_eq!(s.local_media(), Some(CaptureHandle(7)));
        assert!(fx.contains(&Effect::Ui(UiEvent::PreviewStarted)));
        assert!(fx.contains(&Effect::BeginNegotiation {
            attempt: 1,
            remote: None
        }));

        let fx = s
            .handle(
                SessionEvent::LocalDescriptorReady {
                    attempt: 1,
                    result: Ok(offer()),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(
            sends(&fx),
            vec![&SignalMessage::Invite {
                descriptor: Some(offer())
            }]
        );

        let fx = s
            .handle(
                SessionEvent::remote(SignalMessage::Accept {
                    descriptor: Some(answer()),
                }),
                t0(),
            )
            .unwrap();
        assert_eq!(s.state(), CallState::Connecting);
        assert_eq!(
            fx,
            vec![Effect::ApplyRemoteDescriptor {
                attempt: 1,
                descriptor: answer()
            }]
        );

        s.handle(
            SessionEvent::RemoteDescriptorApplied {
                attempt: 1,
                result: Ok(()),
            },
            t0(),
        )
        .unwrap();

        let fx = s
            .handle(SessionEvent::Connection(ConnectionState::Connected), t0())
            .unwrap();
        assert_eq!(s.state(), CallState::Active);
        assert!(fx.contains(&Effect::StartTicker));
        assert_eq!(s.timer_display(), "00:00");
        assert_eq!(s.started_at(), Some(t0()));

        let fx = s
            .handle(SessionEvent::Tick, t0() + TimeDelta::seconds(1))
            .unwrap();
        assert_eq!(fx, vec![Effect::Ui(UiEvent::TimerTick("00:01".into()))]);
        assert_eq!(s.timer_display(), "00:01");
    }

    #[test]
    fn caller_capture_failure_reports_and_stays_idle() {
        let mut s = CallSession::new(Role::Caller);
        s.handle(SessionEvent::LocalDial, t0()).unwrap();
        let fx = s
            .handle(
                SessionEvent::CaptureCompleted {
                    attempt: 1,
                    result: Err(CaptureError::NotFound),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(s.state(), CallState::Idle);
        assert!(sends(&fx).is_empty());
        assert!(fx.contains(&Effect::Ui(UiEvent::Failed(CallFailure::Capture(
            CaptureError::NotFound
        )))));
        assert_eq!(s.last_end(), Some(EndReason::CaptureFailed));
    }

    #[test]
    fn callee_decline_sends_exactly_one_decline() {
        let mut s = callee_ringing();
        assert_eq!(s.state(), CallState::Ringing);
        assert_eq!(s.peer_id(), Some("visitor-1"));
        assert_eq!(s.local_media(), None);

        let fx = s.handle(SessionEvent::LocalDecline, t0()).unwrap();
        assert_eq!(sends(&fx), vec![&SignalMessage::Decline]);
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.local_media(), None);
        assert!(!fx.iter().any(|e| matches!(e, Effect::ReleaseCapture(_))));
    }

    #[test]
    fn callee_accept_flow_sends_answer_and_drains_queue_in_order() {
        let mut s = CallSession::new(Role::Callee);
        // A candidate can beat the invite through a pub/sub relay.
        s.handle(
            SessionEvent::remote(SignalMessage::Candidate { candidate: cand(1) }),
            t0(),
        )
        .unwrap();
        s.handle(
            SessionEvent::remote(SignalMessage::Invite {
                descriptor: Some(offer()),
            }),
            t0(),
        )
        .unwrap();
        s.handle(
            SessionEvent::remote(SignalMessage::Candidate { candidate: cand(2) }),
            t0(),
        )
        .unwrap();
        assert_eq!(s.pending_candidates(), &[cand(1), cand(2)]);

        let fx = s.handle(SessionEvent::LocalAccept, t0()).unwrap();
        assert_eq!(fx, vec![Effect::AcquireCapture { attempt: 1 }]);
        assert_eq!(s.state(), CallState::Ringing);

        let fx = s
            .handle(
                SessionEvent::CaptureCompleted {
                    attempt: 1,
                    result: Ok(CaptureHandle(3)),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(s.state(), CallState::Connecting);
        assert!(fx.contains(&Effect::BeginNegotiation {
            attempt: 1,
            remote: Some(offer())
        }));

        s.handle(
            SessionEvent::remote(SignalMessage::Candidate { candidate: cand(3) }),
            t0(),
        )
        .unwrap();

        let fx = s
            .handle(
                SessionEvent::LocalDescriptorReady {
                    attempt: 1,
                    result: Ok(answer()),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(
            fx,
            vec![
                Effect::Send(SignalMessage::Accept {
                    descriptor: Some(answer())
                }),
                Effect::ApplyCandidate(cand(1)),
                Effect::ApplyCandidate(cand(2)),
                Effect::ApplyCandidate(cand(3)),
                Effect::StartStreaming,
            ]
        );
        assert!(s.pending_candidates().is_empty());

        // Context exists now: later candidates go straight through.
        let fx = s
            .handle(
                SessionEvent::remote(SignalMessage::Candidate { candidate: cand(4) }),
                t0(),
            )
            .unwrap();
        assert_eq!(fx, vec![Effect::ApplyCandidate(cand(4))]);
        assert!(s.pending_candidates().is_empty());
    }

    #[test]
    fn callee_capture_failure_declines() {
        let mut s = callee_ringing();
        s.handle(SessionEvent::LocalAccept, t0()).unwrap();
        let fx = s
            .handle(
                SessionEvent::CaptureCompleted {
                    attempt: 1,
                    result: Err(CaptureError::Denied),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(sends(&fx), vec![&SignalMessage::Decline]);
        assert_eq!(s.state(), CallState::Idle);
    }

    #[test]
    fn remote_cancel_while_ringing_is_silent() {
        let mut s = callee_ringing();
        let fx = s
            .handle(SessionEvent::remote(SignalMessage::End), t0())
            .unwrap();
        assert!(sends(&fx).is_empty());
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.last_end(), Some(EndReason::Cancelled));
    }

    #[test]
    fn ring_timeout_is_silent_and_attempt_scoped() {
        let mut s = callee_ringing();
        assert!(s.handle(SessionEvent::RingTimeout { attempt: 0 }, t0()).unwrap().is_empty());
        assert_eq!(s.state(), CallState::Ringing);

        let fx = s.handle(SessionEvent::RingTimeout { attempt: 1 }, t0()).unwrap();
        assert!(sends(&fx).is_empty());
        assert_eq!(s.state(), CallState::Idle);
    }

    #[test]
    fn ring_timeout_ignored_once_accept_is_in_progress() {
        let mut s = callee_ringing();
        s.handle(SessionEvent::LocalAccept, t0()).unwrap();
        s.handle(SessionEvent::RingTimeout { attempt: 1 }, t0()).unwrap();
        assert_eq!(s.state(), CallState::Ringing);
    }

    #[test]
    fn remote_decline_releases_capture() {
        let mut s = caller_awaiting();
        let fx = s
            .handle(SessionEvent::remote(SignalMessage::Decline), t0())
            .unwrap();
        assert!(fx.contains(&Effect::ReleaseCapture(CaptureHandle(1))));
        assert!(fx.contains(&Effect::Ui(UiEvent::Declined)));
        assert!(sends(&fx).is_empty());
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.local_media(), None);
    }

    #[test]
    fn remote_end_while_active_releases_without_reply() {
        let mut s = caller_active();
        s.handle(SessionEvent::Tick, t0() + TimeDelta::seconds(5))
            .unwrap();
        assert_eq!(s.timer_display(), "00:05");

        let fx = s
            .handle(SessionEvent::remote(SignalMessage::End), t0())
            .unwrap();
        assert!(sends(&fx).is_empty());
        assert!(fx.contains(&Effect::ReleaseCapture(CaptureHandle(1))));
        assert!(fx.contains(&Effect::StopTicker));
        assert!(fx.contains(&Effect::CloseMedia));
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.local_media(), None);
        assert_eq!(s.timer_display(), "00:00");
    }

    #[test]
    fn local_hang_up_sends_end_before_release() {
        let mut s = caller_active();
        let fx = s.handle(SessionEvent::LocalHangUp, t0()).unwrap();
        assert_eq!(fx[0], Effect::Send(SignalMessage::End));
        assert!(fx.contains(&Effect::ReleaseCapture(CaptureHandle(1))));
        assert_eq!(s.last_end(), Some(EndReason::LocalHangUp));
    }

    #[test]
    fn end_in_idle_is_a_no_op() {
        let mut s = caller_active();
        s.handle(SessionEvent::LocalHangUp, t0()).unwrap();

        let fx = s
            .handle(SessionEvent::remote(SignalMessage::End), t0())
            .unwrap();
        assert!(fx.is_empty());
        let fx = s.handle(SessionEvent::LocalHangUp, t0()).unwrap();
        assert!(fx.is_empty());
        assert_eq!(s.state(), CallState::Idle);
    }

    #[test]
    fn negotiation_failure_sends_end_while_channel_open() {
        let mut s = caller_awaiting();
        s.handle(
            SessionEvent::remote(SignalMessage::Accept {
                descriptor: Some(answer()),
            }),
            t0(),
        )
        .unwrap();
        let fx = s
            .handle(
                SessionEvent::RemoteDescriptorApplied {
                    attempt: 1,
                    result: Err(NegotiationError::RemoteDescriptor("bad sdp".into())),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(sends(&fx), vec![&SignalMessage::End]);
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.last_end(), Some(EndReason::NegotiationFailed));
    }

    #[test]
    fn negotiation_failure_after_channel_loss_sends_nothing() {
        let mut s = caller_awaiting();
        s.handle(
            SessionEvent::remote(SignalMessage::Accept {
                descriptor: Some(answer()),
            }),
            t0(),
        )
        .unwrap();
        let mut all = s.handle(SessionEvent::ChannelClosed, t0()).unwrap();
        all.extend(
            s.handle(
                SessionEvent::RemoteDescriptorApplied {
                    attempt: 1,
                    result: Err(NegotiationError::RemoteDescriptor("bad sdp".into())),
                },
                t0(),
            )
            .unwrap(),
        );
        assert!(sends(&all).is_empty());
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.last_end(), Some(EndReason::ChannelClosed));
    }

    #[test]
    fn callee_answer_failure_ends_call() {
        let mut s = callee_ringing();
        s.handle(SessionEvent::LocalAccept, t0()).unwrap();
        s.handle(
            SessionEvent::CaptureCompleted {
                attempt: 1,
                result: Ok(CaptureHandle(5)),
            },
            t0(),
        )
        .unwrap();
        let fx = s
            .handle(
                SessionEvent::LocalDescriptorReady {
                    attempt: 1,
                    result: Err(NegotiationError::CreateDescriptor("no codecs".into())),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(sends(&fx), vec![&SignalMessage::End]);
        assert!(fx.contains(&Effect::ReleaseCapture(CaptureHandle(5))));
    }

    #[test]
    fn stale_capture_after_hang_up_is_released() {
        let mut s = CallSession::new(Role::Caller);
        s.handle(SessionEvent::LocalDial, t0()).unwrap();
        s.handle(SessionEvent::LocalHangUp, t0()).unwrap();
        assert_eq!(s.state(), CallState::Idle);

        let fx = s
            .handle(
                SessionEvent::CaptureCompleted {
                    attempt: 1,
                    result: Ok(CaptureHandle(9)),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(fx, vec![Effect::ReleaseCapture(CaptureHandle(9))]);
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.local_media(), None);
    }

    #[test]
    fn stale_capture_after_remote_cancel_is_released() {
        let mut s = callee_ringing();
        s.handle(SessionEvent::LocalAccept, t0()).unwrap();
        s.handle(SessionEvent::remote(SignalMessage::End), t0())
            .unwrap();
        let fx = s
            .handle(
                SessionEvent::CaptureCompleted {
                    attempt: 1,
                    result: Ok(CaptureHandle(2)),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(fx, vec![Effect::ReleaseCapture(CaptureHandle(2))]);
    }

    #[test]
    fn stale_descriptor_from_previous_attempt_does_nothing() {
        let mut s = caller_awaiting();
        s.handle(SessionEvent::LocalHangUp, t0()).unwrap();
        s.handle(SessionEvent::LocalDial, t0()).unwrap();
        s.handle(
            SessionEvent::CaptureCompleted {
                attempt: 2,
                result: Ok(CaptureHandle(2)),
            },
            t0(),
        )
        .unwrap();
        let fx = s
            .handle(
                SessionEvent::LocalDescriptorReady {
                    attempt: 1,
                    result: Ok(offer()),
                },
                t0(),
            )
            .unwrap();
        assert!(fx.is_empty());
        assert_eq!(s.state(), CallState::AwaitingAnswer);
    }

    #[test]
    fn connection_failure_is_treated_as_remote_end() {
        let mut s = caller_active();
        let fx = s
            .handle(SessionEvent::Connection(ConnectionState::Failed), t0())
            .unwrap();
        assert!(sends(&fx).is_empty());
        assert_eq!(s.state(), CallState::Idle);
        assert_eq!(s.last_end(), Some(EndReason::ConnectionFailed));
    }

    #[test]
    fn channel_close_ends_call_and_blocks_new_dials() {
        let mut s = caller_active();
        let fx = s.handle(SessionEvent::ChannelClosed, t0()).unwrap();
        assert!(sends(&fx).is_empty());
        assert!(fx.contains(&Effect::ReleaseCapture(CaptureHandle(1))));

        let fx = s.handle(SessionEvent::LocalDial, t0()).unwrap();
        assert_eq!(fx, vec![Effect::Ui(UiEvent::Failed(CallFailure::Channel))]);
        assert_eq!(s.state(), CallState::Idle);

        s.handle(SessionEvent::ChannelOpened, t0()).unwrap();
        let fx = s.handle(SessionEvent::LocalDial, t0()).unwrap();
        assert!(fx.iter().any(|e| matches!(e, Effect::AcquireCapture { .. })));
    }

    #[test]
    fn second_invite_while_live_is_rejected() {
        let mut s = callee_ringing();
        let err = s
            .handle(
                SessionEvent::remote(SignalMessage::Invite {
                    descriptor: Some(offer()),
                }),
                t0(),
            )
            .unwrap_err();
        assert_eq!(err.current_state, "Ringing");
        assert_eq!(s.attempt(), 1);
    }

    #[test]
    fn role_gates_dial_and_invite() {
        let mut callee = CallSession::new(Role::Callee);
        assert!(callee.handle(SessionEvent::LocalDial, t0()).is_err());

        let mut caller = CallSession::new(Role::Caller);
        assert!(
            caller
                .handle(
                    SessionEvent::remote(SignalMessage::Invite { descriptor: None }),
                    t0()
                )
                .is_err()
        );
    }

    #[test]
    fn accept_without_descriptor_skips_negotiation() {
        let mut s = caller_awaiting();
        s.handle(SessionEvent::remote(SignalMessage::Candidate { candidate: cand(1) }), t0())
            .unwrap();
        let fx = s
            .handle(
                SessionEvent::remote(SignalMessage::Accept { descriptor: None }),
                t0(),
            )
            .unwrap();
        assert_eq!(
            fx,
            vec![Effect::ApplyCandidate(cand(1)), Effect::StartStreaming]
        );
        assert_eq!(s.state(), CallState::Connecting);
    }

    #[test]
    fn local_candidates_relayed_only_while_live() {
        let mut s = CallSession::new(Role::Caller);
        assert!(s.handle(SessionEvent::LocalCandidate(cand(1)), t0()).is_err());

        let mut s = caller_awaiting();
        let fx = s.handle(SessionEvent::LocalCandidate(cand(1)), t0()).unwrap();
        assert_eq!(
            fx,
            vec![Effect::Send(SignalMessage::Candidate { candidate: cand(1) })]
        );
    }

    #[test]
    fn hang_up_before_invite_went_out_sends_nothing() {
        let mut s = CallSession::new(Role::Caller);
        s.handle(SessionEvent::LocalDial, t0()).unwrap();
        s.handle(
            SessionEvent::CaptureCompleted {
                attempt: 1,
                result: Ok(CaptureHandle(1)),
            },
            t0(),
        )
        .unwrap();
        let fx = s.handle(SessionEvent::LocalHangUp, t0()).unwrap();
        assert!(sends(&fx).is_empty());
        assert!(fx.contains(&Effect::ReleaseCapture(CaptureHandle(1))));
    }

    #[test]
    fn trailing_candidates_never_reach_the_next_call() {
        let mut s = caller_active();
        s.handle(SessionEvent::remote(SignalMessage::End), t0())
            .unwrap();

        for n in 0..1000 {
            s.handle(
                SessionEvent::remote(SignalMessage::Candidate { candidate: cand(n) }),
                t0(),
            )
            .unwrap();
        }
        assert!(s.pending_candidates().is_empty());
        assert_eq!(s.early_candidate_count(), 0);

        s.handle(SessionEvent::LocalDial, t0()).unwrap();
        let attempt = s.attempt();
        s.handle(
            SessionEvent::CaptureCompleted {
                attempt,
                result: Ok(CaptureHandle(2)),
            },
            t0(),
        )
        .unwrap();
        s.handle(
            SessionEvent::LocalDescriptorReady {
                attempt,
                result: Ok(offer()),
            },
            t0(),
        )
        .unwrap();
        let fx = s
            .handle(
                SessionEvent::remote(SignalMessage::Accept { descriptor: None }),
                t0(),
            )
            .unwrap();
        assert_eq!(fx, vec![Effect::StartStreaming]);
    }

    #[test]
    fn idle_callee_holds_only_fresh_candidates_from_the_inviter() {
        let mut s = CallSession::new(Role::Callee);
        let from = |peer: &str, n| SessionEvent::Remote {
            from: Some(peer.to_string()),
            message: SignalMessage::Candidate { candidate: cand(n) },
        };

        // 1. Left over from a call that ended long before the invite.
        s.handle(from("visitor-1", 1), t0()).unwrap();
        let later = t0() + TimeDelta::seconds(30);
        // 2. Someone else's call.
        s.handle(from("visitor-2", 2), later).unwrap();
        // 3. Beat the invite through the relay.
        s.handle(from("visitor-1", 3), later).unwrap();
        assert_eq!(s.early_candidate_count(), 3);

        s.handle(
            SessionEvent::Remote {
                from: Some("visitor-1".into()),
                message: SignalMessage::Invite {
                    descriptor: Some(offer()),
                },
            },
            later + TimeDelta::seconds(1),
        )
        .unwrap();
        assert_eq!(s.pending_candidates(), &[cand(3)]);
        assert_eq!(s.early_candidate_count(), 0);
    }

    #[test]
    fn idle_callee_candidate_backlog_is_bounded() {
        let mut s = CallSession::new(Role::Callee);
        for n in 0..(EARLY_CANDIDATE_LIMIT as u32 + 10) {
            s.handle(
                SessionEvent::remote(SignalMessage::Candidate { candidate: cand(n) }),
                t0(),
            )
            .unwrap();
        }
        assert_eq!(s.early_candidate_count(), EARLY_CANDIDATE_LIMIT);

        s.handle(
            SessionEvent::remote(SignalMessage::Invite { descriptor: None }),
            t0(),
        )
        .unwrap();
        // The oldest were dropped; the newest survive in order.
        assert_eq!(s.pending_candidates().len(), EARLY_CANDIDATE_LIMIT);
        assert_eq!(s.pending_candidates()[0], cand(10));
    }

    #[test]
    fn callee_hang_up_before_answer_went_out_declines() {
        let mut s = callee_ringing();
        s.handle(SessionEvent::LocalAccept, t0()).unwrap();
        s.handle(
            SessionEvent::CaptureCompleted {
                attempt: 1,
                result: Ok(CaptureHandle(4)),
            },
            t0(),
        )
        .unwrap();
        assert_eq!(s.state(), CallState::Connecting);

        let fx = s.handle(SessionEvent::LocalHangUp, t0()).unwrap();
        assert_eq!(sends(&fx), vec![&SignalMessage::Decline]);
        assert!(fx.contains(&Effect::ReleaseCapture(CaptureHandle(4))));
        assert_eq!(s.state(), CallState::Idle);
    }

    #[test]
    fn callee_hang_up_after_answer_sends_end() {
        let mut s = callee_ringing();
        s.handle(SessionEvent::LocalAccept, t0()).unwrap();
        s.handle(
            SessionEvent::CaptureCompleted {
                attempt: 1,
                result: Ok(CaptureHandle(4)),
            },
            t0(),
        )
        .unwrap();
        s.handle(
            SessionEvent::LocalDescriptorReady {
                attempt: 1,
                result: Ok(answer()),
            },
            t0(),
        )
        .unwrap();

        let fx = s.handle(SessionEvent::LocalHangUp, t0()).unwrap();
        assert_eq!(sends(&fx), vec![&SignalMessage::End]);
    }

    /// Random event soup: the state set, capture ownership and release-exactly-once
    /// must hold after every step.
    #[test]
    fn random_sequences_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for role in [Role::Caller, Role::Callee] {
            for _ in 0..200 {
                let mut s = CallSession::new(role);
                let mut next_handle = 100u64;
                let mut granted: Vec<CaptureHandle> = Vec::new();
                let mut released: Vec<CaptureHandle> = Vec::new();
                let mut now = t0();

                for _ in 0..60 {
                    let attempt = s.attempt().saturating_sub(rng.random_range(0..2));
                    let event = match rng.random_range(0..16) {
                        0 => SessionEvent::LocalDial,
                        1 => SessionEvent::LocalAccept,
                        2 => SessionEvent::LocalDecline,
                        3 => SessionEvent::LocalHangUp,
                        4 => {
                            if rng.random_bool(0.8) {
                                next_handle += 1;
                                granted.push(CaptureHandle(next_handle));
                                SessionEvent::CaptureCompleted {
                                    attempt,
                                    result: Ok(CaptureHandle(next_handle)),
                                }
                            } else {
                                SessionEvent::CaptureCompleted {
                                    attempt,
                                    result: Err(CaptureError::Denied),
                                }
                            }
                        }
                        5 => SessionEvent::LocalDescriptorReady {
                            attempt,
                            result: if rng.random_bool(0.8) {
                                Ok(if role.is_caller() { offer() } else { answer() })
                            } else {
                                Err(NegotiationError::CreateDescriptor("x".into()))
                            },
                        },
                        6 => SessionEvent::RemoteDescriptorApplied {
                            attempt,
                            result: Ok(()),
                        },
                        7 => SessionEvent::remote(SignalMessage::Invite {
                            descriptor: Some(offer()),
                        }),
                        8 => SessionEvent::remote(SignalMessage::Accept {
                            descriptor: Some(answer()),
                        }),
                        9 => SessionEvent::remote(SignalMessage::Candidate {
                            candidate: cand(rng.random_range(0..9)),
                        }),
                        10 => SessionEvent::remote(SignalMessage::Decline),
                        11 => SessionEvent::remote(SignalMessage::End),
                        12 => SessionEvent::Connection(if rng.random_bool(0.7) {
                            ConnectionState::Connected
                        } else {
                            ConnectionState::Failed
                        }),
                        13 => SessionEvent::RingTimeout { attempt },
                        14 => {
                            if rng.random_bool(0.5) {
                                SessionEvent::ChannelClosed
                            } else {
                                SessionEvent::ChannelOpened
                            }
                        }
                        _ => SessionEvent::Tick,
                    };
                    now += TimeDelta::milliseconds(rng.random_range(0..1500));

                    let before = s.state();
                    match s.handle(event, now) {
                        Ok(effects) => {
                            for e in &effects {
                                if let Effect::ReleaseCapture(h) = e {
                                    assert!(!released.contains(h), "{h} released twice");
                                    released.push(*h);
                                }
                            }
                            if effects.contains(&Effect::Ui(UiEvent::Reset)) {
                                assert!(s.pending_candidates().is_empty(), "queue survived teardown");
                            }
                        }
                        Err(_) => assert_eq!(s.state(), before),
                    }

                    assert!(CallState::ALL.contains(&s.state()));
                    assert!(s.invariants_hold(), "invariants broken in {:?}", s);
                    let outstanding: Vec<_> = granted
                        .iter()
                        .filter(|h| !released.contains(h))
                        .copied()
                        .collect();
                    assert_eq!(outstanding, s.local_media().into_iter().collect::<Vec<_>>());
                }
            }
        }
    }
}
