//! Transport-agnostic call control: the session state machine, the signaling
//! message codecs and the capability contracts the runtime plugs into.

pub mod chunk;
pub mod error;
pub mod framing;
pub mod media;
pub mod net;
pub mod session;
pub mod signal;
pub mod timer;
pub mod types;

pub use error::{
    CallError, CaptureError, ChannelError, CodecError, InvalidTransition, MalformedMessage,
    NegotiationError,
};
pub use session::{CallFailure, CallSession, CallState, Effect, SessionEvent, UiEvent};
pub use signal::{Dialect, SignalCodec, SignalMessage};
