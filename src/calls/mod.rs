//! Call control runtime.
//!
//! This module drives a [`callcore::CallSession`] on tokio and provides the
//! channel and media adapters a peer needs.
//!
//! # Architecture
//!
//! - [`SessionController`]: owns the session and runs its event loop
//! - [`CallHandle`]: cloneable command handle for user actions
//! - [`CallView`]: visibility model folded from UI events
//! - [`RoomChannel`]: pub/sub room envelope over a plain channel
//! - [`RelayedMedia`]: media relayed as binary frames over the signaling channel
//! - [`memory_pair`]: two connected in-process channels

mod controller;
mod memory;
mod relay;
mod room;
mod view;

pub use controller::{
    CallCommand, CallHandle, CallNotification, ControllerConfig, SessionController,
    spawn_controller,
};
pub use memory::{MemoryChannel, MemoryEnd, memory_pair};
pub use relay::{RelaySettings, RelayedMedia};
pub use room::RoomChannel;
pub use view::CallView;
