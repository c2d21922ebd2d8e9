// Core types are re-exported so the runtime and its users share one vocabulary
pub use callcore::{chunk, error, framing, media, net, session, signal, timer, types};

pub mod calls;
pub mod config;

pub use calls::{CallHandle, CallView, SessionController, spawn_controller};
pub use config::CallConfig;
