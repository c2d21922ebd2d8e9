pub mod call;

pub use call::{
    CaptureHandle, ConnectionState, DescriptorKind, EndReason, IceCandidate, Role,
    SessionDescriptor,
};
