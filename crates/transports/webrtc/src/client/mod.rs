//! Capture-side session coordination

pub mod coordinator;
pub mod peer_link;

pub use coordinator::{SessionCoordinator, SignalSink};
pub use peer_link::{PeerEvent, PeerLink, RtcPeerLink};
