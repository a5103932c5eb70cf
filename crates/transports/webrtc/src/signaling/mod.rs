//! Signaling: wire protocol, websocket server and client link

pub mod client;
pub mod protocol;
pub mod sdp;
pub mod websocket;

pub use client::SignalingLink;
pub use protocol::{CandidateData, ClientMessage, GeneratedFiles, ServerMessage};
pub use websocket::{WebSocketServerHandle, WebSocketSignalingServer};
