//! Dual-leg WebRTC signaling and recording coordination
//!
//! A capture client negotiates two WebRTC legs (camera and screen) with the
//! server over one websocket. The server holds both answers back until both
//! legs have finished ICE gathering, then records both legs per run.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐        ┌────────────────────────────────┐
//! │ SessionCoordinator (client)  │        │ WebSocketSignalingServer       │
//! │  ├─ PeerLink (camera)        │  JSON  │  └─ ServerSession (per conn)   │
//! │  ├─ PeerLink (screen)        │◄──────►│      └─ NegotiationEngine      │
//! │  └─ SignalingLink            │        │          └─ MediaEngine        │
//! └──────────────────────────────┘        │              (RtcMediaEngine)  │
//!                                         └────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use castrec_webrtc::{EngineConfig, SignalingServerConfig};
//!
//! let engine = EngineConfig::default().with_recordings_dir("/var/recordings");
//! assert!(engine.validate().is_ok());
//! assert_eq!(SignalingServerConfig::default().outbound_queue, 128);
//! ```

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod leg;
pub mod media;
pub mod session;
pub mod signaling;

pub use client::{PeerEvent, PeerLink, RtcPeerLink, SessionCoordinator, SignalSink};
pub use config::{EngineConfig, RtcEngineConfig, SignalingServerConfig};
pub use error::{Error, Result};
pub use leg::{LegMap, StreamLeg};
pub use media::{
    Capabilities, FlushHandle, IncomingStream, MediaEngine, MediaTransport, Recorder,
    RtcMediaEngine, SessionContext,
};
pub use session::{
    EngineSnapshot, LegPhase, NegotiationEngine, RecordingRun, ServerSession, SessionPhase,
    SessionRegistry,
};
pub use signaling::{
    CandidateData, ClientMessage, GeneratedFiles, ServerMessage, SignalingLink,
    WebSocketServerHandle, WebSocketSignalingServer,
};
