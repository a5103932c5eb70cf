//! Media Engine interface
//!
//! The negotiation core never touches RTP, codecs or files. It drives an
//! implementation of [`MediaEngine`] that owns transports, incoming streams
//! and recorders. [`RtcMediaEngine`] is the webrtc-rs backed implementation.

pub mod capabilities;
pub mod rtc_engine;
pub mod rtpdump;

pub use capabilities::{Capabilities, CodecSpec, KindCapabilities, RtcpFeedback};
pub use rtc_engine::RtcMediaEngine;

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::oneshot;

use crate::leg::StreamLeg;
use crate::signaling::protocol::CandidateData;
use crate::signaling::sdp::Offer;
use crate::Result;

/// Resolves once a recorder has finished writing its output
pub type FlushHandle = oneshot::Receiver<()>;

/// Per-session data handed to the Media Engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    /// Opaque identity claim supplied at connect time; never interpreted
    pub identity: Option<String>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Option<String>) -> Self {
        self.identity = identity;
        self
    }
}

/// Creates transports from remote offers
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a local transport bound to `offer` and the buffered
    /// `candidates`, restricted to `capabilities`, and produce its answer.
    async fn create_transport(
        &self,
        ctx: &SessionContext,
        leg: StreamLeg,
        offer: &Offer,
        candidates: &[CandidateData],
        capabilities: &Capabilities,
    ) -> Result<Box<dyn MediaTransport>>;
}

/// One negotiated leg
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Local answer SDP
    fn answer_sdp(&self) -> &str;

    /// Create the stream of media arriving on this transport
    async fn create_incoming_stream(&self) -> Result<Box<dyn IncomingStream>>;

    async fn close(&self) -> Result<()>;
}

/// Media arriving on a transport
#[async_trait]
pub trait IncomingStream: Send + Sync {
    /// Create a recorder writing this stream to `path`
    async fn create_recorder(&self, path: &Path) -> Result<Box<dyn Recorder>>;

    async fn release(&self) -> Result<()>;
}

/// Writes one incoming stream to one file
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start(&mut self) -> Result<()>;

    /// Stop recording. Returns a flush handle when the engine can signal
    /// that the file is complete.
    async fn stop(&mut self) -> Result<Option<FlushHandle>>;
}
