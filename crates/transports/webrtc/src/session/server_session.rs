//! Per-connection dispatcher

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::engine::NegotiationEngine;
use super::registry::SessionRegistry;
use crate::leg::StreamLeg;
use crate::signaling::protocol::{ClientMessage, ServerMessage};
use crate::{Error, Result};

/// Routes decoded client messages to the session's NegotiationEngine and
/// reports failures back through the error envelope.
pub struct ServerSession {
    engine: Arc<NegotiationEngine>,
    registry: Arc<SessionRegistry>,
    outbound: mpsc::Sender<ServerMessage>,
}

impl ServerSession {
    /// Register a new session and announce it to the client
    pub async fn open(
        registry: Arc<SessionRegistry>,
        identity: Option<String>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<Self> {
        let engine = registry.create_session(identity, outbound.clone()).await?;
        let session = Self {
            engine,
            registry,
            outbound,
        };
        session
            .send(ServerMessage::SessionCreated {
                session_id: session.session_id().to_string(),
            })
            .await;
        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        self.engine.session_id()
    }

    pub fn engine(&self) -> &Arc<NegotiationEngine> {
        &self.engine
    }

    /// Decode and dispatch one text frame. Never fails; problems are
    /// logged and, unless silent, reported with an `ERROR` envelope.
    pub async fn handle_text(&self, text: &str) {
        let (result, stream_name) = match ClientMessage::from_json(text) {
            Ok(msg) => {
                let stream_name = msg.stream_name().map(str::to_string);
                (self.dispatch(msg).await, stream_name)
            }
            Err(e) => (Err(e), None),
        };

        if let Err(e) = result {
            self.report(&e, stream_name.as_deref()).await;
        }
    }

    /// Route one message to its handler
    pub async fn dispatch(&self, msg: ClientMessage) -> Result<()> {
        debug!(session_id = %self.session_id(), action = msg.action(), "dispatch");

        match msg {
            ClientMessage::ClientSdpInfo {
                stream_name,
                sdp_payload,
            } => {
                let leg: StreamLeg = stream_name.parse()?;
                self.engine.on_sdp_offer(leg, &sdp_payload).await
            }
            ClientMessage::IceCandidate {
                stream_name,
                candidate_data,
            } => {
                let leg: StreamLeg = stream_name.parse()?;
                self.engine.on_ice_candidate(leg, candidate_data).await
            }
            ClientMessage::IceGatheringFinished { stream_name } => {
                let leg: StreamLeg = stream_name.parse()?;
                self.engine.on_ice_gathering_finished(leg).await
            }
            ClientMessage::StartRecording => self.engine.on_recording_start().await,
            ClientMessage::StopRecording => self.engine.on_recording_stop().await,
        }
    }

    async fn report(&self, err: &Error, stream_name: Option<&str>) {
        if err.is_silent() {
            debug!(session_id = %self.session_id(), "ignored: {}", err);
            return;
        }
        warn!(session_id = %self.session_id(), stream = ?stream_name, "{}", err);
        self.send(ServerMessage::from_error(err, stream_name)).await;
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!(session_id = %self.session_id(), "outbound channel closed");
        }
    }

    /// Tear down the engine and unregister the session
    pub async fn close(self) {
        self.registry.remove_session(self.engine.session_id()).await;
        // already drained by clear(); teardown is idempotent
        self.engine.on_client_disconnected().await;
    }
}
