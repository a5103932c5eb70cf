//! Session registry: session id → NegotiationEngine

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use super::engine::NegotiationEngine;
use crate::config::EngineConfig;
use crate::media::{Capabilities, MediaEngine, SessionContext};
use crate::signaling::protocol::ServerMessage;
use crate::{Error, Result};

/// Session identifier
pub type SessionId = String;

/// Concurrency-safe mapping of live sessions.
///
/// Engines are inserted on connect and removed (after teardown) on
/// disconnect. The Media Engine and capability set are shared by every
/// session created here.
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<NegotiationEngine>>>>,
    media: Arc<dyn MediaEngine>,
    capabilities: Arc<Capabilities>,
    config: EngineConfig,
    max_sessions: usize,
}

impl SessionRegistry {
    /// # Arguments
    ///
    /// * `max_sessions` - Maximum number of concurrent sessions (0 = unlimited)
    pub fn new(
        media: Arc<dyn MediaEngine>,
        capabilities: Arc<Capabilities>,
        config: EngineConfig,
        max_sessions: usize,
    ) -> Result<Self> {
        config.validate()?;
        capabilities.validate()?;
        info!("Creating session registry (max_sessions: {})", max_sessions);

        Ok(Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            media,
            capabilities,
            config,
            max_sessions,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Mint a session id and register a fresh engine for it
    pub async fn create_session(
        &self,
        identity: Option<String>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<Arc<NegotiationEngine>> {
        let mut sessions = self.sessions.write().await;

        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(Error::SessionLimitReached(self.max_sessions));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let ctx = SessionContext::new(session_id.clone()).with_identity(identity);
        let engine = Arc::new(NegotiationEngine::new(
            ctx,
            Arc::clone(&self.media),
            Arc::clone(&self.capabilities),
            self.config.clone(),
            outbound,
        ));
        sessions.insert(session_id.clone(), Arc::clone(&engine));

        info!(session_id = %session_id, "session registered ({} active)", sessions.len());
        Ok(engine)
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Tear down and unregister a session. Unknown ids are ignored.
    pub async fn remove_session(&self, session_id: &str) {
        let engine = self.sessions.write().await.remove(session_id);
        if let Some(engine) = engine {
            engine.on_client_disconnected().await;
            info!(session_id = %session_id, "session removed");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Tear down every session (server shutdown)
    pub async fn clear(&self) {
        info!("Clearing all sessions");
        let engines: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, engine) in engines {
            engine.on_client_disconnected().await;
        }
    }
}
