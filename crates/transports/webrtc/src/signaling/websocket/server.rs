//! WebSocket signaling server

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::handler::handle_connection;
use crate::config::SignalingServerConfig;
use crate::session::SessionRegistry;
use crate::Result;

/// WebSocket signaling server
pub struct WebSocketSignalingServer {
    config: SignalingServerConfig,
    registry: Arc<SessionRegistry>,
}

impl WebSocketSignalingServer {
    pub fn new(config: SignalingServerConfig, registry: Arc<SessionRegistry>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, registry })
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Bind and run the accept loop on the current runtime.
    ///
    /// Returns once the listener is bound; the handle reports the actual
    /// bound address (useful with port 0).
    pub async fn start(self) -> Result<WebSocketServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            error!("Failed to bind WebSocket server to {}: {}", self.config.bind_addr, e);
            e
        })?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket signaling server listening on ws://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let registry = Arc::clone(&self.registry);
        let outbound_queue = self.config.outbound_queue;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let registry = Arc::clone(&registry);
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, registry, outbound_queue).await {
                                        error!("WebSocket connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept WebSocket connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("WebSocket signaling server received shutdown signal");
                        break;
                    }
                }
            }

            registry.clear().await;
            info!("WebSocket signaling server accept loop exited");
        });

        Ok(WebSocketServerHandle {
            local_addr,
            shutdown_tx,
            task: Some(task),
        })
    }
}

/// Handle for controlling the WebSocket server
pub struct WebSocketServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// ws:// URL clients connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Stop accepting connections and tear down every live session
    pub async fn shutdown(mut self) {
        info!("Sending shutdown signal to WebSocket server");
        let _ = self.shutdown_tx.send(());

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("WebSocket server task failed: {}", e);
            }
        }
    }
}
