//! WebSocket connection handler
//!
//! One connection is one session: the handler opens a [`ServerSession`],
//! forwards outbound server events to the socket and feeds inbound text
//! frames to the dispatcher in arrival order.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{Message, Result as WsResult},
};
use tracing::{debug, error, info, warn};

use crate::session::{ServerSession, SessionRegistry};
use crate::signaling::protocol::ServerMessage;

/// Query parameter carrying the opaque identity claim
pub const IDENTITY_PARAM: &str = "identity";

/// Extract `identity=<value>` from a request query string
pub fn identity_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == IDENTITY_PARAM)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Handle a single WebSocket connection
pub async fn handle_connection(
    stream: TcpStream,
    registry: Arc<SessionRegistry>,
    outbound_queue: usize,
) -> WsResult<()> {
    let addr = stream.peer_addr()?;
    debug!("New WebSocket connection from: {}", addr);

    let mut identity = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        identity = identity_from_query(req.uri().query());
        Ok(resp)
    })
    .await?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let ws_tx = Arc::new(Mutex::new(ws_tx));

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(outbound_queue);

    // Task to forward server events to the WebSocket
    let ws_tx_clone = Arc::clone(&ws_tx);
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode {}: {}", msg.action(), e);
                    continue;
                }
            };
            let mut ws_tx = ws_tx_clone.lock().await;
            if let Err(e) = ws_tx.send(Message::Text(json)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let session = match ServerSession::open(Arc::clone(&registry), identity, tx.clone()).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Refusing WebSocket connection from {}: {}", addr, e);
            let _ = tx.send(ServerMessage::from_error(&e, None)).await;
            drop(tx);
            // forward task drains the envelope, then exits
            let _ = forward_task.await;
            let _ = ws_tx.lock().await.send(Message::Close(None)).await;
            return Ok(());
        }
    };
    drop(tx);

    info!(session_id = %session.session_id(), "session opened for {}", addr);

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_text(&text).await,
            Ok(Message::Close(_)) => {
                info!(session_id = %session.session_id(), "WebSocket connection closed by client");
                break;
            }
            Ok(Message::Ping(data)) => {
                let mut ws_tx = ws_tx.lock().await;
                let _ = ws_tx.send(Message::Pong(data)).await;
            }
            Err(e) => {
                warn!(session_id = %session.session_id(), "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    let session_id = session.session_id().to_string();
    session.close().await;
    forward_task.abort();
    info!(session_id = %session_id, "session closed");

    Ok(())
}
