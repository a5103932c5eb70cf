//! WebSocket signaling client (capture side)

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::protocol::{CandidateData, ClientMessage, ServerMessage};
use crate::leg::StreamLeg;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Ready(String),
    Closed,
}

/// Duplex signaling channel to the recording server.
///
/// Outbound messages are queued to a sender task; inbound server events
/// are decoded by a receiver task and exposed through [`SignalingLink::recv`].
pub struct SignalingLink {
    tx: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<LinkState>,
    events: Mutex<mpsc::UnboundedReceiver<ServerMessage>>,
}

impl SignalingLink {
    /// Connect to the signaling server
    ///
    /// # Arguments
    ///
    /// * `url` - WebSocket signaling server URL (ws:// or wss://)
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, state_tx, events_tx));

        Ok(Self {
            tx,
            state: state_rx,
            events: Mutex::new(events_rx),
        })
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        state: watch::Sender<LinkState>,
        events: mpsc::UnboundedSender<ServerMessage>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(msg) => {
                        if let ServerMessage::SessionCreated { session_id } = &msg {
                            info!(session_id = %session_id, "session ready");
                            state.send_replace(LinkState::Ready(session_id.clone()));
                        }
                        let _ = events.send(msg);
                    }
                    Err(e) => warn!("Failed to decode server message: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        state.send_replace(LinkState::Closed);
        debug!("Receiver task terminated");
    }

    /// Session id, once the server has announced it
    pub fn session_id(&self) -> Option<String> {
        match &*self.state.borrow() {
            LinkState::Ready(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// Wait for `SESSION_CREATED`. Fails if the connection closes first.
    pub async fn wait_until_session_ready(&self) -> Result<String> {
        let mut state = self.state.clone();
        let ready = state
            .wait_for(|s| !matches!(s, LinkState::Connecting))
            .await
            .map_err(|_| Error::SignalingError("signaling link dropped".to_string()))?;
        match &*ready {
            LinkState::Ready(id) => Ok(id.clone()),
            _ => Err(Error::SignalingError(
                "connection closed before session was created".to_string(),
            )),
        }
    }

    /// Next server event; `None` once the connection is gone
    pub async fn recv(&self) -> Option<ServerMessage> {
        self.events.lock().await.recv().await
    }

    pub fn send(&self, msg: &ClientMessage) -> Result<()> {
        let json = msg.to_json()?;
        debug!("Sending {}", msg.action());
        self.tx
            .send(Message::Text(json))
            .map_err(|_| Error::SignalingError("signaling link closed".to_string()))
    }

    pub fn send_offer(&self, leg: StreamLeg, sdp: &str) -> Result<()> {
        self.send(&ClientMessage::ClientSdpInfo {
            stream_name: leg.to_string(),
            sdp_payload: sdp.to_string(),
        })
    }

    pub fn send_candidate(&self, leg: StreamLeg, candidate: CandidateData) -> Result<()> {
        self.send(&ClientMessage::IceCandidate {
            stream_name: leg.to_string(),
            candidate_data: candidate,
        })
    }

    /// Parse and send a textual candidate. Empty (end-of-candidates) lines
    /// are skipped and reported as `Ok(false)`.
    pub fn send_candidate_line(&self, leg: StreamLeg, line: &str) -> Result<bool> {
        if line.trim().is_empty() {
            return Ok(false);
        }
        self.send_candidate(leg, CandidateData::parse(line)?)?;
        Ok(true)
    }

    pub fn send_gathering_finished(&self, leg: StreamLeg) -> Result<()> {
        self.send(&ClientMessage::IceGatheringFinished {
            stream_name: leg.to_string(),
        })
    }

    pub fn start_recording(&self) -> Result<()> {
        self.send(&ClientMessage::StartRecording)
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.send(&ClientMessage::StopRecording)
    }

    /// Close the connection; the server tears the session down
    pub fn close(&self) -> Result<()> {
        self.tx
            .send(Message::Close(None))
            .map_err(|_| Error::SignalingError("signaling link closed".to_string()))
    }
}
