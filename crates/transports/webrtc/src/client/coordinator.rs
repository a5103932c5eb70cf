//! Client mirror of the dual-leg readiness gate
//!
//! Owns one [`PeerLink`] per leg, pushes offers and ICE progress through a
//! [`SignalSink`] and raises a single "ready to record" notification once
//! both legs have applied their answers.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::peer_link::{PeerEvent, PeerLink};
use crate::leg::{LegMap, StreamLeg};
use crate::signaling::protocol::ServerMessage;
use crate::signaling::SignalingLink;
use crate::{Error, Result};

/// Outbound half of the signaling channel, as seen by the coordinator
pub trait SignalSink: Send + Sync {
    fn send_offer(&self, leg: StreamLeg, sdp: &str) -> Result<()>;

    /// Send a textual candidate; returns `false` when it was skipped
    fn send_candidate_line(&self, leg: StreamLeg, line: &str) -> Result<bool>;

    fn send_gathering_finished(&self, leg: StreamLeg) -> Result<()>;
}

impl SignalSink for SignalingLink {
    fn send_offer(&self, leg: StreamLeg, sdp: &str) -> Result<()> {
        SignalingLink::send_offer(self, leg, sdp)
    }

    fn send_candidate_line(&self, leg: StreamLeg, line: &str) -> Result<bool> {
        SignalingLink::send_candidate_line(self, leg, line)
    }

    fn send_gathering_finished(&self, leg: StreamLeg) -> Result<()> {
        SignalingLink::send_gathering_finished(self, leg)
    }
}

type ReadyCallback = Box<dyn FnOnce() + Send>;

pub struct SessionCoordinator<P: PeerLink, S: SignalSink> {
    links: LegMap<Arc<P>>,
    sink: Arc<S>,
    ready: Mutex<LegMap<bool>>,
    gathering_sent: LegMap<AtomicBool>,
    on_ready: Mutex<Option<ReadyCallback>>,
    ready_tx: watch::Sender<bool>,
}

impl<P: PeerLink + 'static, S: SignalSink + 'static> SessionCoordinator<P, S> {
    pub fn new(links: LegMap<P>, sink: Arc<S>) -> Arc<Self> {
        let (ready_tx, _) = watch::channel(false);
        Arc::new(Self {
            links: links.map(|_, link| Arc::new(link)),
            sink,
            ready: Mutex::new(LegMap::default()),
            gathering_sent: LegMap::default(),
            on_ready: Mutex::new(None),
            ready_tx,
        })
    }

    pub fn link(&self, leg: StreamLeg) -> &Arc<P> {
        &self.links[leg]
    }

    /// Register the "remote ready to record" callback. It runs at most once.
    pub fn on_ready_to_record(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_ready.lock() = Some(Box::new(callback));
    }

    pub fn is_ready_to_record(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Resolve once both legs have applied their answers
    pub async fn wait_ready_to_record(&self) -> Result<()> {
        let mut rx = self.ready_tx.subscribe();
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| Error::SignalingError("coordinator dropped".to_string()))
    }

    /// Subscribe to ICE events on both links, then create and send both offers
    pub async fn negotiate(self: &Arc<Self>) -> Result<()> {
        for leg in StreamLeg::ALL {
            let mut events = self.links[leg].take_events()?;
            let this = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if let Err(e) = this.handle_peer_event(leg, event) {
                        warn!(leg = %leg, "failed to forward ICE event: {}", e);
                    }
                }
                debug!(leg = %leg, "ICE event stream ended");
            });
        }

        for leg in StreamLeg::ALL {
            let sdp = self.links[leg].create_offer().await?;
            self.sink.send_offer(leg, &sdp)?;
            info!(leg = %leg, "offer sent");
        }
        Ok(())
    }

    /// Forward one local ICE event for `leg`
    pub fn handle_peer_event(&self, leg: StreamLeg, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::IceCandidate(Some(line)) => {
                self.sink.send_candidate_line(leg, &line)?;
            }
            PeerEvent::IceCandidate(None) => {}
            PeerEvent::GatheringComplete => {
                if !self.gathering_sent[leg].swap(true, Ordering::SeqCst) {
                    self.sink.send_gathering_finished(leg)?;
                    debug!(leg = %leg, "gathering finished sent");
                }
            }
        }
        Ok(())
    }

    /// Apply a remote answer for `leg`. A redelivered answer for a leg that
    /// is already ready is ignored.
    pub async fn on_remote_answer(&self, leg: StreamLeg, sdp: &str) -> Result<()> {
        if self.ready.lock()[leg] {
            warn!(leg = %leg, "answer redelivered for ready leg, ignoring");
            return Ok(());
        }

        self.links[leg].apply_answer(sdp).await?;

        let all_ready = {
            let mut ready = self.ready.lock();
            ready[leg] = true;
            ready.all(|r| *r)
        };
        info!(leg = %leg, "answer applied");

        if all_ready && !self.ready_tx.send_replace(true) {
            info!("remote ready to record");
            let callback = self.on_ready.lock().take();
            if let Some(callback) = callback {
                callback();
            }
        }
        Ok(())
    }

    /// Route a server event. Only answers affect coordinator state.
    pub async fn handle_server_message(&self, msg: &ServerMessage) -> Result<()> {
        match msg {
            ServerMessage::ServerSdpInfo {
                stream_name,
                sdp_payload,
            } => self.on_remote_answer(*stream_name, sdp_payload).await,
            other => {
                debug!("coordinator ignoring {}", other.action());
                Ok(())
            }
        }
    }

    pub async fn close(&self) {
        for (leg, link) in self.links.iter() {
            if let Err(e) = link.close().await {
                warn!(leg = %leg, "failed to close peer link: {}", e);
            }
        }
    }
}
