//! Client peer connections

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use crate::leg::StreamLeg;
use crate::{Error, Result};

/// ICE progress reported by a peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local candidate line; `None` marks end-of-candidates
    IceCandidate(Option<String>),
    /// Local gathering reached completion
    GatheringComplete,
}

/// One client-side peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Take the ICE event stream. Only the first call succeeds.
    fn take_events(&self) -> Result<mpsc::UnboundedReceiver<PeerEvent>>;

    /// Create an offer, apply it locally and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply the remote answer
    async fn apply_answer(&self, sdp: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// [`PeerLink`] backed by a webrtc-rs peer connection
pub struct RtcPeerLink {
    leg: StreamLeg,
    peer: Arc<RTCPeerConnection>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl RtcPeerLink {
    /// Create a peer connection for `leg` sending `tracks`
    pub async fn new(
        leg: StreamLeg,
        stun_servers: &[String],
        tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> Result<Self> {
        let mut codecs = CodecRegistry::default();
        codecs
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;
        let interceptors = register_default_interceptors(Registry::new(), &mut codecs)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;
        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(interceptors)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: stun_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::WebRtcError(format!("Failed to create peer connection: {}", e)))?,
        );

        for track in tracks {
            peer.add_track(track)
                .await
                .map_err(|e| Error::WebRtcError(format!("Failed to add {} track: {}", leg, e)))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let candidate_tx = tx.clone();
        peer.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let line = candidate
                    .and_then(|c| c.to_json().ok())
                    .map(|init| init.candidate);
                let _ = tx.send(PeerEvent::IceCandidate(line));
            })
        }));

        peer.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!(leg = %leg, "ICE gathering state: {}", state);
                if state == RTCIceGathererState::Complete {
                    let _ = tx.send(PeerEvent::GatheringComplete);
                }
            })
        }));

        info!(leg = %leg, "peer link created");

        Ok(Self {
            leg,
            peer,
            events: Mutex::new(Some(rx)),
        })
    }

    pub fn leg(&self) -> StreamLeg {
        self.leg
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    fn take_events(&self) -> Result<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events
            .lock()
            .take()
            .ok_or_else(|| Error::SignalingError(format!("{} events already taken", self.leg)))
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer
            .create_offer(None)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to create offer: {}", e)))?;
        let sdp = offer.sdp.clone();
        self.peer
            .set_local_description(offer)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to set local offer: {}", e)))?;
        Ok(sdp)
    }

    async fn apply_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| Error::NegotiationError(format!("Invalid answer: {}", e)))?;
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to apply answer: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.peer.close().await.map_err(Error::from)
    }
}
