//! webrtc-rs backed Media Engine
//!
//! Each leg gets its own peer connection restricted to the fixed
//! capability set. Remote tracks are drained into a broadcast channel of
//! marshaled RTP packets; recorders subscribe to it and write rtpdump files.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTCRtpHeaderExtensionCapability, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::util::Marshal;

use super::capabilities::KindCapabilities;
use super::rtpdump::RtpDumpWriter;
use super::{
    Capabilities, FlushHandle, IncomingStream, MediaEngine, MediaTransport, Recorder,
    SessionContext,
};
use crate::config::RtcEngineConfig;
use crate::leg::StreamLeg;
use crate::signaling::protocol::CandidateData;
use crate::signaling::sdp::Offer;
use crate::{Error, Result};

const PACKET_QUEUE: usize = 1024;

/// Media Engine using webrtc-rs peer connections
pub struct RtcMediaEngine {
    config: RtcEngineConfig,
}

impl RtcMediaEngine {
    pub fn new(config: RtcEngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn build_api(&self, capabilities: &Capabilities) -> Result<API> {
        let mut codecs = CodecRegistry::default();
        register_kind(&mut codecs, &capabilities.audio, RTPCodecType::Audio)?;
        register_kind(&mut codecs, &capabilities.video, RTPCodecType::Video)?;

        let interceptors = register_default_interceptors(Registry::new(), &mut codecs)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let mut settings = SettingEngine::default();
        let ephemeral = EphemeralUDP::new(self.config.port_min, self.config.port_max)
            .map_err(|e| Error::InvalidConfig(format!("Invalid UDP port range: {}", e)))?;
        settings.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
        settings.set_nat_1to1_ips(
            vec![self.config.public_ip.to_string()],
            RTCIceCandidateType::Host,
        );

        Ok(APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(interceptors)
            .with_setting_engine(settings)
            .build())
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    fn source_addr(&self) -> SocketAddrV4 {
        let ip = match self.config.public_ip {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        SocketAddrV4::new(ip, self.config.port_min)
    }
}

fn register_kind(
    codecs: &mut CodecRegistry,
    kind: &KindCapabilities,
    typ: RTPCodecType,
) -> Result<()> {
    let feedback: Vec<RTCPFeedback> = kind
        .rtcp_feedback
        .iter()
        .map(|fb| RTCPFeedback {
            typ: fb.kind.clone(),
            parameter: fb.parameter.clone(),
        })
        .collect();

    for codec in &kind.codecs {
        codecs
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: codec.mime_type.clone(),
                        clock_rate: codec.clock_rate,
                        channels: codec.channels,
                        sdp_fmtp_line: codec.fmtp.clone(),
                        rtcp_feedback: feedback.clone(),
                    },
                    payload_type: codec.payload_type,
                    ..Default::default()
                },
                typ,
            )
            .map_err(|e| Error::WebRtcError(format!("Failed to register {}: {}", codec.mime_type, e)))?;

        if kind.rtx {
            codecs
                .register_codec(
                    RTCRtpCodecParameters {
                        capability: RTCRtpCodecCapability {
                            mime_type: "video/rtx".to_string(),
                            clock_rate: codec.clock_rate,
                            channels: 0,
                            sdp_fmtp_line: format!("apt={}", codec.payload_type),
                            rtcp_feedback: vec![],
                        },
                        payload_type: codec.payload_type + 1,
                        ..Default::default()
                    },
                    typ,
                )
                .map_err(|e| Error::WebRtcError(format!("Failed to register rtx: {}", e)))?;
        }
    }

    for uri in &kind.header_extensions {
        codecs
            .register_header_extension(
                RTCRtpHeaderExtensionCapability { uri: uri.clone() },
                typ,
                None,
            )
            .map_err(|e| Error::WebRtcError(format!("Failed to register extension {}: {}", uri, e)))?;
    }

    Ok(())
}

#[async_trait]
impl MediaEngine for RtcMediaEngine {
    async fn create_transport(
        &self,
        ctx: &SessionContext,
        leg: StreamLeg,
        offer: &Offer,
        candidates: &[CandidateData],
        capabilities: &Capabilities,
    ) -> Result<Box<dyn MediaTransport>> {
        let api = self.build_api(capabilities)?;
        let peer = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| Error::ResourceError(format!("Failed to create peer connection: {}", e)))?,
        );

        let session_id = ctx.session_id.clone();
        peer.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let session_id = session_id.clone();
            Box::pin(async move {
                debug!(session_id = %session_id, leg = %leg, "peer connection state: {}", s);
            })
        }));

        let (packets, _) = broadcast::channel::<Bytes>(PACKET_QUEUE);
        let track_packets = packets.clone();
        let session_id = ctx.session_id.clone();
        peer.on_track(Box::new(move |track, _receiver, _transceiver| {
            let packets = track_packets.clone();
            let session_id = session_id.clone();
            Box::pin(async move {
                info!(
                    session_id = %session_id,
                    leg = %leg,
                    "remote track: kind={} ssrc={}",
                    track.kind(),
                    track.ssrc()
                );
                tokio::spawn(async move {
                    loop {
                        let packet = match track.read_rtp().await {
                            Ok((packet, _)) => packet,
                            Err(e) => {
                                debug!(session_id = %session_id, leg = %leg, "track ended: {}", e);
                                break;
                            }
                        };
                        match packet.marshal() {
                            Ok(bytes) => {
                                // no subscribers until a recorder starts
                                let _ = packets.send(bytes);
                            }
                            Err(e) => warn!("Failed to marshal RTP packet: {}", e),
                        }
                    }
                });
            })
        }));

        let remote = RTCSessionDescription::offer(offer.sdp().to_string())
            .map_err(|e| Error::NegotiationError(format!("Invalid offer for {}: {}", leg, e)))?;
        peer.set_remote_description(remote)
            .await
            .map_err(|e| Error::ResourceError(format!("Failed to apply offer for {}: {}", leg, e)))?;

        for candidate in candidates {
            let init = RTCIceCandidateInit {
                candidate: candidate.to_candidate_line(),
                sdp_mid: offer.first_mid().map(str::to_string),
                sdp_mline_index: Some(0),
                username_fragment: None,
            };
            if let Err(e) = peer.add_ice_candidate(init).await {
                warn!(session_id = %ctx.session_id, leg = %leg, "Skipping remote candidate: {}", e);
            }
        }

        let answer = peer
            .create_answer(None)
            .await
            .map_err(|e| Error::ResourceError(format!("Failed to create answer for {}: {}", leg, e)))?;
        let mut gathering = peer.gathering_complete_promise().await;
        peer.set_local_description(answer)
            .await
            .map_err(|e| Error::ResourceError(format!("Failed to set local answer for {}: {}", leg, e)))?;

        if tokio::time::timeout(self.config.gathering_timeout(), gathering.recv())
            .await
            .is_err()
        {
            warn!(session_id = %ctx.session_id, leg = %leg, "ICE gathering timed out, answering with partial candidates");
        }

        let answer_sdp = peer
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or_else(|| Error::ResourceError(format!("No local description for {}", leg)))?;

        info!(session_id = %ctx.session_id, leg = %leg, "transport created");

        Ok(Box::new(RtcTransport {
            leg,
            peer,
            answer_sdp,
            packets,
            source: self.source_addr(),
        }))
    }
}

struct RtcTransport {
    leg: StreamLeg,
    peer: Arc<RTCPeerConnection>,
    answer_sdp: String,
    packets: broadcast::Sender<Bytes>,
    source: SocketAddrV4,
}

#[async_trait]
impl MediaTransport for RtcTransport {
    fn answer_sdp(&self) -> &str {
        &self.answer_sdp
    }

    async fn create_incoming_stream(&self) -> Result<Box<dyn IncomingStream>> {
        Ok(Box::new(RtcIncomingStream {
            packets: self.packets.clone(),
            source: self.source,
            released: Arc::new(AtomicBool::new(false)),
        }))
    }

    async fn close(&self) -> Result<()> {
        debug!(leg = %self.leg, "closing transport");
        self.peer
            .close()
            .await
            .map_err(|e| Error::ResourceError(format!("Failed to close transport: {}", e)))
    }
}

struct RtcIncomingStream {
    packets: broadcast::Sender<Bytes>,
    source: SocketAddrV4,
    released: Arc<AtomicBool>,
}

#[async_trait]
impl IncomingStream for RtcIncomingStream {
    async fn create_recorder(&self, path: &Path) -> Result<Box<dyn Recorder>> {
        if self.released.load(Ordering::SeqCst) {
            return Err(Error::ResourceError(
                "incoming stream already released".to_string(),
            ));
        }
        Ok(Box::new(RtpDumpRecorder {
            path: path.to_path_buf(),
            packets: self.packets.clone(),
            source: self.source,
            stop_tx: None,
            done_rx: None,
        }))
    }

    async fn release(&self) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records one incoming stream to an rtpdump file
struct RtpDumpRecorder {
    path: PathBuf,
    packets: broadcast::Sender<Bytes>,
    source: SocketAddrV4,
    stop_tx: Option<oneshot::Sender<()>>,
    done_rx: Option<oneshot::Receiver<()>>,
}

#[async_trait]
impl Recorder for RtpDumpRecorder {
    async fn start(&mut self) -> Result<()> {
        if self.stop_tx.is_some() {
            return Ok(());
        }

        let mut writer = RtpDumpWriter::create(&self.path, self.source).await?;
        let mut rx = self.packets.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let path = self.path.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    packet = rx.recv() => match packet {
                        Ok(bytes) => {
                            if let Err(e) = writer.write_packet(&bytes).await {
                                warn!("Recorder write failed for {}: {}", path.display(), e);
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Recorder for {} dropped {} packets", path.display(), n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = &mut stop_rx => {
                        drain_queued(&mut rx, &mut writer, &path).await;
                        break;
                    }
                }
            }

            match writer.finish().await {
                Ok(count) => info!("Recorder finished {} ({} packets)", path.display(), count),
                Err(e) => warn!("Recorder failed to finalize {}: {}", path.display(), e),
            }
            let _ = done_tx.send(());
        });

        self.stop_tx = Some(stop_tx);
        self.done_rx = Some(done_rx);
        Ok(())
    }

    async fn stop(&mut self) -> Result<Option<FlushHandle>> {
        match self.stop_tx.take() {
            Some(stop_tx) => {
                // writer task may already have exited on a closed channel
                let _ = stop_tx.send(());
                Ok(self.done_rx.take())
            }
            None => Ok(None),
        }
    }
}

/// Write whatever the stream queued before stop was requested
async fn drain_queued(rx: &mut broadcast::Receiver<Bytes>, writer: &mut RtpDumpWriter, path: &Path) {
    loop {
        match rx.try_recv() {
            Ok(bytes) => {
                if let Err(e) = writer.write_packet(&bytes).await {
                    warn!("Recorder write failed for {}: {}", path.display(), e);
                    return;
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!("Recorder for {} dropped {} packets", path.display(), n);
            }
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                return;
            }
        }
    }
}
