//! Fixed codec and RTP feature set offered to capture clients

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{Error, Result};

pub const TRANSPORT_WIDE_CC_URI: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
pub const SSRC_AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";

/// One codec the server accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSpec {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub fmtp: String,
    pub payload_type: u8,
}

/// RTCP feedback mechanism (`a=rtcp-fb`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    pub kind: String,
    pub parameter: String,
}

impl RtcpFeedback {
    fn new(kind: &str, parameter: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

/// Capabilities for one media kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCapabilities {
    pub codecs: Vec<CodecSpec>,
    /// Register an RTX stream (payload type + 1) for every codec
    pub rtx: bool,
    pub rtcp_feedback: Vec<RtcpFeedback>,
    pub header_extensions: Vec<String>,
}

/// Capability set used for every answer.
///
/// Built once at startup and shared by reference; never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub audio: KindCapabilities,
    pub video: KindCapabilities,
}

impl Capabilities {
    /// opus audio; vp9 and h264 (packetization-mode=1) video with
    /// retransmission and transport-wide congestion control feedback
    pub fn recording_default() -> Self {
        let audio = KindCapabilities {
            codecs: vec![CodecSpec {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                fmtp: "minptime=10;useinbandfec=1".to_string(),
                payload_type: 111,
            }],
            rtx: false,
            rtcp_feedback: vec![RtcpFeedback::new("transport-cc", "")],
            header_extensions: vec![
                SSRC_AUDIO_LEVEL_URI.to_string(),
                TRANSPORT_WIDE_CC_URI.to_string(),
            ],
        };

        let video = KindCapabilities {
            codecs: vec![
                CodecSpec {
                    mime_type: "video/VP9".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    fmtp: "profile-id=0".to_string(),
                    payload_type: 98,
                },
                CodecSpec {
                    mime_type: "video/H264".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    fmtp: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string(),
                    payload_type: 102,
                },
            ],
            rtx: true,
            rtcp_feedback: vec![
                RtcpFeedback::new("transport-cc", ""),
                RtcpFeedback::new("ccm", "fir"),
                RtcpFeedback::new("nack", ""),
                RtcpFeedback::new("nack", "pli"),
            ],
            header_extensions: vec![TRANSPORT_WIDE_CC_URI.to_string()],
        };

        Self { audio, video }
    }

    /// Check that payload types (including RTX) do not collide
    pub fn validate(&self) -> Result<()> {
        let mut used = HashSet::new();
        for kind in [&self.audio, &self.video] {
            for codec in &kind.codecs {
                let mut pts = vec![codec.payload_type];
                if kind.rtx {
                    pts.push(codec.payload_type.wrapping_add(1));
                }
                for pt in pts {
                    if !(96..=127).contains(&pt) {
                        return Err(Error::InvalidConfig(format!(
                            "payload type {} for {} is outside the dynamic range",
                            pt, codec.mime_type
                        )));
                    }
                    if !used.insert(pt) {
                        return Err(Error::InvalidConfig(format!(
                            "payload type {} used more than once",
                            pt
                        )));
                    }
                }
            }
        }
        if self.audio.codecs.is_empty() && self.video.codecs.is_empty() {
            return Err(Error::InvalidConfig("no codecs configured".to_string()));
        }
        Ok(())
    }
}
