//! Offer validation on top of the webrtc-rs SDP parser

use std::io::Cursor;

use webrtc::sdp::SessionDescription;

use crate::{Error, Result};

/// One `m=` section of an offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    /// Media kind (`audio`, `video`, `application`)
    pub kind: String,
    /// Value of `a=mid`, if present
    pub mid: Option<String>,
}

/// A parsed and validated remote offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    sdp: String,
    media: Vec<MediaSection>,
}

impl Offer {
    /// Parse an offer. Rejects anything that is not a session description
    /// with at least one media section.
    pub fn parse(sdp: &str) -> Result<Self> {
        if sdp.trim().is_empty() {
            return Err(Error::NegotiationError("empty SDP offer".to_string()));
        }

        let parsed = SessionDescription::unmarshal(&mut Cursor::new(sdp.as_bytes()))
            .map_err(|e| Error::NegotiationError(format!("malformed SDP offer: {}", e)))?;

        if parsed.media_descriptions.is_empty() {
            return Err(Error::NegotiationError(
                "SDP offer has no media sections".to_string(),
            ));
        }

        let media = parsed
            .media_descriptions
            .iter()
            .map(|md| MediaSection {
                kind: md.media_name.media.clone(),
                mid: md
                    .attributes
                    .iter()
                    .find(|a| a.key == "mid")
                    .and_then(|a| a.value.clone()),
            })
            .collect();

        Ok(Self {
            sdp: sdp.to_string(),
            media,
        })
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    pub fn media(&self) -> &[MediaSection] {
        &self.media
    }

    /// mid candidates are attached to when the client does not name one
    pub fn first_mid(&self) -> Option<&str> {
        self.media.iter().find_map(|m| m.mid.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 98\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:98 VP9/90000\r\n";

    #[test]
    fn test_parse_valid_offer() {
        let offer = Offer::parse(OFFER).unwrap();
        assert_eq!(offer.media().len(), 2);
        assert_eq!(offer.media()[0].kind, "audio");
        assert_eq!(offer.media()[1].kind, "video");
        assert_eq!(offer.first_mid(), Some("0"));
        assert_eq!(offer.sdp(), OFFER);
    }

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            Offer::parse("hello"),
            Err(Error::NegotiationError(_))
        ));
        assert!(matches!(Offer::parse("   "), Err(Error::NegotiationError(_))));
    }

    #[test]
    fn test_reject_offer_without_media() {
        let sdp = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
        assert!(matches!(Offer::parse(sdp), Err(Error::NegotiationError(_))));
    }
}
