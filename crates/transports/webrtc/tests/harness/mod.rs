//! Test harness for session coordination
//!
//! - `MockMediaEngine`: in-memory Media Engine with counters and failure
//!   injection
//! - `TestSession`: a `ServerSession` driven with raw JSON frames, with the
//!   outbound channel exposed for assertions
//! - SDP/candidate fixtures

#![allow(dead_code)]

pub mod mock_engine;
pub mod test_session;

pub use mock_engine::{FlushMode, MockMediaEngine, MockStats};
pub use test_session::TestSession;

use std::time::Duration;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Engine error: {0}")]
    Engine(#[from] castrec_webrtc::Error),
}

/// Initialize tracing for tests (safe to call from every test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,webrtc=warn")
        .with_test_writer()
        .try_init();
}

/// Default wait for an expected server event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal but complete offer accepted by the SDP parser
pub fn offer_sdp(tag: &str) -> String {
    format!(
        "v=0\r\n\
o=- {tag} 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 98\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:98 VP9/90000\r\n",
        tag = tag.bytes().map(u64::from).sum::<u64>()
    )
}

pub fn candidate_line(n: u16) -> String {
    format!(
        "candidate:{n} 1 udp 2122260223 192.168.1.{n} {port} typ host generation 0",
        n = n,
        port = 50000 + n
    )
}

pub fn sdp_info_json(stream: &str, sdp: &str) -> String {
    serde_json::json!({
        "action": "CLIENT_SDP_INFO",
        "streamName": stream,
        "sdpPayload": sdp,
    })
    .to_string()
}

pub fn candidate_json(stream: &str, n: u16) -> String {
    let data = castrec_webrtc::CandidateData::parse(&candidate_line(n)).expect("fixture candidate");
    serde_json::json!({
        "action": "ICE_CANDIDATE",
        "streamName": stream,
        "candidateData": data,
    })
    .to_string()
}

pub fn gathering_finished_json(stream: &str) -> String {
    serde_json::json!({
        "action": "ICE_GATHERING_FINISHED",
        "streamName": stream,
    })
    .to_string()
}

pub const START_JSON: &str = r#"{"action":"START_RECORDING"}"#;
pub const STOP_JSON: &str = r#"{"action":"STOP_RECORDING"}"#;
