//! Configuration types for the signaling server and recording engine

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the per-session NegotiationEngine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory recorder output files are written to (default: ./recordings)
    pub recordings_dir: PathBuf,

    /// Wait after stop before the manifest is announced (default: 1000ms).
    /// Upper bound when the recorders provide a flush signal.
    pub settle_delay_ms: u64,

    /// Extension appended to recorder output files (default: rtpdump)
    pub file_extension: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("./recordings"),
            settle_delay_ms: 1000,
            file_extension: "rtpdump".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recordings_dir = dir.into();
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_file_extension(mut self, ext: impl Into<String>) -> Self {
        self.file_extension = ext.into();
        self
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.recordings_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "recordings_dir must not be empty".to_string(),
            ));
        }

        if self.settle_delay_ms > 60_000 {
            return Err(Error::InvalidConfig(format!(
                "settle_delay_ms must be at most 60000, got {}",
                self.settle_delay_ms
            )));
        }

        if self.file_extension.is_empty()
            || !self.file_extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::InvalidConfig(format!(
                "file_extension must be non-empty alphanumeric, got {:?}",
                self.file_extension
            )));
        }

        Ok(())
    }
}

/// Configuration for the webrtc-rs backed Media Engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcEngineConfig {
    /// First UDP port handed out for ICE (default: 9002)
    pub port_min: u16,

    /// Last UDP port handed out for ICE (default: 9100)
    pub port_max: u16,

    /// Address announced in host candidates via NAT 1:1 mapping (default: 127.0.0.1)
    pub public_ip: IpAddr,

    /// STUN server URLs (may be empty for LAN-only deployments)
    pub stun_servers: Vec<String>,

    /// Upper bound on waiting for local ICE gathering (default: 5000ms)
    pub gathering_timeout_ms: u64,
}

impl Default for RtcEngineConfig {
    fn default() -> Self {
        Self {
            port_min: 9002,
            port_max: 9100,
            public_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            stun_servers: Vec::new(),
            gathering_timeout_ms: 5000,
        }
    }
}

impl RtcEngineConfig {
    pub fn with_port_range(mut self, port_min: u16, port_max: u16) -> Self {
        self.port_min = port_min;
        self.port_max = port_max;
        self
    }

    pub fn with_public_ip(mut self, ip: IpAddr) -> Self {
        self.public_ip = ip;
        self
    }

    pub fn with_stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.port_min == 0 || self.port_min > self.port_max {
            return Err(Error::InvalidConfig(format!(
                "invalid RTC port range {}-{}",
                self.port_min, self.port_max
            )));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        if self.gathering_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "gathering_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for the websocket signaling server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingServerConfig {
    /// Address to bind (default: 0.0.0.0:9001). Port 0 picks a free port.
    pub bind_addr: SocketAddr,

    /// Outbound message queue depth per connection (default: 128)
    pub outbound_queue: usize,
}

impl Default for SignalingServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9001),
            outbound_queue: 128,
        }
    }
}

impl SignalingServerConfig {
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_outbound_queue(mut self, depth: usize) -> Self {
        self.outbound_queue = depth;
        self
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.outbound_queue == 0 {
            return Err(Error::InvalidConfig(
                "outbound_queue must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
