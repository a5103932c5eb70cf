//! Action-discriminated JSON signaling protocol
//!
//! Every message is a JSON object carrying an `action` field. Client and
//! server directions use separate enums so the type system rules out
//! sending a server event from the client and vice versa.

use serde::{Deserialize, Serialize};

use crate::leg::{LegMap, StreamLeg};
use crate::{Error, Result};

/// Error envelope codes
pub mod error_codes {
    /// Unknown action, unknown leg or unparseable message
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";

    /// Offer for a leg was malformed; the leg awaits a corrected offer
    pub const NEGOTIATION_ERROR: &str = "NEGOTIATION_ERROR";

    /// Media Engine failed; the session is no longer usable
    pub const RESOURCE_ERROR: &str = "RESOURCE_ERROR";

    /// Server refused the connection because it is at capacity
    pub const SESSION_LIMIT: &str = "SESSION_LIMIT";
}

/// Messages sent by the capture client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action")]
pub enum ClientMessage {
    /// Offer for one leg
    #[serde(rename = "CLIENT_SDP_INFO", rename_all = "camelCase")]
    ClientSdpInfo {
        stream_name: String,
        sdp_payload: String,
    },

    /// One trickled ICE candidate for one leg
    #[serde(rename = "ICE_CANDIDATE", rename_all = "camelCase")]
    IceCandidate {
        stream_name: String,
        candidate_data: CandidateData,
    },

    /// Local ICE gathering for one leg has completed
    #[serde(rename = "ICE_GATHERING_FINISHED", rename_all = "camelCase")]
    IceGatheringFinished { stream_name: String },

    #[serde(rename = "START_RECORDING")]
    StartRecording,

    #[serde(rename = "STOP_RECORDING")]
    StopRecording,
}

const CLIENT_ACTIONS: &[&str] = &[
    "CLIENT_SDP_INFO",
    "ICE_CANDIDATE",
    "ICE_GATHERING_FINISHED",
    "START_RECORDING",
    "STOP_RECORDING",
];

impl ClientMessage {
    /// Wire value of the `action` discriminator
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::ClientSdpInfo { .. } => "CLIENT_SDP_INFO",
            ClientMessage::IceCandidate { .. } => "ICE_CANDIDATE",
            ClientMessage::IceGatheringFinished { .. } => "ICE_GATHERING_FINISHED",
            ClientMessage::StartRecording => "START_RECORDING",
            ClientMessage::StopRecording => "STOP_RECORDING",
        }
    }

    /// Leg name carried by the message, if any
    pub fn stream_name(&self) -> Option<&str> {
        match self {
            ClientMessage::ClientSdpInfo { stream_name, .. }
            | ClientMessage::IceCandidate { stream_name, .. }
            | ClientMessage::IceGatheringFinished { stream_name } => Some(stream_name),
            ClientMessage::StartRecording | ClientMessage::StopRecording => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize client message: {}", e))
        })
    }

    /// Decode a client message.
    ///
    /// An unknown or missing `action` is a [`Error::ProtocolError`]; a known
    /// action with a bad payload is a [`Error::SerializationError`].
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
            Error::ProtocolError(format!("Failed to parse client message: {}", e))
        })?;
        let action = value
            .get("action")
            .and_then(|a| a.as_str())
            .ok_or_else(|| Error::ProtocolError("message has no action".to_string()))?;
        if !CLIENT_ACTIONS.contains(&action) {
            return Err(Error::ProtocolError(format!("unknown action: {}", action)));
        }
        serde_json::from_value(value).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize client message: {}", e))
        })
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action")]
pub enum ServerMessage {
    #[serde(rename = "SESSION_CREATED", rename_all = "camelCase")]
    SessionCreated { session_id: String },

    /// Answer for one leg
    #[serde(rename = "SERVER_SDP_INFO", rename_all = "camelCase")]
    ServerSdpInfo {
        stream_name: StreamLeg,
        sdp_payload: String,
    },

    #[serde(rename = "STARTED_RECORDING", rename_all = "camelCase")]
    StartedRecording { session_id: String, run_id: String },

    #[serde(rename = "STOPPED_RECORDING", rename_all = "camelCase")]
    StoppedRecording {
        session_id: String,
        run_id: String,
        generated_files: GeneratedFiles,
    },

    /// Negative acknowledgement
    #[serde(rename = "ERROR", rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_name: Option<String>,
    },
}

impl ServerMessage {
    /// Build an error envelope from a crate error
    pub fn from_error(err: &Error, stream_name: Option<&str>) -> Self {
        ServerMessage::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
            stream_name: stream_name.map(str::to_string),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ServerMessage::SessionCreated { .. } => "SESSION_CREATED",
            ServerMessage::ServerSdpInfo { .. } => "SERVER_SDP_INFO",
            ServerMessage::StartedRecording { .. } => "STARTED_RECORDING",
            ServerMessage::StoppedRecording { .. } => "STOPPED_RECORDING",
            ServerMessage::Error { .. } => "ERROR",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize server message: {}", e))
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize server message: {}", e))
        })
    }
}

/// Files produced by one recording run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFiles {
    pub camera_files: Vec<String>,
    pub screen_files: Vec<String>,
}

impl GeneratedFiles {
    pub fn from_manifest(manifest: &LegMap<std::path::PathBuf>) -> Self {
        let path = |leg| manifest[leg].to_string_lossy().into_owned();
        Self {
            camera_files: vec![path(StreamLeg::Camera)],
            screen_files: vec![path(StreamLeg::Screen)],
        }
    }

    pub fn total(&self) -> usize {
        self.camera_files.len() + self.screen_files.len()
    }
}

/// Structured ICE candidate as carried in `candidateData`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateData {
    pub foundation: String,
    pub component_id: u16,
    pub transport: String,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
    #[serde(default)]
    pub related_address: String,
    #[serde(default)]
    pub related_port: u16,
}

impl CandidateData {
    /// Parse the textual candidate form
    /// (`candidate:<foundation> <component> <transport> <priority> <address> <port> typ <type> [raddr <a> rport <p>] ...`).
    ///
    /// Related address/port default to `""` and `0` when absent.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        let line = line.strip_prefix("candidate:").unwrap_or(line);
        let tokens: Vec<&str> = line.split_whitespace().collect();

        if tokens.len() < 8 || tokens[6] != "typ" {
            return Err(Error::ProtocolError(format!(
                "malformed ICE candidate: {}",
                line
            )));
        }

        let number = |idx: usize, name: &str| -> Result<u64> {
            tokens[idx].parse::<u64>().map_err(|_| {
                Error::ProtocolError(format!("invalid candidate {}: {}", name, tokens[idx]))
            })
        };

        let component_id = u16::try_from(number(1, "component id")?)
            .map_err(|_| Error::ProtocolError("candidate component id out of range".to_string()))?;
        let priority = u32::try_from(number(3, "priority")?)
            .map_err(|_| Error::ProtocolError("candidate priority out of range".to_string()))?;
        let port = u16::try_from(number(5, "port")?)
            .map_err(|_| Error::ProtocolError("candidate port out of range".to_string()))?;

        let mut related_address = String::new();
        let mut related_port = 0u16;
        let mut rest = tokens[8..].iter();
        while let Some(key) = rest.next() {
            match (*key, rest.next()) {
                ("raddr", Some(value)) => related_address = value.to_string(),
                ("rport", Some(value)) => related_port = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        Ok(Self {
            foundation: tokens[0].to_string(),
            component_id,
            transport: tokens[2].to_string(),
            priority,
            address: tokens[4].to_string(),
            port,
            candidate_type: tokens[7].to_string(),
            related_address,
            related_port,
        })
    }

    /// Render back to the textual candidate form understood by ICE agents
    pub fn to_candidate_line(&self) -> String {
        let mut line = format!(
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component_id,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.candidate_type
        );
        if !self.related_address.is_empty() {
            line.push_str(&format!(
                " raddr {} rport {}",
                self.related_address, self.related_port
            ));
        }
        line
    }
}
