use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::error::{Error, Result};

// Transport connection state, as last reported by the media provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                ConnectionState::New
            }
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// Which half of the SFU's publisher/subscriber pair a candidate belongs to.
///
/// On the wire this is the integer `target`: 0 for publisher, 1 for subscriber.
/// This client only ever receives media, so its local role is `Subscriber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    pub const LOCAL: Role = Role::Subscriber;

    pub fn from_target(target: u64) -> Option<Self> {
        match target {
            0 => Some(Role::Publisher),
            1 => Some(Role::Subscriber),
            _ => None,
        }
    }

    pub fn target(self) -> u8 {
        match self {
            Role::Publisher => 0,
            Role::Subscriber => 1,
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidateEnvelope {
    pub target: Role,
    pub candidate: IceCandidate,
}

impl IceCandidateEnvelope {
    pub fn is_local(&self) -> bool {
        self.target == Role::LOCAL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTrack {
    pub id: String,
    pub kind: String,
}

/// An inbound media stream. Descriptors pushed by the server usually carry
/// only `id`, so `active` defaults to true and `tracks` to empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStream {
    pub id: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub tracks: Vec<RemoteTrack>,
}

fn default_active() -> bool {
    true
}

impl RemoteStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: true,
            tracks: Vec::new(),
        }
    }
}

/// Read-only view handed to the caller after every change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverState {
    pub connection_state: ConnectionState,
    pub streams: Vec<RemoteStream>,
}

impl ReceiverState {
    pub fn stream_ids(&self) -> Vec<&str> {
        self.streams.iter().map(|s| s.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl From<IceServer> for RTCIceServer {
    fn from(server: IceServer) -> Self {
        RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:7001/ws";
pub const DEFAULT_ROOM_ID: &str = "join-app";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub signaling_url: String,
    pub room_id: String,
    pub own_stream_id: Option<String>,
    pub ice_servers: Vec<IceServer>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            room_id: DEFAULT_ROOM_ID.to_string(),
            own_stream_id: None,
            ice_servers: Vec::new(),
        }
    }
}

impl Config {
    /// Signaling endpoint with the room id attached as `room_id`
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.signaling_url).map_err(|e| {
            Error::InvalidConfig(format!("Bad signaling url {}: {}", self.signaling_url, e))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::InvalidConfig(format!(
                "Signaling url must use ws or wss, got {}",
                url.scheme()
            )));
        }
        if self.room_id.is_empty() {
            return Err(Error::InvalidConfig("Room id is empty".to_string()));
        }
        url.query_pairs_mut().append_pair("room_id", &self.room_id);
        Ok(url)
    }

    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers.iter().cloned().map(Into::into).collect()
    }
}
