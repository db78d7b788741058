//! Peer connection configuration.

use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Public STUN endpoints used when no custom servers are configured.
pub const DEFAULT_STUN_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

/// ICE configuration for new peer connections.
#[derive(Clone, Debug)]
pub struct RtcConfig {
    /// STUN/TURN server URLs, one `RTCIceServer` per entry.
    pub ice_servers: Vec<String>,
    /// Gather loopback candidates too. Off by default; required when both
    /// peers live on the same host.
    pub include_loopback: bool,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            include_loopback: false,
        }
    }
}

impl RtcConfig {
    /// Configuration for same-host calls: no ICE servers, loopback
    /// candidates included. Used by tests and the demo.
    pub fn without_ice_servers() -> Self {
        Self {
            ice_servers: Vec::new(),
            include_loopback: true,
        }
    }

    pub(crate) fn to_rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}
