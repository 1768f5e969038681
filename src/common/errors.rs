use serde::{Deserialize, Serialize};

use crate::common::types::GuildId;

/// Exception severity levels reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "COMMON")]
    Common,
    #[serde(alias = "SUSPICIOUS")]
    Suspicious,
    #[serde(alias = "FAULT")]
    Fault,
}

/// Error body returned by the node's REST API on a non-2xx status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeErrorBody {
    pub timestamp: u64,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    pub trace: Option<String>,
}

pub type Result<T, E = RiffyError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RiffyError {
    // Configuration
    #[error("riffy has not been initialized; call Riffy::init with the client user id first")]
    NotInitialized,
    #[error("invalid rest version '{0}', expected v3 or v4")]
    InvalidRestVersion(String),
    #[error("invalid loop mode '{0}', expected none, track or queue")]
    InvalidLoopMode(String),
    #[error("volume must be between 0 and 1000, got {0}")]
    InvalidVolume(u32),
    #[error("invalid configuration: {0}")]
    Config(String),

    // Transport
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("node responded {status} on {path}: {message}")]
    Rest {
        status: u16,
        path: String,
        message: String,
    },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    // Protocol state
    #[error("no nodes are available")]
    NoNodesAvailable,
    #[error("node '{0}' not found")]
    NodeNotFound(String),
    #[error("node '{0}' is not connected")]
    NodeNotConnected(String),
    #[error("node '{0}' has no session yet")]
    NoSession(String),
    #[error("no player for guild {0}")]
    PlayerNotFound(GuildId),
    #[error(
        "player {0} has no voice connection; \
         call Riffy::create_connection and forward voice packets"
    )]
    NotConnected(GuildId),
    #[error("voice connection for {0} was not confirmed in time")]
    VoiceTimeout(GuildId),
    #[error("voice server update is missing an endpoint")]
    MissingEndpoint,
    #[error("player is already connected to channel {0}")]
    AlreadyInChannel(String),
    #[error("queue is empty")]
    QueueEmpty,
    #[error("queue index {index} is out of range (length {len})")]
    QueueIndex { index: usize, len: usize },
    #[error("no destination node available for migration")]
    NoMigrationTarget,
    #[error("player is already bound to node '{0}'")]
    SameNode(String),
    #[error("could not resolve a playable track for '{0}'")]
    TrackUnresolvable(String),
}

impl RiffyError {
    /// Builds a REST error from the node's JSON error body, falling back to
    /// the raw text when the body is not the standard shape.
    pub fn from_response(status: u16, path: &str, body: &str) -> Self {
        let message = serde_json::from_str::<NodeErrorBody>(body)
            .ok()
            .filter(|b| !b.message.is_empty())
            .map(|b| b.message)
            .unwrap_or_else(|| body.trim().to_string());
        Self::Rest {
            status,
            path: path.to_string(),
            message,
        }
    }

    /// Transport failures may trigger failover; everything else is a caller error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Rest { .. } | Self::WebSocket(_)
        )
    }
}
