use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    common::{errors::Result, types::GuildId},
    protocol::{
        player::PlayerState,
        stats::NodeStats,
        tracks::{Track, TrackException},
    },
};

/// One inbound frame from a node socket.
#[derive(Debug, Clone)]
pub enum NodeMessage {
    Ready { session_id: String, resumed: bool },
    Stats(NodeStats),
    PlayerUpdate { guild_id: GuildId, state: PlayerState },
    Event { guild_id: GuildId, event: PlayerEvent },
    /// An op this client does not know.
    Unknown { op: String, guild_id: Option<GuildId> },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadyFrame {
    session_id: String,
    #[serde(default)]
    resumed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuildFrame {
    guild_id: GuildId,
    #[serde(default)]
    state: PlayerState,
}

impl NodeMessage {
    /// Parses a text frame. Frames without an `op` yield `None`.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let value: Value = serde_json::from_str(text)?;
        let Some(op) = value.get("op").and_then(Value::as_str) else {
            return Ok(None);
        };

        let message = match op {
            "ready" => {
                let frame: ReadyFrame = serde_json::from_value(value)?;
                Self::Ready {
                    session_id: frame.session_id,
                    resumed: frame.resumed,
                }
            }
            "stats" => Self::Stats(serde_json::from_value(value)?),
            "playerUpdate" => {
                let frame: GuildFrame = serde_json::from_value(value)?;
                Self::PlayerUpdate {
                    guild_id: frame.guild_id,
                    state: frame.state,
                }
            }
            "event" => {
                let guild_id = guild_of(&value).unwrap_or_else(|| GuildId::from(""));
                Self::Event {
                    guild_id,
                    event: PlayerEvent::parse(&value)?,
                }
            }
            other => Self::Unknown {
                op: other.to_string(),
                guild_id: guild_of(&value),
            },
        };
        Ok(Some(message))
    }

    pub fn guild_id(&self) -> Option<&GuildId> {
        match self {
            Self::PlayerUpdate { guild_id, .. } | Self::Event { guild_id, .. } => Some(guild_id),
            Self::Unknown { guild_id, .. } => guild_id.as_ref(),
            _ => None,
        }
    }
}

fn guild_of(value: &Value) -> Option<GuildId> {
    value.get("guildId").and_then(Value::as_str).map(GuildId::from)
}

/// Why a track stopped. Accepts `loadFailed` as well as `LOAD_FAILED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
    Other(String),
}

impl TrackEndReason {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().replacen('_', "", 1).as_str() {
            "finished" => Self::Finished,
            "loadfailed" => Self::LoadFailed,
            "stopped" => Self::Stopped,
            "replaced" => Self::Replaced,
            "cleanup" => Self::Cleanup,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// The ended track should not be played again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoadFailed | Self::Cleanup)
    }
}

impl fmt::Display for TrackEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => f.write_str("finished"),
            Self::LoadFailed => f.write_str("loadFailed"),
            Self::Stopped => f.write_str("stopped"),
            Self::Replaced => f.write_str("replaced"),
            Self::Cleanup => f.write_str("cleanup"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Guild-scoped playback events pushed by a node.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    TrackStart {
        track: Track,
    },
    TrackEnd {
        track: Track,
        reason: TrackEndReason,
    },
    TrackException {
        track: Track,
        exception: TrackException,
    },
    TrackStuck {
        track: Track,
        threshold_ms: u64,
    },
    WebSocketClosed {
        code: u16,
        reason: String,
        by_remote: bool,
    },
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventFields {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    track: Value,
    #[serde(default)]
    reason: Value,
    #[serde(default)]
    exception: Option<TrackException>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    threshold_ms: u64,
    #[serde(default)]
    code: u16,
    #[serde(default)]
    by_remote: bool,
}

impl PlayerEvent {
    pub fn parse(value: &Value) -> Result<Self> {
        let fields: EventFields = serde_json::from_value(value.clone())?;
        let reason_str = fields.reason.as_str().unwrap_or_default().to_string();

        let event = match fields.kind.as_str() {
            "TrackStartEvent" => Self::TrackStart {
                track: event_track(fields.track)?,
            },
            "TrackEndEvent" => Self::TrackEnd {
                track: event_track(fields.track)?,
                reason: TrackEndReason::parse(&reason_str),
            },
            "TrackExceptionEvent" => Self::TrackException {
                track: event_track(fields.track)?,
                exception: fields.exception.unwrap_or(TrackException {
                    message: fields.error,
                    severity: None,
                    cause: None,
                }),
            },
            "TrackStuckEvent" => Self::TrackStuck {
                track: event_track(fields.track)?,
                threshold_ms: fields.threshold_ms,
            },
            "WebSocketClosedEvent" => Self::WebSocketClosed {
                code: fields.code,
                reason: reason_str,
                by_remote: fields.by_remote,
            },
            other => Self::Unknown(other.to_string()),
        };
        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::TrackStart { .. } => "TrackStartEvent",
            Self::TrackEnd { .. } => "TrackEndEvent",
            Self::TrackException { .. } => "TrackExceptionEvent",
            Self::TrackStuck { .. } => "TrackStuckEvent",
            Self::WebSocketClosed { .. } => "WebSocketClosedEvent",
            Self::Unknown(kind) => kind,
        }
    }
}

/// v4 sends the full track object, v3 only the encoded string.
fn event_track(raw: Value) -> Result<Track> {
    match raw {
        Value::String(encoded) => Ok(Track::decode(&encoded).unwrap_or_else(|| Track {
            encoded: Some(encoded),
            ..Track::from_info(Default::default())
        })),
        other => Ok(serde_json::from_value(other)?),
    }
}
