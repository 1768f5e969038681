use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    common::{errors::Result, types::GuildId},
    configs::RestVersion,
    protocol::{filters::Filters, tracks::Track},
};

/// Position report from a `playerUpdate` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerState {
    /// Unix timestamp in milliseconds.
    pub time: u64,
    pub position: u64,
    pub connected: bool,
    /// Voice gateway ping, -1 when unknown.
    pub ping: i64,
}

/// Voice credentials forwarded to the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Player as reported by `GET .../players`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodePlayer {
    pub guild_id: Option<GuildId>,
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    pub state: PlayerState,
    pub voice: Option<VoiceState>,
    pub filters: Filters,
}

/// Body of `PATCH .../players/{guild}`. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    /// `Some(None)` stops the current track.
    #[serde(skip)]
    pub encoded_track: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

impl PlayerUpdate {
    pub fn play(encoded: impl Into<String>) -> Self {
        Self {
            encoded_track: Some(Some(encoded.into())),
            ..Default::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            encoded_track: Some(None),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// JSON body in the shape `version` expects for the track field.
    pub fn to_body(&self, version: RestVersion) -> Result<Value> {
        let mut body = serde_json::to_value(self)?;
        if let Some(track) = &self.encoded_track {
            match version {
                RestVersion::V4 => body["track"] = json!({ "encoded": track }),
                RestVersion::V3 => body["encodedTrack"] = json!(track),
            }
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_shapes_follow_version() {
        let mut update = PlayerUpdate::play("QAAA");
        update.position = Some(1500);
        update.paused = Some(false);

        assert_eq!(
            update.to_body(RestVersion::V4).unwrap(),
            json!({ "track": { "encoded": "QAAA" }, "position": 1500, "paused": false })
        );
        assert_eq!(
            update.to_body(RestVersion::V3).unwrap(),
            json!({ "encodedTrack": "QAAA", "position": 1500, "paused": false })
        );
    }

    #[test]
    fn stop_sends_explicit_null() {
        assert_eq!(
            PlayerUpdate::stop().to_body(RestVersion::V4).unwrap(),
            json!({ "track": { "encoded": null } })
        );
        assert!(PlayerUpdate::default().is_empty());
    }

    #[test]
    fn voice_is_camel_case() {
        let update = PlayerUpdate {
            voice: Some(VoiceState {
                token: "t".into(),
                endpoint: "us-east1.discord.media".into(),
                session_id: "s".into(),
            }),
            ..Default::default()
        };
        let body = update.to_body(RestVersion::V4).unwrap();
        assert_eq!(body["voice"]["sessionId"], "s");
    }
}
