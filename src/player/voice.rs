use crate::{
    common::{
        errors::{Result, RiffyError},
        types::ChannelId,
    },
    protocol::VoiceState,
};

/// Voice handshake state for one player.
#[derive(Debug, Clone, Default)]
pub struct VoiceSession {
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub self_deaf: bool,
    pub self_mute: bool,
    /// A join was requested and the node has not confirmed it yet.
    pub establishing: bool,
    /// Playback was paused because the voice socket dropped.
    pub paused_for_voice: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerChange {
    pub old_region: Option<String>,
    pub new_region: Option<String>,
    /// Playback should resume now that voice is back.
    pub resume: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// The bot left voice (channel is null).
    Left,
    Moved {
        old: Option<ChannelId>,
        new: ChannelId,
    },
    Same,
}

impl VoiceSession {
    /// Complete credentials, if all three parts are known.
    pub fn credentials(&self) -> Option<VoiceState> {
        Some(VoiceState {
            token: self.token.clone()?,
            endpoint: self.endpoint.clone()?,
            session_id: self.session_id.clone()?,
        })
    }

    pub fn apply_server(
        &mut self,
        endpoint: Option<&str>,
        token: &str,
        region_of: impl Fn(&str) -> Option<String>,
    ) -> Result<ServerChange> {
        let endpoint = endpoint
            .filter(|e| !e.is_empty())
            .ok_or(RiffyError::MissingEndpoint)?;

        let old_region = self.region.take();
        self.endpoint = Some(endpoint.to_string());
        self.token = Some(token.to_string());
        self.region = region_of(endpoint);

        Ok(ServerChange {
            old_region,
            new_region: self.region.clone(),
            resume: std::mem::take(&mut self.paused_for_voice),
        })
    }

    pub fn apply_state(
        &mut self,
        session_id: Option<&str>,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> StateChange {
        self.self_deaf = self_deaf;
        self.self_mute = self_mute;
        self.session_id = session_id.map(str::to_string);

        let Some(channel) = channel_id else {
            self.channel_id = None;
            self.establishing = false;
            return StateChange::Left;
        };

        if self.channel_id.as_ref() == Some(&channel) {
            return StateChange::Same;
        }
        let old = self.channel_id.replace(channel.clone());
        match old {
            // the first state update after a join is not a move
            None => StateChange::Same,
            Some(_) => StateChange::Moved { old, new: channel },
        }
    }
}

/// First label of the endpoint with digits removed: `us-east123.discord.media` → `us-east`.
pub fn region_from_endpoint(endpoint: &str) -> Option<String> {
    let label = endpoint.split('.').next()?;
    let region: String = label.chars().filter(|c| !c.is_ascii_digit()).collect();
    (!region.is_empty()).then_some(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_strips_digits_from_first_label() {
        assert_eq!(
            region_from_endpoint("us-east123.discord.media:443").as_deref(),
            Some("us-east")
        );
        assert_eq!(region_from_endpoint("rotterdam4.discord.gg").as_deref(), Some("rotterdam"));
        assert_eq!(region_from_endpoint("1234.discord.gg"), None);
    }

    #[test]
    fn server_update_requires_endpoint() {
        let mut voice = VoiceSession::default();
        assert!(matches!(
            voice.apply_server(None, "tok", region_from_endpoint),
            Err(RiffyError::MissingEndpoint)
        ));
        assert!(voice.token.is_none());
    }

    #[test]
    fn server_update_reports_region_change_and_resume() {
        let mut voice = VoiceSession::default();
        voice.apply_server(Some("eu1.discord.media"), "a", region_from_endpoint).unwrap();
        voice.paused_for_voice = true;

        let change = voice
            .apply_server(Some("us2.discord.media"), "b", region_from_endpoint)
            .unwrap();
        assert_eq!(change.old_region.as_deref(), Some("eu"));
        assert_eq!(change.new_region.as_deref(), Some("us"));
        assert!(change.resume);
        assert!(!voice.paused_for_voice);
    }

    #[test]
    fn credentials_need_all_parts() {
        let mut voice = VoiceSession::default();
        voice.apply_server(Some("eu1.discord.media"), "tok", region_from_endpoint).unwrap();
        assert!(voice.credentials().is_none());

        voice.apply_state(Some("sess"), Some(ChannelId::from("10")), true, false);
        let creds = voice.credentials().unwrap();
        assert_eq!(creds.session_id, "sess");
        assert_eq!(creds.endpoint, "eu1.discord.media");
    }

    #[test]
    fn state_updates_classify_moves() {
        let mut voice = VoiceSession::default();
        assert_eq!(
            voice.apply_state(Some("s"), Some("10".into()), false, false),
            StateChange::Same
        );
        assert_eq!(
            voice.apply_state(Some("s"), Some("11".into()), false, true),
            StateChange::Moved {
                old: Some("10".into()),
                new: "11".into()
            }
        );
        assert!(voice.self_mute);
        assert_eq!(voice.apply_state(None, None, false, false), StateChange::Left);
        assert!(voice.channel_id.is_none());
    }
}
