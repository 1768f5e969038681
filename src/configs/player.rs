use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: u16,
    /// How long `play()` waits for voice credentials to reach the node.
    #[serde(default = "default_voice_handshake_ms")]
    pub voice_handshake_timeout_ms: u64,
    /// Extra wait for the node to confirm an in-flight voice connection.
    #[serde(default = "default_voice_confirm_ms")]
    pub voice_confirm_timeout_ms: u64,
    #[serde(default = "default_fade_step_ms")]
    pub fade_step_ms: u64,
}

impl PlayerConfig {
    pub fn voice_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.voice_handshake_timeout_ms)
    }

    pub fn voice_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.voice_confirm_timeout_ms)
    }

    pub fn fade_step(&self) -> Duration {
        Duration::from_millis(self.fade_step_ms.max(1))
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            voice_handshake_timeout_ms: default_voice_handshake_ms(),
            voice_confirm_timeout_ms: default_voice_confirm_ms(),
            fade_step_ms: default_fade_step_ms(),
        }
    }
}

fn default_volume() -> u16 {
    100
}

fn default_voice_handshake_ms() -> u64 {
    3_000
}

fn default_voice_confirm_ms() -> u64 {
    10_000
}

fn default_fade_step_ms() -> u64 {
    250
}
