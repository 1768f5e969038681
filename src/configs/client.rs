use serde::{Deserialize, Serialize};

use super::node::RestVersion;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Source prefix used for bare search phrases (e.g. `ytmsearch`).
    pub default_search_platform: String,
    /// Protocol version for nodes that don't set their own.
    pub rest_version: RestVersion,
    /// Move players off a node when its socket errors.
    pub migrate_on_failure: bool,
    /// Move players off a node when its socket closes.
    pub migrate_on_disconnect: bool,
    /// Keep up to 50 previous tracks instead of only the last one.
    pub multiple_track_history: bool,
    /// Treat a failed `/info` fetch on open as harmless.
    pub bypass_info_check: bool,
    /// Bot user id; only needed when nothing else supplies it to `Riffy::init`.
    pub user_id: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_search_platform: "ytmsearch".to_string(),
            rest_version: RestVersion::V4,
            migrate_on_failure: false,
            migrate_on_disconnect: false,
            multiple_track_history: false,
            bypass_info_check: false,
            user_id: None,
        }
    }
}
