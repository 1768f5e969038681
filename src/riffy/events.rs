use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::{
    common::types::{ChannelId, GuildId},
    player::Player,
    protocol::{PlayerState, Track, TrackEndReason, TrackException},
};

/// Everything the host can observe. Node events carry the node name,
/// player events the player itself.
#[derive(Debug, Clone)]
pub enum RiffyEvent {
    NodeCreate { node: String },
    NodeConnect { node: String },
    NodeReconnect { node: String, attempt: u32 },
    NodeDisconnect { node: String, code: u16, reason: String },
    NodeDestroy { node: String },
    NodeError { node: String, error: String },

    TrackStart { player: Arc<Player>, track: Track },
    TrackEnd { player: Arc<Player>, track: Track, reason: TrackEndReason },
    TrackError { player: Arc<Player>, track: Track, exception: TrackException },
    TrackStuck { player: Arc<Player>, track: Track, threshold_ms: u64 },
    SocketClosed { player: Arc<Player>, code: u16, reason: String, by_remote: bool },
    QueueEnd { player: Arc<Player> },

    PlayerCreate { player: Arc<Player> },
    PlayerDisconnect { player: Arc<Player> },
    PlayerMove { player: Arc<Player>, old_channel: Option<ChannelId>, new_channel: ChannelId },
    PlayerUpdate { player: Arc<Player>, state: PlayerState },
    PlayerDestroy { player: Arc<Player> },

    PlayerMigrated { player: Arc<Player>, old_node: String, new_node: String },
    PlayerMigrationFailed { player: Arc<Player>, error: String },
    NodeMigrated { node: String, players: Vec<Arc<Player>> },
    NodeMigrationFailed { node: String, failed: usize, migrated: Vec<Arc<Player>> },

    Debug(String),
}

impl RiffyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeCreate { .. } => "nodeCreate",
            Self::NodeConnect { .. } => "nodeConnect",
            Self::NodeReconnect { .. } => "nodeReconnect",
            Self::NodeDisconnect { .. } => "nodeDisconnect",
            Self::NodeDestroy { .. } => "nodeDestroy",
            Self::NodeError { .. } => "nodeError",
            Self::TrackStart { .. } => "trackStart",
            Self::TrackEnd { .. } => "trackEnd",
            Self::TrackError { .. } => "trackError",
            Self::TrackStuck { .. } => "trackStuck",
            Self::SocketClosed { .. } => "socketClosed",
            Self::QueueEnd { .. } => "queueEnd",
            Self::PlayerCreate { .. } => "playerCreate",
            Self::PlayerDisconnect { .. } => "playerDisconnect",
            Self::PlayerMove { .. } => "playerMove",
            Self::PlayerUpdate { .. } => "playerUpdate",
            Self::PlayerDestroy { .. } => "playerDestroy",
            Self::PlayerMigrated { .. } => "playerMigrated",
            Self::PlayerMigrationFailed { .. } => "playerMigrationFailed",
            Self::NodeMigrated { .. } => "nodeMigrated",
            Self::NodeMigrationFailed { .. } => "nodeMigrationFailed",
            Self::Debug(_) => "debug",
        }
    }
}

#[derive(Clone)]
pub(crate) struct EventSender {
    tx: UnboundedSender<RiffyEvent>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, UnboundedReceiver<RiffyEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    /// A dropped receiver just means nobody is listening.
    pub(crate) fn emit(&self, event: RiffyEvent) {
        let _ = self.tx.send(event);
    }
}

/// Delivers voice (op 4) payloads to the host's gateway shard.
pub trait GatewaySender: Send + Sync {
    fn send(&self, guild_id: &GuildId, payload: Value);
}

impl<F> GatewaySender for F
where
    F: Fn(&GuildId, Value) + Send + Sync,
{
    fn send(&self, guild_id: &GuildId, payload: Value) {
        self(guild_id, payload)
    }
}
