//! Multi-node Lavalink client: a pool of nodes ranked by load, per-guild
//! players with queues and voice handshakes, and live migration of players
//! between nodes.

pub mod common;
pub mod configs;
pub mod node;
pub mod player;
pub mod plugin;
pub mod protocol;
pub mod rest;
pub mod riffy;

#[cfg(test)]
mod testing;

pub use common::errors::{Result, RiffyError};
pub use common::types::{ChannelId, GuildId, UserId};
pub use configs::Config;
pub use node::Node;
pub use player::{ConnectionOptions, LoopMode, Player};
pub use plugin::Plugin;
pub use riffy::{GatewaySender, MigrationTarget, ResolveOptions, Riffy, RiffyBuilder, RiffyEvent};
