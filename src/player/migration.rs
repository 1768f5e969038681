use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, info};

use super::Player;
use crate::{
    common::errors::{Result, RiffyError},
    node::Node,
    protocol::{Filters, PlayerUpdate, Track, VoiceState},
};

/// Everything needed to rebuild a player on another node.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSnapshot {
    pub track: Option<Track>,
    pub position: u64,
    pub volume: u16,
    pub paused: bool,
    pub filters: Filters,
    pub voice: Option<VoiceState>,
}

impl MigrationSnapshot {
    /// The combined command that restores playback. `None` when idle.
    pub fn playback_update(&self) -> Option<PlayerUpdate> {
        let track = self.track.as_ref()?;
        Some(PlayerUpdate {
            encoded_track: Some(track.encoded.clone()),
            position: Some(self.position),
            volume: Some(self.volume),
            paused: Some(self.paused),
            filters: Some(self.filters.clone()),
            ..Default::default()
        })
    }
}

/// Clears the migrating flag however the migration ends.
struct MigratingGuard<'a>(&'a AtomicBool);

impl Drop for MigratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Player {
    pub fn snapshot(&self) -> MigrationSnapshot {
        let inner = self.inner.lock();
        MigrationSnapshot {
            track: inner.current.clone(),
            position: inner.position,
            volume: inner.volume,
            paused: inner.paused,
            filters: inner.filters.clone(),
            voice: self.voice.lock().credentials(),
        }
    }

    /// Rebinds this player to `node` and replays its state there.
    ///
    /// Migrations of one player run one at a time. Node events for the
    /// player are dropped until this returns.
    pub async fn move_to(&self, node: Arc<Node>) -> Result<()> {
        self.relocate(None, node).await.map(|_| ())
    }

    /// Like [`Player::move_to`], but only while the player is still bound to
    /// `source`. Returns `false` when it already left.
    pub(crate) async fn move_off(&self, source: &Node, node: Arc<Node>) -> Result<bool> {
        self.relocate(Some(source), node).await
    }

    async fn relocate(&self, source: Option<&Node>, node: Arc<Node>) -> Result<bool> {
        let _exclusive = self.migration_lock.lock().await;

        let old = self.node();
        if source.is_some_and(|source| !std::ptr::eq(source, Arc::as_ptr(&old))) {
            debug!("[{}] Already moved to {}", self.guild_id, old.name());
            return Ok(false);
        }
        if !node.is_connected() {
            return Err(RiffyError::NodeNotConnected(node.name().to_string()));
        }
        if Arc::ptr_eq(&old, &node) {
            return Err(RiffyError::SameNode(node.name().to_string()));
        }

        self.migrating.store(true, Ordering::Release);
        let _reset = MigratingGuard(&self.migrating);

        let snapshot = self.snapshot();
        info!(
            "[{}] Migrating from {} to {}",
            self.guild_id,
            old.name(),
            node.name()
        );

        if old.is_connected() {
            if let Err(e) = old.rest().destroy_player(&self.guild_id).await {
                debug!("[{}] Old node kept the player: {}", self.guild_id, e);
            }
        }

        *self.node.write() = node.clone();

        if let Some(voice) = snapshot.voice.clone() {
            node.rest()
                .update_player(
                    &self.guild_id,
                    &PlayerUpdate {
                        voice: Some(voice),
                        ..Default::default()
                    },
                    false,
                )
                .await?;
        }
        if let Some(update) = snapshot.playback_update() {
            node.rest().update_player(&self.guild_id, &update, false).await?;
        }
        Ok(true)
    }
}
