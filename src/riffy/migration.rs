use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Riffy, RiffyEvent};
use crate::{
    common::errors::{Result, RiffyError},
    node::Node,
    player::Player,
};

/// Chooses where a player goes. Candidates exclude the player's node and are
/// sorted by ascending penalty.
pub type MigrationStrategy = Arc<dyn Fn(&Player, &[Arc<Node>]) -> Option<Arc<Node>> + Send + Sync>;

/// Default strategy: the healthiest candidate.
pub fn lowest_penalty(_player: &Player, candidates: &[Arc<Node>]) -> Option<Arc<Node>> {
    candidates.first().cloned()
}

pub enum MigrationTarget {
    Player(Arc<Player>),
    Node(Arc<Node>),
}

impl Riffy {
    fn candidates_excluding(&self, node: &Node) -> Vec<Arc<Node>> {
        self.best_nodes()
            .into_iter()
            .filter(|n| n.name() != node.name())
            .collect()
    }

    /// Moves one player, or every player on a node.
    /// Returns the players that ended up on a new node.
    pub async fn migrate(
        &self,
        target: MigrationTarget,
        destination: Option<Arc<Node>>,
    ) -> Result<Vec<Arc<Player>>> {
        match target {
            MigrationTarget::Player(player) => {
                self.migrate_player(&player, destination).await?;
                Ok(vec![player])
            }
            MigrationTarget::Node(node) => match destination {
                Some(destination) => self.migrate_node_to(&node, Some(destination)).await,
                None => self.migrate_node(&node).await,
            },
        }
    }

    pub async fn migrate_player(
        &self,
        player: &Arc<Player>,
        destination: Option<Arc<Node>>,
    ) -> Result<Arc<Node>> {
        let old = player.node();
        let destination = destination.or_else(|| {
            let candidates = self.candidates_excluding(&old);
            (self.migration_strategy)(player, &candidates)
        });

        let outcome = match destination {
            None => Err(RiffyError::NoMigrationTarget),
            Some(node) if Arc::ptr_eq(&node, &old) => {
                Err(RiffyError::SameNode(node.name().to_string()))
            }
            Some(node) => player.move_to(node.clone()).await.map(|()| node),
        };
        self.report_migration(player, &old, outcome)
    }

    fn report_migration(
        &self,
        player: &Arc<Player>,
        old: &Node,
        outcome: Result<Arc<Node>>,
    ) -> Result<Arc<Node>> {
        match outcome {
            Ok(node) => {
                info!(
                    "[{}] Migrated {} -> {}",
                    player.guild_id(),
                    old.name(),
                    node.name()
                );
                self.emit(RiffyEvent::PlayerMigrated {
                    player: player.clone(),
                    old_node: old.name().to_string(),
                    new_node: node.name().to_string(),
                });
                Ok(node)
            }
            Err(e) => {
                warn!("[{}] Migration failed: {}", player.guild_id(), e);
                self.emit(RiffyEvent::PlayerMigrationFailed {
                    player: player.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Moves every player off `node`. Individual failures are counted and
    /// never abort the batch. Only one batch drains a node at a time; a
    /// concurrent call returns nothing.
    pub async fn migrate_node(&self, node: &Arc<Node>) -> Result<Vec<Arc<Player>>> {
        self.migrate_node_to(node, None).await
    }

    async fn migrate_node_to(
        &self,
        node: &Arc<Node>,
        destination: Option<Arc<Node>>,
    ) -> Result<Vec<Arc<Player>>> {
        let Some(_batch) = node.begin_migration() else {
            debug!("[{}] Already being drained", node.name());
            return Ok(Vec::new());
        };

        let players = self.players_on(node);
        if players.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.candidates_excluding(node);
        let mut migrated = Vec::with_capacity(players.len());
        let mut failed = 0;

        for player in players {
            // moved on its own since the snapshot
            if !Arc::ptr_eq(&player.node(), node) {
                continue;
            }
            let target = destination
                .clone()
                .or_else(|| (self.migration_strategy)(&player, &candidates));
            let outcome = match target {
                None => Err(RiffyError::NoMigrationTarget),
                Some(target) if Arc::ptr_eq(&target, node) => {
                    Err(RiffyError::SameNode(target.name().to_string()))
                }
                Some(target) => match player.move_off(node, target.clone()).await {
                    Ok(true) => Ok(target),
                    Ok(false) => continue,
                    Err(e) => Err(e),
                },
            };
            match self.report_migration(&player, node, outcome) {
                Ok(_) => migrated.push(player),
                Err(_) => failed += 1,
            }
        }

        if migrated.is_empty() && failed == 0 {
            return Ok(migrated);
        }
        if failed == 0 {
            info!("[{}] Moved {} player(s)", node.name(), migrated.len());
            self.emit(RiffyEvent::NodeMigrated {
                node: node.name().to_string(),
                players: migrated.clone(),
            });
        } else {
            warn!(
                "[{}] {} player(s) failed to migrate, {} moved",
                node.name(),
                failed,
                migrated.len()
            );
            self.emit(RiffyEvent::NodeMigrationFailed {
                node: node.name().to_string(),
                failed,
                migrated: migrated.clone(),
            });
        }
        Ok(migrated)
    }
}
