use std::sync::{
    Arc, OnceLock, Weak,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::{
    common::{
        errors::{Result, RiffyError},
        types::{ChannelId, GuildId, UserId},
    },
    configs::{Config, NodeConfig},
    node::Node,
    player::{ConnectionOptions, Player, Recommender, YoutubeMix, voice::region_from_endpoint},
    plugin::Plugin,
    protocol::NodeMessage,
    rest::{HttpTransport, RestTransport},
};

pub mod events;
mod migration;
mod search;

pub use events::{GatewaySender, RiffyEvent};
pub use migration::{MigrationStrategy, MigrationTarget, lowest_penalty};
pub use search::{NodeChoice, ResolveOptions};

use events::EventSender;

/// Maps a voice endpoint to a region tag.
pub type RegionResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builds the REST transport for a node.
pub type TransportFactory =
    Arc<dyn Fn(&NodeConfig) -> Result<Arc<dyn RestTransport>> + Send + Sync>;

/// Owns the node pool and the player registry and routes between them.
pub struct Riffy {
    config: Config,
    client_id: OnceLock<UserId>,
    initiated: AtomicBool,
    nodes: DashMap<String, Arc<Node>>,
    players: DashMap<GuildId, Arc<Player>>,
    events: EventSender,
    gateway: Arc<dyn GatewaySender>,
    transport_factory: TransportFactory,
    migration_strategy: MigrationStrategy,
    region_resolver: RegionResolver,
    recommenders: Vec<Arc<dyn Recommender>>,
    plugins: Vec<Arc<dyn Plugin>>,
    me: Weak<Riffy>,
}

pub struct RiffyBuilder {
    config: Config,
    gateway: Arc<dyn GatewaySender>,
    transport_factory: TransportFactory,
    migration_strategy: MigrationStrategy,
    region_resolver: RegionResolver,
    recommenders: Vec<Arc<dyn Recommender>>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl RiffyBuilder {
    pub fn new(config: Config, gateway: impl GatewaySender + 'static) -> Self {
        Self {
            config,
            gateway: Arc::new(gateway),
            transport_factory: Arc::new(|node: &NodeConfig| -> Result<Arc<dyn RestTransport>> {
                let transport = HttpTransport::new(node.rest_url(), node.password.clone())?;
                Ok(Arc::new(transport))
            }),
            migration_strategy: Arc::new(lowest_penalty),
            region_resolver: Arc::new(region_from_endpoint),
            recommenders: vec![Arc::new(YoutubeMix)],
            plugins: Vec::new(),
        }
    }

    pub fn transport_factory(
        mut self,
        factory: impl Fn(&NodeConfig) -> Result<Arc<dyn RestTransport>> + Send + Sync + 'static,
    ) -> Self {
        self.transport_factory = Arc::new(factory);
        self
    }

    /// Picks a destination from candidates sorted by penalty.
    pub fn migration_strategy(
        mut self,
        strategy: impl Fn(&Player, &[Arc<Node>]) -> Option<Arc<Node>> + Send + Sync + 'static,
    ) -> Self {
        self.migration_strategy = Arc::new(strategy);
        self
    }

    pub fn region_resolver(
        mut self,
        resolver: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.region_resolver = Arc::new(resolver);
        self
    }

    /// Registered recommenders take precedence over the built-in ones.
    pub fn recommender(mut self, recommender: impl Recommender + 'static) -> Self {
        self.recommenders.insert(0, Arc::new(recommender));
        self
    }

    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn build(self) -> (Arc<Riffy>, UnboundedReceiver<RiffyEvent>) {
        let (events, rx) = EventSender::channel();
        let riffy = Arc::new_cyclic(|me| Riffy {
            config: self.config,
            client_id: OnceLock::new(),
            initiated: AtomicBool::new(false),
            nodes: DashMap::new(),
            players: DashMap::new(),
            events,
            gateway: self.gateway,
            transport_factory: self.transport_factory,
            migration_strategy: self.migration_strategy,
            region_resolver: self.region_resolver,
            recommenders: self.recommenders,
            plugins: self.plugins,
            me: me.clone(),
        });
        (riffy, rx)
    }
}

impl Riffy {
    pub fn builder(config: Config, gateway: impl GatewaySender + 'static) -> RiffyBuilder {
        RiffyBuilder::new(config, gateway)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client_id(&self) -> Option<UserId> {
        self.client_id.get().copied()
    }

    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    pub(crate) fn emit(&self, event: RiffyEvent) {
        self.events.emit(event);
    }

    pub(crate) fn debug(&self, message: String) {
        debug!("{}", message);
        self.events.emit(RiffyEvent::Debug(message));
    }

    pub(crate) fn send_gateway(&self, guild_id: &GuildId, payload: Value) {
        self.gateway.send(guild_id, payload);
    }

    pub(crate) fn region_of(&self, endpoint: &str) -> Option<String> {
        (self.region_resolver)(endpoint)
    }

    pub(crate) fn recommender_for(&self, source: &str) -> Option<Arc<dyn Recommender>> {
        self.recommenders
            .iter()
            .find(|r| r.source().eq_ignore_ascii_case(source))
            .cloned()
    }

    /// Connects every configured node and loads plugins. Later calls are no-ops.
    pub async fn init(&self, client_id: impl Into<UserId>) -> Result<()> {
        if self.initiated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let client_id = client_id.into();
        let _ = self.client_id.set(client_id);

        for node in self.config.nodes.clone() {
            self.create_node(node)?;
        }
        self.load_plugins().await;

        info!(
            "Riffy initialized for {} with {} node(s)",
            client_id,
            self.nodes.len()
        );
        Ok(())
    }

    async fn load_plugins(&self) {
        let Some(me) = self.me.upgrade() else { return };
        for plugin in &self.plugins {
            match plugin.load(&me).await {
                Ok(()) => self.debug(format!("Loaded plugin {}", plugin.name())),
                Err(e) => warn!("Plugin {} failed to load: {}", plugin.name(), e),
            }
        }
    }

    /// Unloads plugins and closes every node without touching players.
    pub async fn shutdown(&self) {
        if let Some(me) = self.me.upgrade() {
            for plugin in &self.plugins {
                if let Err(e) = plugin.unload(&me).await {
                    warn!("Plugin {} failed to unload: {}", plugin.name(), e);
                }
            }
        }
        for node in self.nodes() {
            node.destroy(true).await;
        }
    }

    /// Adds a node to the pool without opening its socket.
    pub(crate) fn register_node(&self, config: NodeConfig) -> Result<Arc<Node>> {
        let name = config.name();
        let version = config.rest_version.unwrap_or(self.config.client.rest_version);
        let transport = (self.transport_factory)(&config)?;

        let node = match self.nodes.entry(name.clone()) {
            Entry::Occupied(_) => {
                return Err(RiffyError::Config(format!("node '{}' already exists", name)));
            }
            Entry::Vacant(slot) => slot
                .insert(Arc::new(Node::new(self.me.clone(), config, version, transport)))
                .clone(),
        };

        self.emit(RiffyEvent::NodeCreate { node: name });
        Ok(node)
    }

    pub fn create_node(&self, config: NodeConfig) -> Result<Arc<Node>> {
        let node = self.register_node(config)?;
        node.connect();
        Ok(node)
    }

    pub async fn destroy_node(&self, name: &str) -> Result<()> {
        let node = self
            .node(name)
            .ok_or_else(|| RiffyError::NodeNotFound(name.to_string()))?;
        node.destroy(true).await;
        Ok(())
    }

    pub(crate) fn remove_node(&self, name: &str) {
        self.nodes.remove(name);
    }

    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(name).map(|n| n.value().clone())
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|n| n.value().clone()).collect()
    }

    fn connected_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes
            .iter()
            .filter(|n| n.is_connected())
            .map(|n| n.value().clone())
            .collect()
    }

    /// Connected nodes, fewest REST calls first.
    pub fn least_used_nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes = self.connected_nodes();
        nodes.sort_by_key(|n| n.rest().calls());
        nodes
    }

    /// Connected nodes, lowest penalty first.
    pub fn best_nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes = self.connected_nodes();
        nodes.sort_by_key(|n| n.penalty());
        nodes
    }

    /// Connected nodes serving `region`, fewest REST calls first.
    pub fn fetch_region(&self, region: &str) -> Vec<Arc<Node>> {
        let mut nodes: Vec<_> = self
            .connected_nodes()
            .into_iter()
            .filter(|n| n.config().serves_region(region))
            .collect();
        nodes.sort_by_key(|n| n.rest().calls());
        nodes
    }

    /// Returns the guild's player, creating and joining voice if needed.
    pub fn create_connection(&self, options: ConnectionOptions) -> Result<Arc<Player>> {
        if !self.is_initiated() {
            return Err(RiffyError::NotInitialized);
        }
        if let Some(player) = self.player(&options.guild_id) {
            return Ok(player);
        }

        let regional = options
            .region
            .as_deref()
            .and_then(|region| self.fetch_region(region).into_iter().next());
        let node = match regional {
            Some(node) => node,
            None => self
                .least_used_nodes()
                .into_iter()
                .next()
                .ok_or(RiffyError::NoNodesAvailable)?,
        };

        self.create_player(node, options)
    }

    fn create_player(&self, node: Arc<Node>, options: ConnectionOptions) -> Result<Arc<Player>> {
        let player = match self.players.entry(options.guild_id.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => slot
                .insert(Player::new(
                    self.me.clone(),
                    node.clone(),
                    &options,
                    self.config.player.clone(),
                    self.config.client.multiple_track_history,
                ))
                .clone(),
        };

        info!("[{}] Player created on {}", options.guild_id, node.name());
        player.connect()?;
        self.emit(RiffyEvent::PlayerCreate {
            player: player.clone(),
        });
        Ok(player)
    }

    pub fn player(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.players.get(guild_id).map(|p| p.value().clone())
    }

    pub fn get(&self, guild_id: &GuildId) -> Result<Arc<Player>> {
        self.player(guild_id)
            .ok_or_else(|| RiffyError::PlayerNotFound(guild_id.clone()))
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|p| p.value().clone()).collect()
    }

    pub(crate) fn players_on(&self, node: &Node) -> Vec<Arc<Player>> {
        self.players
            .iter()
            .filter(|p| p.node().name() == node.name())
            .map(|p| p.value().clone())
            .collect()
    }

    /// Drops the registry entry only if it still is `player`.
    pub(crate) fn remove_player(&self, player: &Arc<Player>) -> bool {
        self.players
            .remove_if(player.guild_id(), |_, current| Arc::ptr_eq(current, player))
            .is_some()
    }

    pub async fn destroy_player(&self, guild_id: &GuildId) -> Result<()> {
        let player = self.get(guild_id)?;
        player.destroy(true).await;
        Ok(())
    }

    /// Hands a guild-scoped frame to its player.
    pub(crate) async fn route(&self, node: &Arc<Node>, message: NodeMessage) {
        let Some(guild_id) = message.guild_id().cloned() else {
            return;
        };
        let Some(player) = self.player(&guild_id) else {
            debug!("[{}] No player for frame from {}", guild_id, node.name());
            return;
        };

        match message {
            NodeMessage::PlayerUpdate { state, .. } => player.handle_update(node, state),
            NodeMessage::Event { event, .. } => player.handle_event(node, event).await,
            _ => {}
        }
    }

    /// Feeds a raw gateway dispatch (`{ t, d }`) to the matching player.
    /// Anything but voice server/state updates is ignored.
    pub async fn update_voice_state(&self, packet: &Value) -> Result<()> {
        let kind = packet.get("t").and_then(Value::as_str).unwrap_or_default();
        if kind != "VOICE_SERVER_UPDATE" && kind != "VOICE_STATE_UPDATE" {
            return Ok(());
        }

        let data = &packet["d"];
        let Some(guild_id) = data.get("guild_id").and_then(Value::as_str).map(GuildId::from) else {
            return Ok(());
        };
        let Some(player) = self.player(&guild_id) else {
            return Ok(());
        };

        if kind == "VOICE_SERVER_UPDATE" {
            let token = data.get("token").and_then(Value::as_str).unwrap_or_default();
            return player
                .set_server_update(data.get("endpoint").and_then(Value::as_str), token)
                .await;
        }

        let client_id = self.client_id().ok_or(RiffyError::NotInitialized)?;
        if !client_id.matches(&data["user_id"]) {
            return Ok(());
        }
        player
            .set_state_update(
                data.get("session_id").and_then(Value::as_str),
                data.get("channel_id").and_then(Value::as_str).map(ChannelId::from),
                data.get("self_deaf").and_then(Value::as_bool).unwrap_or(false),
                data.get("self_mute").and_then(Value::as_bool).unwrap_or(false),
            )
            .await
    }
}

#[cfg(test)]
mod tests;
