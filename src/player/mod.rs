use std::{
    collections::{HashMap, VecDeque},
    fmt,
    str::FromStr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    common::{
        errors::{Result, RiffyError},
        types::{ChannelId, GuildId, now_ms},
    },
    configs::PlayerConfig,
    node::Node,
    protocol::{Filters, PlayerEvent, PlayerState, PlayerUpdate, Track, TrackEndReason},
    riffy::{ResolveOptions, Riffy, RiffyEvent},
};

pub mod autoplay;
mod migration;
pub mod queue;
pub mod voice;

pub use autoplay::{Recommender, Selection, YoutubeMix};
pub use migration::MigrationSnapshot;
pub use queue::Queue;
pub use voice::VoiceSession;

const HISTORY_LIMIT: usize = 50;
const AUTOPLAY_MEMORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    None,
    Track,
    Queue,
}

impl FromStr for LoopMode {
    type Err = RiffyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "track" => Ok(Self::Track),
            "queue" => Ok(Self::Queue),
            _ => Err(RiffyError::InvalidLoopMode(s.to_string())),
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Track => "track",
            Self::Queue => "queue",
        })
    }
}

/// What `Riffy::create_connection` needs to join a voice channel.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub guild_id: GuildId,
    pub voice_channel: ChannelId,
    pub text_channel: Option<ChannelId>,
    /// Preferred node region, e.g. the guild's voice region.
    pub region: Option<String>,
    pub self_deaf: bool,
    pub self_mute: bool,
    pub volume: Option<u16>,
}

impl ConnectionOptions {
    pub fn new(guild_id: impl Into<GuildId>, voice_channel: impl Into<ChannelId>) -> Self {
        Self {
            guild_id: guild_id.into(),
            voice_channel: voice_channel.into(),
            text_channel: None,
            region: None,
            self_deaf: true,
            self_mute: false,
            volume: None,
        }
    }

    pub fn text_channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.text_channel = Some(channel.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn deaf(mut self, deaf: bool) -> Self {
        self.self_deaf = deaf;
        self
    }

    pub fn mute(mut self, mute: bool) -> Self {
        self.self_mute = mute;
        self
    }

    pub fn volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }
}

struct PlayerInner {
    text_channel: Option<ChannelId>,
    queue: Queue,
    current: Option<Track>,
    position: u64,
    timestamp: u64,
    ping: i64,
    volume: u16,
    loop_mode: LoopMode,
    playing: bool,
    paused: bool,
    previous: VecDeque<Track>,
    filters: Filters,
    /// Identifiers autoplay already picked, oldest first.
    autoplayed: VecDeque<String>,
}

/// Per-guild playback session bound to exactly one node.
pub struct Player {
    guild_id: GuildId,
    riffy: Weak<Riffy>,
    me: Weak<Player>,
    node: RwLock<Arc<Node>>,
    inner: Mutex<PlayerInner>,
    voice: Mutex<VoiceSession>,
    /// Flips to true once the node has voice credentials or confirms voice.
    voice_ready: watch::Sender<bool>,
    migrating: AtomicBool,
    migration_lock: tokio::sync::Mutex<()>,
    fade_task: Mutex<Option<JoinHandle<()>>>,
    data: Mutex<HashMap<String, Value>>,
    config: PlayerConfig,
    multiple_history: bool,
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("node", &self.node.read().name())
            .field("migrating", &self.is_migrating())
            .finish()
    }
}

impl Player {
    pub(crate) fn new(
        riffy: Weak<Riffy>,
        node: Arc<Node>,
        options: &ConnectionOptions,
        config: PlayerConfig,
        multiple_history: bool,
    ) -> Arc<Self> {
        let voice = VoiceSession {
            channel_id: Some(options.voice_channel.clone()),
            self_deaf: options.self_deaf,
            self_mute: options.self_mute,
            ..Default::default()
        };
        let inner = PlayerInner {
            text_channel: options.text_channel.clone(),
            queue: Queue::new(),
            current: None,
            position: 0,
            timestamp: 0,
            ping: -1,
            volume: options.volume.unwrap_or(config.default_volume).min(1000),
            loop_mode: LoopMode::None,
            playing: false,
            paused: false,
            previous: VecDeque::new(),
            filters: Filters::default(),
            autoplayed: VecDeque::new(),
        };

        Arc::new_cyclic(|me| Self {
            guild_id: options.guild_id.clone(),
            riffy,
            me: me.clone(),
            node: RwLock::new(node),
            inner: Mutex::new(inner),
            voice: Mutex::new(voice),
            voice_ready: watch::channel(false).0,
            migrating: AtomicBool::new(false),
            migration_lock: tokio::sync::Mutex::new(()),
            fade_task: Mutex::new(None),
            data: Mutex::new(HashMap::new()),
            config,
            multiple_history,
        })
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn node(&self) -> Arc<Node> {
        self.node.read().clone()
    }

    pub fn current(&self) -> Option<Track> {
        self.inner.lock().current.clone()
    }

    pub fn position(&self) -> u64 {
        self.inner.lock().position
    }

    /// Unix millis of the last position report.
    pub fn timestamp(&self) -> u64 {
        self.inner.lock().timestamp
    }

    pub fn ping(&self) -> i64 {
        self.inner.lock().ping
    }

    pub fn volume(&self) -> u16 {
        self.inner.lock().volume
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.inner.lock().loop_mode
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn is_connected(&self) -> bool {
        *self.voice_ready.borrow()
    }

    pub fn is_migrating(&self) -> bool {
        self.migrating.load(Ordering::Acquire)
    }

    pub fn filters(&self) -> Filters {
        self.inner.lock().filters.clone()
    }

    pub fn voice(&self) -> VoiceSession {
        self.voice.lock().clone()
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.voice.lock().channel_id.clone()
    }

    pub fn text_channel(&self) -> Option<ChannelId> {
        self.inner.lock().text_channel.clone()
    }

    pub fn with_queue<R>(&self, f: impl FnOnce(&mut Queue) -> R) -> R {
        f(&mut self.inner.lock().queue)
    }

    /// Most recently finished track.
    pub fn previous(&self) -> Option<Track> {
        self.inner.lock().previous.front().cloned()
    }

    /// Finished tracks, newest first.
    pub fn previous_tracks(&self) -> Vec<Track> {
        self.inner.lock().previous.iter().cloned().collect()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.lock().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    fn riffy(&self) -> Result<Arc<Riffy>> {
        self.riffy.upgrade().ok_or(RiffyError::NotInitialized)
    }

    fn emit(&self, event: impl FnOnce(Arc<Player>) -> RiffyEvent) {
        if let (Some(riffy), Some(me)) = (self.riffy.upgrade(), self.me.upgrade()) {
            riffy.emit(event(me));
        }
    }

    fn debug(&self, message: String) {
        debug!("[{}] {}", self.guild_id, message);
        if let Some(riffy) = self.riffy.upgrade() {
            riffy.emit(RiffyEvent::Debug(format!("[Player {}] {}", self.guild_id, message)));
        }
    }

    fn is_bound_to(&self, node: &Node) -> bool {
        self.node.read().name() == node.name()
    }

    async fn update(&self, update: PlayerUpdate) -> Result<()> {
        let node = self.node();
        node.rest().update_player(&self.guild_id, &update, false).await?;
        Ok(())
    }

    fn send_voice(
        &self,
        channel: Option<&ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> Result<()> {
        let riffy = self.riffy()?;
        riffy.send_gateway(
            &self.guild_id,
            json!({
                "op": 4,
                "d": {
                    "guild_id": self.guild_id,
                    "channel_id": channel,
                    "self_mute": self_mute,
                    "self_deaf": self_deaf,
                }
            }),
        );
        Ok(())
    }

    /// Asks the gateway to join the tracked voice channel.
    pub fn connect(&self) -> Result<()> {
        let (channel, deaf, mute) = {
            let mut voice = self.voice.lock();
            let channel = voice
                .channel_id
                .clone()
                .ok_or_else(|| RiffyError::NotConnected(self.guild_id.clone()))?;
            voice.establishing = true;
            (channel, voice.self_deaf, voice.self_mute)
        };
        self.debug(format!("Joining voice channel {}", channel));
        self.send_voice(Some(&channel), deaf, mute)
    }

    /// Leaves voice. No-op if not in a channel.
    pub fn disconnect(&self) {
        let left = {
            let mut voice = self.voice.lock();
            voice.establishing = false;
            voice.channel_id.take().is_some()
        };
        self.voice_ready.send_replace(false);
        if !left {
            return;
        }

        if let Err(e) = self.send_voice(None, false, false) {
            warn!("[{}] Could not send voice leave: {}", self.guild_id, e);
        }
        self.emit(|player| RiffyEvent::PlayerDisconnect { player });
    }

    /// Tears the player down locally and on its node. `PlayerDestroy` is
    /// emitted by whichever call removes it from the registry.
    pub async fn destroy(&self, disconnect: bool) {
        self.cancel_fade();
        if disconnect {
            self.disconnect();
        }

        let node = self.node();
        if node.is_connected() {
            if let Err(e) = node.rest().destroy_player(&self.guild_id).await {
                warn!("[{}] Remote destroy on {} failed: {}", self.guild_id, node.name(), e);
            }
        }

        if let (Some(riffy), Some(me)) = (self.riffy.upgrade(), self.me.upgrade()) {
            if riffy.remove_player(&me) {
                self.debug("Destroyed".to_string());
                riffy.emit(RiffyEvent::PlayerDestroy { player: me });
            }
        }
    }

    pub async fn set_server_update(&self, endpoint: Option<&str>, token: &str) -> Result<()> {
        let riffy = self.riffy()?;
        let change = self
            .voice
            .lock()
            .apply_server(endpoint, token, |e| riffy.region_of(e))?;

        match &change.old_region {
            Some(old) if change.new_region.as_ref() != Some(old) => self.debug(format!(
                "Voice region changed from {} to {}",
                old,
                change.new_region.as_deref().unwrap_or("unknown")
            )),
            _ => self.debug(format!(
                "Voice server {}",
                change.new_region.as_deref().unwrap_or("unknown")
            )),
        }

        if change.resume {
            self.debug("Resuming playback paused by the voice drop".to_string());
            self.pause(false).await?;
        }
        self.push_voice().await
    }

    pub async fn set_state_update(
        &self,
        session_id: Option<&str>,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> Result<()> {
        let change = self
            .voice
            .lock()
            .apply_state(session_id, channel_id, self_deaf, self_mute);

        match change {
            voice::StateChange::Left => {
                self.debug("Voice channel left, destroying".to_string());
                self.destroy(false).await;
                return Ok(());
            }
            voice::StateChange::Moved { old, new } => {
                self.emit(|player| RiffyEvent::PlayerMove {
                    player,
                    old_channel: old,
                    new_channel: new,
                });
            }
            voice::StateChange::Same => {}
        }
        self.push_voice().await
    }

    /// Sends voice credentials once all of them are known.
    async fn push_voice(&self) -> Result<()> {
        let Some(credentials) = self.voice.lock().credentials() else {
            return Ok(());
        };
        self.update(PlayerUpdate {
            voice: Some(credentials),
            ..Default::default()
        })
        .await?;
        self.voice_ready.send_replace(true);
        Ok(())
    }

    /// Starts the head of the queue.
    pub async fn play(&self) -> Result<()> {
        let mut ready = self.voice_ready.subscribe();
        if !*ready.borrow() {
            let handshake = self.config.voice_handshake_timeout();
            let _ = tokio::time::timeout(handshake, ready.wait_for(|r| *r)).await;
        }

        if !*ready.borrow() {
            if !self.voice.lock().establishing {
                return Err(RiffyError::NotConnected(self.guild_id.clone()));
            }
            let confirm = self.config.voice_confirm_timeout();
            let confirmed = tokio::time::timeout(confirm, ready.wait_for(|r| *r))
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
            if !confirmed {
                warn!("[{}] Voice connection was never confirmed", self.guild_id);
                self.destroy(true).await;
                return Err(RiffyError::VoiceTimeout(self.guild_id.clone()));
            }
        }

        let next = self.inner.lock().queue.pop_front();
        let Some(mut track) = next else {
            return Err(RiffyError::QueueEmpty);
        };
        if !track.is_playable() {
            let resolved = match self.riffy() {
                Ok(riffy) => riffy.resolve_track(&track).await,
                Err(e) => Err(e),
            };
            track = match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.inner.lock().queue.push_front(track);
                    return Err(e);
                }
            };
        }

        let encoded = track.encoded.clone().unwrap_or_default();
        let volume = {
            let mut inner = self.inner.lock();
            inner.current = Some(track);
            inner.playing = true;
            inner.position = 0;
            inner.volume
        };

        self.update(PlayerUpdate {
            volume: Some(volume),
            ..PlayerUpdate::play(encoded)
        })
        .await
    }

    pub(crate) fn handle_update(&self, node: &Node, state: PlayerState) {
        if self.is_migrating() || !self.is_bound_to(node) {
            return;
        }

        {
            let mut inner = self.inner.lock();
            inner.position = state.position;
            inner.timestamp = if state.time > 0 { state.time } else { now_ms() };
            inner.ping = state.ping;
        }
        if state.connected {
            self.voice.lock().establishing = false;
            self.voice_ready.send_replace(true);
        }
        self.emit(|player| RiffyEvent::PlayerUpdate { player, state });
    }

    pub(crate) async fn handle_event(&self, node: &Node, event: PlayerEvent) {
        if self.is_migrating() || !self.is_bound_to(node) {
            self.debug(format!("Dropping {} from {}", event.name(), node.name()));
            return;
        }

        match event {
            PlayerEvent::TrackStart { track } => {
                let track = {
                    let mut inner = self.inner.lock();
                    inner.playing = true;
                    inner.paused = false;
                    inner.current.clone().unwrap_or(track)
                };
                self.emit(|player| RiffyEvent::TrackStart { player, track });
            }
            PlayerEvent::TrackEnd { track, reason } => self.on_track_end(track, reason).await,
            PlayerEvent::TrackException { track, exception } => {
                self.emit(|player| RiffyEvent::TrackError {
                    player,
                    track,
                    exception,
                });
                if let Err(e) = self.stop().await {
                    warn!("[{}] Stop after exception failed: {}", self.guild_id, e);
                }
            }
            PlayerEvent::TrackStuck {
                track,
                threshold_ms,
            } => {
                self.emit(|player| RiffyEvent::TrackStuck {
                    player,
                    track,
                    threshold_ms,
                });
                if let Err(e) = self.stop().await {
                    warn!("[{}] Stop after stuck track failed: {}", self.guild_id, e);
                }
            }
            PlayerEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
            } => self.on_socket_closed(code, reason, by_remote).await,
            PlayerEvent::Unknown(kind) => {
                if let Some(riffy) = self.riffy.upgrade() {
                    riffy.emit(RiffyEvent::NodeError {
                        node: node.name().to_string(),
                        error: format!("Unknown event '{}' for guild {}", kind, self.guild_id),
                    });
                }
            }
        }
    }

    fn remember(&self, inner: &mut PlayerInner, track: Track) {
        if !self.multiple_history {
            inner.previous.clear();
        }
        inner.previous.push_front(track);
        inner.previous.truncate(HISTORY_LIMIT);
    }

    async fn on_track_end(&self, track: Track, reason: TrackEndReason) {
        let ended = {
            let mut inner = self.inner.lock();
            let ended = inner.current.clone().unwrap_or(track);
            self.remember(&mut inner, ended.clone());
            ended
        };

        self.emit(|player| RiffyEvent::TrackEnd {
            player,
            track: ended.clone(),
            reason: reason.clone(),
        });
        if reason == TrackEndReason::Replaced {
            return;
        }

        let advance = {
            let mut inner = self.inner.lock();
            if !reason.is_terminal() {
                match inner.loop_mode {
                    LoopMode::Track => inner.queue.push_front(ended),
                    LoopMode::Queue => inner.queue.add(ended),
                    LoopMode::None => {}
                }
            }
            if inner.queue.is_empty() {
                inner.playing = false;
                inner.current = None;
                false
            } else {
                true
            }
        };

        if !advance {
            self.emit(|player| RiffyEvent::QueueEnd { player });
            return;
        }
        if let Err(e) = self.play().await {
            warn!("[{}] Could not start the next track: {}", self.guild_id, e);
        }
    }

    async fn on_socket_closed(&self, code: u16, reason: String, by_remote: bool) {
        let establishing = self.voice.lock().establishing;

        if code == 4015 || code == 4009 {
            if let Err(e) = self.connect() {
                warn!("[{}] Voice rejoin failed: {}", self.guild_id, e);
            }
        }

        if !establishing && !self.is_paused() {
            match self.pause(true).await {
                Ok(()) => self.voice.lock().paused_for_voice = true,
                Err(e) => warn!("[{}] Safety pause failed: {}", self.guild_id, e),
            }
        }

        self.debug(format!("Voice socket closed ({}): {}", code, reason));
        self.emit(|player| RiffyEvent::SocketClosed {
            player,
            code,
            reason,
            by_remote,
        });
    }

    /// Stops the current track; the node answers with a `stopped` end event.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.position = 0;
            inner.playing = false;
        }
        self.update(PlayerUpdate::stop()).await
    }

    pub async fn pause(&self, paused: bool) -> Result<()> {
        self.update(PlayerUpdate {
            paused: Some(paused),
            ..Default::default()
        })
        .await?;

        let mut inner = self.inner.lock();
        inner.paused = paused;
        inner.playing = !paused;
        if !paused {
            self.voice.lock().paused_for_voice = false;
        }
        Ok(())
    }

    /// Seeks within the current track, clamped to its length.
    pub async fn seek(&self, position: u64) -> Result<()> {
        let target = {
            let inner = self.inner.lock();
            let Some(current) = &inner.current else {
                return Ok(());
            };
            match current.info.length {
                0 => position,
                length => position.min(length),
            }
        };

        self.update(PlayerUpdate {
            position: Some(target),
            ..Default::default()
        })
        .await?;
        self.inner.lock().position = target;
        Ok(())
    }

    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        if volume > 1000 {
            return Err(RiffyError::InvalidVolume(volume as u32));
        }
        self.update(PlayerUpdate {
            volume: Some(volume),
            ..Default::default()
        })
        .await?;
        self.inner.lock().volume = volume;
        Ok(())
    }

    pub fn set_loop(&self, mode: LoopMode) {
        self.inner.lock().loop_mode = mode;
    }

    pub fn set_text_channel(&self, channel: impl Into<ChannelId>) {
        self.inner.lock().text_channel = Some(channel.into());
    }

    pub fn set_voice_channel(
        &self,
        channel: impl Into<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        let channel = channel.into();
        {
            let mut voice = self.voice.lock();
            if voice.channel_id.as_ref() == Some(&channel) {
                return Err(RiffyError::AlreadyInChannel(channel.to_string()));
            }
            voice.channel_id = Some(channel);
            voice.self_mute = self_mute;
            voice.self_deaf = self_deaf;
        }
        self.connect()
    }

    /// Re-sends the current track at the last known position, e.g. after
    /// the node lost its state.
    pub async fn restart(&self) -> Result<()> {
        let update = {
            let inner = self.inner.lock();
            let Some(current) = &inner.current else {
                return Ok(());
            };
            PlayerUpdate {
                encoded_track: Some(current.encoded.clone()),
                position: Some(inner.position),
                volume: Some(inner.volume),
                paused: Some(inner.paused),
                filters: (!inner.filters.is_all_none()).then(|| inner.filters.clone()),
                voice: self.voice.lock().credentials(),
                ..Default::default()
            }
        };
        self.update(update).await?;

        let mut inner = self.inner.lock();
        inner.playing = !inner.paused;
        Ok(())
    }

    /// Merges `filters` into the active set and sends the result.
    pub async fn set_filters(&self, filters: Filters) -> Result<()> {
        let mut merged = self.filters();
        merged.merge_from(filters);
        self.update(PlayerUpdate {
            filters: Some(merged.clone()),
            ..Default::default()
        })
        .await?;
        self.inner.lock().filters = merged;
        Ok(())
    }

    pub async fn clear_filters(&self) -> Result<()> {
        self.update(PlayerUpdate {
            filters: Some(Filters::default()),
            ..Default::default()
        })
        .await?;
        self.inner.lock().filters = Filters::default();
        Ok(())
    }

    /// Ramps the volume to `target` over `duration`. A new fade, or
    /// destroying the player, cancels the running one.
    pub fn fade_volume(&self, target: u16, duration: Duration) -> Result<()> {
        if target > 1000 {
            return Err(RiffyError::InvalidVolume(target as u32));
        }
        self.cancel_fade();

        let from = self.volume() as i64;
        let step = self.config.fade_step();
        let steps = (duration.as_millis() / step.as_millis()).max(1) as i64;
        let me = self.me.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(step);
            ticker.tick().await;
            for i in 1..=steps {
                ticker.tick().await;
                let Some(player) = me.upgrade() else { return };
                let volume = from + (target as i64 - from) * i / steps;
                if let Err(e) = player.set_volume(volume as u16).await {
                    warn!("[{}] Fade aborted: {}", player.guild_id, e);
                    return;
                }
            }
        });
        *self.fade_task.lock() = Some(task);
        Ok(())
    }

    pub fn cancel_fade(&self) {
        if let Some(task) = self.fade_task.lock().take() {
            task.abort();
        }
    }

    /// Queues and plays something related to the last finished track.
    /// Returns false (and stops) when nothing suitable was found.
    pub async fn autoplay(&self) -> bool {
        match self.try_autoplay().await {
            Ok(true) => true,
            Ok(false) | Err(_) => {
                if let Err(e) = self.stop().await {
                    debug!("[{}] Stop after autoplay miss failed: {}", self.guild_id, e);
                }
                false
            }
        }
    }

    async fn try_autoplay(&self) -> Result<bool> {
        let Some(previous) = self.previous() else {
            return Ok(false);
        };
        let riffy = self.riffy()?;
        let Some(recommender) = riffy.recommender_for(&previous.info.source_name) else {
            self.debug(format!("No recommender for source '{}'", previous.info.source_name));
            return Ok(false);
        };
        let Some(query) = recommender.recommend(&previous).await? else {
            return Ok(false);
        };

        let mut options = ResolveOptions::new(query).requester(previous.requester.clone());
        if let Some(source) = recommender.search_source() {
            options = options.source(source);
        }
        let result = riffy.resolve(options).await?;
        if result.tracks.is_empty() {
            return Ok(false);
        }

        let picked = {
            let mut inner = self.inner.lock();
            let fresh: Vec<&Track> = result
                .tracks
                .iter()
                .filter(|t| !inner.autoplayed.contains(&t.info.identifier))
                .collect();
            let pool: Vec<&Track> = if fresh.is_empty() {
                result.tracks.iter().collect()
            } else {
                fresh
            };

            let picked = match recommender.selection() {
                Selection::First => pool.first().map(|t| (*t).clone()),
                Selection::Random => pool.choose(&mut rand::thread_rng()).map(|t| (*t).clone()),
            };
            let Some(picked) = picked else {
                return Ok(false);
            };

            inner.autoplayed.push_back(picked.info.identifier.clone());
            while inner.autoplayed.len() > AUTOPLAY_MEMORY {
                inner.autoplayed.pop_front();
            }
            inner.queue.add(picked.clone());
            picked
        };

        self.debug(format!("Autoplay picked {}", picked.info.title));
        self.play().await?;
        Ok(true)
    }
}
