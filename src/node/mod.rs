use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    common::{
        errors::{Result, RiffyError},
        types::now_ms,
    },
    configs::{NodeConfig, RestVersion},
    protocol::{NodeInfo, NodeMessage, NodeStats},
    rest::{Rest, RestTransport},
    riffy::{Riffy, RiffyEvent},
};

mod socket;

pub const CLIENT_NAME: &str = concat!("riffy/", env!("CARGO_PKG_VERSION"));

/// One backend connection: socket lifecycle, session, stats and penalty.
pub struct Node {
    name: String,
    config: NodeConfig,
    rest: Rest,
    riffy: Weak<Riffy>,
    connected: AtomicBool,
    ready_seen: AtomicBool,
    destroyed: AtomicBool,
    migrating: AtomicBool,
    stats: RwLock<NodeStats>,
    last_stats: AtomicU64,
    info: RwLock<Option<NodeInfo>>,
    reconnect_attempts: AtomicU32,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    socket: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("version", &self.rest.version())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Marks a node as being drained; released on drop.
pub(crate) struct MigrationBatch<'a>(&'a AtomicBool);

impl Drop for MigrationBatch<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Node {
    pub(crate) fn new(
        riffy: Weak<Riffy>,
        config: NodeConfig,
        version: RestVersion,
        transport: Arc<dyn RestTransport>,
    ) -> Self {
        let name = config.name();
        let rest = Rest::new(name.clone(), version, transport);
        if let Some(session) = &config.session_id {
            rest.set_session_id(session.clone());
        }

        Self {
            name,
            config,
            rest,
            riffy,
            connected: AtomicBool::new(false),
            ready_seen: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            migrating: AtomicBool::new(false),
            stats: RwLock::new(NodeStats::default()),
            last_stats: AtomicU64::new(0),
            info: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            reconnect_task: Mutex::new(None),
            socket: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn rest(&self) -> &Rest {
        &self.rest
    }

    pub fn version(&self) -> RestVersion {
        self.rest.version()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn session_id(&self) -> Option<String> {
        self.rest.session_id()
    }

    pub fn stats(&self) -> NodeStats {
        self.stats.read().clone()
    }

    /// Unix millis of the last `stats` frame, 0 if none yet.
    pub fn last_stats(&self) -> u64 {
        self.last_stats.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> Option<NodeInfo> {
        self.info.read().clone()
    }

    pub fn regions(&self) -> &[String] {
        &self.config.regions
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Lower is better. Disconnected nodes are never worth picking.
    pub fn penalty(&self) -> u64 {
        if !self.is_connected() {
            return u64::MAX;
        }
        self.stats.read().penalty()
    }

    /// `None` while another batch is already draining this node.
    pub(crate) fn begin_migration(&self) -> Option<MigrationBatch<'_>> {
        (!self.migrating.swap(true, Ordering::AcqRel)).then(|| MigrationBatch(&self.migrating))
    }

    fn riffy(&self) -> Result<Arc<Riffy>> {
        self.riffy.upgrade().ok_or(RiffyError::NotInitialized)
    }

    fn emit(&self, event: RiffyEvent) {
        if let Some(riffy) = self.riffy.upgrade() {
            riffy.emit(event);
        }
    }

    fn debug(&self, message: String) {
        debug!("[{}] {}", self.name, message);
        self.emit(RiffyEvent::Debug(format!("[Node {}] {}", self.name, message)));
    }

    fn node_error(&self, error: String) {
        warn!("[{}] {}", self.name, error);
        self.emit(RiffyEvent::NodeError {
            node: self.name.clone(),
            error,
        });
    }

    /// Opens a fresh socket, closing any previous one first.
    pub fn connect(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.socket.lock().replace(token.clone()) {
            previous.cancel();
        }

        self.debug(format!(
            "Connecting to {} (attempt {})",
            self.config.ws_url(self.version()),
            self.reconnect_attempts()
        ));
        tokio::spawn(socket::run(self.clone(), token));
    }

    pub(crate) async fn handle_open(self: &Arc<Self>) {
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.connected.store(true, Ordering::Release);

        info!("[{}] Connected", self.name);
        self.emit(RiffyEvent::NodeConnect {
            node: self.name.clone(),
        });

        let Ok(riffy) = self.riffy() else { return };

        match self.rest.info().await {
            Ok(info) => *self.info.write() = Some(info),
            Err(e) if !riffy.config().client.bypass_info_check => {
                self.node_error(format!("Failed to fetch node info: {}", e));
            }
            Err(e) => self.debug(format!("Ignoring failed info fetch: {}", e)),
        }
    }

    pub(crate) async fn handle_message(self: &Arc<Self>, text: &str) {
        let message = match NodeMessage::parse(text) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                self.debug(format!("Dropping malformed frame: {}", e));
                return;
            }
        };

        match message {
            NodeMessage::Ready { session_id, resumed } => {
                self.rest.set_session_id(session_id.clone());
                self.rest.set_session_valid(true);
                self.debug(format!("Ready, session {} (resumed: {})", session_id, resumed));

                if !self.ready_seen.swap(true, Ordering::AcqRel) {
                    self.configure_resuming().await;
                }
                if !resumed && self.config.auto_resume {
                    self.resume_players().await;
                }
            }
            NodeMessage::Stats(stats) => {
                *self.stats.write() = stats;
                self.last_stats.store(now_ms(), Ordering::Relaxed);
            }
            NodeMessage::Unknown { op, .. } => {
                self.node_error(format!("Unknown op '{}'", op));
            }
            routed => {
                if let Ok(riffy) = self.riffy() {
                    riffy.route(self, routed).await;
                }
            }
        }
    }

    /// Replays every bound player onto a fresh session.
    async fn resume_players(self: &Arc<Self>) {
        let Ok(riffy) = self.riffy() else { return };
        for player in riffy.players_on(self) {
            if let Err(e) = player.restart().await {
                warn!("[{}] Auto-resume of {} failed: {}", self.name, player.guild_id(), e);
            }
        }
    }

    async fn configure_resuming(&self) {
        let key = self.config.resume_key.as_deref();
        if self.version() == RestVersion::V3 && key.is_none() {
            return;
        }
        match self.rest.update_session(key, self.config.resume_timeout).await {
            Ok(()) => self.debug(format!(
                "Resuming enabled with a {}s timeout",
                self.config.resume_timeout
            )),
            Err(e) => self.node_error(format!("Failed to enable resuming: {}", e)),
        }
    }

    pub(crate) async fn handle_error(self: &Arc<Self>, err: RiffyError) {
        let was_connected = self.is_connected();
        self.node_error(format!("Socket error: {}", err));

        if was_connected {
            self.spawn_migration(|riffy| riffy.config().client.migrate_on_failure);
        }
    }

    pub(crate) async fn handle_close(self: &Arc<Self>, code: u16, reason: &str) {
        self.connected.store(false, Ordering::Release);
        self.rest.set_session_valid(false);

        warn!("[{}] Disconnected ({}): {}", self.name, code, reason);
        self.emit(RiffyEvent::NodeDisconnect {
            node: self.name.clone(),
            code,
            reason: reason.to_string(),
        });

        if self.destroyed.load(Ordering::Acquire) {
            return;
        }

        self.spawn_migration(|riffy| riffy.config().client.migrate_on_disconnect);
        self.reconnect();
    }

    fn spawn_migration(self: &Arc<Self>, enabled: impl Fn(&Riffy) -> bool) {
        let Ok(riffy) = self.riffy() else { return };
        if !enabled(&riffy) {
            return;
        }

        let node = self.clone();
        tokio::spawn(async move {
            if let Err(e) = riffy.migrate_node(&node).await {
                warn!("[{}] Automatic migration failed: {}", node.name, e);
            }
        });
    }

    /// Schedules one reconnect attempt unless one is already pending.
    pub fn reconnect(self: &Arc<Self>) {
        let mut slot = self.reconnect_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let node = self.clone();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(node.config.reconnect_timeout()).await;

            if node.destroyed.load(Ordering::Acquire) {
                return;
            }

            let attempts = node.reconnect_attempts.load(Ordering::Relaxed);
            if attempts >= node.config.reconnect_tries {
                node.reconnect_task.lock().take();
                error!("[{}] Giving up after {} reconnect attempts", node.name, attempts);
                node.node_error(format!(
                    "Unable to connect after {} attempts",
                    node.config.reconnect_tries
                ));
                node.destroy(false).await;
                return;
            }

            // the socket may close again before this task returns
            node.reconnect_task.lock().take();
            let attempt = node.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            node.emit(RiffyEvent::NodeReconnect {
                node: node.name.clone(),
                attempt,
            });
            node.connect();
        }));
    }

    /// Removes the node from the pool. A clean destroy leaves bound players
    /// alone; otherwise they are destroyed first.
    pub async fn destroy(self: &Arc<Self>, clean: bool) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }

        let riffy = self.riffy.upgrade();
        if !clean {
            if let Some(riffy) = &riffy {
                for player in riffy.players_on(self) {
                    player.destroy(true).await;
                }
            }
        }

        if let Some(token) = self.socket.lock().take() {
            token.cancel();
        }
        self.connected.store(false, Ordering::Release);
        self.rest.set_session_valid(false);

        if let Some(riffy) = riffy {
            riffy.remove_node(&self.name);
        }
        info!("[{}] Destroyed (clean: {})", self.name, clean);
        self.emit(RiffyEvent::NodeDestroy {
            node: self.name.clone(),
        });
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        protocol::tracks::tests::track,
        testing::{Harness, event_names},
    };

    #[tokio::test]
    async fn penalty_is_max_until_connected() {
        let h = Harness::with_nodes(&["a"]).await;
        let node = h.riffy.node("a").unwrap();
        node.handle_message(
            &json!({
                "op": "stats", "players": 3, "playingPlayers": 3, "uptime": 1,
                "cpu": { "cores": 2, "systemLoad": 0.9, "lavalinkLoad": 0.1 },
                "frameStats": { "sent": 1, "deficit": 5, "nulled": 2 }
            })
            .to_string(),
        )
        .await;
        assert_eq!(node.penalty(), 809);
        assert!(node.last_stats() > 0);

        node.handle_close(1006, "gone").await;
        assert_eq!(node.penalty(), u64::MAX);
        node.destroy(true).await;
    }

    #[tokio::test]
    async fn ready_rotates_session_and_enables_resuming_once() {
        let h = Harness::with_nodes(&["a"]).await;
        let node = h.riffy.node("a").unwrap();
        let mock = h.mock("a");
        assert_eq!(node.session_id().as_deref(), Some("session-a"));

        let resumes = mock
            .requests()
            .into_iter()
            .filter(|r| r.path == "/v4/sessions/session-a")
            .count();
        assert_eq!(resumes, 1);

        node.handle_message(r#"{"op":"ready","resumed":true,"sessionId":"rotated"}"#)
            .await;
        assert_eq!(node.session_id().as_deref(), Some("rotated"));
        assert!(mock.requests().iter().all(|r| r.path != "/v4/sessions/rotated"));
    }

    #[tokio::test]
    async fn close_invalidates_session_calls() {
        let h = Harness::with_nodes(&["a"]).await;
        let node = h.riffy.node("a").unwrap();
        node.handle_close(4000, "bye").await;

        assert!(matches!(
            node.rest().get_players().await,
            Err(RiffyError::NoSession(_))
        ));
        // the id survives for resuming
        assert_eq!(node.session_id().as_deref(), Some("session-a"));
        node.destroy(true).await;
    }

    #[tokio::test]
    async fn unknown_op_raises_node_error() {
        let mut h = Harness::with_nodes(&["a"]).await;
        let node = h.riffy.node("a").unwrap();
        node.handle_message(r#"{"op":"mystery"}"#).await;
        node.handle_message(r#"{"noop":true}"#).await;
        assert_eq!(event_names(&h.drain()), vec!["nodeError"]);
    }

    #[tokio::test]
    async fn failed_info_fetch_is_reported_unless_bypassed() {
        let mut h = Harness::with_nodes(&["a"]).await;
        let node = h.riffy.node("a").unwrap();
        h.mock("a").fail_on("/v4/info");
        node.handle_open().await;

        let names = event_names(&h.drain());
        assert_eq!(names, vec!["nodeConnect", "nodeError"]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_reconnects_destroys_the_node() {
        let mut h = Harness::with_nodes(&["a"]).await;
        let node = h.riffy.node("a").unwrap();
        node.reconnect_attempts
            .store(node.config.reconnect_tries, Ordering::Relaxed);

        node.handle_close(1006, "down").await;
        tokio::time::sleep(node.config.reconnect_timeout() * 2).await;

        assert!(node.is_destroyed());
        assert!(h.riffy.node("a").is_none());
        let names = event_names(&h.drain());
        assert_eq!(names, vec!["nodeDisconnect", "nodeError", "nodeDestroy"]);
    }

    #[tokio::test]
    async fn fresh_session_replays_players_when_auto_resuming() {
        let h = Harness::with_nodes(&[]).await;
        let mut config = NodeConfig::new("localhost", 2333, "youshallnotpass")
            .with_name("r")
            .with_regions(["r"]);
        config.auto_resume = true;
        let node = h.riffy.register_node(config).unwrap();
        node.handle_open().await;
        node.handle_message(r#"{"op":"ready","resumed":false,"sessionId":"old"}"#)
            .await;

        let player = h.connected_player("1", "r").await;
        player.with_queue(|q| q.add(track("x", "x", "artist", 10_000)));
        player.play().await.unwrap();

        let mock = h.mock("r");
        node.handle_close(1006, "gone").await;
        let before_reopen = mock.requests().len();
        node.handle_open().await;
        assert!(
            mock.requests()[before_reopen..]
                .iter()
                .all(|r| !r.path.starts_with("/v4/sessions/")),
            "nothing may touch a session before ready"
        );

        node.handle_message(r#"{"op":"ready","resumed":false,"sessionId":"new"}"#)
            .await;
        let replayed = mock.patches("/v4/sessions/new/players/1");
        assert_eq!(replayed.len(), 1);
        assert_eq!(
            replayed[0]["track"]["encoded"],
            json!(track("x", "x", "artist", 10_000).encoded)
        );
        assert!(mock.requests()[before_reopen..]
            .iter()
            .all(|r| !r.path.starts_with("/v4/sessions/old")));
        node.destroy(true).await;
    }

    #[tokio::test]
    async fn resumed_session_leaves_players_alone() {
        let h = Harness::with_nodes(&[]).await;
        let mut config = NodeConfig::new("localhost", 2333, "youshallnotpass")
            .with_name("r")
            .with_regions(["r"]);
        config.auto_resume = true;
        let node = h.riffy.register_node(config).unwrap();
        node.handle_open().await;
        node.handle_message(r#"{"op":"ready","resumed":false,"sessionId":"old"}"#)
            .await;

        let player = h.connected_player("1", "r").await;
        player.with_queue(|q| q.add(track("x", "x", "artist", 10_000)));
        player.play().await.unwrap();
        let mock = h.mock("r");
        let sent = mock.patches("/v4/sessions/old/players/1").len();

        node.handle_close(1006, "gone").await;
        node.handle_open().await;
        node.handle_message(r#"{"op":"ready","resumed":true,"sessionId":"old"}"#)
            .await;
        assert_eq!(mock.patches("/v4/sessions/old/players/1").len(), sent);
        node.destroy(true).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_failed_retry_schedules_the_next_one() {
        let mut h = Harness::with_nodes(&[]).await;
        let mut config = NodeConfig::new("not a host", 2333, "youshallnotpass").with_name("z");
        config.reconnect_timeout_ms = 1;
        let node = h.riffy.register_node(config).unwrap();

        node.handle_close(1006, "down").await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !node.is_destroyed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("retries stalled");

        let names = event_names(&h.drain());
        assert_eq!(names.iter().filter(|n| **n == "nodeReconnect").count(), 3);
        assert_eq!(names.last(), Some(&"nodeDestroy"));
        assert!(h.riffy.node("z").is_none());
    }

    #[tokio::test]
    async fn non_clean_destroy_takes_players_down() {
        let mut h = Harness::with_nodes(&["a", "b"]).await;
        let player = h.connected_player("1", "a").await;
        let node = h.riffy.node("a").unwrap();
        h.drain();

        node.destroy(false).await;
        assert!(h.riffy.get(player.guild_id()).is_err());
        assert!(h.riffy.node("b").is_some());
        assert!(event_names(&h.drain()).contains(&"nodeDestroy"));
    }
}
