//! Mock-backed nodes for exercising node, player and migration flows
//! without a running Lavalink.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    common::{
        errors::{Result, RiffyError},
        types::GuildId,
    },
    configs::{Config, NodeConfig},
    player::{ConnectionOptions, Player},
    rest::RestTransport,
    riffy::{Riffy, RiffyEvent},
};

pub(crate) const CLIENT_ID: u64 = 1;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Records every request and answers from canned responses matched by the
/// longest path prefix. Unmatched paths get an empty body.
#[derive(Default)]
pub(crate) struct MockTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    responses: Mutex<Vec<(String, Value)>>,
    failures: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn respond(&self, prefix: &str, body: Value) {
        self.responses.lock().push((prefix.to_string(), body));
    }

    /// Requests under `prefix` fail with a 500.
    pub fn fail_on(&self, prefix: &str) {
        self.failures.lock().push(prefix.to_string());
    }

    /// Every later request waits `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn patches(&self, path: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::PATCH && r.path.starts_with(path))
            .filter_map(|r| r.body)
            .collect()
    }
}

#[async_trait]
impl RestTransport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        self.requests.lock().push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures.lock().iter().any(|p| path.starts_with(p.as_str())) {
            return Err(RiffyError::from_response(500, path, "mock failure"));
        }

        let responses = self.responses.lock();
        let matched = responses
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, body)| body.clone());
        Ok(matched)
    }
}

pub(crate) struct Harness {
    pub riffy: Arc<Riffy>,
    pub events: UnboundedReceiver<RiffyEvent>,
    /// Every op 4 payload handed to the gateway.
    pub gateway: Arc<Mutex<Vec<(GuildId, Value)>>>,
    mocks: Arc<Mutex<HashMap<String, Arc<MockTransport>>>>,
}

impl Harness {
    pub async fn with_nodes(names: &[&str]) -> Self {
        Self::with_config(Config::default(), names).await
    }

    /// Builds an initialized client whose nodes are open, ready and serve a
    /// region named after themselves. Setup events are drained.
    pub async fn with_config(config: Config, names: &[&str]) -> Self {
        let mocks: Arc<Mutex<HashMap<String, Arc<MockTransport>>>> = Arc::default();
        let gateway: Arc<Mutex<Vec<(GuildId, Value)>>> = Arc::default();

        let sent = gateway.clone();
        let registry = mocks.clone();
        let (riffy, events) = Riffy::builder(config, move |guild: &GuildId, payload: Value| {
            sent.lock().push((guild.clone(), payload));
        })
        .transport_factory(move |node: &NodeConfig| {
            let mock = Arc::new(MockTransport::default());
            mock.respond("/v4/info", json!({}));
            registry.lock().insert(node.name(), mock.clone());
            Ok(mock as Arc<dyn RestTransport>)
        })
        .build();

        riffy.init(CLIENT_ID).await.unwrap();

        for name in names {
            let node = riffy
                .register_node(NodeConfig::new("localhost", 2333, "youshallnotpass")
                    .with_name(*name)
                    .with_regions([*name]))
                .unwrap();
            node.handle_open().await;
            node.handle_message(
                &json!({ "op": "ready", "resumed": false, "sessionId": format!("session-{name}") })
                    .to_string(),
            )
            .await;
        }

        let mut harness = Self {
            riffy,
            events,
            gateway,
            mocks,
        };
        harness.drain();
        harness
    }

    pub fn mock(&self, node: &str) -> Arc<MockTransport> {
        self.mocks.lock()[node].clone()
    }

    pub fn drain(&mut self) -> Vec<RiffyEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// A player on `node` with a complete voice handshake.
    pub async fn connected_player(&self, guild: &str, node: &str) -> Arc<Player> {
        let player = self
            .riffy
            .create_connection(ConnectionOptions::new(guild, "100").region(node))
            .unwrap();
        self.riffy
            .update_voice_state(&json!({
                "t": "VOICE_STATE_UPDATE",
                "d": {
                    "guild_id": guild,
                    "user_id": CLIENT_ID.to_string(),
                    "session_id": "voice-session",
                    "channel_id": "100",
                    "self_deaf": true,
                    "self_mute": false
                }
            }))
            .await
            .unwrap();
        self.riffy
            .update_voice_state(&json!({
                "t": "VOICE_SERVER_UPDATE",
                "d": {
                    "guild_id": guild,
                    "token": "voice-token",
                    "endpoint": "rotterdam1.discord.media:443"
                }
            }))
            .await
            .unwrap();
        player
    }
}

/// Event names in order, without debug chatter.
pub(crate) fn event_names(events: &[RiffyEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(RiffyEvent::name)
        .filter(|name| *name != "debug")
        .collect()
}
