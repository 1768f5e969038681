use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use reqwest::Method;
use serde_json::{Value, json};

use crate::{
    common::{
        errors::{Result, RiffyError},
        types::GuildId,
    },
    configs::RestVersion,
    protocol::{LoadResult, NodeInfo, NodePlayer, NodeStats, PlayerUpdate, Track},
};

pub mod transport;

pub use transport::{HttpTransport, RestTransport};

#[derive(Debug, Default)]
struct SessionSlot {
    id: Option<String>,
    /// Only true while the socket is open.
    valid: bool,
}

/// Typed client for one node's REST API.
///
/// Every call bumps `calls`, which ranks nodes for new players.
pub struct Rest {
    node: String,
    version: RestVersion,
    transport: Arc<dyn RestTransport>,
    session: RwLock<SessionSlot>,
    calls: AtomicU64,
}

impl Rest {
    pub fn new(
        node: impl Into<String>,
        version: RestVersion,
        transport: Arc<dyn RestTransport>,
    ) -> Self {
        Self {
            node: node.into(),
            version,
            transport,
            session: RwLock::new(SessionSlot::default()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn version(&self) -> RestVersion {
        self.version
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.read().id.clone()
    }

    pub(crate) fn set_session_id(&self, id: impl Into<String>) {
        self.session.write().id = Some(id.into());
    }

    /// Session calls are refused while invalid; the id itself is kept for resuming.
    pub(crate) fn set_session_valid(&self, valid: bool) {
        self.session.write().valid = valid;
    }

    fn valid_session(&self) -> Result<String> {
        let slot = self.session.read();
        match (&slot.id, slot.valid) {
            (Some(id), true) => Ok(id.clone()),
            _ => Err(RiffyError::NoSession(self.node.clone())),
        }
    }

    async fn call(
        &self,
        method: Method,
        path: String,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.transport
            .request(method, &format!("/{}/{}", self.version, path), body)
            .await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: String) -> Result<T> {
        let value = self.call(Method::GET, path, None).await?.unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    pub async fn info(&self) -> Result<NodeInfo> {
        self.get("info".to_string()).await
    }

    pub async fn stats(&self) -> Result<NodeStats> {
        self.get("stats".to_string()).await
    }

    pub async fn load_tracks(
        &self,
        identifier: &str,
        requester: Option<&Value>,
    ) -> Result<LoadResult> {
        let path = format!("loadtracks?identifier={}", urlencoding::encode(identifier));
        let raw = self.call(Method::GET, path, None).await?.unwrap_or(Value::Null);
        LoadResult::from_response(self.version, raw, requester)
    }

    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let path = format!("decodetrack?encodedTrack={}", urlencoding::encode(encoded));
        let mut track: Track = self.get(path).await?;
        // v3 answers with the bare info object
        if track.encoded.is_none() {
            track.encoded = Some(encoded.to_string());
        }
        Ok(track)
    }

    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        let raw = self
            .call(Method::POST, "decodetracks".to_string(), Some(json!(encoded)))
            .await?
            .unwrap_or(Value::Null);
        Ok(serde_json::from_value(raw)?)
    }

    pub async fn get_players(&self) -> Result<Vec<NodePlayer>> {
        let session = self.valid_session()?;
        self.get(format!("sessions/{}/players", session)).await
    }

    pub async fn get_player(&self, guild_id: &GuildId) -> Result<NodePlayer> {
        let session = self.valid_session()?;
        self.get(format!("sessions/{}/players/{}", session, guild_id)).await
    }

    pub async fn update_player(
        &self,
        guild_id: &GuildId,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<Option<NodePlayer>> {
        let session = self.valid_session()?;
        let path = format!(
            "sessions/{}/players/{}?noReplace={}",
            session, guild_id, no_replace
        );
        let body = update.to_body(self.version)?;
        match self.call(Method::PATCH, path, Some(body)).await? {
            Some(raw) => Ok(serde_json::from_value(raw).ok()),
            None => Ok(None),
        }
    }

    pub async fn destroy_player(&self, guild_id: &GuildId) -> Result<()> {
        let session = self.valid_session()?;
        self.call(
            Method::DELETE,
            format!("sessions/{}/players/{}", session, guild_id),
            None,
        )
        .await?;
        Ok(())
    }

    /// Enables node-side resuming. v3 keys it by resume key, v4 by session.
    pub async fn update_session(&self, resume_key: Option<&str>, timeout_secs: u64) -> Result<()> {
        let session = self.valid_session()?;
        let body = match self.version {
            RestVersion::V4 => json!({ "resuming": true, "timeout": timeout_secs }),
            RestVersion::V3 => json!({ "resumingKey": resume_key, "timeout": timeout_secs }),
        };
        self.call(Method::PATCH, format!("sessions/{}", session), Some(body))
            .await?;
        Ok(())
    }

    pub async fn routeplanner_status(&self) -> Result<Option<Value>> {
        self.call(Method::GET, "routeplanner/status".to_string(), None)
            .await
    }

    pub async fn routeplanner_free_address(&self, address: &str) -> Result<()> {
        self.call(
            Method::POST,
            "routeplanner/free/address".to_string(),
            Some(json!({ "address": address })),
        )
        .await?;
        Ok(())
    }

    pub async fn routeplanner_free_all(&self) -> Result<()> {
        self.call(Method::POST, "routeplanner/free/all".to_string(), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn rest(version: RestVersion) -> (Rest, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::default());
        let rest = Rest::new("main", version, mock.clone());
        (rest, mock)
    }

    #[tokio::test]
    async fn session_calls_need_a_valid_session() {
        let (rest, mock) = rest(RestVersion::V4);
        let guild = GuildId::from("1");

        assert!(matches!(
            rest.destroy_player(&guild).await,
            Err(RiffyError::NoSession(n)) if n == "main"
        ));

        rest.set_session_id("abc");
        assert!(rest.destroy_player(&guild).await.is_err());

        rest.set_session_valid(true);
        rest.destroy_player(&guild).await.unwrap();
        assert_eq!(mock.requests()[0].path, "/v4/sessions/abc/players/1");
        assert_eq!(mock.requests()[0].method, Method::DELETE);
    }

    #[tokio::test]
    async fn every_call_is_counted() {
        let (rest, _mock) = rest(RestVersion::V4);
        let _ = rest.info().await;
        let _ = rest.routeplanner_free_all().await;
        assert_eq!(rest.calls(), 2);
    }

    #[tokio::test]
    async fn load_tracks_encodes_identifier() {
        let (rest, mock) = rest(RestVersion::V4);
        mock.respond("/v4/loadtracks", json!({ "loadType": "empty", "data": {} }));
        let result = rest.load_tracks("ytmsearch:never gonna", None).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(
            mock.requests()[0].path,
            "/v4/loadtracks?identifier=ytmsearch%3Anever%20gonna"
        );
    }

    #[tokio::test]
    async fn resume_body_follows_version() {
        let (v3, mock) = rest(RestVersion::V3);
        v3.set_session_id("s");
        v3.set_session_valid(true);
        v3.update_session(Some("key"), 60).await.unwrap();
        assert_eq!(
            mock.requests()[0].body,
            Some(json!({ "resumingKey": "key", "timeout": 60 }))
        );
    }
}
