use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::Riffy;
use crate::{
    common::errors::{Result, RiffyError},
    node::Node,
    protocol::{LoadResult, LoadType, Track},
};

/// Which node answers a search.
#[derive(Debug, Clone, Default)]
pub enum NodeChoice {
    #[default]
    LeastUsed,
    Named(String),
    Node(Arc<Node>),
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub query: String,
    pub source: Option<String>,
    pub requester: Option<Value>,
    pub node: NodeChoice,
}

impl ResolveOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source: None,
            requester: None,
            node: NodeChoice::LeastUsed,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn requester(mut self, requester: Option<Value>) -> Self {
        self.requester = requester;
        self
    }

    pub fn node(mut self, node: Arc<Node>) -> Self {
        self.node = NodeChoice::Node(node);
        self
    }

    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.node = NodeChoice::Named(name.into());
        self
    }
}

fn is_url(query: &str) -> bool {
    query.starts_with("https://") || query.starts_with("http://")
}

/// Bare phrases get a `source:` search prefix; URLs pass through.
pub(crate) fn identifier(query: &str, source: &str) -> String {
    if is_url(query) {
        query.to_string()
    } else {
        format!("{}:{}", source, query)
    }
}

impl Riffy {
    fn search_node(&self, choice: &NodeChoice) -> Result<Arc<Node>> {
        match choice {
            NodeChoice::Node(node) => Ok(node.clone()),
            NodeChoice::Named(name) => self
                .node(name)
                .ok_or_else(|| RiffyError::NodeNotFound(name.clone())),
            NodeChoice::LeastUsed => self
                .least_used_nodes()
                .into_iter()
                .next()
                .ok_or(RiffyError::NoNodesAvailable),
        }
    }

    /// Loads tracks for a query or URL. Empty answers are retried as a
    /// Spotify track id and then as a YouTube video id.
    pub async fn resolve(&self, options: ResolveOptions) -> Result<LoadResult> {
        if !self.is_initiated() {
            return Err(RiffyError::NotInitialized);
        }
        let node = self.search_node(&options.node)?;
        let source = options
            .source
            .as_deref()
            .unwrap_or(&self.config.client.default_search_platform);
        let requester = options.requester.as_ref();

        let result = node
            .rest()
            .load_tracks(&identifier(&options.query, source), requester)
            .await?;
        if result.load_type != LoadType::Empty || is_url(&options.query) {
            return Ok(result);
        }

        for fallback in [
            format!("https://open.spotify.com/track/{}", options.query),
            format!("https://www.youtube.com/watch?v={}", options.query),
        ] {
            debug!("Empty result for '{}', retrying as {}", options.query, fallback);
            let result = node.rest().load_tracks(&fallback, requester).await?;
            if result.load_type != LoadType::Empty {
                return Ok(result);
            }
        }
        Ok(LoadResult::empty())
    }

    /// Finds a playable copy of a track that only carries metadata.
    pub async fn resolve_track(&self, track: &Track) -> Result<Track> {
        let result = self
            .resolve(ResolveOptions::new(track.search_query()).requester(track.requester.clone()))
            .await?;
        let found = track
            .best_match(&result.tracks)
            .ok_or_else(|| RiffyError::TrackUnresolvable(track.info.title.clone()))?;

        let mut resolved = track.clone();
        resolved.adopt(found);
        Ok(resolved)
    }
}
