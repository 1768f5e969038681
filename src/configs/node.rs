use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::common::errors::RiffyError;

/// Wire protocol generation spoken by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestVersion {
    V3,
    #[default]
    V4,
}

impl RestVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V3 => "v3",
            Self::V4 => "v4",
        }
    }
}

impl fmt::Display for RestVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestVersion {
    type Err = RiffyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v3" => Ok(Self::V3),
            "v4" => Ok(Self::V4),
            _ => Err(RiffyError::InvalidRestVersion(s.to_string())),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub secure: bool,
    /// Falls back to `client.rest_version` when unset.
    #[serde(default)]
    pub rest_version: Option<RestVersion>,
    #[serde(default)]
    pub regions: Vec<String>,
    /// Session to resume on the first connect (v4).
    #[serde(default)]
    pub session_id: Option<String>,
    /// Resume key (v3).
    #[serde(default)]
    pub resume_key: Option<String>,
    /// Seconds the node keeps a dropped session alive.
    #[serde(default = "default_resume_timeout")]
    pub resume_timeout: u64,
    #[serde(default)]
    pub auto_resume: bool,
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,
    #[serde(default = "default_reconnect_tries")]
    pub reconnect_tries: u32,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            name: None,
            host: host.into(),
            port,
            password: password.into(),
            secure: false,
            rest_version: None,
            regions: Vec::new(),
            session_id: None,
            resume_key: None,
            resume_timeout: default_resume_timeout(),
            auto_resume: false,
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            reconnect_tries: default_reconnect_tries(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.host.clone())
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn rest_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn ws_url(&self, version: RestVersion) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        match version {
            RestVersion::V4 => format!("{}://{}:{}/v4/websocket", scheme, self.host, self.port),
            RestVersion::V3 => format!("{}://{}:{}", scheme, self.host, self.port),
        }
    }

    pub fn serves_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r.eq_ignore_ascii_case(region))
    }
}

fn default_port() -> u16 {
    2333
}

fn default_resume_timeout() -> u64 {
    60
}

fn default_reconnect_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_tries() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_version_and_tls() {
        let mut node = NodeConfig::new("lava.local", 2333, "pw");
        assert_eq!(node.rest_url(), "http://lava.local:2333");
        assert_eq!(node.ws_url(RestVersion::V4), "ws://lava.local:2333/v4/websocket");
        assert_eq!(node.ws_url(RestVersion::V3), "ws://lava.local:2333");

        node.secure = true;
        assert_eq!(node.ws_url(RestVersion::V4), "wss://lava.local:2333/v4/websocket");
    }

    #[test]
    fn rest_version_parse_is_strict() {
        assert_eq!("V4".parse::<RestVersion>().unwrap(), RestVersion::V4);
        assert!(matches!(
            "v2".parse::<RestVersion>(),
            Err(RiffyError::InvalidRestVersion(v)) if v == "v2"
        ));
    }

    #[test]
    fn region_match_ignores_case() {
        let node = NodeConfig::new("a", 1, "p").with_regions(["US-East", "eu"]);
        assert!(node.serves_region("us-east"));
        assert!(!node.serves_region("asia"));
    }
}
