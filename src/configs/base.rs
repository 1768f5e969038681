use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  #[serde(default)]
  pub nodes: Vec<NodeConfig>,
  #[serde(default)]
  pub client: ClientConfig,
  #[serde(default)]
  pub player: PlayerConfig,
  pub logging: Option<LoggingConfig>,
}

impl Config {
  pub fn load() -> AnyResult<Self> {
    let config_path = if std::path::Path::new("riffy.toml").exists() {
      "riffy.toml"
    } else if std::path::Path::new("riffy.default.toml").exists() {
      "riffy.default.toml"
    } else {
      return Err("riffy.toml or riffy.default.toml not found".into());
    };

    tracing::debug!("Loading configuration from: {}", config_path);

    let config_str = std::fs::read_to_string(config_path)?;
    if config_str.is_empty() {
      return Err(format!("{} is empty", config_path).into());
    }

    Self::from_toml(&config_str)
  }

  pub fn from_toml(raw: &str) -> AnyResult<Self> {
    let config: Config = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
  }

  /// Rejects configurations that would only fail later at connect time.
  pub fn validate(&self) -> AnyResult<()> {
    let mut names = std::collections::HashSet::new();
    for node in &self.nodes {
      if node.host.trim().is_empty() {
        return Err("node host must not be empty".into());
      }
      if !names.insert(node.name()) {
        return Err(format!("duplicate node name '{}'", node.name()).into());
      }
      if node.reconnect_tries == 0 {
        return Err(format!("node '{}' needs at least one reconnect try", node.name()).into());
      }
    }
    if self.player.default_volume > 1000 {
      return Err(format!("default volume {} exceeds 1000", self.player.default_volume).into());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
[client]
default_search_platform = "scsearch"
migrate_on_disconnect = true

[player]
default_volume = 80

[[nodes]]
name = "main"
host = "lava.example.com"
port = 443
password = "hunter2"
secure = true
regions = ["us", "eu"]

[[nodes]]
host = "10.0.0.2"
password = "youshallnotpass"
rest_version = "v3"

[logging]
level = "debug"
"#;

  #[test]
  fn parses_full_config() {
    let config = Config::from_toml(SAMPLE).unwrap();
    assert_eq!(config.nodes.len(), 2);
    assert_eq!(config.client.default_search_platform, "scsearch");
    assert!(config.client.migrate_on_disconnect);
    assert!(!config.client.migrate_on_failure);
    assert_eq!(config.player.default_volume, 80);

    let main = &config.nodes[0];
    assert_eq!(main.name(), "main");
    assert!(main.secure);
    assert_eq!(main.regions, vec!["us", "eu"]);

    let fallback = &config.nodes[1];
    assert_eq!(fallback.name(), "10.0.0.2");
    assert_eq!(fallback.port, 2333);
    assert_eq!(fallback.rest_version, Some(RestVersion::V3));
  }

  #[test]
  fn rejects_unknown_rest_version() {
    let raw = r#"
[[nodes]]
host = "localhost"
password = "x"
rest_version = "v5"
"#;
    assert!(Config::from_toml(raw).is_err());
  }

  #[test]
  fn rejects_duplicate_node_names() {
    let raw = r#"
[[nodes]]
host = "a"
password = "x"
[[nodes]]
host = "a"
password = "y"
"#;
    let err = Config::from_toml(raw).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
  }
}
