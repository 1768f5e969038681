use serde::{Deserialize, Serialize};

/// Snapshot from a node's `stats` frame (or `GET /stats`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeStats {
    pub players: u64,
    pub playing_players: u64,
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    /// Absent until the node has sent audio for a full minute.
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cpu {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Per-minute frame counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

impl NodeStats {
    /// Load score used to rank connected nodes; lower is better.
    pub fn penalty(&self) -> u64 {
        let cpu = (1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0).round();
        let (deficit, nulled) = self
            .frame_stats
            .as_ref()
            .map(|f| (f.deficit.max(0) as u64, f.nulled.max(0) as u64))
            .unwrap_or((0, 0));

        self.players + cpu.max(0.0) as u64 + deficit + nulled * 2
    }
}
