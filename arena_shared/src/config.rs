//! Configuration system.
//!
//! Loads configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

use crate::ship::Team;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Server listen address, e.g. `127.0.0.1:7892`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Path to maps directory.
    #[serde(default = "default_maps_dir")]
    pub maps_dir: String,
    /// Map file name the server loads.
    #[serde(default = "default_map_file")]
    pub map_file: String,
    /// Player cap; the map file may override this.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Player team (client only).
    #[serde(default)]
    pub team: Team,
    /// Names refused at login (server only).
    #[serde(default)]
    pub banned: Vec<String>,
}

fn default_maps_dir() -> String {
    "maps".to_string()
}

fn default_map_file() -> String {
    "crater.json".to_string()
}

fn default_max_players() -> u32 {
    8
}

fn default_player_name() -> String {
    "Player".to_string()
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7892".to_string(),
            tick_hz: 30,
            maps_dir: default_maps_dir(),
            map_file: default_map_file(),
            max_players: default_max_players(),
            player_name: default_player_name(),
            team: Team::Green,
            banned: Vec::new(),
        }
    }
}

impl ArenaConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg = ArenaConfig::from_json_str(
            r#"{"server_addr":"127.0.0.1:0","tick_hz":30,"player_name":"Alice","team":"Blue"}"#,
        )
        .unwrap();
        assert_eq!(cfg.maps_dir, "maps");
        assert_eq!(cfg.max_players, 8);
        assert_eq!(cfg.team, Team::Blue);
        assert!(cfg.banned.is_empty());
    }
}
