// Hub settings, loaded from TOML.
//
// Every field is optional in the file; missing ones take the defaults below.
// The binary layers CLI overrides on top (see `main.rs`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::HubError;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub game_name: String,
    pub address: String,
    /// Non-arbiter player limit. 0 means unlimited.
    pub max_players: usize,
    /// Minutes of game time between autosaves. 0 disables them.
    pub autosave_interval_minutes: u32,
    pub tick_rate: u32,
    /// Ticks between a command being issued and every peer applying it.
    pub command_delay_ticks: u32,
    pub id_block_size: i32,
    pub keep_alive_interval_ticks: u32,
    pub time_control_interval_ticks: u32,
    /// The peer that produces autosave snapshots and gets the hub's own id
    /// blocks.
    pub host_username: Option<String>,
    pub save_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            game_name: "tandem".into(),
            address: "0.0.0.0:30502".into(),
            max_players: 8,
            autosave_interval_minutes: 8,
            tick_rate: 60,
            command_delay_ticks: 15,
            id_block_size: 30_000,
            keep_alive_interval_ticks: 180,
            time_control_interval_ticks: 3,
            host_username: None,
            save_dir: PathBuf::from("saves"),
        }
    }
}

impl ServerSettings {
    pub fn from_toml(text: &str) -> Result<Self, HubError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, HubError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Ticks between periodic autosaves, if enabled.
    pub fn autosave_interval_ticks(&self) -> Option<u32> {
        if self.autosave_interval_minutes == 0 {
            return None;
        }
        Some(
            self.autosave_interval_minutes
                .saturating_mul(60)
                .saturating_mul(self.tick_rate),
        )
    }
}
