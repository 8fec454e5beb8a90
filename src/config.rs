use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use tictactoe_net::DEFAULT_PORT;
use tracing::warn;

pub const DEFAULT_NETWORK_PATH: &str = "config/network.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetConfig {
    /// Shared secret for the secure handshake. Empty selects the built-in default.
    pub passphrase: String,
    pub port: u16,
    /// Host to join when none is given on the command line.
    pub host: String,
    pub handshake_timeout_ms: u64,
    /// How long to wait for the opponent's move before giving up.
    pub move_timeout_ms: u64,
    pub accept_wait_secs: u64,
    /// Allow joining hosts that only speak the legacy handshake.
    pub allow_legacy: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            passphrase: String::new(),
            port: DEFAULT_PORT,
            host: "127.0.0.1".to_string(),
            handshake_timeout_ms: 10_000,
            move_timeout_ms: 30_000,
            accept_wait_secs: 120,
            allow_legacy: true,
        }
    }
}

impl NetConfig {
    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<NetConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    NetConfig::default()
                }
            },
            Err(err) => {
                if path != Path::new(DEFAULT_NETWORK_PATH)
                    || err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                NetConfig::default()
            }
        }
    }

    /// Save network configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    pub fn accept_wait(&self) -> Duration {
        Duration::from_secs(self.accept_wait_secs)
    }
}
