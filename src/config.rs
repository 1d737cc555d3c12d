use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for both the POP3 and SMTP binaries, loaded
/// once at startup from a TOML file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Directory the `sled` database lives in.
    pub data_dir: PathBuf,
    pub pop3_addr: SocketAddr,
    pub smtp_addr: SocketAddr,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

const DEFAULT_CONFIG_PATH: &str = "postman.toml";

impl Config {
    /// Loads configuration from the path named by `POSTMAN_CONFIG`, or
    /// `postman.toml` in the working directory if that variable is unset.
    pub fn load() -> anyhow::Result<Config> {
        let path = std::env::var("POSTMAN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let raw = std::fs::read_to_string(&path)
            .map_err(|err| anyhow::anyhow!("failed to read config at {}: {}", path, err))?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }
}
