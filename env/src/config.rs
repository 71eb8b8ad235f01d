//! Configuration of the match server.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    /// Port of the RPC shell.
    pub port: u16,
    /// Port of the duplex session endpoint.
    pub session_port: u16,
    /// SQLite database file; `:memory:` for throwaway runs.
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9200,
            session_port: 9201,
            db_path: "dork.db".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Server default per-move timeout; zero disables move timers.
    pub default_move_timeout_ms: u64,
    pub deposit_poll_interval_ms: u64,
    pub deposit_timeout_ms: u64,
    pub dispute_window_ms: u64,
    /// How long completed matches stay in memory.
    pub completed_match_max_age_ms: u64,
    /// Inactivity threshold before a live match is abandoned.
    pub stale_match_max_age_ms: u64,
    pub cleanup_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Allowed clock skew for signed timestamps.
    pub auth_skew_ms: u64,
    pub queue_ticket_ttl_ms: u64,
    pub pending_match_ttl_ms: u64,
    pub session_token_ttl_ms: u64,
    pub game_session_ttl_ms: u64,
    pub active_match_ttl_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            default_move_timeout_ms: 120_000,
            deposit_poll_interval_ms: 5_000,
            deposit_timeout_ms: 300_000,
            dispute_window_ms: 600_000,
            completed_match_max_age_ms: 3_600_000,
            stale_match_max_age_ms: 1_800_000,
            cleanup_interval_ms: 60_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            auth_skew_ms: 300_000,
            queue_ticket_ttl_ms: 120_000,
            pending_match_ttl_ms: 60_000,
            session_token_ttl_ms: 120_000,
            game_session_ttl_ms: 86_400_000,
            active_match_ttl_ms: 86_400_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    pub escrow_address: String,
    pub min_stake_wei: String,
    /// On-chain game identifiers; games absent here cannot be staked.
    #[serde(default)]
    pub game_ids: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub settlement: Option<SettlementConfig>,
}

impl Config {
    pub async fn from_path(path: &PathBuf) -> Config {
        info!("Load configuration: {:?}", path);
        let mut buf = String::with_capacity(1024);
        let mut f = File::open(path).await.expect("Config file not found");
        f.read_to_string(&mut buf)
            .await
            .expect("Failed to read config file");
        match toml::from_str(&buf) {
            Ok(config) => config,
            Err(e) => {
                panic!("Invalid config file: {:?}", e.to_string())
            }
        }
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 9300
            session_port = 9301
            db_path = ":memory:"

            [timing]
            default_move_timeout_ms = 30000

            [settlement]
            escrow_address = "0x00000000000000000000000000000000000000ee"
            min_stake_wei = "1000000000000000"

            [settlement.game_ids]
            tictactoe = "0x746963746163746f650000000000000000000000000000000000000000000000"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server().port, 9300);
        assert_eq!(config.timing.default_move_timeout_ms, 30_000);
        // unspecified knobs fall back to defaults
        assert_eq!(config.timing.deposit_poll_interval_ms, 5_000);
        let settlement = config.settlement.unwrap();
        assert_eq!(settlement.min_stake_wei, "1000000000000000");
        assert!(settlement.game_ids.contains_key("tictactoe"));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.settlement.is_none());
        assert_eq!(config.server().port, 9200);
        assert_eq!(config.timing.deposit_timeout_ms, 300_000);
    }
}
