mod config;

pub use config::{Config, ServerConfig, SettlementConfig, TimingConfig};
