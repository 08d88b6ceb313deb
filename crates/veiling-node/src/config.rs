//! Broker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    /// API key required on admission requests.
    pub api_key: String,
    /// Bitcoin Core JSON-RPC endpoint and credentials.
    pub bitcoin_rpc_host: String,
    pub bitcoin_rpc_port: u16,
    pub bitcoin_rpc_user: String,
    pub bitcoin_rpc_password: String,
    /// ZMQ publisher endpoints (bitcoind `zmqpubrawblock` / `zmqpubrawtx`).
    pub zmq_block_url: String,
    pub zmq_tx_url: String,
    /// When false, the broker relies on the poll scheduler alone.
    pub zmq_enabled: bool,
    /// Counterparty indexer API endpoint.
    pub counterparty_host: String,
    pub counterparty_port: u16,
    /// RocksDB data directory.
    pub database_path: PathBuf,
    /// Fallback sweep intervals, in seconds.
    pub block_poll_interval_secs: u64,
    pub utxo_poll_interval_secs: u64,
    /// How many blocks below the tip the spend lookup scans.
    pub spend_scan_depth: u64,
    /// HTTP listen address.
    pub listen_host: String,
    pub listen_port: u16,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_or(key, default)
        .parse()
        .with_context(|| format!("{key} must be a valid value"))
}

impl Config {
    /// Load configuration from `VEILING_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            api_key: std::env::var("VEILING_API_KEY").context("VEILING_API_KEY is required")?,
            bitcoin_rpc_host: env_or("VEILING_BITCOIN_RPC_HOST", "127.0.0.1"),
            bitcoin_rpc_port: env_parse("VEILING_BITCOIN_RPC_PORT", "8332")?,
            bitcoin_rpc_user: std::env::var("VEILING_BITCOIN_RPC_USER")
                .context("VEILING_BITCOIN_RPC_USER is required")?,
            bitcoin_rpc_password: std::env::var("VEILING_BITCOIN_RPC_PASSWORD")
                .context("VEILING_BITCOIN_RPC_PASSWORD is required")?,
            zmq_block_url: env_or("VEILING_ZMQ_BLOCK_URL", "tcp://127.0.0.1:28332"),
            zmq_tx_url: env_or("VEILING_ZMQ_TX_URL", "tcp://127.0.0.1:28333"),
            zmq_enabled: env_parse("VEILING_ZMQ_ENABLED", "true")?,
            counterparty_host: env_or("VEILING_COUNTERPARTY_HOST", "127.0.0.1"),
            counterparty_port: env_parse("VEILING_COUNTERPARTY_PORT", "4000")?,
            database_path: env_or("VEILING_DATABASE_PATH", "./veiling-data").into(),
            block_poll_interval_secs: env_parse("VEILING_BLOCK_POLL_INTERVAL_SECONDS", "300")?,
            utxo_poll_interval_secs: env_parse("VEILING_UTXO_POLL_INTERVAL_SECONDS", "300")?,
            spend_scan_depth: env_parse("VEILING_SPEND_SCAN_DEPTH", "144")?,
            listen_host: env_or("VEILING_LISTEN_HOST", "0.0.0.0"),
            listen_port: env_parse("VEILING_LISTEN_PORT", "9090")?,
        })
    }

    pub fn bitcoin_rpc_url(&self) -> String {
        format!("http://{}:{}", self.bitcoin_rpc_host, self.bitcoin_rpc_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_secs(self.block_poll_interval_secs.max(1))
    }

    pub fn utxo_poll_interval(&self) -> Duration {
        Duration::from_secs(self.utxo_poll_interval_secs.max(1))
    }
}
