//! Configuration management for blockforge
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON). Values given on the command line win
//! over the file; the file wins over built-in defaults.

use crate::chain::ConsensusParams;
use crate::miner::{MinerConfig, RetryDelay, MAX_COINBASE_SCRIPT_SIG_LEN};
use crate::peer::{PingPongConfig, PingPongMode, ProtocolVersion};
use crate::settings::NodeSettings;
use crate::types::Script;
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Room left in the coinbase scriptSig for height and extra nonce pushes
const COINBASE_PUSH_RESERVE: usize = 20;

/// Built-in network presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkKind {
    /// Proof-of-work development network
    Devnet,
    /// Development network with stake-based timestamp rules
    DevnetPos,
}

impl NetworkKind {
    pub fn params(&self) -> ConsensusParams {
        match self {
            NetworkKind::Devnet => ConsensusParams::devnet(),
            NetworkKind::DevnetPos => ConsensusParams::devnet_pos(),
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkKind::Devnet => write!(f, "devnet"),
            NetworkKind::DevnetPos => write!(f, "devnet-pos"),
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Pretty,
    Json,
}

/// Complete configuration for the node component
#[derive(Debug, Clone, PartialEq, Parser, Serialize, Deserialize)]
#[command(
    name = "blockforge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Block production loop and peer behaviors for a PoW/PoS full node"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Network preset
    #[arg(short = 'n', long, default_value = "devnet", env = "BLOCKFORGE_NETWORK")]
    #[serde(default = "default_network")]
    pub network: NetworkKind,

    /// Log level
    #[arg(short = 'l', long, default_value = "info", env = "BLOCKFORGE_LOG_LEVEL")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Mine in the background until interrupted
    #[arg(long)]
    #[serde(default)]
    pub mine: bool,

    /// Mine this many blocks, print their hashes and exit
    #[arg(short = 'g', long, value_name = "BLOCKS")]
    pub generate: Option<u64>,

    /// Nonce budget for --generate
    #[arg(long, default_value = "1000000")]
    #[serde(default = "default_max_tries")]
    pub max_tries: u64,

    /// Payout script as hex
    #[arg(long, default_value = "51")]
    #[serde(default = "default_payout_script")]
    pub payout_script: String,

    /// Text appended to every coinbase scriptSig
    #[arg(long)]
    pub coinbase_message: Option<String>,

    /// Nonces tried per candidate before refreshing the template
    #[arg(long, default_value = "65536")]
    #[serde(default = "default_inner_loop_count")]
    pub inner_loop_count: u64,

    /// Wait between sync checks while catching up (e.g. "1m")
    #[arg(long, default_value = "1m")]
    #[serde(default = "default_sync_wait")]
    pub sync_wait: String,

    /// First retry delay of the mining task
    #[arg(long, default_value = "1s")]
    #[serde(default = "default_retry_min")]
    pub retry_min: String,

    /// Longest retry delay of the mining task
    #[arg(long, default_value = "10s")]
    #[serde(default = "default_retry_max")]
    pub retry_max: String,

    /// Ping/pong participation
    #[arg(long, default_value = "both")]
    #[serde(default = "default_ping_mode")]
    pub ping_mode: PingPongMode,

    /// Interval between liveness probes
    #[arg(long, default_value = "2m")]
    #[serde(default = "default_ping_interval")]
    pub ping_interval: String,

    /// Disconnect a peer whose pong is this late
    #[arg(long, default_value = "20m")]
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout: String,

    /// Minimum protocol version accepted at startup
    #[arg(long, default_value = "209")]
    #[serde(default = "default_min_peer_version")]
    pub min_peer_version: u32,

    /// Override the height at which the minimum version is raised (0 disables)
    #[arg(long)]
    pub enforce_version_at_height: Option<u64>,
}

impl Config {
    /// Parse the process arguments and merge the config file if one is given
    pub async fn load() -> Result<Self> {
        Self::finish(Self::parse()).await
    }

    /// Like [`Config::load`] with explicit arguments
    pub async fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = Self::try_parse_from(args).map_err(|e| Error::config(e.to_string()))?;
        Self::finish(config).await
    }

    async fn finish(mut config: Self) -> Result<Self> {
        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config = config.merge_with_file(file_config)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config (CLI takes precedence)
    ///
    /// A CLI value equal to its built-in default counts as unset.
    fn merge_with_file(mut self, file: Self) -> Result<Self> {
        let defaults = Self::try_parse_from(["blockforge"]).map_err(|e| Error::config(e.to_string()))?;

        macro_rules! take_unset {
            ($($field:ident),* $(,)?) => {
                $(
                    if self.$field == defaults.$field {
                        self.$field = file.$field;
                    }
                )*
            };
        }

        take_unset!(
            network,
            log_level,
            log_format,
            mine,
            generate,
            max_tries,
            payout_script,
            coinbase_message,
            inner_loop_count,
            sync_wait,
            retry_min,
            retry_max,
            ping_mode,
            ping_interval,
            pong_timeout,
            min_peer_version,
            enforce_version_at_height,
        );
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mine && self.generate.is_some() {
            return Err(Error::config("--mine and --generate are mutually exclusive"));
        }

        self.payout_script()?;

        if let Some(message) = &self.coinbase_message {
            let limit = MAX_COINBASE_SCRIPT_SIG_LEN - COINBASE_PUSH_RESERVE;
            if message.len() > limit {
                return Err(Error::config(format!(
                    "Coinbase message is {} bytes, at most {} fit",
                    message.len(),
                    limit
                )));
            }
        }

        if self.inner_loop_count == 0 {
            return Err(Error::config("Inner loop count must be greater than 0"));
        }

        self.sync_wait_duration()?;
        let retry = self.retry_delay()?;
        if retry.min.is_zero() {
            return Err(Error::config("Retry delay must be greater than 0"));
        }
        if retry.min > retry.max {
            return Err(Error::config("retry-min must not exceed retry-max"));
        }

        let ping = self.ping_pong_config()?;
        if ping.ping_interval.is_zero() || ping.timeout_interval.is_zero() {
            return Err(Error::config("Ping interval and pong timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Consensus parameters of the selected network with overrides applied
    pub fn consensus_params(&self) -> ConsensusParams {
        let mut params = self.network.params();
        if let Some(height) = self.enforce_version_at_height {
            params.enforce_min_version_at_height = height;
        }
        params
    }

    /// Get parsed payout script
    pub fn payout_script(&self) -> Result<Script> {
        Script::from_hex(&self.payout_script)
    }

    pub fn sync_wait_duration(&self) -> Result<Duration> {
        parse_duration("sync-wait", &self.sync_wait)
    }

    pub fn retry_delay(&self) -> Result<RetryDelay> {
        Ok(RetryDelay {
            min: parse_duration("retry-min", &self.retry_min)?,
            max: parse_duration("retry-max", &self.retry_max)?,
        })
    }

    /// Get miner configuration
    pub fn miner_config(&self) -> Result<MinerConfig> {
        Ok(MinerConfig {
            inner_loop_count: self.inner_loop_count,
            sync_wait: self.sync_wait_duration()?,
            retry: self.retry_delay()?,
            coinbase_flags: self
                .coinbase_message
                .as_ref()
                .map(|m| m.as_bytes().to_vec())
                .unwrap_or_default(),
        })
    }

    /// Get liveness configuration
    pub fn ping_pong_config(&self) -> Result<PingPongConfig> {
        Ok(PingPongConfig {
            mode: self.ping_mode,
            ping_interval: parse_duration("ping-interval", &self.ping_interval)?,
            timeout_interval: parse_duration("pong-timeout", &self.pong_timeout)?,
        })
    }

    pub fn node_settings(&self) -> NodeSettings {
        NodeSettings::new(ProtocolVersion::new(self.min_peer_version))
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| Error::config(format!("Invalid {} '{}': {}", name, value, e)))
}

// Default value functions for serde
fn default_network() -> NetworkKind { NetworkKind::Devnet }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
fn default_max_tries() -> u64 { 1_000_000 }
fn default_payout_script() -> String { "51".to_string() }
fn default_inner_loop_count() -> u64 { 65_536 }
fn default_sync_wait() -> String { "1m".to_string() }
fn default_retry_min() -> String { "1s".to_string() }
fn default_retry_max() -> String { "10s".to_string() }
fn default_ping_mode() -> PingPongMode { PingPongMode::Both }
fn default_ping_interval() -> String { "2m".to_string() }
fn default_pong_timeout() -> String { "20m".to_string() }
fn default_min_peer_version() -> u32 { ProtocolVersion::MIN_PEER.value() }
