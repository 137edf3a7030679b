// src/config.rs

//! Manages server configuration: loading, resolving size values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use tracing::warn;

/// The smallest replication backlog the server will run with.
pub const MIN_REPL_BACKLOG_SIZE: u64 = 1024 * 1024;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9121
}

/// A size either given as a raw byte count or as a string with a unit suffix.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum SizeConfig {
    Bytes(u64),
    String(String),
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_listen_address")]
    listen_address: String,
    #[serde(default = "default_databases")]
    databases: usize,
    #[serde(default = "default_conn_timeout")]
    conn_timeout: u64,
    #[serde(default = "default_dump_filepath")]
    dump_filepath: String,
    #[serde(default)]
    sync_file_path: String,
    #[serde(default = "default_sync_file_size")]
    sync_file_size: SizeConfig,
    #[serde(default = "default_sync_memory_buffer")]
    sync_memory_buffer: SizeConfig,
    #[serde(default = "default_repl_ping_slave_period")]
    repl_ping_slave_period: u64,
    #[serde(default)]
    repl_backlog_file_path: String,
    #[serde(default = "default_repl_backlog_size")]
    repl_backlog_size: SizeConfig,
    #[serde(default = "default_repl_backlog_ttl")]
    repl_backlog_ttl: u64,
    #[serde(default)]
    auth: String,
    #[serde(default)]
    master_auth: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_listen_address() -> String {
    "127.0.0.1:6380".to_string()
}
fn default_databases() -> usize {
    16
}
fn default_conn_timeout() -> u64 {
    900
}
fn default_dump_filepath() -> String {
    "dump.rdb".to_string()
}
fn default_sync_file_size() -> SizeConfig {
    SizeConfig::Bytes(32 * 1024 * 1024 * 1024)
}
fn default_sync_memory_buffer() -> SizeConfig {
    SizeConfig::Bytes(32 * 1024 * 1024)
}
fn default_repl_ping_slave_period() -> u64 {
    10
}
fn default_repl_backlog_size() -> SizeConfig {
    SizeConfig::Bytes(1024 * 1024 * 1024)
}
fn default_repl_backlog_ttl() -> u64 {
    3600
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated, and resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the client listener binds to.
    pub listen_address: String,
    pub databases: usize,
    /// Client idle cutoff in seconds. `0` disables it.
    pub conn_timeout: u64,
    pub dump_filepath: String,
    /// Overflow file for the slave's RDB pipe. Empty keeps the pipe in memory only.
    pub sync_file_path: String,
    pub sync_file_size: u64,
    pub sync_memory_buffer: u64,
    /// Heartbeat interval in seconds.
    pub repl_ping_slave_period: u64,
    /// Backing file for the replication backlog. Empty keeps it in memory.
    pub repl_backlog_file_path: String,
    pub repl_backlog_size: u64,
    /// Seconds without slaves after which the backlog is released. `0` means never.
    pub repl_backlog_ttl: u64,
    pub auth: String,
    pub master_auth: String,
    pub log_level: String,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            databases: default_databases(),
            conn_timeout: default_conn_timeout(),
            dump_filepath: default_dump_filepath(),
            sync_file_path: String::new(),
            sync_file_size: 32 * 1024 * 1024 * 1024,
            sync_memory_buffer: 32 * 1024 * 1024,
            repl_ping_slave_period: default_repl_ping_slave_period(),
            repl_backlog_file_path: String::new(),
            repl_backlog_size: 1024 * 1024 * 1024,
            repl_backlog_ttl: default_repl_backlog_ttl(),
            auth: String::new(),
            master_auth: String::new(),
            log_level: default_log_level(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses, resolves and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse TOML")?;

        let mut config = Config {
            listen_address: raw.listen_address,
            databases: raw.databases,
            conn_timeout: raw.conn_timeout,
            dump_filepath: raw.dump_filepath,
            sync_file_path: raw.sync_file_path,
            sync_file_size: resolve_size("sync_file_size", raw.sync_file_size)?,
            sync_memory_buffer: resolve_size("sync_memory_buffer", raw.sync_memory_buffer)?,
            repl_ping_slave_period: raw.repl_ping_slave_period,
            repl_backlog_file_path: raw.repl_backlog_file_path,
            repl_backlog_size: resolve_size("repl_backlog_size", raw.repl_backlog_size)?,
            repl_backlog_ttl: raw.repl_backlog_ttl,
            auth: raw.auth,
            master_auth: raw.master_auth,
            log_level: raw.log_level,
            metrics: raw.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// The resolved listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address
            .parse()
            .with_context(|| format!("Invalid listen_address '{}'", self.listen_address))
    }

    /// The port part of `listen_address`, announced to masters as our listening port.
    pub fn port(&self) -> u16 {
        self.socket_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Replaces the port part of `listen_address`.
    pub fn set_port(&mut self, port: u16) -> Result<()> {
        let mut addr = self.socket_addr()?;
        addr.set_port(port);
        self.listen_address = addr.to_string();
        Ok(())
    }

    /// Validates the resolved configuration and normalizes out-of-range values.
    pub fn validate(&mut self) -> Result<()> {
        let addr = self.socket_addr()?;
        if self.databases == 0 {
            return Err(anyhow!("databases cannot be 0"));
        }
        if self.databases > u32::MAX as usize {
            return Err(anyhow!("databases is too large"));
        }
        if self.repl_ping_slave_period == 0 {
            return Err(anyhow!("repl_ping_slave_period cannot be 0"));
        }
        if self.repl_backlog_size < MIN_REPL_BACKLOG_SIZE {
            warn!(
                "repl_backlog_size {} is below the minimum, using {} bytes.",
                self.repl_backlog_size, MIN_REPL_BACKLOG_SIZE
            );
            self.repl_backlog_size = MIN_REPL_BACKLOG_SIZE;
        }
        if self.sync_memory_buffer == 0 && self.sync_file_path.is_empty() {
            return Err(anyhow!(
                "sync_memory_buffer cannot be 0 when sync_file_path is not set"
            ));
        }
        if self.sync_memory_buffer == 0 && self.sync_file_size == 0 {
            return Err(anyhow!(
                "sync_memory_buffer and sync_file_size cannot both be 0"
            ));
        }
        if self.dump_filepath.trim().is_empty() {
            return Err(anyhow!("dump_filepath cannot be empty"));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == addr.port() {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}

/// Resolves a `SizeConfig` into bytes.
fn resolve_size(field: &str, cfg: SizeConfig) -> Result<u64> {
    match cfg {
        SizeConfig::Bytes(b) => Ok(b),
        SizeConfig::String(s) => parse_size(&s).with_context(|| format!("Invalid {field}")),
    }
}

/// Parses a size such as `512mb`, `1g` or `4096` into bytes.
pub fn parse_size(s: &str) -> Result<u64> {
    let lower = s.trim().to_lowercase();
    let units: [(&str, u64); 6] = [
        ("gb", 1024 * 1024 * 1024),
        ("g", 1024 * 1024 * 1024),
        ("mb", 1024 * 1024),
        ("m", 1024 * 1024),
        ("kb", 1024),
        ("k", 1024),
    ];
    for (suffix, multiplier) in units {
        if let Some(value) = lower.strip_suffix(suffix) {
            let value: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid number in size '{s}'"))?;
            return value
                .checked_mul(multiplier)
                .ok_or_else(|| anyhow!("size '{s}' is too large"));
        }
    }
    lower.parse().with_context(|| {
        format!("Invalid size '{s}'. Must be a number of bytes or have a unit (e.g., '512mb').")
    })
}
