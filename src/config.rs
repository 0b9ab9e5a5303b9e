use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::coordination::EscalationConfig;
use crate::monitor::IsolationPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub policy: IsolationPolicy,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Reconciliation tick interval in milliseconds. Lower is more
    /// responsive; higher means less lock-store contention.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Number of agents to provision for the run.
    #[serde(default = "default_agents")]
    pub agents: u32,
    /// Simulate agent execution in-process instead of driving a real
    /// sandbox runtime.
    #[serde(default)]
    pub dry_run: bool,
    /// Operator control file consumed by the running daemon.
    #[serde(default = "default_control_path")]
    pub control_path: PathBuf,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_agents() -> u32 {
    4
}

fn default_control_path() -> PathBuf {
    PathBuf::from("warden/control.json")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            agents: default_agents(),
            dry_run: false,
            control_path: default_control_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Directory holding one lock record per resource.
    #[serde(default = "default_lock_dir")]
    pub dir: PathBuf,
    /// TTL for a lock that is never renewed. Expiry is the only way a
    /// lock is released without its holder's consent.
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("warden/locks")
}

fn default_lock_ttl_secs() -> u64 {
    30
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: default_lock_dir(),
            ttl_secs: default_lock_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Append-only violation log (JSONL, one record per line).
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("warden/violations.jsonl")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WARDEN_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (WARDEN_LOCK__TTL_SECS, etc.)
            .add_source(
                Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
