//! Daemon configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub framework: FrameworkConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Identity presented to the master on SUBSCRIBE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub principal: String,
    pub role: Option<String>,
    /// Seconds the master keeps the framework's tasks alive after a
    /// disconnect before declaring it gone.
    #[serde(default = "default_failover_timeout")]
    pub failover_timeout_secs: f64,
    #[serde(default)]
    pub capabilities: CapabilityFlags,
    /// Framework id used when storage has none, so a scheduler that lost
    /// all state still re-attaches under its original identity. Fixed per
    /// deployment.
    pub default_framework_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityFlags {
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub task_killing: bool,
    #[serde(default)]
    pub partition_aware: bool,
    #[serde(default)]
    pub revocable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Wire encoding: "json" or "protobuf".
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// File holding the secret paired with `framework.principal`; absent
    /// means no Authorization header.
    pub secret_path: Option<PathBuf>,
    /// Deadline applied to every unary call.
    #[serde(default = "default_call_deadline_ms")]
    pub call_deadline_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            secret_path: None,
            call_deadline_ms: default_call_deadline_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// How long an unused offer is held before it is declined.
    #[serde(default = "default_offer_hold_ttl")]
    pub offer_hold_ttl_secs: u64,
    /// Refuse-seconds filter attached to TTL declines.
    #[serde(default = "default_decline_refuse")]
    pub decline_refuse_secs: f64,
    /// Periodic sweep interval for placement rounds.
    #[serde(default = "default_round_interval")]
    pub placement_round_interval_ms: u64,
    /// Interval between explicit reconciliations.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Rounds a ready task may go unplaced before it is returned to the
    /// admission queue.
    #[serde(default = "default_max_placement_retries")]
    pub max_placement_retries: u32,
    /// Workers in the task state-machine handler pool.
    #[serde(default = "default_task_workers")]
    pub task_handler_workers: usize,
    /// Subscription attempts before the daemon gives up on the master.
    #[serde(default = "default_subscribe_budget")]
    pub subscribe_retry_budget: u32,
    #[serde(default = "default_subscribe_backoff_ms")]
    pub subscribe_backoff_base_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            offer_hold_ttl_secs: default_offer_hold_ttl(),
            decline_refuse_secs: default_decline_refuse(),
            placement_round_interval_ms: default_round_interval(),
            reconcile_interval_secs: default_reconcile_interval(),
            max_placement_retries: default_max_placement_retries(),
            task_handler_workers: default_task_workers(),
            subscribe_retry_budget: default_subscribe_budget(),
            subscribe_backoff_base_ms: default_subscribe_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Open attempts before the store is declared unavailable.
    #[serde(default = "default_store_budget")]
    pub open_retry_budget: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            open_retry_budget: default_store_budget(),
        }
    }
}

fn default_failover_timeout() -> f64 {
    // Two weeks, matching long-lived production frameworks.
    14.0 * 24.0 * 3600.0
}
fn default_encoding() -> String {
    "json".to_string()
}
fn default_call_deadline_ms() -> u64 {
    10_000
}
fn default_offer_hold_ttl() -> u64 {
    300
}
fn default_decline_refuse() -> f64 {
    5.0
}
fn default_round_interval() -> u64 {
    1_000
}
fn default_reconcile_interval() -> u64 {
    1_800
}
fn default_max_placement_retries() -> u32 {
    5
}
fn default_task_workers() -> usize {
    8
}
fn default_subscribe_budget() -> u32 {
    10
}
fn default_subscribe_backoff_ms() -> u64 {
    500
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/peloton")
}
fn default_store_budget() -> u32 {
    5
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.framework.name.is_empty() {
            return Err(ConfigError::Invalid("framework.name is empty".to_string()));
        }
        if self.framework.user.is_empty() {
            return Err(ConfigError::Invalid("framework.user is empty".to_string()));
        }
        if self.framework.default_framework_id.is_empty() {
            return Err(ConfigError::Invalid(
                "framework.default_framework_id is empty".to_string(),
            ));
        }
        match self.transport.encoding.as_str() {
            "json" | "protobuf" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "transport.encoding must be \"json\" or \"protobuf\", got {other:?}"
                )))
            }
        }
        if self.scheduling.task_handler_workers == 0 {
            return Err(ConfigError::Invalid(
                "scheduling.task_handler_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[framework]
name = "peloton"
user = "root"
default_framework_id = "deadbeef-0001"
"#
    }

    #[test]
    fn parse_minimal_applies_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.transport.encoding, "json");
        assert_eq!(config.scheduling.offer_hold_ttl_secs, 300);
        assert_eq!(config.scheduling.task_handler_workers, 8);
        assert!(!config.framework.capabilities.gpu);
    }

    #[test]
    fn parse_full_sections() {
        let toml_str = r#"
[framework]
name = "peloton"
user = "peloton"
principal = "peloton-principal"
role = "prod"
failover_timeout_secs = 3600.0
default_framework_id = "deadbeef-0001"

[framework.capabilities]
gpu = true
partition_aware = true

[transport]
encoding = "protobuf"
secret_path = "/etc/peloton/secret"

[scheduling]
offer_hold_ttl_secs = 60
reconcile_interval_secs = 600

[storage]
data_dir = "/tmp/peloton"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.transport.encoding, "protobuf");
        assert!(config.framework.capabilities.gpu);
        assert!(!config.framework.capabilities.revocable);
        assert_eq!(config.framework.role.as_deref(), Some("prod"));
        assert_eq!(config.scheduling.offer_hold_ttl_secs, 60);
    }

    #[test]
    fn invalid_encoding_rejected() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.transport.encoding = "xml".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_default_framework_id_rejected() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.framework.default_framework_id.clear();
        assert!(config.validate().is_err());
    }
}
