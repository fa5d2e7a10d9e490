use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod loader;
pub mod validator;

pub use loader::load_config;
pub use validator::validate_config;

/// Bar sizes accepted by the historical data endpoint.
pub const ACCEPTED_BAR_SIZES: &[&str] = &[
    "1 secs", "5 secs", "10 secs", "15 secs", "30 secs", "1 min", "2 mins", "3 mins", "5 mins",
    "10 mins", "15 mins", "20 mins", "30 mins", "1 hour", "2 hours", "3 hours", "4 hours",
    "8 hours", "1 day", "1W", "1M",
];

/// Units accepted in a duration string such as `1 D`.
pub const DURATION_UNITS: &[&str] = &["S", "D", "W", "M", "Y"];

/// What to do when the session reports a degraded (insecure) data-farm connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InsecurePolicy {
    #[default]
    Abort,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_attempts: u32,
    pub batch_size: usize,
    pub request_timeout_secs: u64,
    pub flush_every: usize,
    pub workers: usize,
    pub handshake_timeout_secs: u64,
    pub insecure_connection: InsecurePolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            batch_size: 30,
            request_timeout_secs: 3,
            flush_every: 10,
            workers: 1,
            handshake_timeout_secs: 30,
            insecure_connection: InsecurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub end_time: String,
    pub duration: String,
    pub bar_size: String,
    pub what_to_show: String,
    pub use_rth: i32,
    pub date_format: i32,
    pub keep_up_to_date: bool,
    pub chart_options: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            end_time: "15:01:00".to_string(),
            duration: "1 D".to_string(),
            bar_size: "1 min".to_string(),
            what_to_show: "TRADES".to_string(),
            use_rth: 1,
            date_format: 1,
            keep_up_to_date: false,
            chart_options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContractConfig {
    pub security_type: String,
    pub exchange: String,
    pub currency: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            security_type: "STK".to_string(),
            exchange: "SMART".to_string(),
            currency: "JPY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("historical_data"),
        }
    }
}

/// Top-level settings handed to the orchestrator at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ExtractorConfig {
    pub extraction: ExtractionConfig,
    pub connection: ConnectionConfig,
    pub query: QueryConfig,
    pub contract: ContractConfig,
    pub storage: StorageConfig,
}

impl ExtractorConfig {
    pub fn builtin() -> Self {
        Self::default()
    }
}
