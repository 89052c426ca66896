use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::notify::RateLimits;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// JSON lines file receiving notification history entries
    #[serde(default)]
    pub history_log_path: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
            history_log_path: None,
        }
    }
}

fn default_log_format() -> LogFormat { LogFormat::Json }
fn default_log_level() -> String { "info".to_string() }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_test_timeout")]
    pub test_timeout_seconds: u32,
    /// External URL handed to templates
    #[serde(default)]
    pub external_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            test_timeout_seconds: default_test_timeout(),
            external_url: String::new(),
        }
    }
}

impl DispatchConfig {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_seconds as u64)
    }
}

fn default_test_timeout() -> u32 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_seconds: u32,
    /// Defaults keyed by integration type
    #[serde(default)]
    pub defaults: HashMap<String, RateLimits>,
    /// Overrides keyed by integration UID
    #[serde(default)]
    pub integrations: HashMap<String, RateLimits>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            recheck_interval_seconds: default_recheck_interval(),
            defaults: HashMap::new(),
            integrations: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_seconds as u64)
    }

    pub fn for_integration(&self, uid: &str) -> Option<RateLimits> {
        self.integrations.get(uid).copied()
    }

    pub fn for_type(&self, integration_type: &str) -> Option<RateLimits> {
        self.defaults
            .get(&integration_type.to_lowercase())
            .copied()
    }
}

fn default_recheck_interval() -> u32 { 60 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds as u64)
    }
}

fn default_http_timeout() -> u32 { 30 }
fn default_user_agent() -> String { format!("alertmux/{}", env!("CARGO_PKG_VERSION")) }

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        Ok(settings)
    }
}
