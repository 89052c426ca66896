use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One integration of a receiver as supplied by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfig {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub integration_type: String,
    #[serde(default)]
    pub disable_resolve_message: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Base64 (or plaintext, depending on the decoder) secret values.
    #[serde(default)]
    pub secure_settings: HashMap<String, String>,
}

/// A named receiver and its integrations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiReceiver {
    pub name: String,
    #[serde(default, alias = "grafana_managed_receiver_configs")]
    pub integrations: Vec<IntegrationConfig>,
}

impl ApiReceiver {
    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

/// Receivers file (`receivers.yaml` or `receivers.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiversFile {
    #[serde(default)]
    pub receivers: Vec<ApiReceiver>,
}

impl ReceiversFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(file)
    }

    pub fn find(&self, name: &str) -> Option<&ApiReceiver> {
        self.receivers.iter().find(|r| r.name == name)
    }
}
