mod receivers;
mod settings;

pub use receivers::*;
pub use settings::*;

use anyhow::Result;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings: Settings,
    pub receivers: ReceiversFile,
}

impl AppConfig {
    pub fn load(config_dir: &Path) -> Result<Self> {
        let settings_path = config_dir.join("alertmux.yaml");
        let settings = if settings_path.exists() {
            Settings::load(settings_path)?
        } else {
            Settings::default()
        };

        let json_path = config_dir.join("receivers.json");
        let receivers = if json_path.exists() {
            ReceiversFile::load(json_path)?
        } else {
            ReceiversFile::load(config_dir.join("receivers.yaml"))?
        };

        Ok(Self {
            settings,
            receivers,
        })
    }
}
