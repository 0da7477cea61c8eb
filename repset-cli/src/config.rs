use std::time::Duration;

use serde::Deserialize;
use serde_with::serde_as;

use repset_engine::AutosaveConfig;

#[derive(Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub autosave: AutosaveSettings,
}

#[serde_as]
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct AutosaveSettings {
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub debounce_ms: u64,
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub max_retries: u32,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            debounce_ms: AutosaveConfig::DEFAULT_DEBOUNCE.as_millis() as u64,
            max_retries: AutosaveConfig::DEFAULT_MAX_RETRIES,
        }
    }
}

impl Settings {
    pub fn autosave_config(&self) -> AutosaveConfig {
        AutosaveConfig {
            debounce: Duration::from_millis(self.autosave.debounce_ms),
            max_retries: self.autosave.max_retries,
        }
    }
}

/// Merge an optional `repset` config file with `REPSET`-prefixed
/// environment variables (e.g. `REPSET_AUTOSAVE__DEBOUNCE_MS=500`).
pub fn read_config() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("repset").required(false))
        .add_source(
            config::Environment::with_prefix("REPSET")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
