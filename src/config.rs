use std::env;

use config::{Config, Environment, File};
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::debug;

pub static SETTINGS: Lazy<Settings> =
    Lazy::new(|| Settings::new().expect("Failed to initialize settings"));

fn default_max_alternatives() -> u32 {
    5
}

fn default_partial_results() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    128
}

/// Tunables for a recognition session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: u32,
    #[serde(default = "default_partial_results")]
    pub partial_results: bool,
    /// Used when the caller does not request a locale; when unset as well,
    /// the process environment decides.
    #[serde(default)]
    pub default_locale: Option<String>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_alternatives: default_max_alternatives(),
            partial_results: default_partial_results(),
            default_locale: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SessionConfig {
    /// An explicit non-empty tag wins; otherwise the configured default,
    /// with the process locale as the last resort.
    pub fn resolve_locale(&self, requested: Option<&str>) -> String {
        match requested {
            Some(tag) if !tag.is_empty() => tag.to_string(),
            _ => self
                .default_locale
                .clone()
                .unwrap_or_else(system_locale),
        }
    }
}

/// Best-effort language tag from the process environment.
pub fn system_locale() -> String {
    for key in ["LC_ALL", "LC_MESSAGES", "LANG"] {
        if let Ok(raw) = env::var(key) {
            let tag = raw.split(['.', '@']).next().unwrap_or("").trim();
            if !tag.is_empty() && tag != "C" && tag != "POSIX" {
                return tag.replace('_', "-");
            }
        }
    }
    "en-US".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub session: SessionConfig,
}

impl Settings {
    pub(crate) fn new() -> Result<Self, anyhow::Error> {
        let run_mode = env::var("VOICEBRIDGE_RUN_MODE").unwrap_or("dev".into());
        let config = Config::builder()
            .add_source(File::with_name(&format!("config/{run_mode}.yaml")).required(false))
            .add_source(Environment::with_prefix("VOICEBRIDGE").separator("-"))
            .build()
            .map_err(anyhow::Error::from)?;

        config.try_deserialize::<Self>().map_err(Into::into)
            .map(|settings| {
                debug!("Settings: {settings:?}");
                settings
            })
    }
}
