use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

/// A config struct that can be pulled out of a named toml section, falling
/// back to its defaults when the section is absent.
pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: String,
    pub warmup_ticks: u64,
    pub ticks: u64,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            warmup_ticks: 0,
            ticks: 100_000,
        }
    }
}
