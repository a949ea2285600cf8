//! Selector configuration read from TOML.
use crate::{CreativeWeightStrategy, Selector};
use once_cell::sync::Lazy;
use primitives::UpdateNumber;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use toml::de::Error as TomlError;

pub static PRODUCTION_CONFIG: Lazy<Config> = Lazy::new(|| {
    toml::from_str(include_str!("../../docs/config/prod.toml"))
        .expect("Failed to parse prod.toml config file")
});

pub static DEVELOPMENT_CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::try_toml(include_str!("../../docs/config/dev.toml"))
        .expect("Failed to parse dev.toml config file")
});

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
/// The environment in which the application is running
/// Defaults to [`Environment::Development`]
pub enum Environment {
    Development,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Self::Development
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// In seconds
    pub group_cap_timeout: u64,
    /// Maximum number of ad group caps kept in a token
    pub group_cap_max_count: u64,
    /// In seconds
    pub counter_cap_timeout: u64,
    pub counter_cap_max_count: u64,
    #[serde(default)]
    pub creative_weight_strategy: CreativeWeightStrategy,
    /// Where the published selector is kept between restarts
    #[serde(default)]
    pub snapshot_cache: Option<PathBuf>,
}

impl Config {
    /// Utility method that will deserialize a Toml file content into a [`Config`].
    ///
    /// Instead of relying on the `toml` crate directly, use this method instead.
    pub fn try_toml(toml: &str) -> Result<Self, TomlError> {
        toml::from_str(toml)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Toml parsing: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("File reading: {0}")]
    InvalidFile(#[from] std::io::Error),
}

/// Reads the `config_file` when given, otherwise the bundled configuration of
/// the `environment`.
pub fn configuration(
    environment: Environment,
    config_file: Option<&str>,
) -> Result<Config, ConfigError> {
    match config_file {
        Some(config_file) => {
            let content = std::fs::read(config_file)?;

            Ok(toml::from_slice(&content)?)
        }
        None => match environment {
            Environment::Production => Ok(PRODUCTION_CONFIG.clone()),
            Environment::Development => Ok(DEVELOPMENT_CONFIG.clone()),
        },
    }
}

impl Selector {
    /// An empty selector with the caps and strategy of `config`.
    pub fn from_config(config: &Config, update_number: UpdateNumber) -> Self {
        Self::new(
            config.group_cap_timeout,
            config.group_cap_max_count,
            config.counter_cap_timeout,
            config.counter_cap_max_count,
            update_number,
        )
        .with_strategy(config.creative_weight_strategy)
    }
}
