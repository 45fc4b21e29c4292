//! Configuration loader with environment variable expansion

use super::{Config, ConfigError};
use lazy_static::lazy_static;
use regex_lite::Regex;
use std::path::Path;

lazy_static! {
    // ${VAR} or ${VAR:-default}
    static ref ENV_VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load, expand and validate a YAML configuration file
    pub fn load<P: AsRef<Path>>(path: P, default_service_name: &str) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, default_service_name)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str, default_service_name: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content, |name| std::env::var(name).ok());
        let mut config: Config = serde_yaml::from_str(&expanded)?;

        if config.telemetry.service_name.trim().is_empty() {
            config.telemetry.service_name = default_service_name.to_string();
        }

        config.validate()?;
        Ok(config)
    }
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with an uppercase letter or underscore and
/// contain only uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars<F>(s: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR_PATTERN
        .replace_all(s, |caps: &regex_lite::Captures<'_>| {
            let name = &caps[1];
            match (lookup(name), caps.get(2)) {
                (Some(value), _) => value,
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => caps[0].to_string(),
            }
        })
        .into_owned()
}
