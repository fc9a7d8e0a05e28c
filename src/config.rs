//! Minimal configuration surface (spec §6, SPEC_FULL.md §2). Loading a full
//! config-file pipeline (merging, env overlays, file watching) is out of
//! scope; this is the typed `NodeConfig` plus credential loading, following
//! the teacher's `config::credentials` pattern (typed, env-loaded, no
//! surrounding framework).

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::node::NodeConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid node configuration: {0}")]
    Invalid(String),
    #[error("missing environment variable: {0}")]
    MissingEnv(String),
}

/// Loads and parses a single node's YAML configuration file (spec §6).
pub fn load_node_config(path: impl AsRef<Path>) -> Result<NodeConfig, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    NodeConfig::parse(&contents).map_err(|e| ConfigError::Invalid(e.to_string()))
}

/// Wraps a sensitive string so it is never accidentally logged: `Debug` and
/// `Display` both render a masked `first4...last4` form.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        SecretString(value)
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    fn masked(&self) -> String {
        if self.0.len() <= 8 {
            "***".to_string()
        } else {
            format!("{}...{}", &self.0[..4], &self.0[self.0.len() - 4..])
        }
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

/// Exchange REST credentials loaded from the environment (spec §4.6's
/// listen-key lifecycle needs an API key, not a signature).
#[derive(Clone, Debug)]
pub struct RestCredentials {
    pub api_key: SecretString,
}

impl RestCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("EXCHANGE_API_KEY")
            .map_err(|_| ConfigError::MissingEnv("EXCHANGE_API_KEY".to_string()))?;
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(ConfigError::MissingEnv("EXCHANGE_API_KEY".to_string()));
        }
        Ok(RestCredentials {
            api_key: SecretString::new(api_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_masks_debug_and_display() {
        let s = SecretString::new("abcdefghijkl".to_string());
        assert_eq!(format!("{s:?}"), "SecretString(***)");
        assert_eq!(format!("{s}"), "abcd...ijkl");
    }

    #[test]
    fn short_secret_is_fully_masked() {
        let s = SecretString::new("abc".to_string());
        assert_eq!(format!("{s}"), "***");
    }

    #[test]
    fn load_node_config_reads_yaml_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(&path, "node_type: trade\nname: n1\n").unwrap();
        let cfg = load_node_config(&path).unwrap();
        assert_eq!(cfg.node_type, "trade");
    }

    #[test]
    fn load_node_config_missing_file_is_read_error() {
        let err = load_node_config("/nonexistent/path/node.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
