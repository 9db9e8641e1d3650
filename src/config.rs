//! Runtime configuration read from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DATABASE: &str = "KREDIT_DATABASE";
pub const LOCK_TIMEOUT_MS: &str = "KREDIT_LOCK_TIMEOUT_MS";
pub const REQUEST_TIMEOUT_MS: &str = "KREDIT_REQUEST_TIMEOUT_MS";
pub const MAX_CONNECTIONS: &str = "KREDIT_MAX_CONNECTIONS";
pub const SEED: &str = "KREDIT_SEED";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite database file; `None` keeps everything in memory.
    pub database: Option<PathBuf>,
    /// Bound on waiting for an account's limit lock.
    pub lock_timeout: Duration,
    /// Deadline for a single authorization request.
    pub request_timeout: Duration,
    pub max_connections: u32,
    /// Provision limits from the input before authorizing.
    pub seed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            lock_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_connections: 8,
            seed: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = lookup(DATABASE).filter(|path| !path.is_empty()) {
            config.database = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup(LOCK_TIMEOUT_MS) {
            config.lock_timeout = Duration::from_millis(parse(LOCK_TIMEOUT_MS, value)?);
        }
        if let Some(value) = lookup(REQUEST_TIMEOUT_MS) {
            config.request_timeout = Duration::from_millis(parse(REQUEST_TIMEOUT_MS, value)?);
        }
        if let Some(value) = lookup(MAX_CONNECTIONS) {
            config.max_connections = parse(MAX_CONNECTIONS, value)?;
        }
        if let Some(value) = lookup(SEED) {
            config.seed = parse(SEED, value)?;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.database.is_none());
    }

    #[test]
    fn reads_every_key() {
        let config = Config::from_lookup(lookup(&[
            (DATABASE, "/tmp/ledger.db"),
            (LOCK_TIMEOUT_MS, "250"),
            (REQUEST_TIMEOUT_MS, " 1000 "),
            (MAX_CONNECTIONS, "2"),
            (SEED, "false"),
        ]))
        .unwrap();
        assert_eq!(config.database, Some(PathBuf::from("/tmp/ledger.db")));
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert_eq!(config.max_connections, 2);
        assert!(!config.seed);
    }

    #[test]
    fn empty_database_means_memory() {
        let config = Config::from_lookup(lookup(&[(DATABASE, "")])).unwrap();
        assert!(config.database.is_none());
    }

    #[test]
    fn malformed_value_is_rejected() {
        let result = Config::from_lookup(lookup(&[(LOCK_TIMEOUT_MS, "soon")]));
        assert_eq!(
            result,
            Err(ConfigError::Invalid {
                key: LOCK_TIMEOUT_MS,
                value: "soon".to_string(),
            })
        );
    }
}
