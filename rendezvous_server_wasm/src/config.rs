//! Environment configuration

use crate::error::ConfigError;
use crate::registry::DEFAULT_MAX_ID_ATTEMPTS;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Matches socket.io's ping interval plus ping timeout
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_STATE_FILE: &str = "rendezvous_state.json";

/// Server settings read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port the runtime is expected to listen on (`PORT`)
    pub port: u16,
    /// Session ID draws before allocation fails (`RENDEZVOUS_MAX_ID_ATTEMPTS`)
    pub max_id_attempts: u32,
    /// Seconds without a request before a connection counts as gone;
    /// 0 never expires connections (`RENDEZVOUS_IDLE_TIMEOUT_SECS`)
    pub idle_timeout_secs: u64,
    /// Where state is kept between component instances (`RENDEZVOUS_STATE_FILE`)
    pub state_file: PathBuf,
    /// Fallback tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
            max_id_attempts: parse_var(&lookup, "RENDEZVOUS_MAX_ID_ATTEMPTS")?
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.max_id_attempts),
            idle_timeout_secs: parse_var(&lookup, "RENDEZVOUS_IDLE_TIMEOUT_SECS")?
                .unwrap_or(defaults.idle_timeout_secs),
            state_file: parse_var(&lookup, "RENDEZVOUS_STATE_FILE")?
                .unwrap_or(defaults.state_file),
            log_level: defaults.log_level,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 3000);
        assert_eq!(config.idle_timeout_secs, 45);
    }

    #[test]
    fn reads_port_and_attempts() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("RENDEZVOUS_MAX_ID_ATTEMPTS", "16"),
            ("RENDEZVOUS_IDLE_TIMEOUT_SECS", "0"),
            ("RENDEZVOUS_STATE_FILE", "/tmp/rendezvous.json"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_id_attempts, 16);
        assert_eq!(config.idle_timeout_secs, 0);
        assert_eq!(config.state_file, PathBuf::from("/tmp/rendezvous.json"));
    }

    #[test]
    fn empty_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[("PORT", "")])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn rejects_garbage() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }
}
