// ⚙️ Configuration - environment driven
//
// Binaries call `dotenvy::dotenv()` first, then `Config::from_env()`.
// CLI flags override individual values afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::status::DEFAULT_SYSTEM_ACTOR;

pub const DEFAULT_DATABASE_PATH: &str = "statusync.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 5_000;

/// What the line-tracking pipeline does with a row whose sale code matches no sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedLinePolicy {
    /// Report the row as an unregistered sale; write nothing
    #[default]
    Flag,
    /// Insert a new sale pre-populated from the row
    Register,
}

impl FromStr for UnmatchedLinePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "flag" => Ok(UnmatchedLinePolicy::Flag),
            "register" => Ok(UnmatchedLinePolicy::Register),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,

    /// Actor credited with every event the engine appends
    pub system_actor: Uuid,

    /// Page size of the keyset scan that builds the entity index
    pub scan_page_size: usize,

    pub unmatched_line_policy: UnmatchedLinePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            system_actor: DEFAULT_SYSTEM_ACTOR,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            unmatched_line_policy: UnmatchedLinePolicy::Flag,
        }
    }
}

impl Config {
    /// Read configuration from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(raw) = lookup("RECONCILE_SYSTEM_ACTOR") {
            config.system_actor = raw.trim().parse().map_err(|_| ConfigError::InvalidActor {
                var: "RECONCILE_SYSTEM_ACTOR",
                value: raw.clone(),
            })?;
        }

        if let Some(raw) = lookup("RECONCILE_SCAN_PAGE_SIZE") {
            config.scan_page_size = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| ConfigError::InvalidPageSize {
                    var: "RECONCILE_SCAN_PAGE_SIZE",
                    value: raw.clone(),
                })?;
        }

        if let Some(raw) = lookup("LINE_UNMATCHED_POLICY") {
            config.unmatched_line_policy =
                raw.parse().map_err(|value| ConfigError::InvalidPolicy {
                    var: "LINE_UNMATCHED_POLICY",
                    value,
                })?;
        }

        Ok(config)
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
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.system_actor, DEFAULT_SYSTEM_ACTOR);
        assert_eq!(config.unmatched_line_policy, UnmatchedLinePolicy::Flag);
    }

    #[test]
    fn test_overrides_from_environment() {
        let actor = Uuid::new_v4();
        let actor_str = actor.to_string();
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_PATH", "/tmp/backoffice.db"),
            ("RECONCILE_SYSTEM_ACTOR", actor_str.as_str()),
            ("RECONCILE_SCAN_PAGE_SIZE", "250"),
            ("LINE_UNMATCHED_POLICY", "Register"),
        ]))
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/backoffice.db"));
        assert_eq!(config.system_actor, actor);
        assert_eq!(config.scan_page_size, 250);
        assert_eq!(config.unmatched_line_policy, UnmatchedLinePolicy::Register);
    }

    #[test]
    fn test_rejects_zero_page_size() {
        let err = Config::from_lookup(lookup(&[("RECONCILE_SCAN_PAGE_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPageSize { .. }));
    }

    #[test]
    fn test_rejects_malformed_actor() {
        let err = Config::from_lookup(lookup(&[("RECONCILE_SYSTEM_ACTOR", "system")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidActor { .. }));
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let err = Config::from_lookup(lookup(&[("LINE_UNMATCHED_POLICY", "create")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy { .. }));
    }
}
