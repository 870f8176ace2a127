//! Process configuration, read once at startup and passed by reference.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ScoutConfig {
    pub database_url: Option<String>,
    pub database_ssl: bool,
    pub backend_url: String,
    pub youtube_api_key: Option<String>,
    pub youtube_api_base: String,
    pub web_port: u16,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub schedule_cron: String,
    pub runner_delay_secs: u64,
    pub search_terms_path: Option<PathBuf>,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_ssl: false,
            backend_url: "http://localhost:3001".to_string(),
            youtube_api_key: None,
            youtube_api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            web_port: 5000,
            http_timeout_secs: 20,
            scheduler_enabled: false,
            schedule_cron: "0 0 6 * * *".to_string(),
            runner_delay_secs: 5,
            search_terms_path: None,
        }
    }
}

impl ScoutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_ssl: get("DATABASE_SSL").map(|v| truthy(&v)).unwrap_or(false),
            backend_url: get("BACKEND_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.backend_url),
            youtube_api_key: get("YOUTUBE_API_KEY"),
            youtube_api_base: get("YOUTUBE_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.youtube_api_base),
            web_port: parse_or("SCOUT_WEB_PORT", get("SCOUT_WEB_PORT"), defaults.web_port)?,
            http_timeout_secs: parse_or(
                "SCOUT_HTTP_TIMEOUT_SECS",
                get("SCOUT_HTTP_TIMEOUT_SECS"),
                defaults.http_timeout_secs,
            )?,
            scheduler_enabled: get("SCOUT_SCHEDULER_ENABLED")
                .map(|v| truthy(&v))
                .unwrap_or(false),
            schedule_cron: get("SCOUT_SCHEDULE_CRON").unwrap_or(defaults.schedule_cron),
            runner_delay_secs: parse_or(
                "SCOUT_RUNNER_DELAY_SECS",
                get("SCOUT_RUNNER_DELAY_SECS"),
                defaults.runner_delay_secs,
            )?,
            search_terms_path: get("SCOUT_SEARCH_TERMS").map(PathBuf::from),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.youtube_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("YOUTUBE_API_KEY"))
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
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
    fn defaults_apply_when_env_is_empty() {
        let cfg = ScoutConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.backend_url, "http://localhost:3001");
        assert_eq!(cfg.runner_delay_secs, 5);
        assert!(!cfg.database_ssl);
        assert_eq!(
            cfg.require_database_url(),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
        assert_eq!(
            cfg.require_api_key(),
            Err(ConfigError::Missing("YOUTUBE_API_KEY"))
        );
    }

    #[test]
    fn values_are_read_and_normalized() {
        let cfg = ScoutConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://u:p@db/scout"),
            ("DATABASE_SSL", "TRUE"),
            ("BACKEND_URL", "https://api.example.com/"),
            ("YOUTUBE_API_KEY", "  "),
            ("SCOUT_WEB_PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(cfg.require_database_url().unwrap(), "postgres://u:p@db/scout");
        assert!(cfg.database_ssl);
        assert_eq!(cfg.backend_url, "https://api.example.com");
        assert!(cfg.youtube_api_key.is_none());
        assert_eq!(cfg.web_port, 8080);
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let err = ScoutConfig::from_lookup(lookup(&[("SCOUT_WEB_PORT", "eighty")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "SCOUT_WEB_PORT",
                value: "eighty".into()
            }
        );
    }
}
