//! Client configuration.
//!
//! Provides a unified `ClientConfig` used by the CLI and any embedding app to
//! locate the remote PostgREST endpoint, the local database and the sync
//! tuning knobs.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_SYNC_DEBOUNCE: Duration = Duration::from_secs(3);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PUSH_CHUNK_SIZE: usize = 50;
/// PostgREST's stock `max_rows`
pub const DEFAULT_PULL_PAGE_SIZE: usize = 1000;

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_DB_PATH: &str = "BALLOT_DB_PATH";
pub const ENV_SYNC_DEBOUNCE_MS: &str = "BALLOT_SYNC_DEBOUNCE_MS";
pub const ENV_PROBE_INTERVAL_SECS: &str = "BALLOT_PROBE_INTERVAL_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "BALLOT_REQUEST_TIMEOUT_SECS";
pub const ENV_PUSH_CHUNK_SIZE: &str = "BALLOT_PUSH_CHUNK_SIZE";
pub const ENV_PULL_PAGE_SIZE: &str = "BALLOT_PULL_PAGE_SIZE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Runtime configuration for a sync client.
///
/// The anon key is a public client key, but it is still redacted from
/// `Debug` output so it does not end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// PostgREST project URL, without trailing slash. `None` runs local-only.
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    /// Local database file; callers pick a platform default when unset
    pub db_path: Option<PathBuf>,
    pub sync_debounce: Duration,
    pub probe_interval: Duration,
    pub request_timeout: Duration,
    pub push_chunk_size: usize,
    /// Rows per pull request; must not exceed the server's `max_rows`
    pub pull_page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            db_path: None,
            sync_debounce: DEFAULT_SYNC_DEBOUNCE,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            push_chunk_size: DEFAULT_PUSH_CHUNK_SIZE,
            pull_page_size: DEFAULT_PULL_PAGE_SIZE,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("supabase_url", &self.supabase_url)
            .field(
                "supabase_key",
                &self.supabase_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("db_path", &self.db_path)
            .field("sync_debounce", &self.sync_debounce)
            .field("probe_interval", &self.probe_interval)
            .field("request_timeout", &self.request_timeout)
            .field("push_chunk_size", &self.push_chunk_size)
            .field("pull_page_size", &self.pull_page_size)
            .finish()
    }
}

impl ClientConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Public for testability: callers can exercise parsing without touching
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| normalize_text_option(lookup(key));
        let defaults = Self::default();

        let supabase_url = read(ENV_SUPABASE_URL)
            .map(|url| normalize_http_url(&url, ENV_SUPABASE_URL))
            .transpose()?;
        let supabase_key = read(ENV_SUPABASE_ANON_KEY);
        if supabase_url.is_some() && supabase_key.is_none() {
            return Err(ConfigError::invalid(
                ENV_SUPABASE_ANON_KEY,
                format!("required when {ENV_SUPABASE_URL} is set"),
            ));
        }

        let sync_debounce = read(ENV_SYNC_DEBOUNCE_MS)
            .map(|value| parse_number::<u64>(&value, ENV_SYNC_DEBOUNCE_MS))
            .transpose()?
            .map_or(defaults.sync_debounce, Duration::from_millis);
        let probe_interval = read(ENV_PROBE_INTERVAL_SECS)
            .map(|value| parse_positive(&value, ENV_PROBE_INTERVAL_SECS))
            .transpose()?
            .map_or(defaults.probe_interval, Duration::from_secs);
        let request_timeout = read(ENV_REQUEST_TIMEOUT_SECS)
            .map(|value| parse_positive(&value, ENV_REQUEST_TIMEOUT_SECS))
            .transpose()?
            .map_or(defaults.request_timeout, Duration::from_secs);
        let push_chunk_size = read(ENV_PUSH_CHUNK_SIZE)
            .map(|value| parse_number::<usize>(&value, ENV_PUSH_CHUNK_SIZE))
            .transpose()?
            .unwrap_or(defaults.push_chunk_size);
        if push_chunk_size == 0 {
            return Err(ConfigError::invalid(ENV_PUSH_CHUNK_SIZE, "must be at least 1"));
        }
        let pull_page_size = read(ENV_PULL_PAGE_SIZE)
            .map(|value| parse_positive(&value, ENV_PULL_PAGE_SIZE))
            .transpose()?
            .map_or(Ok(defaults.pull_page_size), |size| {
                usize::try_from(size)
                    .map_err(|_| ConfigError::invalid(ENV_PULL_PAGE_SIZE, "is too large"))
            })?;

        Ok(Self {
            supabase_url,
            supabase_key,
            db_path: read(ENV_DB_PATH).map(PathBuf::from),
            sync_debounce,
            probe_interval,
            request_timeout,
            push_chunk_size,
            pull_page_size,
        })
    }

    /// Whether a remote endpoint is configured
    pub const fn has_remote(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_key.is_some()
    }

    /// Base URL of the PostgREST API (`{supabase_url}/rest/v1`)
    pub fn rest_url(&self) -> Option<String> {
        self.supabase_url
            .as_ref()
            .map(|url| format!("{url}/rest/v1"))
    }
}

/// Trim and validate an http(s) URL, dropping any trailing slash.
pub fn normalize_http_url(raw: &str, field: &str) -> Result<String, ConfigError> {
    let value = normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| ConfigError::invalid(field, "must not be empty"))?;
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::invalid(
            field,
            "must include http:// or https://",
        ))
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("'{value}' is not a valid number")))
}

fn parse_positive(value: &str, field: &str) -> Result<u64, ConfigError> {
    match parse_number::<u64>(value, field)? {
        0 => Err(ConfigError::invalid(field, "must be greater than zero")),
        number => Ok(number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(!config.has_remote());
        assert_eq!(config.rest_url(), None);
    }

    #[test]
    fn parses_full_environment() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_SUPABASE_URL, " https://project.supabase.co/ "),
            (ENV_SUPABASE_ANON_KEY, "anon"),
            (ENV_DB_PATH, "/tmp/ballot.db"),
            (ENV_SYNC_DEBOUNCE_MS, "500"),
            (ENV_PROBE_INTERVAL_SECS, "30"),
            (ENV_REQUEST_TIMEOUT_SECS, "5"),
            (ENV_PUSH_CHUNK_SIZE, "10"),
            (ENV_PULL_PAGE_SIZE, "250"),
        ]))
        .unwrap();

        assert_eq!(
            config.rest_url().as_deref(),
            Some("https://project.supabase.co/rest/v1")
        );
        assert!(config.has_remote());
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/ballot.db")));
        assert_eq!(config.sync_debounce, Duration::from_millis(500));
        assert_eq!(config.probe_interval, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.push_chunk_size, 10);
        assert_eq!(config.pull_page_size, 250);
    }

    #[test]
    fn rejects_invalid_values() {
        for pairs in [
            vec![(ENV_SUPABASE_URL, "project.supabase.co"), (ENV_SUPABASE_ANON_KEY, "anon")],
            vec![(ENV_SUPABASE_URL, "https://project.supabase.co")],
            vec![(ENV_SYNC_DEBOUNCE_MS, "soon")],
            vec![(ENV_PROBE_INTERVAL_SECS, "0")],
            vec![(ENV_PUSH_CHUNK_SIZE, "0")],
            vec![(ENV_PULL_PAGE_SIZE, "0")],
        ] {
            assert!(
                ClientConfig::from_lookup(lookup(&pairs)).is_err(),
                "{pairs:?} should be rejected"
            );
        }
    }

    #[test]
    fn debug_redacts_key() {
        let config = ClientConfig {
            supabase_key: Some("anon-secret".to_string()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("anon-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
