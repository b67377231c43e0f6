//! Layered configuration loading.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `STAGEFORM_*` environment variable overrides
//!
//! CLI flags are applied last by the binary.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ServerConfig;

const MAX_SESSIONS_MIN: usize = 1;
const MAX_SESSIONS_MAX: usize = 10_000;
const MAILBOX_MIN: usize = 1;
const MAILBOX_MAX: usize = 65_536;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Load settings from an optional JSON file, then apply env overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: Option<&Path>) -> Result<ServerConfig> {
    let mut config = load_file_layer(path)?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn load_file_layer(path: Option<&Path>) -> Result<ServerConfig> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, nulls in
/// `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `STAGEFORM_*` environment overrides. Invalid values are ignored with a warning.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    apply_overrides_from(config, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with an explicit variable lookup.
pub fn apply_overrides_from<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("STAGEFORM_HOST") {
        config.host = v;
    }
    if let Some(v) = env.u16("STAGEFORM_PORT", 0, 65535) {
        config.port = v;
    }
    if let Some(v) = env.usize("STAGEFORM_MAX_SESSIONS", MAX_SESSIONS_MIN, MAX_SESSIONS_MAX) {
        config.max_sessions = v;
    }
    if let Some(v) = env.usize("STAGEFORM_MAILBOX_CAPACITY", MAILBOX_MIN, MAILBOX_MAX) {
        config.mailbox_capacity = v;
    }
    if let Some(v) = env.usize("STAGEFORM_MAX_MESSAGE_SIZE", 1024, 64 * 1024 * 1024) {
        config.max_message_size = v;
    }
    if let Some(v) = env.u64("STAGEFORM_SHUTDOWN_TIMEOUT_SECS", 0, 3600) {
        config.shutdown_timeout_secs = v;
    }
    if let Some(v) = env.string("STAGEFORM_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Some(v) = env.bool("STAGEFORM_LOG_JSON") {
        config.log_json = v;
    }
}

/// Reject configurations the server cannot run with.
pub fn validate(config: &ServerConfig) -> Result<()> {
    if !(MAX_SESSIONS_MIN..=MAX_SESSIONS_MAX).contains(&config.max_sessions) {
        return Err(SettingsError::InvalidValue(format!(
            "max_sessions must be between {MAX_SESSIONS_MIN} and {MAX_SESSIONS_MAX}, got {}",
            config.max_sessions
        )));
    }
    if !(MAILBOX_MIN..=MAILBOX_MAX).contains(&config.mailbox_capacity) {
        return Err(SettingsError::InvalidValue(format!(
            "mailbox_capacity must be between {MAILBOX_MIN} and {MAILBOX_MAX}, got {}",
            config.mailbox_capacity
        )));
    }
    if config.host.trim().is_empty() {
        return Err(SettingsError::InvalidValue("host must not be empty".into()));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
