//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GqlWsSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `GQLWS_*` environment variable overrides
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::GqlWsSettings;

/// Resolve the path to the settings file (`~/.gqlws/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gqlws").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GqlWsSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<GqlWsSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
fn load_file_layer(path: &Path) -> Result<GqlWsSettings> {
    let defaults = serde_json::to_value(GqlWsSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides(settings: &mut GqlWsSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from any key lookup. `lookup` returns the raw value of a
/// `GQLWS_*` variable.
pub fn apply_overrides(settings: &mut GqlWsSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("GQLWS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("GQLWS_PORT").and_then(|v| checked("GQLWS_PORT", &v, parse_u16_range(&v, 0, 65535))) {
        settings.server.port = v;
    }
    if let Some(v) = read("GQLWS_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = read("GQLWS_MAX_CONNECTIONS")
        .and_then(|v| checked("GQLWS_MAX_CONNECTIONS", &v, parse_usize_range(&v, 1, 1_000_000)))
    {
        settings.server.max_connections = v;
    }
    if let Some(v) = read("GQLWS_KEEP_ALIVE_SECS")
        .and_then(|v| checked("GQLWS_KEEP_ALIVE_SECS", &v, parse_u64_range(&v, 0, 3_600)))
    {
        settings.server.keep_alive_interval_secs = v;
    }

    // ── Subscriptions ───────────────────────────────────────────────
    if let Some(v) = read("GQLWS_EVENT_QUEUE")
        .and_then(|v| checked("GQLWS_EVENT_QUEUE", &v, parse_usize_range(&v, 1, 1_000_000)))
    {
        settings.subscriptions.event_queue_capacity = v;
    }
    if let Some(v) = read("GQLWS_SEND_QUEUE")
        .and_then(|v| checked("GQLWS_SEND_QUEUE", &v, parse_usize_range(&v, 1, 1_000_000)))
    {
        settings.subscriptions.send_queue_capacity = v;
    }
    if let Some(v) = read("GQLWS_DELIVERY_TIMEOUT_MS")
        .and_then(|v| checked("GQLWS_DELIVERY_TIMEOUT_MS", &v, parse_u64_range(&v, 1, 600_000)))
    {
        settings.subscriptions.delivery_timeout_ms = v;
    }
    if let Some(v) = read("GQLWS_DISPATCH_CONCURRENCY")
        .and_then(|v| checked("GQLWS_DISPATCH_CONCURRENCY", &v, parse_usize_range(&v, 1, 1_024)))
    {
        settings.subscriptions.dispatch_concurrency = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("GQLWS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("GQLWS_LOG_JSON").and_then(|v| checked("GQLWS_LOG_JSON", &v, parse_bool(&v))) {
        settings.logging.json = v;
    }
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
