//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VigilSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `VIGIL_*` environment variable overrides (highest priority)
//! 4. [`VigilSettings::validate`] clamps what is left

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{TimeoutPolicy, VigilSettings};

/// Resolve the default settings file (`~/.vigil/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VigilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings resolving overrides through `env` instead of the process
/// environment.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<VigilSettings> {
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VigilSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    let _ = settings.validate();
    Ok(settings)
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

/// Apply `VIGIL_*` overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut VigilSettings, env: impl Fn(&str) -> Option<String>) {
    let vars = EnvReader { env };

    if let Some(v) = vars.string("VIGIL_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = vars.parsed("VIGIL_PORT", |s| parse_range::<u16>(s, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = vars.parsed("VIGIL_BUFFER_SIZE", |s| parse_range(s, 1, 100_000)) {
        settings.stream.buffer_size = v;
    }
    if let Some(v) = vars.parsed("VIGIL_FLUSH_INTERVAL_MS", |s| parse_range(s, 10, 3_600_000)) {
        settings.stream.flush_interval_ms = v;
    }
    if let Some(v) = vars.parsed("VIGIL_COMPRESSION_ENABLED", parse_bool) {
        settings.stream.compression_enabled = v;
    }
    if let Some(v) = vars.parsed("VIGIL_COMPRESSION_THRESHOLD", |s| {
        parse_range(s, 0, 64 * 1024 * 1024)
    }) {
        settings.stream.compression_threshold_bytes = v;
    }
    if let Some(v) = vars.string("VIGIL_DB_PATH") {
        settings.persistence.db_path = v;
    }
    if let Some(v) = vars.parsed("VIGIL_PERSISTENCE_ENABLED", parse_bool) {
        settings.persistence.enabled = v;
    }
    if let Some(v) = vars.parsed("VIGIL_APPROVAL_TIMEOUT_MS", parse_timeout) {
        settings.intervention.approval_timeout_ms = v;
    }
    if let Some(v) = vars.parsed("VIGIL_ON_TIMEOUT", parse_policy) {
        settings.intervention.on_timeout = v;
    }
    if let Some(v) = vars.string("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = vars.parsed("VIGIL_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
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

/// Parse a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse an approval timeout; `none`/`off`/`0` mean wait forever.
fn parse_timeout(val: &str) -> Option<Option<u64>> {
    match val.to_lowercase().as_str() {
        "none" | "off" | "0" => Some(None),
        other => parse_range(other, 1, 86_400_000).map(Some),
    }
}

fn parse_policy(val: &str) -> Option<TimeoutPolicy> {
    serde_json::from_value(Value::String(val.to_lowercase())).ok()
}

struct EnvReader<F> {
    env: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
