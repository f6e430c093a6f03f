//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VigilSettings::default()`]
//! 2. If a settings file exists, deep-merge its values over defaults
//!    (a `regions` object in the file replaces the default regions outright)
//! 3. Apply environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{DEFAULT_REGION, VigilSettings};

/// Env var naming an explicit settings file.
pub const CONFIG_ENV: &str = "VIGIL_CONFIG";

/// Resolve which settings file to read.
///
/// An explicit path wins, then `$VIGIL_CONFIG`, then `~/.vigil/settings.json`.
pub fn resolve_settings_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = read_env_string(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil").join("settings.json")
}

/// Load settings with env var overrides.
///
/// With an explicit path the file must exist; otherwise a missing file means
/// compiled defaults.
pub fn load_settings(explicit: Option<&Path>) -> Result<VigilSettings> {
    let path = resolve_settings_path(explicit);
    if explicit.is_some() && !path.exists() {
        return Err(SettingsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    load_settings_from_path(&path)
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        merge_user_settings(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VigilSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn merge_user_settings(defaults: Value, user: Value) -> Value {
    let user_regions = user.get("regions").filter(|r| r.is_object()).cloned();
    let mut merged = deep_merge(defaults, user);
    if let (Some(regions), Value::Object(map)) = (user_regions, &mut merged) {
        let _ = map.insert("regions".into(), regions);
    }
    merged
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
pub fn apply_env_overrides(settings: &mut VigilSettings) {
    apply_overrides_from(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_overrides_from(settings: &mut VigilSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = get("VIGIL_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = get("VIGIL_PORT") {
        match parse_u16_range(&v, 0, u16::MAX) {
            Some(port) => settings.server.port = port,
            None => tracing::warn!(key = "VIGIL_PORT", value = %v, "invalid u16 env var, ignoring"),
        }
    }
    if let Some(v) = get("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = get("VIGIL_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => tracing::warn!(key = "VIGIL_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }

    // ── Consul agent defaults, applied to the local region ──────────
    let address = get("CONSUL_HTTP_ADDR");
    let token = get("CONSUL_HTTP_TOKEN");
    if address.is_none() && token.is_none() {
        return;
    }
    let Some(local) = settings.regions.get_mut(DEFAULT_REGION) else {
        debug!("CONSUL_HTTP_* set but no local region configured, ignoring");
        return;
    };
    if let Some(addr) = address {
        local.address = normalize_address(&addr);
    }
    if token.is_some() {
        local.token = token;
    }
}

/// Consul accepts `host:port` in `CONSUL_HTTP_ADDR`; add a scheme if missing.
pub fn normalize_address(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", addr.trim_end_matches('/'))
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use crate::types::RegionSettings;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    fn write_settings(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3000, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.port, VigilSettings::default().server.port);
    }

    #[test]
    fn file_values_override_defaults() {
        let file = write_settings(r#"{"server":{"port":4000},"watch":{"publishFloorMs":250}}"#);
        let settings = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.watch.publish_floor_ms, 250);
        assert_eq!(settings.watch.entity_wait_ms, 10_000);
    }

    #[test]
    fn file_regions_replace_default_regions() {
        let file = write_settings(
            r#"{"regions":{"eu":{"address":"http://consul-eu:8500","label":"Europe"}}}"#,
        );
        let settings = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.regions.len(), 1);
        let eu = &settings.regions["eu"];
        assert_eq!(eu.address, "http://consul-eu:8500");
        assert_eq!(eu.label.as_deref(), Some("Europe"));
        assert!(eu.token.is_none());
    }

    #[test]
    fn invalid_json_is_error() {
        let file = write_settings("{not json");
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let file = write_settings(r#"{"regions":{}}"#);
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn zero_watch_timings_fail_validation() {
        let file = write_settings(
            r#"{"watch":{"publishFloorMs":0,"errorCooldownMs":0,"pollerBackoffBaseMs":0}}"#,
        );
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn explicit_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let err = load_settings(Some(&missing)).unwrap_err();
        assert!(matches!(err, SettingsError::Io(_)));
    }

    #[test]
    fn explicit_path_wins() {
        let path = PathBuf::from("/etc/vigil.json");
        assert_eq!(resolve_settings_path(Some(&path)), path);
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_server_and_logging() {
        let mut settings = VigilSettings::default();
        let lookup = lookup_from(&[
            ("VIGIL_HOST", "0.0.0.0"),
            ("VIGIL_PORT", "8080"),
            ("VIGIL_LOG_LEVEL", "debug"),
            ("VIGIL_LOG_JSON", "yes"),
        ]);
        apply_overrides_from(&mut settings, &lookup);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = VigilSettings::default();
        let lookup = lookup_from(&[("VIGIL_PORT", "99999"), ("VIGIL_LOG_JSON", "maybe")]);
        apply_overrides_from(&mut settings, &lookup);
        assert_eq!(settings.server.port, 3000);
        assert!(!settings.logging.json);
    }

    #[test]
    fn consul_env_applies_to_local_region() {
        let mut settings = VigilSettings::default();
        let lookup = lookup_from(&[
            ("CONSUL_HTTP_ADDR", "10.0.0.5:8500"),
            ("CONSUL_HTTP_TOKEN", "secret"),
        ]);
        apply_overrides_from(&mut settings, &lookup);
        let local = &settings.regions[DEFAULT_REGION];
        assert_eq!(local.address, "http://10.0.0.5:8500");
        assert_eq!(local.token.as_deref(), Some("secret"));
    }

    #[test]
    fn consul_env_without_local_region_is_ignored() {
        let mut settings = VigilSettings::default();
        settings.regions.clear();
        let eu = RegionSettings {
            address: "http://consul-eu:8500".into(),
            ..RegionSettings::default()
        };
        let _ = settings.regions.insert("eu".into(), eu);
        let lookup = lookup_from(&[("CONSUL_HTTP_ADDR", "10.0.0.5:8500")]);
        apply_overrides_from(&mut settings, &lookup);
        assert_eq!(settings.regions["eu"].address, "http://consul-eu:8500");
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("80", 1, 65535), Some(80));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("abc", 1, 65535), None);
    }

    #[test]
    fn normalize_address_adds_scheme_and_trims() {
        assert_eq!(normalize_address("consul:8500/"), "http://consul:8500");
        assert_eq!(normalize_address("https://consul:8501"), "https://consul:8501");
    }
}
