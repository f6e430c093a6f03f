//! # vigil-settings
//!
//! Configuration management with layered sources for the Vigil relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VigilSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `VIGIL_*` / `CONSUL_HTTP_*` overrides (highest priority)
//!
//! The binary applies CLI flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, resolve_settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = VigilSettings::default();
        let _merged = deep_merge(serde_json::json!({}), serde_json::json!({}));
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = VigilSettings::default();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.watch.entity_wait_ms, 10_000);
        assert_eq!(settings.watch.error_cooldown_ms, 10_000);
        assert_eq!(settings.watch.publish_floor_ms, 5_000);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.regions.contains_key(DEFAULT_REGION));
        assert!(settings.validate().is_ok());
    }
}
