//! # vigil-settings
//!
//! Layered configuration for the vigil streaming gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VigilSettings::default()`]
//! 2. **Settings file**: `~/.vigil/settings.json` or `--config <path>`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `VIGIL_*` overrides (highest priority)
//!
//! Loaded settings are passed explicitly to the components that need them;
//! there is no process-wide settings instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, load_with_env,
    settings_path,
};
pub use types::*;
