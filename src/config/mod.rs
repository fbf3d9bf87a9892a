//! Configuration module for Schemata.
//!
//! Handles the TOML settings file, environment variable expansion and the
//! hot-reload handle shared by every component.

mod handle;
mod settings;

pub use handle::SettingsHandle;
pub use settings::{
    expand_env_vars, AiSettings, BreakerSettings, CacheSettings, DetectorSettings, EngineSettings,
    MapperSettings, PoolSettings, ProviderSettings, QuerySettings, ResilienceSettings,
    RetrySettings, SettingsError, StoreSettings,
};
