//! Monitor Configuration Module
//!
//! Two layers of configuration:
//!
//! - **Deployment config** ([`MonitorConfig`]): TOML, loaded once at startup,
//!   validated, then passed by reference to whatever needs it.
//! - **User settings** ([`SettingsProvider`] / [`BatchSettings`]): string
//!   key/value pairs edited at runtime (calibration offset, batch metadata,
//!   alert window), coerced into a typed snapshot at the start of each cycle.
//!
//! ## Loading Order
//!
//! 1. `FERMWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `fermwatch.toml` in the current working directory
//! 3. Built-in defaults

mod monitor_config;
pub mod defaults;
pub mod settings;
pub mod validation;

pub use monitor_config::*;
pub use settings::{
    parse_attenuation, BatchSettings, SettingsProvider, StaticSettings, StoreSettings,
};
