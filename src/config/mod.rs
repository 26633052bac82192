// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Loading is two-phase: [`loader::load_from_path`] only deserializes TOML
//! into a [`RawConfigFile`]; `ConfigFile::try_from(raw)` then validates it and
//! resolves duration strings and defaults.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    AdapterSettings, BaselineSettings, ConfigFile, DispatchSettings, HandlerSettings,
    RawAdapterSection, RawBaselineSection, RawConfigFile, RawDispatchSection,
    RawFailuresSection, RawHandlerSection, RawShutdownSection, RawWatchSection,
    ShutdownSettings, WatchSettings,
};
