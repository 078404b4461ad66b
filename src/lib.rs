//! confstack - Layered runtime configuration management.
//!
//! confstack assembles a typed configuration object from an ordered stack of
//! heterogeneous sources (files, the environment, in-memory defaults), deep-merges
//! them with later loaders taking precedence, validates the result, and can keep
//! it live-updated as sources change. The main features include:
//!
//! - Deterministic layering: loaders are merged in registration order,
//!   non-zero incoming values override, zero values never erase
//! - Optional per-type capabilities: self-validation and custom merge logic
//! - Live reloads via modification-time polling or native file-system events,
//!   with per-loader success/failure callbacks
//! - A race-free snapshot store: readers always see a fully merged, fully
//!   validated configuration or none at all
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use confstack::{Config, ConfigManager};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize)]
//! struct AppConfig {
//!     host: String,
//!     port: u16,
//! }
//!
//! impl Config for AppConfig {}
//!
//! fn main() -> Result<(), confstack::ConfigError> {
//!     let manager = ConfigManager::<AppConfig>::builder()
//!         .json_file("defaults.json")
//!         .env_with_prefix("APP_")
//!         .build();
//!     manager.start()?;
//!
//!     if let Some(config) = manager.current() {
//!         println!("listening on {}:{}", config.host, config.port);
//!     }
//!     manager.stop()
//! }
//! ```

/// The configuration type contract and its optional capabilities.
pub mod config;

/// Format decoders: JSON, TOML and environment-style key/value lines.
pub mod decode;

/// Error types and result aliases.
pub mod error;

/// The manager: loaders, reload pipeline, lifecycle, snapshot store.
pub mod manager;

/// Generic structural merge engine.
pub mod merge;

/// Byte-producing sources: files, the environment, static data.
pub mod source;

/// Change watchers: modification-time polling, file-system events, manual triggers.
pub mod watch;

pub use config::Config;
pub use decode::{Decoder, EnvDecoder, JsonDecoder, TomlDecoder};
pub use error::{BoxError, ConfigError, MergeError, Result, ValidatorRef, WatchError};
pub use manager::{ConfigManager, ConfigManagerBuilder, Loader};
pub use merge::structural_merge;
pub use source::{EnvSource, FileSource, ModTime, Source, StaticSource};
pub use watch::{ChangeCallback, FsEventWatcher, ModTimeWatcher, TriggerWatcher, Watcher};
