use std::{fmt, io, result};

use thiserror::Error;

/// Boxed error type used wherever adapters and user callbacks need an
/// escape hatch (decoder backends, validators, custom merge logic).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized `Result` type for configuration manager operations.
pub type Result<T> = result::Result<T, ConfigError>;

/// Identifies which validator rejected a configuration during a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorRef {
    /// The configuration type's own `Config::validate` implementation.
    Config,
    /// A positional validator, by registration index.
    Positional(usize),
    /// A named validator, by its registered name.
    Named(String),
}

impl fmt::Display for ValidatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorRef::Config => write!(f, "config self-validation"),
            ValidatorRef::Positional(index) => write!(f, "validator #{index}"),
            ValidatorRef::Named(name) => write!(f, "validator {name:?}"),
        }
    }
}

/// Errors produced while merging a partial configuration into an accumulator.
#[derive(Debug, Error)]
pub enum MergeError {
    /// One side of the merge did not serialize to a map of fields.
    ///
    /// Configuration types must be struct-like; scalars, sequences and
    /// newtypes cannot be merged field-by-field.
    #[error("configuration serialized to {kind}, expected a struct-like map")]
    NotAStruct {
        /// The value kind that was encountered instead of a map.
        kind: &'static str,
    },

    /// A configuration value could not be serialized for merging.
    #[error("serialize configuration for merge: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The merged value could not be rebuilt into the configuration type.
    #[error("rebuild configuration after merge: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// A custom `Config::merge` implementation failed.
    #[error(transparent)]
    Custom(BoxError),
}

impl MergeError {
    /// Wraps an arbitrary error from a custom merge implementation.
    pub fn custom(err: impl Into<BoxError>) -> Self {
        MergeError::Custom(err.into())
    }
}

/// Errors produced by change watchers.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watcher backend failed to start or stop.
    #[error("watcher backend: {0}")]
    Backend(#[source] BoxError),
}

/// Watcher-stop failures collected by [`stop`](crate::ConfigManager::stop),
/// keyed by loader index.
#[derive(Debug)]
pub struct WatcherStopErrors(pub Vec<(usize, WatchError)>);

impl fmt::Display for WatcherStopErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (index, err)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "loader #{index}: {err}")?;
        }
        Ok(())
    }
}

/// Top-level error type for the configuration manager.
///
/// Pipeline variants (`Source`, `Decode`, `Merge`, `Validation`) carry the
/// index of the loader or the identity of the validator that failed, so a
/// failed reload can be traced back to its origin.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A loader's source could not be read.
    #[error("read source for loader #{index}: {source}")]
    Source {
        /// Registration index of the failing loader.
        index: usize,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A loader's raw data could not be decoded into the configuration type.
    #[error("decode data for loader #{index}: {source}")]
    Decode {
        /// Registration index of the failing loader.
        index: usize,
        /// The underlying decoder failure.
        #[source]
        source: BoxError,
    },

    /// A decoded partial configuration could not be merged.
    #[error("merge configuration from loader #{index}: {source}")]
    Merge {
        /// Registration index of the failing loader.
        index: usize,
        /// The underlying merge failure.
        #[source]
        source: MergeError,
    },

    /// The fully merged configuration was rejected by a validator.
    #[error("{validator} rejected the configuration: {source}")]
    Validation {
        /// Which validator failed.
        validator: ValidatorRef,
        /// The validator's error.
        #[source]
        source: BoxError,
    },

    /// The constructor produced something other than a struct-like value.
    #[error("constructor must produce a struct-like configuration, got {kind}")]
    ConstructorNotStruct {
        /// The value kind the constructor output serialized to.
        kind: &'static str,
    },

    /// The constructor produced an instance with non-zero fields.
    ///
    /// Merging relies on every loader starting from the same zero baseline;
    /// a non-zero constructor would make zero-valued inputs observable.
    #[error("constructor must produce a zero-value configuration")]
    ConstructorNotZero,

    /// The constructor output could not be serialized for inspection.
    #[error("inspect constructor output: {0}")]
    ConstructorInspect(#[source] serde_json::Error),

    /// `start()` was called with no loaders registered.
    #[error("no loaders defined")]
    NoLoadersDefined,

    /// One or more watchers failed to stop. The manager is stopped regardless.
    #[error("stop watchers: {0}")]
    WatcherStop(WatcherStopErrors),
}
