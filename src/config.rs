use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{BoxError, MergeError},
    merge,
};

/// Contract implemented by configuration types managed by a
/// [`ConfigManager`](crate::ConfigManager).
///
/// `Default` provides the zero-valued baseline every reload starts from,
/// and the serde bounds let decoders populate partial instances and the
/// merge engine traverse fields generically. A plain struct only needs an
/// empty impl:
///
/// ```rust
/// use confstack::Config;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Clone, Serialize, Deserialize)]
/// struct AppConfig {
///     host: String,
///     port: u16,
/// }
///
/// impl Config for AppConfig {}
/// ```
///
/// Both methods are optional capabilities. Override [`validate`](Config::validate)
/// to have the fully merged configuration checked once per reload, before any
/// manager-level validators run. Override [`merge`](Config::merge) to replace
/// the generic structural merge entirely for this type.
pub trait Config: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Validates the fully merged configuration.
    ///
    /// Called once per reload. The default accepts everything.
    ///
    /// # Errors
    /// Returning an error aborts the reload; the previous snapshot stays live.
    fn validate(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Merges `incoming` into `self`, later-loader values taking precedence.
    ///
    /// The default performs the generic structural merge (non-zero incoming
    /// fields override, zero fields never erase; see [`crate::merge`]).
    /// An override replaces structural merging for this type; the manager
    /// never falls back to the generic rules once this is overridden.
    ///
    /// # Errors
    /// Returning an error aborts the reload; the previous snapshot stays live.
    fn merge(&mut self, incoming: Self) -> Result<(), MergeError> {
        merge::structural_merge(self, incoming)
    }
}
