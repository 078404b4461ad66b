//! The configuration manager: reload pipeline, lifecycle and snapshot store.

use std::sync::{
    Arc, RwLock, RwLockReadGuard,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    config::Config,
    decode::{Decoder, EnvDecoder, JsonDecoder, TomlDecoder},
    error::{BoxError, ConfigError, Result, ValidatorRef, WatcherStopErrors},
    merge,
    source::{EnvSource, FileSource, Source},
    watch::{ChangeCallback, ModTimeWatcher, Watcher},
};

/// Produces the zero-valued accumulator each reload starts from.
pub type Constructor<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Validator function registered on the manager, invoked with the fully
/// merged configuration on every reload.
pub type ValidateFn<T> = Box<dyn Fn(&T) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Callback fired after a watcher-triggered reload succeeded.
pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback fired after a watcher-triggered reload failed. The error is not
/// propagated anywhere else.
pub type UpdateErrorCallback = Arc<dyn Fn(&ConfigError) + Send + Sync>;

/// One registered unit contributing to the merged configuration: a source,
/// a decoder, and optionally a watcher with success/failure callbacks.
///
/// A loader's identity is its registration position; later loaders override
/// earlier ones field-by-field.
pub struct Loader<T> {
    source: Box<dyn Source>,
    decoder: Box<dyn Decoder<T>>,
    watcher: Option<Box<dyn Watcher>>,
    on_update_success: Option<UpdateCallback>,
    on_update_error: Option<UpdateErrorCallback>,
}

impl<T: Config> Loader<T> {
    /// Creates a loader from a source and a decoder.
    pub fn new(source: impl Source + 'static, decoder: impl Decoder<T> + 'static) -> Self {
        Self {
            source: Box::new(source),
            decoder: Box::new(decoder),
            watcher: None,
            on_update_success: None,
            on_update_error: None,
        }
    }

    /// Attaches a change watcher; its detections trigger automatic reloads
    /// once the manager is started.
    #[must_use]
    pub fn with_watcher(mut self, watcher: impl Watcher + 'static) -> Self {
        self.watcher = Some(Box::new(watcher));
        self
    }

    /// Registers a callback fired after each successful watcher-triggered
    /// reload of this loader.
    #[must_use]
    pub fn on_success(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_update_success = Some(Arc::new(callback));
        self
    }

    /// Registers a callback receiving the error of each failed
    /// watcher-triggered reload of this loader.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&ConfigError) + Send + Sync + 'static) -> Self {
        self.on_update_error = Some(Arc::new(callback));
        self
    }
}

/// Shared manager state; watcher callbacks keep it alive across threads.
struct Shared<T: Config> {
    constructor: Constructor<T>,
    loaders: RwLock<Vec<Loader<T>>>,
    validators: Vec<ValidateFn<T>>,
    named_validators: Vec<(String, ValidateFn<T>)>,
    running: AtomicBool,
    current: RwLock<Option<Arc<T>>>,
    updates: broadcast::Sender<Arc<T>>,
}

impl<T: Config> Shared<T> {
    fn read_loaders(&self) -> RwLockReadGuard<'_, Vec<Loader<T>>> {
        match self.loaders.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Constructor output must be a struct-like, entirely zero-valued
    /// instance; merging relies on that baseline.
    fn check_constructor(&self) -> Result<()> {
        let instance = (self.constructor)();
        let value = serde_json::to_value(&instance).map_err(ConfigError::ConstructorInspect)?;
        if !value.is_object() {
            return Err(ConfigError::ConstructorNotStruct {
                kind: merge::value_kind(&value),
            });
        }
        if !merge::is_zero_instance(&value) {
            return Err(ConfigError::ConstructorNotZero);
        }
        Ok(())
    }

    fn preflight(&self) -> Result<()> {
        self.check_constructor()?;
        if self.read_loaders().is_empty() {
            return Err(ConfigError::NoLoadersDefined);
        }
        Ok(())
    }

    /// Runs the full read → decode → merge → validate pipeline and swaps the
    /// snapshot on success. Any failure leaves the previous snapshot intact.
    fn reload(&self) -> Result<()> {
        let loaders = self.read_loaders();

        let mut accumulator = (self.constructor)();
        for (index, loader) in loaders.iter().enumerate() {
            let data = loader
                .source
                .read()
                .map_err(|source| ConfigError::Source { index, source })?;
            let partial = loader
                .decoder
                .decode(&data)
                .map_err(|source| ConfigError::Decode { index, source })?;
            accumulator
                .merge(partial)
                .map_err(|source| ConfigError::Merge { index, source })?;
        }
        drop(loaders);

        self.run_validators(&accumulator)?;

        let snapshot = Arc::new(accumulator);
        {
            let mut current = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *current = Some(Arc::clone(&snapshot));
        }
        let _ = self.updates.send(snapshot);
        debug!("configuration reloaded");
        Ok(())
    }

    fn run_validators(&self, config: &T) -> Result<()> {
        config.validate().map_err(|source| ConfigError::Validation {
            validator: ValidatorRef::Config,
            source,
        })?;
        for (index, validator) in self.validators.iter().enumerate() {
            validator(config).map_err(|source| ConfigError::Validation {
                validator: ValidatorRef::Positional(index),
                source,
            })?;
        }
        for (name, validator) in &self.named_validators {
            validator(config).map_err(|source| ConfigError::Validation {
                validator: ValidatorRef::Named(name.clone()),
                source,
            })?;
        }
        Ok(())
    }
}

/// Manages a layered, validated, optionally live-updated configuration.
///
/// Built through [`ConfigManager::builder`]. Registered loaders are read,
/// decoded and merged in order on every reload; the result is validated and
/// swapped in as the current snapshot atomically: readers either see the
/// previous fully merged configuration or the new one, never an intermediate.
///
/// Cloning is cheap and shares the same underlying manager.
pub struct ConfigManager<T: Config> {
    shared: Arc<Shared<T>>,
}

impl<T: Config> Clone for ConfigManager<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Config> ConfigManager<T> {
    /// Starts building a manager for the configuration type `T`.
    pub fn builder() -> ConfigManagerBuilder<T> {
        ConfigManagerBuilder::new()
    }

    /// Starts the manager: pre-flight checks, one synchronous reload, then
    /// arms every loader's watcher. No-op if already running.
    ///
    /// # Errors
    /// Any pre-flight or reload failure aborts the start and leaves the
    /// manager stopped; no watcher is armed.
    ///
    /// # Panics
    /// Arming a loader with a tokio-based watcher ([`ModTimeWatcher`])
    /// panics when called from outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.shared.preflight()?;
        self.shared.reload()?;

        // Running before arming: change callbacks are gated on the flag, so
        // a trigger firing right after registration must not be dropped.
        self.shared.running.store(true, Ordering::Release);
        self.arm_watchers();
        debug!("configuration manager started");
        Ok(())
    }

    /// Stops the manager: marks it stopped (no new reload work is accepted),
    /// then stops every registered watcher. No-op if already stopped.
    ///
    /// Callbacks already in flight may still complete, and a trailing reload
    /// may still land; no watcher keeps firing indefinitely after this
    /// returns. The manager can be started again.
    ///
    /// # Errors
    /// Watcher-stop failures are collected into a single
    /// [`ConfigError::WatcherStop`]; the manager is stopped regardless.
    pub fn stop(&self) -> Result<()> {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let loaders = self.shared.read_loaders();
        let mut failures = Vec::new();
        for (index, loader) in loaders.iter().enumerate() {
            if let Some(watcher) = &loader.watcher {
                if let Err(err) = watcher.stop() {
                    failures.push((index, err));
                }
            }
        }
        debug!("configuration manager stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::WatcherStop(WatcherStopErrors(failures)))
        }
    }

    /// Re-runs the whole pipeline once, synchronously.
    ///
    /// Sources are read fresh; on success the snapshot is replaced, on
    /// failure it is left untouched. Concurrent reloads (watcher-triggered)
    /// are not serialized against this call; the last snapshot swap wins.
    ///
    /// # Errors
    /// The first failing pipeline stage, tagged with its loader index or
    /// validator identity.
    pub fn reload(&self) -> Result<()> {
        self.shared.reload()
    }

    /// Appends a loader. Only meaningful before [`start`](Self::start):
    /// a loader added afterwards participates in subsequent reloads but its
    /// watcher is never armed.
    pub fn add_loader(&self, loader: Loader<T>) {
        if self.shared.running.load(Ordering::Acquire) {
            warn!("loader added while running; its watcher will not be armed");
        }
        let mut loaders = match self.shared.loaders.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loaders.push(loader);
    }

    /// Returns the current configuration snapshot, or `None` before the
    /// first successful reload.
    pub fn current(&self) -> Option<Arc<T>> {
        let current = match self.shared.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        current.clone()
    }

    /// Subscribes to configuration updates; each successful reload delivers
    /// the new snapshot. Slow receivers may observe lagged drops, per
    /// [`broadcast`] semantics.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.shared.updates.subscribe()
    }

    /// Whether the manager is currently running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn arm_watchers(&self) {
        let loaders = self.shared.read_loaders();
        for (index, loader) in loaders.iter().enumerate() {
            let Some(watcher) = &loader.watcher else {
                continue;
            };

            let shared = Arc::clone(&self.shared);
            let on_success = loader.on_update_success.clone();
            let on_error = loader.on_update_error.clone();
            let callback: ChangeCallback = Arc::new(move || {
                if !shared.running.load(Ordering::Acquire) {
                    return;
                }
                match shared.reload() {
                    Ok(()) => {
                        if let Some(callback) = &on_success {
                            callback();
                        }
                    }
                    Err(err) => {
                        warn!(loader = index, error = %err, "change-triggered reload failed");
                        if let Some(callback) = &on_error {
                            callback(&err);
                        }
                    }
                }
            });
            watcher.watch(callback);
        }
    }
}

/// Builder assembling a [`ConfigManager`]: a constructor, an ordered list of
/// loaders, and positional/named validators.
pub struct ConfigManagerBuilder<T: Config> {
    constructor: Constructor<T>,
    loaders: Vec<Loader<T>>,
    validators: Vec<ValidateFn<T>>,
    named_validators: Vec<(String, ValidateFn<T>)>,
}

impl<T: Config> Default for ConfigManagerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Config> ConfigManagerBuilder<T> {
    /// Creates a builder using `T::default` as the constructor.
    pub fn new() -> Self {
        Self {
            constructor: Box::new(T::default),
            loaders: Vec::new(),
            validators: Vec::new(),
            named_validators: Vec::new(),
        }
    }

    /// Replaces the constructor. Its output is pre-flight checked at
    /// [`start`](ConfigManager::start): it must serialize to a struct-like,
    /// entirely zero-valued instance.
    #[must_use]
    pub fn constructor(mut self, constructor: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.constructor = Box::new(constructor);
        self
    }

    /// Registers a loader. Registration order is merge precedence: later
    /// loaders override earlier ones field-by-field.
    #[must_use]
    pub fn loader(mut self, loader: Loader<T>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Registers a loader reading a JSON file once per reload.
    #[must_use]
    pub fn json_file(self, path: impl Into<std::path::PathBuf>) -> Self {
        self.loader(Loader::new(FileSource::new(path), JsonDecoder::new()))
    }

    /// Registers a loader reading a TOML file once per reload.
    #[must_use]
    pub fn toml_file(self, path: impl Into<std::path::PathBuf>) -> Self {
        self.loader(Loader::new(FileSource::new(path), TomlDecoder::new()))
    }

    /// Registers a JSON file loader with a modification-time polling watcher,
    /// so edits to the file trigger automatic reloads.
    #[must_use]
    pub fn dynamic_json_file(self, path: impl Into<std::path::PathBuf>) -> Self {
        let source = FileSource::new(path);
        let watcher = ModTimeWatcher::new(Arc::new(source.clone()));
        self.loader(Loader::new(source, JsonDecoder::new()).with_watcher(watcher))
    }

    /// Registers a TOML file loader with a modification-time polling watcher.
    #[must_use]
    pub fn dynamic_toml_file(self, path: impl Into<std::path::PathBuf>) -> Self {
        let source = FileSource::new(path);
        let watcher = ModTimeWatcher::new(Arc::new(source.clone()));
        self.loader(Loader::new(source, TomlDecoder::new()).with_watcher(watcher))
    }

    /// Registers a loader reading the process environment.
    #[must_use]
    pub fn env(self) -> Self {
        self.loader(Loader::new(EnvSource::new(), EnvDecoder::new()))
    }

    /// Registers an environment loader considering only variables starting
    /// with `prefix`.
    #[must_use]
    pub fn env_with_prefix(self, prefix: impl Into<String>) -> Self {
        self.loader(Loader::new(EnvSource::new(), EnvDecoder::with_prefix(prefix)))
    }

    /// Registers a positional validator, invoked with the merged
    /// configuration on every reload.
    #[must_use]
    pub fn validator(
        mut self,
        validator: impl Fn(&T) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Registers a named validator; the name identifies it in validation
    /// errors. Validators run in a fixed order: the configuration type's own
    /// `validate`, positional validators, then named validators, each in
    /// registration order.
    #[must_use]
    pub fn named_validator(
        mut self,
        name: impl Into<String>,
        validator: impl Fn(&T) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.named_validators.push((name.into(), Box::new(validator)));
        self
    }

    /// Builds the manager, initially stopped and without a snapshot.
    pub fn build(self) -> ConfigManager<T> {
        let (updates, _) = broadcast::channel(16);
        ConfigManager {
            shared: Arc::new(Shared {
                constructor: self.constructor,
                loaders: RwLock::new(self.loaders),
                validators: self.validators,
                named_validators: self.named_validators,
                running: AtomicBool::new(false),
                current: RwLock::new(None),
                updates,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use std::{
        collections::BTreeMap,
        io,
        sync::Mutex,
        sync::atomic::AtomicUsize,
    };

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{
        error::{MergeError, WatchError},
        source::StaticSource,
        watch::TriggerWatcher,
    };

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct TestInner {
        int: i64,
        string: String,
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        int: i64,
        int_opt: Option<i64>,
        inner: TestInner,
        map: BTreeMap<String, String>,
        slice: Vec<String>,
    }

    impl Config for TestConfig {}

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct RejectingConfig {
        int: i64,
    }

    impl Config for RejectingConfig {
        fn validate(&self) -> std::result::Result<(), BoxError> {
            if self.int == 123 {
                return Err("int must not be 123".into());
            }
            Ok(())
        }
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct CustomMergeConfig {
        int: i64,
        string: String,
    }

    impl Config for CustomMergeConfig {
        fn merge(&mut self, incoming: Self) -> std::result::Result<(), MergeError> {
            // Deliberately not what structural merge would produce.
            self.int = incoming.int + 1;
            Ok(())
        }
    }

    /// Shared probe into a [`CountingSource`] owned by a loader.
    #[derive(Clone, Default)]
    struct SourceProbe {
        reads: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    impl SourceProbe {
        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }
    }

    /// Counts reads; optionally fails every read.
    struct CountingSource {
        data: Vec<u8>,
        probe: SourceProbe,
    }

    impl CountingSource {
        fn new(data: &[u8]) -> (Self, SourceProbe) {
            let probe = SourceProbe::default();
            (
                Self {
                    data: data.to_vec(),
                    probe: probe.clone(),
                },
                probe,
            )
        }
    }

    impl Source for CountingSource {
        fn read(&self) -> io::Result<Vec<u8>> {
            self.probe.reads.fetch_add(1, Ordering::SeqCst);
            if self.probe.fail.load(Ordering::SeqCst) {
                return Err(io::Error::other("source unavailable"));
            }
            Ok(self.data.clone())
        }
    }

    struct FailingDecoder;

    impl<T> Decoder<T> for FailingDecoder {
        fn decode(&self, _data: &[u8]) -> std::result::Result<T, BoxError> {
            Err("decode always fails".into())
        }
    }

    /// Counts stop calls, to verify idempotent shutdown.
    #[derive(Default)]
    struct CountingStopWatcher {
        stops: Arc<AtomicUsize>,
    }

    impl Watcher for CountingStopWatcher {
        fn watch(&self, _on_change: ChangeCallback) {}

        fn stop(&self) -> std::result::Result<(), WatchError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingStopWatcher;

    impl Watcher for FailingStopWatcher {
        fn watch(&self, _on_change: ChangeCallback) {}

        fn stop(&self) -> std::result::Result<(), WatchError> {
            Err(WatchError::Backend("backend refused to stop".into()))
        }
    }

    fn json_loader(data: &[u8]) -> Loader<TestConfig> {
        Loader::new(StaticSource::new(data), JsonDecoder::new())
    }

    #[test]
    fn reload_merges_loaders_in_registration_order() {
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{\"int\": 1}"))
            .loader(json_loader(b"{\"inner\": {\"string\": \"str\"}}"))
            .build();

        manager.start().unwrap();

        let snapshot = manager.current().unwrap();
        assert_eq!(snapshot.int, 1);
        assert_eq!(snapshot.inner.string, "str");
        manager.stop().unwrap();
    }

    #[test]
    fn last_registered_loader_wins() {
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{\"int\": 10, \"slice\": [\"a\"]}"))
            .loader(json_loader(b"{\"int\": 1}"))
            .build();

        manager.start().unwrap();

        let snapshot = manager.current().unwrap();
        assert_eq!(snapshot.int, 1);
        // The second loader's zero fields must not erase the first's data.
        assert_eq!(snapshot.slice, vec!["a".to_owned()]);
    }

    #[test]
    fn custom_merge_replaces_structural_merge() {
        let manager = ConfigManager::<CustomMergeConfig>::builder()
            .loader(Loader::new(
                StaticSource::new(&b"{\"int\": 1, \"string\": \"kept?\"}"[..]),
                JsonDecoder::new(),
            ))
            .build();

        manager.start().unwrap();

        let snapshot = manager.current().unwrap();
        // Structural merge would have produced int == 1 and copied `string`.
        assert_eq!(snapshot.int, 2);
        assert_eq!(snapshot.string, "");
    }

    #[test]
    fn failed_reload_leaves_snapshot_and_skips_later_loaders() {
        let (flaky, flaky_probe) = CountingSource::new(b"{\"int\": 2}");
        let (trailing, trailing_probe) = CountingSource::new(b"{\"int\": 3}");

        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{\"int\": 1}"))
            .loader(Loader::new(flaky, JsonDecoder::new()))
            .loader(Loader::new(trailing, JsonDecoder::new()))
            .build();
        manager.start().unwrap();
        assert_eq!(manager.current().unwrap().int, 3);

        flaky_probe.set_failing(true);
        let err = manager.reload().unwrap_err();
        assert!(matches!(err, ConfigError::Source { index: 1, .. }));
        assert_eq!(manager.current().unwrap().int, 3);
        assert_eq!(trailing_probe.reads(), 1);
    }

    #[test]
    fn decode_failure_aborts_reload() {
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(Loader::new(
                StaticSource::new(&b"irrelevant"[..]),
                FailingDecoder,
            ))
            .build();

        let err = manager.start().unwrap_err();
        assert!(matches!(err, ConfigError::Decode { index: 0, .. }));
        assert!(manager.current().is_none());
        assert!(!manager.is_running());
    }

    #[test]
    fn named_validator_failure_is_identified_by_name() {
        // Type-level validation passes (int != 123); the named validator
        // must still abort the reload and be named in the error.
        let manager = ConfigManager::<RejectingConfig>::builder()
            .loader(Loader::new(
                StaticSource::new(&b"{\"int\": 5}"[..]),
                JsonDecoder::new(),
            ))
            .named_validator("bounds", |_config| Err("out of bounds".into()))
            .build();

        let err = manager.start().unwrap_err();
        match err {
            ConfigError::Validation { validator, .. } => {
                assert_eq!(validator, ValidatorRef::Named("bounds".to_owned()));
            }
            other => panic!("expected validation error, got {other}"),
        }
        assert!(manager.current().is_none());
    }

    #[test]
    fn type_level_validation_runs_first() {
        let manager = ConfigManager::<RejectingConfig>::builder()
            .loader(Loader::new(
                StaticSource::new(&b"{\"int\": 123}"[..]),
                JsonDecoder::new(),
            ))
            .named_validator("never-reached", |_config| Err("unreachable".into()))
            .build();

        let err = manager.start().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation {
                validator: ValidatorRef::Config,
                ..
            }
        ));
    }

    #[test]
    fn positional_validators_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        let second = Arc::clone(&order);
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{}"))
            .validator(move |_config| {
                first.lock().unwrap().push(0);
                Ok(())
            })
            .validator(move |_config| {
                second.lock().unwrap().push(1);
                Err("second fails".into())
            })
            .build();

        let err = manager.start().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation {
                validator: ValidatorRef::Positional(1),
                ..
            }
        ));
        assert_eq!(*order.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn added_loader_participates_in_the_next_reload() {
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{\"int\": 1, \"slice\": [\"a\"]}"))
            .build();
        manager.add_loader(json_loader(b"{\"int\": 2}"));

        manager.start().unwrap();

        let snapshot = manager.current().unwrap();
        assert_eq!(snapshot.int, 2);
        assert_eq!(snapshot.slice, vec!["a".to_owned()]);
    }

    #[test]
    fn loader_added_while_running_is_merged_but_not_armed() {
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{\"int\": 1}"))
            .build();
        manager.start().unwrap();

        let (source, probe) = CountingSource::new(b"{\"int\": 2}");
        let watcher = Arc::new(TriggerWatcher::new());
        manager.add_loader(
            Loader::new(source, JsonDecoder::new())
                .with_watcher(SharedWatcher(Arc::clone(&watcher))),
        );

        // The watcher was never armed, so triggering it does nothing.
        watcher.trigger();
        assert_eq!(probe.reads(), 0);
        assert_eq!(manager.current().unwrap().int, 1);

        // An explicit reload still includes the new loader.
        manager.reload().unwrap();
        assert_eq!(probe.reads(), 1);
        assert_eq!(manager.current().unwrap().int, 2);
    }

    #[test]
    fn start_without_loaders_fails_preflight() {
        let manager = ConfigManager::<TestConfig>::builder().build();

        let err = manager.start().unwrap_err();
        assert!(matches!(err, ConfigError::NoLoadersDefined));
        assert!(!manager.is_running());
    }

    // Scalars satisfy the trait bounds but cannot be merged field-by-field;
    // pre-flight must reject them before any source is read.
    impl Config for i64 {}

    #[test]
    fn scalar_configuration_fails_preflight() {
        let (source, probe) = CountingSource::new(b"1");

        let manager = ConfigManager::<i64>::builder()
            .loader(Loader::new(source, JsonDecoder::new()))
            .build();

        let err = manager.start().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ConstructorNotStruct { kind: "a number" }
        ));
        assert_eq!(probe.reads(), 0);
        assert!(!manager.is_running());
    }

    #[test]
    fn non_zero_constructor_fails_before_touching_loaders() {
        let (source, probe) = CountingSource::new(b"{\"int\": 1}");

        let manager = ConfigManager::<TestConfig>::builder()
            .constructor(|| TestConfig {
                int: 42,
                ..TestConfig::default()
            })
            .loader(Loader::new(source, JsonDecoder::new()))
            .build();

        let err = manager.start().unwrap_err();
        assert!(matches!(err, ConfigError::ConstructorNotZero));
        assert_eq!(probe.reads(), 0);
    }

    #[test]
    fn start_is_idempotent() {
        let (source, probe) = CountingSource::new(b"{\"int\": 1}");
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(Loader::new(source, JsonDecoder::new()))
            .build();

        manager.start().unwrap();
        manager.start().unwrap();
        assert_eq!(probe.reads(), 1);
        assert!(manager.is_running());
    }

    #[test]
    fn stop_is_idempotent_and_stops_watchers_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let watcher = CountingStopWatcher {
            stops: Arc::clone(&stops),
        };

        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{\"int\": 1}").with_watcher(watcher))
            .build();

        manager.start().unwrap();
        manager.stop().unwrap();
        manager.stop().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!manager.is_running());
    }

    #[test]
    fn stop_collects_watcher_failures_but_still_stops() {
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{\"int\": 1}").with_watcher(FailingStopWatcher))
            .build();

        manager.start().unwrap();
        let err = manager.stop().unwrap_err();
        assert!(matches!(err, ConfigError::WatcherStop(_)));
        assert!(!manager.is_running());

        // Second stop is a no-op and reports no failures.
        manager.stop().unwrap();
    }

    #[test]
    fn triggered_reload_fires_success_callback() {
        let successes = Arc::new(AtomicUsize::new(0));
        let successes_clone = Arc::clone(&successes);

        let watcher = Arc::new(TriggerWatcher::new());
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(
                json_loader(b"{\"int\": 1}")
                    .with_watcher(SharedWatcher(Arc::clone(&watcher)))
                    .on_success(move || {
                        successes_clone.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_error(|_err| panic!("reload must not fail")),
            )
            .build();

        manager.start().unwrap();
        watcher.trigger();
        watcher.trigger();
        assert_eq!(successes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn triggered_reload_failure_reaches_error_callback_only() {
        let (source, probe) = CountingSource::new(b"{\"int\": 1}");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = Arc::clone(&errors);

        let watcher = Arc::new(TriggerWatcher::new());
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(
                Loader::new(source, JsonDecoder::new())
                    .with_watcher(SharedWatcher(Arc::clone(&watcher)))
                    .on_success(|| panic!("reload must fail"))
                    .on_error(move |err| {
                        errors_clone.lock().unwrap().push(err.to_string());
                    }),
            )
            .build();

        manager.start().unwrap();
        let before = manager.current().unwrap();

        // Make the next read fail; the snapshot must survive the bad reload.
        probe.set_failing(true);
        watcher.trigger();

        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(manager.current().unwrap(), before);
        assert!(manager.is_running());
    }

    #[test]
    fn no_reload_work_after_stop() {
        let (source, probe) = CountingSource::new(b"{\"int\": 1}");

        let watcher = Arc::new(TriggerWatcher::new());
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(
                Loader::new(source, JsonDecoder::new())
                    .with_watcher(SharedWatcher(Arc::clone(&watcher))),
            )
            .build();

        manager.start().unwrap();
        assert_eq!(probe.reads(), 1);

        manager.stop().unwrap();
        watcher.trigger();
        assert_eq!(probe.reads(), 1);
    }

    #[test]
    fn subscribe_receives_each_new_snapshot() {
        let watcher = Arc::new(TriggerWatcher::new());
        let manager = ConfigManager::<TestConfig>::builder()
            .loader(json_loader(b"{\"int\": 1}").with_watcher(SharedWatcher(Arc::clone(&watcher))))
            .build();

        let mut updates = manager.subscribe();
        manager.start().unwrap();
        watcher.trigger();

        assert_eq!(updates.try_recv().unwrap().int, 1);
        assert_eq!(updates.try_recv().unwrap().int, 1);
        assert!(updates.try_recv().is_err());
    }

    /// Lets a test keep a handle to a watcher that the loader owns.
    struct SharedWatcher(Arc<TriggerWatcher>);

    impl Watcher for SharedWatcher {
        fn watch(&self, on_change: ChangeCallback) {
            self.0.watch(on_change);
        }

        fn stop(&self) -> std::result::Result<(), WatchError> {
            self.0.stop()
        }
    }
}
