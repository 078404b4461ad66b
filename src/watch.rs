//! Change watchers that trigger automatic reloads.
//!
//! A watcher's [`watch`](Watcher::watch) registration returns immediately;
//! detection and callback invocation happen out-of-band, either on a spawned
//! tokio task ([`ModTimeWatcher`]) or on the `notify` backend thread
//! ([`FsEventWatcher`]). Callbacks may fire any number of times, including
//! concurrently with [`stop`](Watcher::stop).

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use notify::{Event, EventKind, RecommendedWatcher, Watcher as _, recommended_watcher};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::warn;

use crate::{
    error::WatchError,
    source::ModTime,
};

/// Default polling interval for [`ModTimeWatcher`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Callback invoked by a watcher when a change is detected.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Monitors a configuration source for changes.
pub trait Watcher: Send + Sync {
    /// Registers `on_change` and starts monitoring in the background.
    ///
    /// Must not block; the callback is invoked out-of-band after this
    /// returns, zero or more times.
    fn watch(&self, on_change: ChangeCallback);

    /// Halts monitoring. Callbacks already in flight may still complete,
    /// but none fire indefinitely after this returns.
    ///
    /// # Errors
    /// Returns [`WatchError`] if the backend fails to shut down.
    fn stop(&self) -> Result<(), WatchError>;
}

/// Polls a [`ModTime`] target and fires when the modification time advances.
///
/// The first successful poll only seeds the baseline; a change is reported
/// once a later poll observes a strictly newer timestamp. Poll failures are
/// skipped and retried on the next tick.
///
/// The polling loop runs on a tokio task, so `watch` must be called from
/// within a tokio runtime.
pub struct ModTimeWatcher {
    target: Arc<dyn ModTime>,
    interval: Duration,
    stop_signal: watch::Sender<bool>,
}

impl ModTimeWatcher {
    /// Creates a watcher polling `target` every [`DEFAULT_POLL_INTERVAL`].
    pub fn new(target: Arc<dyn ModTime>) -> Self {
        Self::with_interval(target, DEFAULT_POLL_INTERVAL)
    }

    /// Creates a watcher polling `target` at a custom interval.
    pub fn with_interval(target: Arc<dyn ModTime>, interval: Duration) -> Self {
        let (stop_signal, _) = watch::channel(false);
        Self {
            target,
            interval,
            stop_signal,
        }
    }
}

impl Watcher for ModTimeWatcher {
    fn watch(&self, on_change: ChangeCallback) {
        let target = Arc::clone(&self.target);
        let interval = self.interval;
        let mut stop_rx = self.stop_signal.subscribe();

        tokio::spawn(async move {
            let mut last_seen = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = ticker.tick() => {
                        let Ok(modified) = target.mod_time() else {
                            continue;
                        };
                        match last_seen {
                            None => last_seen = Some(modified),
                            Some(previous) if modified > previous => {
                                last_seen = Some(modified);
                                on_change();
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        });
    }

    fn stop(&self) -> Result<(), WatchError> {
        // No receiver means the task already exited; stop stays idempotent.
        let _ = self.stop_signal.send(true);
        Ok(())
    }
}

/// Watches a file through the platform's native change notification
/// facility via the `notify` crate.
///
/// Events fire the callback directly from the backend thread, so no tokio
/// runtime is required. Create/modify/remove events all count as changes;
/// everything else is ignored.
///
/// `watch` cannot report failures. If the backend cannot be armed, for
/// instance because the path does not exist yet, the failure is logged at
/// `warn` and the watcher stays inert; `stop` still succeeds. Callers that
/// need arming to be fallible should verify the path up front.
pub struct FsEventWatcher {
    path: PathBuf,
    backend: Mutex<Option<RecommendedWatcher>>,
}

impl FsEventWatcher {
    /// Creates a watcher for `path`. Monitoring starts on `watch`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backend: Mutex::new(None),
        }
    }

    /// The file being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn arm(&self, on_change: ChangeCallback) -> Result<(), notify::Error> {
        let mut backend = recommended_watcher(move |result: notify::Result<Event>| {
            let Ok(event) = result else {
                return;
            };
            if matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                on_change();
            }
        })?;
        backend.watch(&self.path, notify::RecursiveMode::NonRecursive)?;

        let mut slot = match self.backend.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(backend);
        Ok(())
    }
}

impl Watcher for FsEventWatcher {
    fn watch(&self, on_change: ChangeCallback) {
        if let Err(err) = self.arm(on_change) {
            warn!(path = %self.path.display(), error = %err, "file watcher failed to arm");
        }
    }

    fn stop(&self) -> Result<(), WatchError> {
        let mut slot = match self.backend.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut backend) = slot.take() {
            backend
                .unwatch(&self.path)
                .map_err(|err| WatchError::Backend(err.into()))?;
        }
        Ok(())
    }
}

/// Fires its callback every time [`trigger`](TriggerWatcher::trigger) is
/// called. Useful for tests and for wiring external signals (reload on
/// SIGHUP, admin endpoints) into the manager.
#[derive(Default)]
pub struct TriggerWatcher {
    callback: Mutex<Option<ChangeCallback>>,
}

impl TriggerWatcher {
    /// Creates an unarmed trigger watcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invokes the registered callback, if any.
    pub fn trigger(&self) {
        let callback = {
            let slot = match self.callback.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.clone()
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Watcher for TriggerWatcher {
    fn watch(&self, on_change: ChangeCallback) {
        let mut slot = match self.callback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(on_change);
    }

    fn stop(&self) -> Result<(), WatchError> {
        Ok(())
    }
}
