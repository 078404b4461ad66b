//! Byte-producing configuration sources.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// A configuration source that can provide raw bytes.
///
/// Sources are read fresh on every reload and must be safely callable
/// repeatedly and concurrently with other sources' reads. No side effects
/// beyond the I/O itself.
pub trait Source: Send + Sync {
    /// Reads the current raw configuration data.
    ///
    /// # Errors
    /// Returns the underlying I/O failure; the manager aborts the reload
    /// and surfaces it as [`ConfigError::Source`](crate::ConfigError::Source).
    fn read(&self) -> io::Result<Vec<u8>>;
}

/// Exposes a last-modification timestamp, for polling-based change detection.
///
/// [`FileSource`] implements this so the same source instance can back a
/// [`ModTimeWatcher`](crate::watch::ModTimeWatcher).
pub trait ModTime: Send + Sync {
    /// Returns the last time the underlying data changed.
    ///
    /// # Errors
    /// Returns the underlying I/O failure; pollers skip the cycle and retry.
    fn mod_time(&self) -> io::Result<SystemTime>;
}

/// Reads configuration data from a file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Creates a source reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this source reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

impl ModTime for FileSource {
    fn mod_time(&self) -> io::Result<SystemTime> {
        fs::metadata(&self.path)?.modified()
    }
}

/// Reads the process environment as `KEY=VALUE` lines, one per line.
///
/// Pair it with [`EnvDecoder`](crate::decode::EnvDecoder). Non-unicode
/// names or values are replaced lossily. Values are emitted verbatim, so a
/// value containing a newline splits into spurious lines downstream; the
/// decoder skips the fragments that lack an `=`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl EnvSource {
    /// Creates an environment source.
    pub fn new() -> Self {
        Self
    }
}

impl Source for EnvSource {
    fn read(&self) -> io::Result<Vec<u8>> {
        let mut buffer = String::new();
        for (name, value) in env::vars_os() {
            buffer.push_str(&name.to_string_lossy());
            buffer.push('=');
            buffer.push_str(&value.to_string_lossy());
            buffer.push('\n');
        }
        Ok(buffer.into_bytes())
    }
}

/// Serves fixed in-memory bytes.
///
/// Useful for a lowest-precedence defaults layer, and for tests.
#[derive(Debug, Clone)]
pub struct StaticSource {
    data: Vec<u8>,
}

impl StaticSource {
    /// Creates a source serving `data` on every read.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

impl Source for StaticSource {
    fn read(&self) -> io::Result<Vec<u8>> {
        Ok(self.data.clone())
    }
}
