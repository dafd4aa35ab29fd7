//! Session logging and the per-project session lock
//!
//! Every session writes to stderr and appends to
//! `<code_dir>/debug_<dir name>/debug_<YYYYmmdd_HHMMSS>.log`. The same
//! directory holds the `.lock` file that keeps two sessions off one project.

use crate::error::RepairError;
use chrono::{DateTime, Local};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOCK_FILE: &str = ".lock";

/// `debug_<dir name>` for a project directory.
pub fn log_dir_name(code_dir: &Path) -> String {
    let name = code_dir
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .or_else(|| {
            code_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "project".to_string());
    format!("debug_{}", name)
}

/// The project's session log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLogDir {
    path: PathBuf,
    name: String,
}

impl SessionLogDir {
    /// Create (if needed) the log directory inside `code_dir`.
    pub fn prepare(code_dir: &Path) -> Result<Self, RepairError> {
        let name = log_dir_name(code_dir);
        let path = code_dir.join(&name);
        fs::create_dir_all(&path).map_err(|e| {
            RepairError::Config(format!(
                "cannot create log directory {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self { path, name })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name, for hiding it from the project tree.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log_file_path(&self, started: DateTime<Local>) -> PathBuf {
        self.path
            .join(format!("debug_{}.log", started.format("%Y%m%d_%H%M%S")))
    }

    /// Take the session lock. Fails fast when another session holds it.
    pub fn lock(&self) -> Result<SessionLock, RepairError> {
        let lock_path = self.path.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                RepairError::Config(format!("cannot open {}: {}", lock_path.display(), e))
            })?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(SessionLock { file }),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                Err(RepairError::SessionLocked(lock_path))
            }
            Err(err) => Err(RepairError::Config(format!(
                "cannot lock {}: {}",
                lock_path.display(),
                err
            ))),
        }
    }
}

/// Held for the whole session; released on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Install the global subscriber: `RUST_LOG`-style filter (default `info`),
/// stderr output, and a plain-text copy in `log_file` when given.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;
    Ok(())
}
