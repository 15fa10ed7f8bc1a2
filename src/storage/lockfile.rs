//! Process Lock File Module
//!
//! Prevents two monitors from running against the same data directory,
//! which would make both advance (and persist) the ingestion watermark and
//! double-write calibrated points.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Process lock file manager
///
/// Writes the current PID to `<data_dir>/.fermwatch.lock` and removes it
/// on drop.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".fermwatch.lock";

    /// Acquire a process lock for the given data directory
    ///
    /// Returns an error if another live monitor holds the lock.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();

        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::holder_pid(&lock_path) {
                Ok(Some(pid)) => {
                    bail!(
                        "Another fermwatch instance is already running (PID: {pid})\n\
                         \n\
                         Stop it, or if no other instance is running remove the stale lock file:\n\
                            rm {}",
                        lock_path.display()
                    );
                }
                Ok(None) => {
                    tracing::info!(path = %lock_path.display(), "Removing stale lock file");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable lock file, replacing it");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        let mut file = File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        writeln!(file, "{pid}").context("Failed to write PID to lock file")?;

        tracing::debug!(pid, path = %lock_path.display(), "Acquired process lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID recorded in an existing lock file if that process is still alive.
    ///
    /// `Ok(None)` means the lock is stale.
    fn holder_pid(lock_path: &Path) -> Result<Option<u32>> {
        let contents = fs::read_to_string(lock_path).context("Failed to read lock file")?;
        let pid: u32 = contents
            .trim()
            .parse()
            .context("Failed to parse PID from lock file")?;

        if pid != std::process::id() && Self::is_monitor_running(pid) {
            Ok(Some(pid))
        } else {
            Ok(None)
        }
    }

    #[cfg(unix)]
    fn is_monitor_running(pid: u32) -> bool {
        fs::read_to_string(format!("/proc/{pid}/cmdline"))
            .map(|cmdline| cmdline.contains("fermwatch"))
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_monitor_running(_pid: u32) -> bool {
        // No /proc to inspect; assume the holder is alive
        true
    }

    /// Release the lock (called automatically on drop)
    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!(error = %e, "Failed to remove lock file");
            }
            self.owned = false;
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
