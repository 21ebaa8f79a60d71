//! Controller base: disk snapshots, writer locks, status logs.
//!
//! Every controller persists itself to `<name>.nodb` in the run directory and
//! mutates only inside [`NoDb::locked`]. Readers rehydrate from the snapshot
//! and never look at the lock file.

pub mod events;
pub mod lock;
pub mod prep;
pub mod snapshot;

use crate::error::{Error, IoContext, Result};
use chrono::Local;
use lock::LockFile;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const READONLY_MARKER: &str = "READONLY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControllerKind {
    Ron,
    Watershed,
    Landuse,
    Soils,
    Climate,
    Wepp,
    Observed,
    Disturbed,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 8] = [
        ControllerKind::Ron,
        ControllerKind::Watershed,
        ControllerKind::Landuse,
        ControllerKind::Soils,
        ControllerKind::Climate,
        ControllerKind::Wepp,
        ControllerKind::Observed,
        ControllerKind::Disturbed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ControllerKind::Ron => "ron",
            ControllerKind::Watershed => "watershed",
            ControllerKind::Landuse => "landuse",
            ControllerKind::Soils => "soils",
            ControllerKind::Climate => "climate",
            ControllerKind::Wepp => "wepp",
            ControllerKind::Observed => "observed",
            ControllerKind::Disturbed => "disturbed",
        }
    }

    pub fn class_tag(&self) -> &'static str {
        match self {
            ControllerKind::Ron => "wepprun_rs.ron.Ron",
            ControllerKind::Watershed => "wepprun_rs.watershed.Watershed",
            ControllerKind::Landuse => "wepprun_rs.landuse.Landuse",
            ControllerKind::Soils => "wepprun_rs.soils.Soils",
            ControllerKind::Climate => "wepprun_rs.climate.Climate",
            ControllerKind::Wepp => "wepprun_rs.wepp.Wepp",
            ControllerKind::Observed => "wepprun_rs.observed.Observed",
            ControllerKind::Disturbed => "wepprun_rs.plugins.disturbed.Disturbed",
        }
    }

    pub fn filename(&self) -> String {
        format!("{}.nodb", self.name())
    }

    pub fn parse(name: &str) -> Option<ControllerKind> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn nodb_path(wd: &Path, kind: ControllerKind) -> PathBuf {
    wd.join(kind.filename())
}

pub fn lock_path(wd: &Path, kind: ControllerKind) -> PathBuf {
    wd.join(format!("{}.lock", kind.filename()))
}

pub fn is_readonly(wd: &Path) -> bool {
    wd.join(READONLY_MARKER).exists()
}

pub fn ensure_writable(wd: &Path) -> Result<()> {
    if is_readonly(wd) {
        Err(Error::ReadOnlyRun(wd.to_path_buf()))
    } else {
        Ok(())
    }
}

/// Appends a timestamped line to the controller's status log.
pub fn append_status(wd: &Path, kind: ControllerKind, message: &str) -> Result<()> {
    let path = wd.join(format!("{}.log", kind.name()));
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .at(&path)?;
    writeln!(file, "[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message).at(&path)?;
    Ok(())
}

/// Runs `f`, logging how long it took.
pub fn timed<T>(label: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let out = f();
    let elapsed = start.elapsed().as_secs_f64();
    match &out {
        Ok(_) => tracing::info!(elapsed_s = elapsed, "{} finished", label),
        Err(e) => tracing::warn!(elapsed_s = elapsed, "{} failed: {}", label, e),
    }
    out
}

/// A disk-persisted controller bound to one run directory.
///
/// Implementors keep the working directory out of the snapshot (it is
/// re-attached on load) along with anything volatile.
pub trait NoDb: Serialize + DeserializeOwned + PartialEq + fmt::Debug + Sized {
    const KIND: ControllerKind;

    fn wd(&self) -> &Path;

    fn attach(&mut self, wd: &Path);

    /// Textual substitutions applied to older snapshots before decoding.
    fn migrations() -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn get_instance(wd: &Path) -> Result<Self> {
        Self::try_get_instance(wd)?.ok_or_else(|| Error::NotInitialized {
            kind: Self::KIND.name(),
            wd: wd.to_path_buf(),
        })
    }

    fn try_get_instance(wd: &Path) -> Result<Option<Self>> {
        let path = nodb_path(wd, Self::KIND);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).at(&path),
        };
        let mut controller: Self = snapshot::decode(&text, &path)?;
        controller.attach(wd);
        Ok(Some(controller))
    }

    fn exists(wd: &Path) -> bool {
        nodb_path(wd, Self::KIND).exists()
    }

    /// Non-authoritative: another process may take or drop the lock at any time.
    fn is_locked(&self) -> bool {
        lock_path(self.wd(), Self::KIND).exists()
    }

    /// Rehydrates from disk, discarding in-memory changes.
    fn reload(&mut self) -> Result<()> {
        *self = Self::get_instance(self.wd())?;
        Ok(())
    }

    /// Mutates under the writer lock.
    ///
    /// On success the snapshot is dumped, the lock released, and the dump
    /// re-decoded and compared with `self`. On error the lock is dropped and
    /// the snapshot on disk is left as it was.
    fn locked<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        ensure_writable(self.wd())?;
        let lock = LockFile::acquire(&lock_path(self.wd(), Self::KIND))?;

        let value = match f(self) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(controller = %Self::KIND, "releasing lock after error: {}", e);
                drop(lock);
                return Err(e);
            }
        };

        let dumped = self.dump();
        lock.release()?;
        dumped?;

        let reread = Self::get_instance(self.wd())?;
        if reread != *self {
            return Err(Error::SnapshotMismatch(nodb_path(self.wd(), Self::KIND)));
        }
        Ok(value)
    }

    /// Persists a freshly constructed controller.
    fn persist_new(mut self) -> Result<Self> {
        fs::create_dir_all(self.wd()).at(self.wd())?;
        self.locked(|_| Ok(()))?;
        Ok(self)
    }

    #[doc(hidden)]
    fn dump(&self) -> Result<()> {
        let text = snapshot::encode(self)?;
        snapshot::atomic_write(&nodb_path(self.wd(), Self::KIND), text.as_bytes())
    }

    fn log_status(&self, message: &str) -> Result<()> {
        append_status(self.wd(), Self::KIND, message)
    }
}

/// Drops a stale writer lock for `kind`. Cleanup paths only.
pub fn force_unlock(wd: &Path, kind: ControllerKind) -> Result<bool> {
    lock::force_unlock(&lock_path(wd, kind))
}
