use crate::error::{Error, IoContext, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Advisory writer lock backed by a `<name>.nodb.lock` file.
///
/// Presence of the file means a writer holds the controller. The lock is
/// released by `release()` or, on any other exit path including unwinding,
/// by `Drop`.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    held: bool,
}

impl LockFile {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::LockHeld(path.to_path_buf()));
            }
            Err(e) => return Err(e).at(path),
        };
        writeln!(file, "pid={} acquired={}", std::process::id(), Utc::now().to_rfc3339())
            .at(path)?;
        Ok(LockFile {
            path: path.to_path_buf(),
            held: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.held = false;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).at(&self.path),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::error!(path = %self.path.display(), "failed to force-release lock: {}", e);
                }
            }
        }
    }
}

/// Removes a lock left behind by a crashed writer. Returns whether a lock existed.
pub fn force_unlock(path: &Path) -> Result<bool> {
    match fs::read_to_string(path) {
        Ok(holder) => {
            tracing::warn!(path = %path.display(), holder = holder.trim(), "force-unlocking");
            fs::remove_file(path).at(path)?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).at(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soils.nodb.lock");
        let lock = LockFile::acquire(&path).unwrap();
        assert!(matches!(LockFile::acquire(&path), Err(Error::LockHeld(_))));
        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wepp.nodb.lock");
        {
            let _lock = LockFile::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        assert!(!force_unlock(&path).unwrap());
    }
}
