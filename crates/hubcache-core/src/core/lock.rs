//! Advisory per-blob download locks.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use fs4::FileExt;
use tracing::debug;

/// Exclusive advisory lock on one blob's lock file. The lock releases
/// when the guard drops; the lock file itself stays behind, which is
/// fine, since only the flock matters.
#[derive(Debug)]
pub(crate) struct BlobLock {
    _file: File,
}

impl BlobLock {
    /// Non-blocking acquire. `Ok(None)` means another process holds the
    /// lock right now.
    pub(crate) fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %path.display(), "blob lock acquired");
                Ok(Some(Self { _file: file }))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            #[cfg(windows)]
            Err(err) if matches!(err.raw_os_error(), Some(32 | 33)) => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("locking {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn second_acquire_reports_contention_until_release() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join(".locks").join("abc123.lock");

        let first = BlobLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(BlobLock::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(BlobLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn creates_missing_lock_directories() {
        let tmp = tempdir().unwrap();
        let path = tmp
            .path()
            .join("models--org--name")
            .join(".locks")
            .join("etag.lock");
        assert!(BlobLock::try_acquire(&path).unwrap().is_some());
        assert!(path.exists());
    }
}
