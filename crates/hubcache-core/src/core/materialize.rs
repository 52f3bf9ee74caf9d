//! Snapshot pointer materialization.

use std::collections::HashMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tempfile::Builder;
use tracing::{debug, warn};

use hubcache_domain::{common_ancestor, relative_from};

#[cfg(unix)]
use std::os::unix::fs::symlink as symlink_file;
#[cfg(windows)]
use std::os::windows::fs::symlink_file;

/// Creates the snapshot entry for a blob: a relative symlink when the
/// filesystem allows it, otherwise a rename when the blob is fresh from
/// this call, otherwise a full copy so blobs shared with other pointers
/// stay put.
pub(crate) fn materialize_pointer(
    memo: &Mutex<HashMap<PathBuf, bool>>,
    blob: &Path,
    pointer: &Path,
    new_blob: bool,
) -> Result<()> {
    let pointer_dir = pointer
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&pointer_dir)
        .with_context(|| format!("creating {}", pointer_dir.display()))?;

    let ancestor = common_ancestor(blob, pointer);
    if symlink_supported(memo, &ancestor, blob) {
        let target = relative_from(&pointer_dir, blob);
        match symlink_file(&target, pointer) {
            Ok(()) => {
                debug!(pointer = %pointer.display(), target = %target.display(), "pointer linked");
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if points_at(pointer, &target) {
                    debug!(pointer = %pointer.display(), "pointer already materialized");
                    return Ok(());
                }
                warn!(pointer = %pointer.display(), "existing entry is not the expected link, replacing");
                fs::remove_file(pointer)
                    .with_context(|| format!("removing stale {}", pointer.display()))?;
                if symlink_file(&target, pointer).is_ok() {
                    return Ok(());
                }
            }
            Err(err) => {
                warn!(pointer = %pointer.display(), error = %err, "symlink failed, falling back");
            }
        }
    }

    if new_blob {
        match fs::rename(blob, pointer) {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!(error = %err, "rename into snapshot failed, copying instead");
            }
        }
    }
    fs::copy(blob, pointer)
        .map(|_| ())
        .with_context(|| format!("copying {} to {}", blob.display(), pointer.display()))
}

fn points_at(pointer: &Path, target: &Path) -> bool {
    fs::read_link(pointer)
        .map(|existing| existing == target)
        .unwrap_or(false)
}

/// Memoized capability check: can the filesystem under `dir` hold
/// symlinks. Probe failures retry next to the blob itself, since the
/// common ancestor may sit on a filesystem the blob does not.
fn symlink_supported(memo: &Mutex<HashMap<PathBuf, bool>>, dir: &Path, blob: &Path) -> bool {
    if let Some(&known) = memo.lock().expect("symlink memo lock").get(dir) {
        return known;
    }
    let supported = match probe_symlink(dir) {
        Ok(supported) => supported,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "capability probe failed, re-probing next to the blob");
            let fallback = blob.parent().unwrap_or(dir);
            probe_symlink(fallback).unwrap_or(false)
        }
    };
    if !supported {
        warn!(
            dir = %dir.display(),
            "filesystem does not support symlinks, snapshots will hold full copies"
        );
    }
    memo.lock()
        .expect("symlink memo lock")
        .insert(dir.to_path_buf(), supported);
    supported
}

/// One-shot probe: link a scratch file inside `dir`. `Ok(false)` means
/// links are unsupported there; errors bubble so the caller can try an
/// alternative directory.
fn probe_symlink(dir: &Path) -> io::Result<bool> {
    fs::create_dir_all(dir)?;
    let scratch = Builder::new().prefix(".capability-").tempfile_in(dir)?;
    let link = scratch.path().with_extension("lnk");
    match symlink_file(scratch.path(), &link) {
        Ok(()) => {
            let _ = fs::remove_file(&link);
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::PermissionDenied => Err(err),
        Err(_) => Ok(false),
    }
}
