//! Single-file resolution: cache checks, metadata, locking, transfer, and
//! pointer materialization for one logical file.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use hubcache_domain::RepoRef;

use crate::core::client::{FileRequest, HubClient};
use crate::core::disk;
use crate::core::errors::HubError;
use crate::core::lock::BlobLock;
use crate::core::materialize;
use crate::core::metadata::{self, FileMetadata};
use crate::core::transfer::{self, TransferPlan};

pub(crate) fn fetch_file(client: &HubClient, request: &FileRequest) -> Result<PathBuf> {
    let repo = &request.repo;
    let relative = request.relative_name();
    let layout = &client.layout;

    // Commit-pinned revisions can be answered without any network: the
    // pointer either exists, or the commit is known to lack the file.
    if repo.has_commit_revision() && !request.force_download {
        let pointer = layout.pointer_path(repo, &repo.revision, &relative);
        if pointer.exists() {
            debug!(pointer = %pointer.display(), "cache hit");
            return Ok(pointer);
        }
        if layout.no_exist_path(repo, &repo.revision, &relative).exists() {
            debug!(file = %relative, commit = %repo.revision, "negative cache hit");
            return Err(HubError::NotFound {
                repo: repo.id.clone(),
                revision: repo.revision.clone(),
                file: relative,
                commit: Some(repo.revision.clone()),
            }
            .into());
        }
    }

    if request.local_files_only {
        return match cached_pointer(client, repo, &relative) {
            Some(pointer) => Ok(pointer),
            None => Err(HubError::LocalOnly {
                repo: repo.id.clone(),
                revision: repo.revision.clone(),
            }
            .into()),
        };
    }

    let file_metadata = match metadata::fetch_file_metadata(client, repo, &relative) {
        Ok(file_metadata) => file_metadata,
        Err(err) => return recover_from_metadata_error(client, repo, &relative, err),
    };

    resolve_with_metadata(client, request, &relative, &file_metadata)
}

/// A failed probe is still conclusive in two cases: connectivity loss
/// falls back to whatever revision the cache already holds, and a
/// definitive miss is remembered in the negative cache.
fn recover_from_metadata_error(
    client: &HubClient,
    repo: &RepoRef,
    relative: &str,
    err: anyhow::Error,
) -> Result<PathBuf> {
    match err.downcast_ref::<HubError>() {
        Some(HubError::Connectivity { .. }) => {
            if let Some(pointer) = cached_pointer(client, repo, relative) {
                warn!(file = %relative, "endpoint unreachable, serving cached copy");
                return Ok(pointer);
            }
            Err(err)
        }
        Some(HubError::NotFound { commit, .. }) => {
            let commit = commit
                .clone()
                .or_else(|| repo.has_commit_revision().then(|| repo.revision.clone()));
            if let Some(commit) = commit {
                record_no_exist(client, repo, &commit, relative);
            }
            Err(err)
        }
        _ => Err(err),
    }
}

fn record_no_exist(client: &HubClient, repo: &RepoRef, commit: &str, relative: &str) {
    let marker = client.layout.no_exist_path(repo, commit, relative);
    let write = marker
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| fs::write(&marker, []));
    match write {
        Ok(()) => debug!(marker = %marker.display(), "recorded missing file"),
        Err(err) => {
            warn!(marker = %marker.display(), error = %err, "unable to record missing file");
        }
    }
}

fn resolve_with_metadata(
    client: &HubClient,
    request: &FileRequest,
    relative: &str,
    file_metadata: &FileMetadata,
) -> Result<PathBuf> {
    let repo = &request.repo;
    let layout = &client.layout;

    let commit = file_metadata
        .commit_hash
        .clone()
        .ok_or_else(|| HubError::MetadataIncomplete {
            file: relative.to_string(),
            missing: "commit hash",
        })?;
    let etag = file_metadata
        .etag
        .clone()
        .ok_or_else(|| HubError::MetadataIncomplete {
            file: relative.to_string(),
            missing: "etag",
        })?;
    let size = match file_metadata.size {
        Some(size) if size > 0 => size,
        _ => {
            return Err(HubError::MetadataIncomplete {
                file: relative.to_string(),
                missing: "size",
            }
            .into())
        }
    };

    if !repo.has_commit_revision() {
        update_ref(client, repo, &commit)?;
    }
    if request.force_download {
        let marker = layout.no_exist_path(repo, &commit, relative);
        if marker.exists() {
            let _ = fs::remove_file(&marker);
        }
    }

    let pointer = layout.pointer_path(repo, &commit, relative);
    if !request.force_download && pointer.exists() {
        debug!(pointer = %pointer.display(), "cache hit");
        return Ok(pointer);
    }

    let blob = layout.blob_path(repo, &etag);
    if !request.force_download && blob.exists() {
        debug!(blob = %blob.display(), "blob already cached, linking");
        materialize::materialize_pointer(&client.symlink_memo, &blob, &pointer, false)?;
        return Ok(pointer);
    }

    let incomplete = layout.incomplete_path(repo, &etag);
    if let Some(staging_dir) = incomplete.parent() {
        disk::ensure_free_space(staging_dir, size)?;
    }
    if let Some(snapshot_dir) = pointer.parent() {
        disk::ensure_free_space(snapshot_dir, size)?;
    }

    let lock_path = layout.lock_path(repo, &etag);
    let Some(_guard) = BlobLock::try_acquire(&lock_path)? else {
        return Err(HubError::LockContention { etag }.into());
    };

    // The blob may have appeared while this process waited on the lock.
    if !request.force_download && blob.exists() {
        materialize::materialize_pointer(&client.symlink_memo, &blob, &pointer, false)?;
        return Ok(pointer);
    }

    transfer::download_blob(
        client,
        &TransferPlan {
            url: &file_metadata.location,
            file: relative,
            expected_size: size,
            incomplete: &incomplete,
            blob: &blob,
            use_auth: !file_metadata.strip_auth,
            force: request.force_download,
        },
    )?;
    materialize::materialize_pointer(&client.symlink_memo, &blob, &pointer, true)?;
    debug!(pointer = %pointer.display(), bytes = size, "file ready");
    Ok(pointer)
}

/// Rewrites `refs/<revision>` when the observed commit differs. Symbolic
/// revisions only; a commit hash is its own address.
pub(crate) fn update_ref(client: &HubClient, repo: &RepoRef, commit: &str) -> Result<()> {
    let path = client.layout.ref_path(repo, &repo.revision);
    match fs::read_to_string(&path) {
        Ok(existing) if existing.trim() == commit => return Ok(()),
        Ok(_) | Err(_) => {}
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&path, commit).with_context(|| format!("writing {}", path.display()))?;
    debug!(reference = %path.display(), commit, "revision pinned");
    Ok(())
}

/// Pointer for the revision as recorded locally, without any network.
fn cached_pointer(client: &HubClient, repo: &RepoRef, relative: &str) -> Option<PathBuf> {
    let commit = local_commit(client, repo)?;
    let pointer = client.layout.pointer_path(repo, &commit, relative);
    pointer.exists().then_some(pointer)
}

/// Commit hash the cache has on record for the revision.
pub(crate) fn local_commit(client: &HubClient, repo: &RepoRef) -> Option<String> {
    if repo.has_commit_revision() {
        return Some(repo.revision.clone());
    }
    let path = client.layout.ref_path(repo, &repo.revision);
    fs::read_to_string(path)
        .ok()
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}
