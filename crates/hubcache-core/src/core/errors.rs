//! Failure taxonomy of the resolution engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors the engine distinguishes for callers. `Connectivity` is the one
/// recoverable class: the resolver answers it from the local cache when
/// the cache already holds the revision. Everything else is fatal for the
/// current call.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("endpoint unreachable at {url}: {reason}")]
    Connectivity { url: String, reason: String },

    #[error("{file} does not exist in {repo} at revision {revision}")]
    NotFound {
        repo: String,
        revision: String,
        file: String,
        commit: Option<String>,
    },

    #[error("unexpected status {status} from {url}{}", error_code_suffix(.code))]
    Status {
        url: String,
        status: u16,
        code: Option<String>,
        commit: Option<String>,
    },

    #[error("response for {file} is missing {missing}; the remote object is not ready")]
    MetadataIncomplete { file: String, missing: &'static str },

    #[error("not enough free space under {}: need {needed} bytes, {available} available", .dir.display())]
    DiskSpace {
        dir: PathBuf,
        needed: u64,
        available: u64,
    },

    #[error("blob {etag} is already being downloaded by another process")]
    LockContention { etag: String },

    #[error("transfer of {file} ended at {written} bytes but {expected} were expected; retry with force_download")]
    SizeMismatch {
        file: String,
        written: u64,
        expected: u64,
    },

    #[error("transfer of {file} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        file: String,
        attempts: usize,
        reason: String,
    },

    #[error("{repo} at revision {revision} is not cached and network access is disabled; unset local_files_only to fetch it")]
    LocalOnly { repo: String, revision: String },

    #[error("snapshot of {repo} incomplete: {} of {total} files failed: {}", .failures.len(), join_failures(.failures))]
    SnapshotIncomplete {
        repo: String,
        total: usize,
        failures: Vec<SnapshotFailure>,
    },
}

impl HubError {
    /// True for transport-level failures the resolver may answer from the
    /// local cache instead of surfacing.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

/// One failed file inside a snapshot fan-out. The other files keep going;
/// failures are reported together once the pool drains.
#[derive(Debug, Clone)]
pub struct SnapshotFailure {
    pub file: String,
    pub reason: String,
}

fn error_code_suffix(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

fn join_failures(failures: &[SnapshotFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.file, failure.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Wraps a transport error, keeping offline-style failures recognizable
/// so callers can fall back to the local cache.
pub(crate) fn classify_transport_error(url: &str, err: reqwest::Error) -> anyhow::Error {
    if is_offline_error(&err) {
        anyhow::Error::new(HubError::Connectivity {
            url: url.to_string(),
            reason: err.to_string(),
        })
    } else {
        anyhow::Error::new(err).context(format!("request to {url} failed"))
    }
}

/// Transport failures that look like a dead network rather than a broken
/// exchange: timeouts, refused connections, DNS errors, and the
/// unreachable-host io errors hiding in the source chain.
fn is_offline_error(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}
