//! Resumable blob transfers: stage, verify, publish.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Response;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use tracing::{debug, warn};

use crate::core::client::HubClient;
use crate::core::errors::{classify_transport_error, HubError};
use crate::core::metadata::with_auth;

const CHUNK_SIZE: usize = 1024 * 1024;
const DEFAULT_RETRIES: usize = 5;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Everything the engine needs to stage and publish one blob.
pub(crate) struct TransferPlan<'a> {
    pub url: &'a str,
    /// Logical name, used for observer events and error messages.
    pub file: &'a str,
    pub expected_size: u64,
    pub incomplete: &'a Path,
    pub blob: &'a Path,
    pub use_auth: bool,
    pub force: bool,
}

/// Streams the remote content into the staging file, verifies the byte
/// count, and publishes the blob with an atomic rename. A staging file
/// left by an earlier run is continued from its current length; stream
/// interruptions re-open the connection at the advanced offset until the
/// retry budget runs dry. Forward progress refills the budget.
pub(crate) fn download_blob(client: &HubClient, plan: &TransferPlan<'_>) -> Result<()> {
    if let Some(parent) = plan.incomplete.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    if plan.force && plan.incomplete.exists() {
        debug!(staging = %plan.incomplete.display(), "discarding stale staging file");
        fs::remove_file(plan.incomplete)
            .with_context(|| format!("removing {}", plan.incomplete.display()))?;
    }

    let mut staged = OpenOptions::new()
        .create(true)
        .append(true)
        .open(plan.incomplete)
        .with_context(|| format!("opening {}", plan.incomplete.display()))?;
    let mut written = staged
        .metadata()
        .with_context(|| format!("inspecting {}", plan.incomplete.display()))?
        .len();

    client.observer.on_start(plan.file, written, plan.expected_size);
    if written > 0 {
        debug!(
            file = plan.file,
            resume_from = written,
            expected = plan.expected_size,
            "resuming transfer"
        );
    }

    let mut budget = DEFAULT_RETRIES;
    let mut buffer = vec![0_u8; CHUNK_SIZE];
    'attempts: while written < plan.expected_size {
        let mut body = open_stream(client, plan, written)?;
        if let Some(remaining) = declared_length(&body) {
            // The server's view of what is left plus what we already hold
            // must land exactly on the expected size.
            if written + remaining != plan.expected_size {
                return Err(HubError::SizeMismatch {
                    file: plan.file.to_string(),
                    written: written + remaining,
                    expected: plan.expected_size,
                }
                .into());
            }
        }

        loop {
            match body.read(&mut buffer) {
                Ok(0) => break 'attempts,
                Ok(count) => {
                    staged
                        .write_all(&buffer[..count])
                        .with_context(|| format!("staging {}", plan.incomplete.display()))?;
                    written += count as u64;
                    budget = DEFAULT_RETRIES;
                    client.observer.on_advance(plan.file, written);
                }
                Err(err) => {
                    if budget == 0 {
                        return Err(HubError::RetriesExhausted {
                            file: plan.file.to_string(),
                            attempts: DEFAULT_RETRIES,
                            reason: err.to_string(),
                        }
                        .into());
                    }
                    budget -= 1;
                    warn!(
                        file = plan.file,
                        staged = written,
                        remaining_attempts = budget,
                        error = %err,
                        "stream interrupted, backing off before resuming"
                    );
                    thread::sleep(RETRY_BACKOFF);
                    continue 'attempts;
                }
            }
        }
    }

    let final_size = staged
        .metadata()
        .with_context(|| format!("inspecting {}", plan.incomplete.display()))?
        .len();
    if final_size != plan.expected_size {
        return Err(HubError::SizeMismatch {
            file: plan.file.to_string(),
            written: final_size,
            expected: plan.expected_size,
        }
        .into());
    }

    staged
        .sync_all()
        .with_context(|| format!("flushing {}", plan.incomplete.display()))?;
    drop(staged);
    fs::rename(plan.incomplete, plan.blob)
        .with_context(|| format!("publishing {}", plan.blob.display()))?;
    if let Some(parent) = plan.blob.parent() {
        let _ = fsync_dir(parent);
    }
    client.observer.on_finish(plan.file);
    debug!(blob = %plan.blob.display(), bytes = final_size, "blob published");
    Ok(())
}

fn open_stream(client: &HubClient, plan: &TransferPlan<'_>, offset: u64) -> Result<Response> {
    let mut request = client.http.get(plan.url);
    if plan.use_auth {
        request = with_auth(request, client.config.token.as_deref());
    }
    if offset > 0 {
        request = request.header(RANGE, format!("bytes={offset}-"));
    }
    let response = request
        .send()
        .map_err(|err| classify_transport_error(plan.url, err))?;
    let status = response.status();
    if !status.is_success() {
        bail!("unexpected status {status} while downloading {}", plan.url);
    }
    Ok(response)
}

fn declared_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}
