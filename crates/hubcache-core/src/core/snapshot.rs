//! Whole-revision materialization over a bounded worker pool.

use std::fs;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use hubcache_domain::RepoRef;

use crate::core::client::{FileRequest, HubClient, SnapshotRequest};
use crate::core::errors::{HubError, SnapshotFailure};
use crate::core::fetch;
use crate::core::metadata;
use crate::core::progress;

/// One manifest call, then every listed file through the worker pool.
/// Workers are pinned to the resolved commit, so each file resolves
/// without another round-trip of revision resolution. Failures are
/// collected rather than short-circuited: one bad file cannot hide the
/// state of the rest.
pub(crate) fn fetch_snapshot(client: &HubClient, request: &SnapshotRequest) -> Result<PathBuf> {
    let repo = &request.repo;

    if request.local_files_only {
        return match cached_snapshot(client, repo) {
            Some(dir) => Ok(dir),
            None => Err(HubError::LocalOnly {
                repo: repo.id.clone(),
                revision: repo.revision.clone(),
            }
            .into()),
        };
    }

    let info = match metadata::fetch_repo_info(client, repo) {
        Ok(info) => info,
        Err(err) => {
            let offline = err
                .downcast_ref::<HubError>()
                .is_some_and(HubError::is_connectivity);
            if offline {
                if let Some(dir) = cached_snapshot(client, repo) {
                    warn!(repo = %repo.id, "endpoint unreachable, serving cached snapshot");
                    return Ok(dir);
                }
            }
            return Err(err);
        }
    };

    let commit = info.sha.clone().ok_or_else(|| HubError::MetadataIncomplete {
        file: repo.id.clone(),
        missing: "commit hash",
    })?;
    if !repo.has_commit_revision() {
        fetch::update_ref(client, repo, &commit)?;
    }

    let snapshot_dir = client.layout.snapshot_dir(repo, &commit);
    fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let files: Vec<String> = info
        .siblings
        .iter()
        .map(|sibling| sibling.rfilename.clone())
        .collect();
    let total = files.len();
    if total == 0 {
        debug!(repo = %repo.id, commit = %commit, "snapshot lists no files");
        return Ok(snapshot_dir);
    }

    let workers = progress::snapshot_concurrency(total, request.max_workers);
    debug!(
        repo = %repo.id,
        commit = %commit,
        files = total,
        workers,
        "materializing snapshot"
    );

    let pinned = repo.clone().with_revision(commit.clone());
    let (job_tx, job_rx) = mpsc::channel();
    for file in files {
        job_tx.send(file).expect("queue snapshot files");
    }
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, result_rx) = mpsc::channel();
    for _ in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let worker = client.clone();
        let pinned = pinned.clone();
        let force_download = request.force_download;
        thread::spawn(move || loop {
            let file = {
                let guard = job_rx.lock().expect("lock snapshot queue");
                match guard.recv() {
                    Ok(file) => file,
                    Err(_) => break,
                }
            };
            let outcome = worker
                .fetch_file(&FileRequest {
                    repo: pinned.clone(),
                    filename: file.clone(),
                    subfolder: None,
                    force_download,
                    local_files_only: false,
                })
                .map_err(|err| (file, format!("{err:#}")));
            if result_tx.send(outcome).is_err() {
                break;
            }
        });
    }
    drop(result_tx);

    let mut failures = Vec::new();
    for outcome in result_rx {
        match outcome {
            Ok(pointer) => debug!(pointer = %pointer.display(), "snapshot file ready"),
            Err((file, reason)) => failures.push(SnapshotFailure { file, reason }),
        }
    }

    if failures.is_empty() {
        return Ok(snapshot_dir);
    }
    failures.sort_by(|lhs, rhs| lhs.file.cmp(&rhs.file));
    Err(HubError::SnapshotIncomplete {
        repo: repo.id.clone(),
        total,
        failures,
    }
    .into())
}

/// Snapshot directory for the revision as recorded locally, without any
/// network.
fn cached_snapshot(client: &HubClient, repo: &RepoRef) -> Option<PathBuf> {
    let commit = fetch::local_commit(client, repo)?;
    let dir = client.layout.snapshot_dir(repo, &commit);
    dir.is_dir().then_some(dir)
}

#[cfg(test)]
mod tests {
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::core::config::{EnvSnapshot, HubConfig};
    use crate::test_support;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    fn test_client(server: &Server, cache: &std::path::Path) -> HubClient {
        let snapshot = EnvSnapshot::testing(&[(
            "HF_HUB_CACHE",
            cache.to_str().expect("utf8 cache path"),
        )]);
        let config = HubConfig::from_snapshot(&snapshot)
            .expect("config")
            .with_endpoint(server.url_str("/"));
        HubClient::with_config(config).expect("client")
    }

    fn offline_client(cache: &std::path::Path) -> HubClient {
        let snapshot = EnvSnapshot::testing(&[(
            "HF_HUB_CACHE",
            cache.to_str().expect("utf8 cache path"),
        )]);
        let config = HubConfig::from_snapshot(&snapshot)
            .expect("config")
            .with_endpoint("http://127.0.0.1:9");
        HubClient::with_config(config).expect("client")
    }

    fn expect_manifest(server: &Server, files: &[&str]) {
        let siblings: Vec<serde_json::Value> = files
            .iter()
            .map(|file| json!({ "rfilename": file }))
            .collect();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/api/models/org/name/revision/main",
            ))
            .respond_with(json_encoded(json!({ "sha": COMMIT, "siblings": siblings }))),
        );
    }

    fn expect_file(server: &Server, file: &str, etag: &str, body: &[u8]) {
        let path = format!("/org/name/resolve/{COMMIT}/{file}");
        server.expect(
            Expectation::matching(request::method_path("HEAD", path.clone()))
                .times(1)
                .respond_with(
                    status_code(200)
                        .append_header("X-Repo-Commit", COMMIT)
                        .append_header("X-Linked-Etag", format!("\"{etag}\""))
                        .append_header("X-Linked-Size", body.len().to_string()),
                ),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", path))
                .times(1)
                .respond_with(status_code(200).body(body.to_vec())),
        );
    }

    fn seed_cached_snapshot(client: &HubClient, repo: &RepoRef, commit: &str, file: &str) {
        let pointer = client.layout.pointer_path(repo, commit, file);
        fs::create_dir_all(pointer.parent().unwrap()).unwrap();
        fs::write(&pointer, b"seeded").unwrap();

        let reference = client.layout.ref_path(repo, &repo.revision);
        fs::create_dir_all(reference.parent().unwrap()).unwrap();
        fs::write(&reference, commit).unwrap();
    }

    #[test]
    fn materializes_every_listed_file() {
        test_support::init_logging();
        let Some(server) = test_support::start_server() else {
            return;
        };
        expect_manifest(&server, &["config.json", "sub/weights.bin"]);
        expect_file(&server, "config.json", "etag-1", b"{}");
        expect_file(&server, "sub/weights.bin", "etag-2", b"weights");

        let cache = tempdir().expect("tempdir");
        let client = test_client(&server, cache.path());
        let repo = RepoRef::model("org/name");

        let mut request = SnapshotRequest::new(repo.clone());
        request.max_workers = Some(2);
        let dir = client.fetch_snapshot(&request).expect("snapshot");

        assert_eq!(dir, client.layout.snapshot_dir(&repo, COMMIT));
        assert_eq!(fs::read(dir.join("config.json")).unwrap(), b"{}");
        assert_eq!(fs::read(dir.join("sub/weights.bin")).unwrap(), b"weights");
        assert_eq!(
            fs::read_to_string(client.layout.ref_path(&repo, "main")).unwrap(),
            COMMIT
        );
    }

    #[test]
    fn collects_failures_and_finishes_the_rest() {
        test_support::init_logging();
        let Some(server) = test_support::start_server() else {
            return;
        };
        expect_manifest(&server, &["good.txt", "absent.bin"]);
        expect_file(&server, "good.txt", "etag-3", b"good");
        server.expect(
            Expectation::matching(request::method_path(
                "HEAD",
                format!("/org/name/resolve/{COMMIT}/absent.bin"),
            ))
            .respond_with(status_code(404).append_header("X-Repo-Commit", COMMIT)),
        );

        let cache = tempdir().expect("tempdir");
        let client = test_client(&server, cache.path());
        let repo = RepoRef::model("org/name");

        let err = client
            .fetch_snapshot(&SnapshotRequest::new(repo.clone()))
            .unwrap_err();
        match err.downcast_ref::<HubError>() {
            Some(HubError::SnapshotIncomplete { total, failures, .. }) => {
                assert_eq!(*total, 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].file, "absent.bin");
            }
            other => panic!("expected SnapshotIncomplete, got {other:?}"),
        }

        // The healthy file landed anyway, and the miss was remembered.
        let dir = client.layout.snapshot_dir(&repo, COMMIT);
        assert_eq!(fs::read(dir.join("good.txt")).unwrap(), b"good");
        assert!(client.layout.no_exist_path(&repo, COMMIT, "absent.bin").exists());
    }

    #[test]
    fn empty_manifest_still_creates_the_snapshot_directory() {
        test_support::init_logging();
        let Some(server) = test_support::start_server() else {
            return;
        };
        expect_manifest(&server, &[]);

        let cache = tempdir().expect("tempdir");
        let client = test_client(&server, cache.path());
        let repo = RepoRef::model("org/name");

        let dir = client
            .fetch_snapshot(&SnapshotRequest::new(repo))
            .expect("snapshot");
        assert!(dir.is_dir());
    }

    #[test]
    fn manifest_without_a_commit_is_not_ready() {
        test_support::init_logging();
        let Some(server) = test_support::start_server() else {
            return;
        };
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/api/models/org/name/revision/main",
            ))
            .respond_with(json_encoded(json!({ "siblings": [] }))),
        );

        let cache = tempdir().expect("tempdir");
        let client = test_client(&server, cache.path());
        let repo = RepoRef::model("org/name");

        let err = client
            .fetch_snapshot(&SnapshotRequest::new(repo))
            .unwrap_err();
        match err.downcast_ref::<HubError>() {
            Some(HubError::MetadataIncomplete { missing, .. }) => {
                assert_eq!(*missing, "commit hash");
            }
            other => panic!("expected MetadataIncomplete, got {other:?}"),
        }
    }

    #[test]
    fn endpoint_outage_serves_the_cached_snapshot() {
        test_support::init_logging();
        let cache = tempdir().expect("tempdir");
        let client = offline_client(cache.path());
        let repo = RepoRef::model("org/name");
        seed_cached_snapshot(&client, &repo, COMMIT, "config.json");

        let dir = client
            .fetch_snapshot(&SnapshotRequest::new(repo.clone()))
            .expect("offline snapshot");
        assert_eq!(dir, client.layout.snapshot_dir(&repo, COMMIT));
    }

    #[test]
    fn endpoint_outage_without_cache_is_a_connectivity_error() {
        test_support::init_logging();
        let cache = tempdir().expect("tempdir");
        let client = offline_client(cache.path());
        let repo = RepoRef::model("org/name");

        let err = client
            .fetch_snapshot(&SnapshotRequest::new(repo))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HubError>(),
            Some(HubError::Connectivity { .. })
        ));
    }

    #[test]
    fn local_only_requires_a_cached_snapshot() {
        test_support::init_logging();
        let Some(server) = test_support::start_server() else {
            return;
        };
        // No expectations: any request would fail the test.
        let cache = tempdir().expect("tempdir");
        let client = test_client(&server, cache.path());
        let repo = RepoRef::model("org/name");

        let mut request = SnapshotRequest::new(repo.clone());
        request.local_files_only = true;

        let err = client.fetch_snapshot(&request).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HubError>(),
            Some(HubError::LocalOnly { .. })
        ));

        seed_cached_snapshot(&client, &repo, COMMIT, "config.json");
        let dir = client.fetch_snapshot(&request).expect("cached snapshot");
        assert!(dir.ends_with(format!("snapshots/{COMMIT}")));
    }
}
