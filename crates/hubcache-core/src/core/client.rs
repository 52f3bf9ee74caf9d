//! The client facade and its request types.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use tracing::debug;

use hubcache_domain::{CacheLayout, RepoRef};

use crate::core::config::HubConfig;
use crate::core::metadata::{self, FileMetadata, RepoInfo};
use crate::core::progress::{NoopObserver, SharedObserver, TransferObserver};
use crate::core::{fetch, snapshot};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Entry point for cache resolution. Clones are cheap and share the HTTP
/// pool and the symlink capability memo; snapshot workers run one client
/// across threads this way.
#[derive(Clone)]
pub struct HubClient {
    pub(crate) config: HubConfig,
    pub(crate) http: Client,
    pub(crate) layout: CacheLayout,
    pub(crate) symlink_memo: Arc<Mutex<HashMap<PathBuf, bool>>>,
    pub(crate) observer: SharedObserver,
}

impl HubClient {
    /// Client configured from the process environment.
    pub fn new() -> Result<Self> {
        Self::with_config(HubConfig::from_env()?)
    }

    /// Client over an explicit configuration.
    pub fn with_config(config: HubConfig) -> Result<Self> {
        // Redirects stay manual: the metadata fetcher owns the
        // auth-stripping decision. No overall timeout, since blob bodies
        // can legitimately stream for longer than any fixed deadline;
        // metadata requests set their own.
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .redirect(Policy::none())
            .build()
            .context("building HTTP client")?;
        debug!(
            cache = %config.cache_dir.display(),
            source = config.cache_source,
            endpoint = %config.endpoint,
            "hub client ready"
        );
        let layout = CacheLayout::new(config.cache_dir.clone());
        Ok(Self {
            config,
            http,
            layout,
            symlink_memo: Arc::new(Mutex::new(HashMap::new())),
            observer: Arc::new(NoopObserver),
        })
    }

    /// Replaces the transfer observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn cache_root(&self) -> &Path {
        self.layout.root()
    }

    /// Resolves one file to its pointer path inside the cache,
    /// transferring the blob when the cache cannot already answer.
    pub fn fetch_file(&self, request: &FileRequest) -> Result<PathBuf> {
        fetch::fetch_file(self, request)
    }

    /// Materializes every file of a revision and returns the snapshot
    /// directory.
    pub fn fetch_snapshot(&self, request: &SnapshotRequest) -> Result<PathBuf> {
        snapshot::fetch_snapshot(self, request)
    }

    /// Probes the remote for one file's metadata without transferring
    /// anything.
    pub fn file_metadata(&self, request: &FileRequest) -> Result<FileMetadata> {
        metadata::fetch_file_metadata(self, &request.repo, &request.relative_name())
    }

    /// Fetches the manifest for a revision: resolved commit plus the
    /// listed files.
    pub fn repo_info(&self, repo: &RepoRef) -> Result<RepoInfo> {
        metadata::fetch_repo_info(self, repo)
    }
}

/// One-file resolution request.
#[derive(Debug, Clone)]
pub struct FileRequest {
    pub repo: RepoRef,
    pub filename: String,
    pub subfolder: Option<String>,
    /// Re-transfer the blob even when the cache already holds it.
    pub force_download: bool,
    /// Answer from the cache only; any network need is an error.
    pub local_files_only: bool,
}

impl FileRequest {
    pub fn new(repo: RepoRef, filename: impl Into<String>) -> Self {
        Self {
            repo,
            filename: filename.into(),
            subfolder: None,
            force_download: false,
            local_files_only: false,
        }
    }

    #[must_use]
    pub fn with_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.subfolder = Some(subfolder.into());
        self
    }

    /// File name as it appears inside the snapshot tree and in resolve
    /// URLs.
    pub(crate) fn relative_name(&self) -> String {
        match self.subfolder.as_deref() {
            Some(subfolder) if !subfolder.is_empty() => {
                format!("{subfolder}/{}", self.filename)
            }
            _ => self.filename.clone(),
        }
    }
}

/// Whole-revision materialization request.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub repo: RepoRef,
    pub force_download: bool,
    pub local_files_only: bool,
    /// Cap on the fan-out worker pool; `None` uses the engine default.
    pub max_workers: Option<usize>,
}

impl SnapshotRequest {
    pub fn new(repo: RepoRef) -> Self {
        Self {
            repo,
            force_download: false,
            local_files_only: false,
            max_workers: None,
        }
    }
}
