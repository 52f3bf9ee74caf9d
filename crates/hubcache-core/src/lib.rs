#![deny(clippy::all, warnings)]

mod core;

pub use crate::core::client::{FileRequest, HubClient, SnapshotRequest};
pub use crate::core::config::HubConfig;
pub use crate::core::errors::{HubError, SnapshotFailure};
pub use crate::core::metadata::{FileMetadata, RepoInfo, RepoSibling};
pub use crate::core::progress::{NoopObserver, TransferObserver};

pub use hubcache_domain::{
    is_commit_hash, normalize_etag, CacheLayout, RepoKind, RepoRef, DEFAULT_REVISION,
};

#[cfg(test)]
pub(crate) mod test_support {
    use std::env;

    /// Restores an environment variable when dropped.
    pub(crate) struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        pub(crate) fn set(key: &'static str, value: Option<&str>) -> Self {
            let previous = env::var(key).ok();
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => env::set_var(self.key, value),
                None => env::remove_var(self.key),
            }
        }
    }

    /// Routes tracing output through the test harness when `RUST_LOG`
    /// asks for it.
    pub(crate) fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Starts an in-process HTTP server, or skips the test when the
    /// sandbox forbids binding sockets.
    pub(crate) fn start_server() -> Option<httptest::Server> {
        match std::panic::catch_unwind(httptest::Server::run) {
            Ok(server) => Some(server),
            Err(_) => {
                eprintln!("skipping: unable to bind a local test server");
                None
            }
        }
    }
}
