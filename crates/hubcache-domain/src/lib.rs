#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod etag;
pub mod layout;
pub mod repo;
pub mod urls;

pub use etag::normalize_etag;
pub use layout::{common_ancestor, relative_from, CacheLayout};
pub use repo::{is_commit_hash, RepoKind, RepoRef, DEFAULT_REVISION};
pub use urls::{repo_info_url, resolve_url};
