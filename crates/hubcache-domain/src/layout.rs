use std::path::{Component, Path, PathBuf};

use crate::repo::RepoRef;

const BLOBS_DIR: &str = "blobs";
const SNAPSHOTS_DIR: &str = "snapshots";
const REFS_DIR: &str = "refs";
const NO_EXIST_DIR: &str = ".no_exist";
const LOCKS_DIR: &str = ".locks";
const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// Path arithmetic for one cache root. Nothing here touches the
/// filesystem; callers create the directories they need.
///
/// The layout is shared with the wider ecosystem and must stay bit-exact:
///
/// ```text
/// <root>/models--org--name/
///   blobs/<etag>
///   snapshots/<commit>/<relative file name>
///   refs/<revision>
///   .no_exist/<commit>/<relative file name>
///   .locks/<etag>.lock
/// ```
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage folder for one repository, e.g. `models--org--name`.
    pub fn repo_dir(&self, repo: &RepoRef) -> PathBuf {
        self.root.join(repo.folder_name())
    }

    /// Content-addressed blob location for a normalized ETag.
    pub fn blob_path(&self, repo: &RepoRef, etag: &str) -> PathBuf {
        self.repo_dir(repo).join(BLOBS_DIR).join(etag)
    }

    /// Staging file for a blob transfer, colocated with the blob so the
    /// publishing rename never crosses a filesystem.
    pub fn incomplete_path(&self, repo: &RepoRef, etag: &str) -> PathBuf {
        self.repo_dir(repo)
            .join(BLOBS_DIR)
            .join(format!("{etag}{INCOMPLETE_SUFFIX}"))
    }

    pub fn snapshot_dir(&self, repo: &RepoRef, commit: &str) -> PathBuf {
        self.repo_dir(repo).join(SNAPSHOTS_DIR).join(commit)
    }

    /// Pointer inside a snapshot; `relative_name` may contain `/`
    /// separators for files below a subfolder.
    pub fn pointer_path(&self, repo: &RepoRef, commit: &str, relative_name: &str) -> PathBuf {
        join_relative(self.snapshot_dir(repo, commit), relative_name)
    }

    /// Ref file recording which commit a symbolic revision points at.
    /// Revisions such as `refs/pr/1` nest.
    pub fn ref_path(&self, repo: &RepoRef, revision: &str) -> PathBuf {
        join_relative(self.repo_dir(repo).join(REFS_DIR), revision)
    }

    /// Zero-byte marker recording that a file is absent at a commit.
    pub fn no_exist_path(&self, repo: &RepoRef, commit: &str, relative_name: &str) -> PathBuf {
        join_relative(
            self.repo_dir(repo).join(NO_EXIST_DIR).join(commit),
            relative_name,
        )
    }

    /// Advisory lock file guarding concurrent writers of one blob.
    pub fn lock_path(&self, repo: &RepoRef, etag: &str) -> PathBuf {
        self.repo_dir(repo)
            .join(LOCKS_DIR)
            .join(format!("{etag}.lock"))
    }
}

fn join_relative(mut base: PathBuf, relative: &str) -> PathBuf {
    for segment in relative.split('/').filter(|segment| !segment.is_empty()) {
        base.push(segment);
    }
    base
}

/// Relative path from `base_dir` to `target`, the form a pointer symlink
/// stores so a snapshot survives the cache root moving.
pub fn relative_from(base_dir: &Path, target: &Path) -> PathBuf {
    let base: Vec<Component<'_>> = base_dir.components().collect();
    let dest: Vec<Component<'_>> = target.components().collect();
    let shared = base
        .iter()
        .zip(dest.iter())
        .take_while(|(lhs, rhs)| lhs == rhs)
        .count();

    let mut relative = PathBuf::new();
    for _ in shared..base.len() {
        relative.push("..");
    }
    for component in &dest[shared..] {
        relative.push(component.as_os_str());
    }
    relative
}

/// Deepest directory shared by both paths.
pub fn common_ancestor(lhs: &Path, rhs: &Path) -> PathBuf {
    lhs.components()
        .zip(rhs.components())
        .take_while(|(a, b)| a == b)
        .map(|(component, _)| component.as_os_str())
        .collect()
}
