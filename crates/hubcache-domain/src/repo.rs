use std::fmt;

/// Revision assumed when a caller does not name one.
pub const DEFAULT_REVISION: &str = "main";

/// Kind of repository hosted on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoKind {
    Model,
    Dataset,
    Space,
}

impl RepoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Dataset => "dataset",
            Self::Space => "space",
        }
    }

    /// Path segment used by the manifest API (`api/<segment>/<id>`).
    pub fn api_segment(self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::Dataset => "datasets",
            Self::Space => "spaces",
        }
    }

    /// Prefix attached to the repo id inside resolve URLs. Models resolve
    /// under the bare id.
    pub fn url_prefix(self) -> &'static str {
        match self {
            Self::Model => "",
            Self::Dataset => "datasets/",
            Self::Space => "spaces/",
        }
    }
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One repository coordinate: what to fetch and at which revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub kind: RepoKind,
    pub id: String,
    pub revision: String,
}

impl RepoRef {
    pub fn new(kind: RepoKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            revision: DEFAULT_REVISION.to_string(),
        }
    }

    pub fn model(id: impl Into<String>) -> Self {
        Self::new(RepoKind::Model, id)
    }

    pub fn dataset(id: impl Into<String>) -> Self {
        Self::new(RepoKind::Dataset, id)
    }

    pub fn space(id: impl Into<String>) -> Self {
        Self::new(RepoKind::Space, id)
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Directory name of this repository inside the cache root, e.g.
    /// `models--org--name`.
    pub fn folder_name(&self) -> String {
        format!("{}s--{}", self.kind.as_str(), self.id.replace('/', "--"))
    }

    /// Repo id as it appears in resolve URLs; datasets and spaces carry a
    /// type prefix.
    pub fn prefixed_id(&self) -> String {
        format!("{}{}", self.kind.url_prefix(), self.id)
    }

    /// True when the revision is a physical commit hash rather than a
    /// symbolic name.
    pub fn has_commit_revision(&self) -> bool {
        is_commit_hash(&self.revision)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}@{}", self.kind, self.id, self.revision)
    }
}

/// Commit hashes are exactly 40 lowercase hex characters.
pub fn is_commit_hash(candidate: &str) -> bool {
    candidate.len() == 40
        && candidate
            .bytes()
            .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
}
