use crate::repo::RepoRef;

/// Resolve-endpoint URL for one file at the ref's revision.
pub fn resolve_url(endpoint: &str, repo: &RepoRef, relative_name: &str) -> String {
    format!(
        "{}/{}/resolve/{}/{}",
        endpoint.trim_end_matches('/'),
        repo.prefixed_id(),
        repo.revision,
        relative_name
    )
}

/// Revision-scoped manifest URL, listing the commit hash and sibling files.
pub fn repo_info_url(endpoint: &str, repo: &RepoRef) -> String {
    format!(
        "{}/api/{}/{}/revision/{}",
        endpoint.trim_end_matches('/'),
        repo.kind.api_segment(),
        repo.id,
        repo.revision
    )
}
