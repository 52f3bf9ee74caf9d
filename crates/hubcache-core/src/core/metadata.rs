//! Remote probes: per-file HEAD metadata and revision manifests.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use reqwest::blocking::{RequestBuilder, Response};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_DISPOSITION, CONTENT_LENGTH, ETAG, LOCATION};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use hubcache_domain::{normalize_etag, repo_info_url, resolve_url, RepoRef};

use crate::core::client::HubClient;
use crate::core::errors::{classify_transport_error, HubError};

const HEADER_REPO_COMMIT: &str = "X-Repo-Commit";
const HEADER_LINKED_ETAG: &str = "X-Linked-Etag";
const HEADER_LINKED_SIZE: &str = "X-Linked-Size";
const HEADER_ERROR_CODE: &str = "X-Error-Code";

const MAX_REDIRECT_HOPS: usize = 10;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// What the resolve endpoint reports about one file.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub commit_hash: Option<String>,
    pub etag: Option<String>,
    pub size: Option<u64>,
    /// Final URL the content should be fetched from.
    pub location: String,
    /// Display name suggested via `Content-Disposition`, when present.
    pub filename: Option<String>,
    /// The final location points at a different host than the endpoint;
    /// the bearer token must not travel there.
    pub(crate) strip_auth: bool,
}

/// HEAD probe of the resolve endpoint. Owns redirect following: relative
/// targets are re-requested against the same host with credentials
/// intact, while the first absolute target is final. Its response headers
/// are authoritative and its URL becomes the download location, without
/// the token when the authority changed.
pub(crate) fn fetch_file_metadata(
    client: &HubClient,
    repo: &RepoRef,
    relative_name: &str,
) -> Result<FileMetadata> {
    let origin = resolve_url(&client.config.endpoint, repo, relative_name);
    let mut current = Url::parse(&origin).with_context(|| format!("parsing {origin}"))?;

    let mut hops = 0;
    loop {
        let request = client
            .http
            .head(current.clone())
            .header(ACCEPT_ENCODING, "identity")
            .timeout(HTTP_TIMEOUT);
        let response = with_auth(request, client.config.token.as_deref())
            .send()
            .map_err(|err| classify_transport_error(current.as_str(), err))?;

        let status = response.status();
        if status.is_redirection() {
            hops += 1;
            if hops > MAX_REDIRECT_HOPS {
                bail!("redirect chain for {origin} exceeded {MAX_REDIRECT_HOPS} hops");
            }
            let location = header_str(&response, LOCATION.as_str())
                .ok_or_else(|| anyhow!("redirect from {current} carried no Location header"))?;
            let target = current
                .join(location)
                .with_context(|| format!("resolving redirect target {location}"))?;
            if Url::parse(location).is_ok() || !same_authority(&target, &current) {
                let strip_auth = !same_authority(&target, &current);
                return Ok(build_metadata(
                    &response,
                    target.to_string(),
                    strip_auth,
                    relative_name,
                    repo,
                ));
            }
            debug!(target = %target, hop = hops, "following relative redirect");
            current = target;
            continue;
        }

        if !status.is_success() {
            return Err(protocol_error(&response, current.as_str(), status, repo, relative_name).into());
        }

        return Ok(build_metadata(
            &response,
            current.to_string(),
            false,
            relative_name,
            repo,
        ));
    }
}

/// Manifest returned by the revision-scoped info endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoInfo {
    pub sha: Option<String>,
    #[serde(default)]
    pub siblings: Vec<RepoSibling>,
}

/// One file listed in a repository manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoSibling {
    pub rfilename: String,
}

/// Fetches the manifest for the request's revision.
pub(crate) fn fetch_repo_info(client: &HubClient, repo: &RepoRef) -> Result<RepoInfo> {
    let url = repo_info_url(&client.config.endpoint, repo);
    let request = client.http.get(&url).timeout(HTTP_TIMEOUT);
    let response = with_auth(request, client.config.token.as_deref())
        .send()
        .map_err(|err| classify_transport_error(&url, err))?;
    let status = response.status();
    if !status.is_success() {
        return Err(protocol_error(&response, &url, status, repo, "the repository manifest").into());
    }
    response
        .json::<RepoInfo>()
        .with_context(|| format!("decoding manifest from {url}"))
}

pub(crate) fn with_auth(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

fn same_authority(lhs: &Url, rhs: &Url) -> bool {
    lhs.host_str() == rhs.host_str() && lhs.port_or_known_default() == rhs.port_or_known_default()
}

fn build_metadata(
    response: &Response,
    location: String,
    strip_auth: bool,
    relative_name: &str,
    repo: &RepoRef,
) -> FileMetadata {
    let commit_hash = header_str(response, HEADER_REPO_COMMIT).map(ToOwned::to_owned);
    let etag = header_str(response, HEADER_LINKED_ETAG)
        .or_else(|| header_str(response, ETAG.as_str()))
        .map(normalize_etag);
    let size = header_str(response, HEADER_LINKED_SIZE)
        .or_else(|| header_str(response, CONTENT_LENGTH.as_str()))
        .and_then(|value| value.parse::<u64>().ok());
    let filename = header_str(response, CONTENT_DISPOSITION.as_str())
        .and_then(content_disposition_filename);
    if let Some(name) = &filename {
        if name != relative_name {
            debug!(
                repo = %repo.id,
                requested = relative_name,
                suggested = %name,
                "server suggested a different display name"
            );
        }
    }
    FileMetadata {
        commit_hash,
        etag,
        size,
        location,
        filename,
        strip_auth,
    }
}

fn protocol_error(
    response: &Response,
    url: &str,
    status: StatusCode,
    repo: &RepoRef,
    relative_name: &str,
) -> HubError {
    let commit = header_str(response, HEADER_REPO_COMMIT).map(ToOwned::to_owned);
    if status == StatusCode::NOT_FOUND {
        return HubError::NotFound {
            repo: repo.id.clone(),
            revision: repo.revision.clone(),
            file: relative_name.to_string(),
            commit,
        };
    }
    HubError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        code: header_str(response, HEADER_ERROR_CODE).map(ToOwned::to_owned),
        commit,
    }
}

fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Pulls the quoted file name out of a `Content-Disposition` header.
fn content_disposition_filename(value: &str) -> Option<String> {
    static FILENAME_RE: OnceLock<Regex> = OnceLock::new();
    let pattern = FILENAME_RE
        .get_or_init(|| Regex::new(r#"filename="([^"]+)""#).expect("filename pattern compiles"));
    pattern
        .captures(value)
        .and_then(|captures| captures.get(1))
        .map(|matched| matched.as_str().to_string())
}
