//! Client configuration: endpoint, credentials, and cache root.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use dirs_next::home_dir;

pub(crate) const PRODUCTION_ENDPOINT: &str = "https://huggingface.co";
pub(crate) const STAGING_ENDPOINT: &str = "https://hub-ci.huggingface.co";

const DEFAULT_USER_AGENT: &str = concat!("hubcache/", env!("CARGO_PKG_VERSION"));

/// Point-in-time copy of the process environment. Configuration never
/// reads `std::env` directly, so tests can feed synthetic environments
/// without mutating global state.
#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    /// Value of `key`; empty strings count as unset.
    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        match self.var(key) {
            Some(value) => matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        Self { vars }
    }
}

/// Resolved client configuration. Build one with [`HubConfig::from_env`]
/// and adjust it with the `with_*` methods.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub(crate) endpoint: String,
    pub(crate) token: Option<String>,
    pub(crate) cache_dir: PathBuf,
    pub(crate) cache_source: &'static str,
    pub(crate) user_agent: String,
}

impl HubConfig {
    /// Reads endpoint, token, and cache root from the process
    /// environment.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let endpoint = match snapshot.var("HF_ENDPOINT") {
            Some(value) => value.trim_end_matches('/').to_string(),
            None if snapshot.flag_is_enabled("HUGGINGFACE_CO_STAGING") => {
                STAGING_ENDPOINT.to_string()
            }
            None => PRODUCTION_ENDPOINT.to_string(),
        };
        let (cache_dir, cache_source) = resolve_cache_dir(snapshot)?;
        Ok(Self {
            endpoint,
            token: snapshot.var("HF_TOKEN").map(ToOwned::to_owned),
            cache_dir,
            cache_source,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = expand_home(dir.into());
        self.cache_source = "override";
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Cache root resolution order: `HF_HUB_CACHE`, then `HF_HOME/hub`, then
/// `XDG_CACHE_HOME/huggingface/hub`, then `~/.cache/huggingface/hub`.
/// The source label records which rung answered, for diagnostics.
fn resolve_cache_dir(snapshot: &EnvSnapshot) -> Result<(PathBuf, &'static str)> {
    if let Some(dir) = snapshot.var("HF_HUB_CACHE") {
        return Ok((expand_home(PathBuf::from(dir)), "HF_HUB_CACHE"));
    }
    if let Some(home) = snapshot.var("HF_HOME") {
        return Ok((expand_home(PathBuf::from(home)).join("hub"), "HF_HOME"));
    }
    if let Some(xdg) = snapshot.var("XDG_CACHE_HOME") {
        return Ok((
            PathBuf::from(xdg).join("huggingface").join("hub"),
            "XDG_CACHE_HOME",
        ));
    }
    let home = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok((home.join(".cache").join("huggingface").join("hub"), "~/.cache"))
}

/// Best-effort `~` expansion for user-supplied directories. Paths that do
/// not start with `~`, and environments without a resolvable home, pass
/// through untouched.
fn expand_home(path: PathBuf) -> PathBuf {
    let stripped = match path.strip_prefix("~") {
        Ok(stripped) => stripped.to_path_buf(),
        Err(_) => return path,
    };
    match home_dir() {
        Some(home) => home.join(stripped),
        None => path,
    }
}
