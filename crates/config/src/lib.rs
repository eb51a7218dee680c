//! Layered configuration for moim.
//!
//! Values are merged from, in increasing priority:
//!
//! 1. built-in defaults,
//! 2. the per-user `config.toml` in the platform configuration directory,
//! 3. an explicitly requested file (`.toml` or `.json`),
//! 4. `MOIM_` environment variables, nested with a double underscore
//!    (`MOIM_API__BASE_URL`, `MOIM_QUERY__RETRY`).
//!
//! The merged result is validated before it is handed out.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "MOIM_";
const USER_CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "moim")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub query: QueryConfig,
    pub loading: LoadingConfig,
}

/// Remote API location and transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL without the team segment; trailing slashes are ignored
    pub base_url: String,
    /// Tenant segment inserted between the base URL and every request path
    pub team_id: String,
    pub timeout_ms: u64,
    /// Token used when the token store holds nothing
    pub token: Option<String>,
}
impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            team_id: "dallaemfit".to_string(),
            timeout_ms: 10_000,
            token: None,
        }
    }
}
impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per key on disk
    #[default]
    File,
    /// Process memory only; nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend; defaults to the platform data directory
    pub path: Option<PathBuf>,
}
impl StorageConfig {
    /// Directory the file backend should write to.
    pub fn resolve_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let dirs = project_dirs().ok_or_raise(|| ErrorKind::NoDataDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Query cache defaults applied to every query that doesn't override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub stale_time_ms: u64,
    pub gc_time_ms: u64,
    /// Retries after the first failed attempt
    pub retry: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub refetch_on_focus: bool,
    pub refetch_on_reconnect: bool,
}
impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 0,
            gc_time_ms: 5 * 60 * 1000,
            retry: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            refetch_on_focus: true,
            refetch_on_reconnect: true,
        }
    }
}
impl QueryConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_millis(self.gc_time_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Busy indicator timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadingConfig {
    /// How long work must be outstanding before the indicator appears
    pub show_delay_ms: u64,
    /// Quiet period after the last exit before the indicator hides
    pub hide_quiet_ms: u64,
    /// Minimum time the indicator stays up once shown
    pub min_visible_ms: u64,
}
impl Default for LoadingConfig {
    fn default() -> Self {
        Self { show_delay_ms: 250, hide_quiet_ms: 150, min_visible_ms: 300 }
    }
}
impl LoadingConfig {
    pub fn show_delay(&self) -> Duration {
        Duration::from_millis(self.show_delay_ms)
    }

    pub fn hide_quiet(&self) -> Duration {
        Duration::from_millis(self.hide_quiet_ms)
    }

    pub fn min_visible(&self) -> Duration {
        Duration::from_millis(self.min_visible_ms)
    }
}

impl Config {
    /// Load, merge and validate configuration from every layer.
    ///
    /// # Errors
    ///
    /// Fails if `explicit` is given but missing or of an unknown format, if
    /// any layer holds values of the wrong type, or if validation fails.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(explicit)?)
    }

    /// Build the provider stack without extracting it.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(user) = project_dirs().map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE))
            && user.is_file()
        {
            tracing::debug!(path = %user.display(), "merging user configuration");
            figment = figment.merge(Toml::file(user));
        }
        if let Some(path) = explicit {
            figment = merge_file(figment, path)?;
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Extract)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.api.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            exn::bail!(ErrorKind::invalid("api.base_url", format!("expected an http(s) URL, got {base:?}")));
        }
        if self.api.team_id.is_empty() || self.api.team_id.contains('/') {
            exn::bail!(ErrorKind::invalid("api.team_id", "must be a single non-empty path segment"));
        }
        if self.api.timeout_ms == 0 {
            exn::bail!(ErrorKind::invalid("api.timeout_ms", "must be greater than zero"));
        }
        if self.query.retry_base_delay_ms > self.query.retry_max_delay_ms {
            exn::bail!(ErrorKind::invalid("query.retry_base_delay_ms", "must not exceed query.retry_max_delay_ms"));
        }
        Ok(())
    }
}

/// Merge a single file, choosing the format from its extension.
pub fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.is_file() {
        exn::bail!(ErrorKind::MissingFile(path.to_path_buf()));
    }
    tracing::debug!(path = %path.display(), "merging configuration file");
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        Some("json") => Ok(figment.merge(Json::file(path))),
        _ => Err(exn::Exn::from(ErrorKind::UnsupportedFormat(path.to_path_buf()))),
    }
}
