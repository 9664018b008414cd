use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::Deserialize;

use crate::default_client::DEFAULT_ORIGINATOR;
use crate::error::Result;
use crate::error::StudioErr;
use crate::flags::STUDIO_API_BASE;
use crate::flags::STUDIO_REQUEST_MAX_RETRIES;
use crate::flags::STUDIO_STREAM_IDLE_TIMEOUT_MS;

/// How a `data` event combines with what the stream already published.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataEventPolicy {
    /// Every `data` payload is the complete transcript.
    #[default]
    Replace,
    /// Keep the merge flag set by `start`, so payloads are appended to the
    /// thread state fetched before the run.
    Merge,
}

/// Application configuration loaded from disk and merged with overrides.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Root URL of the agent backend, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Value of the `originator` header and the user agent prefix.
    #[serde(default = "default_originator")]
    pub originator: String,
    /// Retry budget for idempotent GET requests.
    #[serde(default = "default_request_max_retries")]
    pub request_max_retries: u64,
    #[serde(default = "default_stream_idle_timeout_ms")]
    pub stream_idle_timeout_ms: Option<u64>,
    #[serde(default)]
    pub data_event_policy: DataEventPolicy,
}

/// Optional overrides for user configuration (e.g., from CLI flags).
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub data_event_policy: Option<DataEventPolicy>,
    pub stream_idle_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            originator: default_originator(),
            request_max_retries: default_request_max_retries(),
            stream_idle_timeout_ms: default_stream_idle_timeout_ms(),
            data_event_policy: DataEventPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration, applying overrides (CLI flags). Merges
    /// ~/.studio/config.toml, environment flags, compiled defaults, and any
    /// values provided in `overrides` (highest precedence). A missing file is
    /// not an error; a malformed one is.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> Result<Self> {
        let path = studio_dir()?.join("config.toml");
        Self::load_from_path_with_overrides(&path, overrides)
    }

    pub fn load_from_path_with_overrides(path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let cfg = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| StudioErr::Config(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(cfg.with_overrides(overrides))
    }

    fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(base_url) = overrides.base_url {
            self.base_url = base_url;
        }
        if let Some(policy) = overrides.data_event_policy {
            self.data_event_policy = policy;
        }
        if let Some(ms) = overrides.stream_idle_timeout_ms {
            self.stream_idle_timeout_ms = Some(ms);
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_ms.map(Duration::from_millis)
    }
}

fn default_base_url() -> String {
    STUDIO_API_BASE.to_string()
}

fn default_originator() -> String {
    DEFAULT_ORIGINATOR.to_string()
}

fn default_request_max_retries() -> u64 {
    *STUDIO_REQUEST_MAX_RETRIES
}

fn default_stream_idle_timeout_ms() -> Option<u64> {
    STUDIO_STREAM_IDLE_TIMEOUT_MS.map(|d| d.as_millis() as u64)
}

/// Returns the path to the studio configuration directory, which is
/// `~/.studio`. Does not verify that the directory exists.
pub fn studio_dir() -> std::io::Result<PathBuf> {
    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        )
    })?;
    p.push(".studio");
    Ok(p)
}
