//! YAML configuration file loading and validation.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use space_export_core::download::{
    CONNECT_TIMEOUT_SECS, DEFAULT_LAZY_DELAY_SECS, DEFAULT_MAX_RETRIES,
    DEFAULT_RENDER_POLL_INTERVAL_MS, DEFAULT_RENDER_TIMEOUT_SECS, Pacer, READ_TIMEOUT_SECS,
    RetryPolicy,
};
use url::Url;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Run configuration, read once at startup.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// API user name.
    pub username: String,
    /// API password or access token.
    pub password: String,
    /// Base URL of the REST API host.
    pub api_url: String,
    /// Base URL of the human-facing site.
    pub web_url: String,
    /// Space key to mirror.
    pub space: String,
    /// Root of the output tree.
    pub download_path: PathBuf,
    /// Save page attachments.
    #[serde(default)]
    pub with_attachments: bool,
    /// Pause between renders and attachment downloads.
    #[serde(default)]
    pub lazy_mode: bool,
    /// Chrome user data directory holding a logged-in profile.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
    /// Profile inside `user_data_dir`.
    #[serde(default)]
    pub profile_directory: Option<String>,
    /// Pause length in lazy mode.
    #[serde(default = "default_lazy_delay_secs")]
    pub lazy_delay_secs: u64,
    /// Random extra pause in lazy mode.
    #[serde(default)]
    pub lazy_jitter_ms: u64,
    /// Attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay of the exponential backoff.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Bound on waiting for a printed PDF.
    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,
    /// Staging directory poll interval.
    #[serde(default = "default_render_poll_interval_ms")]
    pub render_poll_interval_ms: u64,
    /// API connect timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// API read timeout.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Browser binary; autodetected when absent.
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    /// Run the browser without a window, printing through `printToPDF`.
    #[serde(default)]
    pub headless: bool,
}

fn default_lazy_delay_secs() -> u64 {
    DEFAULT_LAZY_DELAY_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_render_timeout_secs() -> u64 {
    DEFAULT_RENDER_TIMEOUT_SECS
}

fn default_render_poll_interval_ms() -> u64 {
    DEFAULT_RENDER_POLL_INTERVAL_MS
}

fn default_connect_timeout_secs() -> u64 {
    CONNECT_TIMEOUT_SECS
}

fn default_read_timeout_secs() -> u64 {
    READ_TIMEOUT_SECS
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("web_url", &self.web_url)
            .field("space", &self.space)
            .field("download_path", &self.download_path)
            .field("with_attachments", &self.with_attachments)
            .field("lazy_mode", &self.lazy_mode)
            .field("user_data_dir", &self.user_data_dir)
            .field("profile_directory", &self.profile_directory)
            .field("max_attempts", &self.max_attempts)
            .field("headless", &self.headless)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Reads, parses and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parses and validates YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("username", &self.username),
            ("api_url", &self.api_url),
            ("web_url", &self.web_url),
            ("space", &self.space),
        ] {
            if value.trim().is_empty() {
                bail!("Invalid config value for `{field}`: must not be empty");
            }
        }
        if self.download_path.as_os_str().is_empty() {
            bail!("Invalid config value for `download_path`: must not be empty");
        }

        validate_base_url("api_url", &self.api_url)?;
        validate_base_url("web_url", &self.web_url)?;

        if !(1..=10).contains(&self.max_attempts) {
            bail!(
                "Invalid config value for `max_attempts`: {}. Expected range: 1..=10",
                self.max_attempts
            );
        }
        if self.retry_base_delay_ms > 60_000 {
            bail!(
                "Invalid config value for `retry_base_delay_ms`: {}. Expected range: 0..=60000",
                self.retry_base_delay_ms
            );
        }
        if self.lazy_delay_secs > 3600 {
            bail!(
                "Invalid config value for `lazy_delay_secs`: {}. Expected range: 0..=3600",
                self.lazy_delay_secs
            );
        }
        if !(10..=60_000).contains(&self.render_poll_interval_ms) {
            bail!(
                "Invalid config value for `render_poll_interval_ms`: {}. Expected range: 10..=60000",
                self.render_poll_interval_ms
            );
        }
        validate_timeout_secs("render_timeout_secs", self.render_timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;

        if let Some(profile) = &self.profile_directory
            && (profile.trim().is_empty() || profile.contains(['/', '\\']))
        {
            bail!("Invalid config value for `profile_directory`: {profile:?}. Expected a directory name");
        }

        Ok(())
    }

    /// Retry policy for renders, listings and downloads.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
    }

    /// Pacer honoring `lazy_mode`.
    #[must_use]
    pub fn pacer(&self) -> Pacer {
        if self.lazy_mode {
            Pacer::new(
                Duration::from_secs(self.lazy_delay_secs),
                Duration::from_millis(self.lazy_jitter_ms),
            )
        } else {
            Pacer::disabled()
        }
    }

    /// Bound on waiting for a printed PDF.
    #[must_use]
    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    /// Staging directory poll interval.
    #[must_use]
    pub fn render_poll_interval(&self) -> Duration {
        Duration::from_millis(self.render_poll_interval_ms)
    }

    /// API connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// API read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn validate_base_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .with_context(|| format!("Invalid config value for `{field}`: {value:?} is not a URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Invalid config value for `{field}`: {value:?}. Expected an http(s) URL");
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<()> {
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}
