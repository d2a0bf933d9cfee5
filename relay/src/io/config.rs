//! Client configuration stored as TOML (default `<config_dir>/relay/config.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Longest accepted turn or probe timeout, in seconds (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Client configuration (TOML).
///
/// Missing fields default to values suitable for an interactive CLI turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Binary name or path of the assistant process.
    pub binary: PathBuf,

    /// Model passed with `--model` unless a request names its own.
    pub model: Option<String>,

    /// Wall-clock budget for one turn, in seconds.
    pub timeout_secs: u64,

    /// Pass `--dangerously-skip-permissions` so the process never prompts.
    pub skip_permissions: bool,

    /// Search-path entries appended after the built-in install directories.
    pub extra_path_dirs: Vec<PathBuf>,

    /// Oldest `--version` accepted as compatible (`major.minor.patch`).
    pub min_version: String,

    /// Budget for the `--version` probe, in seconds.
    pub probe_timeout_secs: u64,

    /// Split untyped answers on blank lines into thinking and answer.
    pub heuristic_thinking_split: bool,

    /// Bytes of stderr kept for error messages.
    pub stderr_tail_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("claude"),
            model: None,
            timeout_secs: 15 * 60,
            skip_permissions: true,
            extra_path_dirs: Vec::new(),
            min_version: "1.0.0".to_string(),
            probe_timeout_secs: 10,
            heuristic_thinking_split: false,
            stderr_tail_bytes: 4096,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.binary.as_os_str().is_empty() {
            return Err(anyhow!("binary must not be empty"));
        }
        check_timeout_secs("timeout_secs", self.timeout_secs)?;
        check_timeout_secs("probe_timeout_secs", self.probe_timeout_secs)?;
        if parse_version(&self.min_version).is_none() {
            return Err(anyhow!(
                "min_version must look like major.minor.patch, got {:?}",
                self.min_version
            ));
        }
        if let Some(model) = &self.model
            && model.trim().is_empty()
        {
            return Err(anyhow!("model must not be blank when set"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Reject zero and anything above [`MAX_TIMEOUT_SECS`].
pub fn check_timeout_secs(name: &str, secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(anyhow!("{name} must be > 0"));
    }
    if secs > MAX_TIMEOUT_SECS {
        return Err(anyhow!("{name} must be <= {MAX_TIMEOUT_SECS}, got {secs}"));
    }
    Ok(())
}

/// Parse a strict `major.minor.patch` triple.
pub fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let mut parts = raw.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// Default config location, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("relay").join("config.toml"))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ClientConfig::default()`.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        let cfg = ClientConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ClientConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ClientConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
