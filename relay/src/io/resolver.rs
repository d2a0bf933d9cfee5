//! Readiness of the assistant binary: installed, compatible, authenticated.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::io::config::{ClientConfig, parse_version};
use crate::io::launch::search_path;
use crate::io::process::run_command_with_timeout;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").unwrap());

/// Bytes of `--version` output worth keeping.
const PROBE_OUTPUT_LIMIT: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub installed: bool,
    pub compatible: bool,
    pub authenticated: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.installed && self.compatible && self.authenticated
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |ok: bool| if ok { "yes" } else { "no" };
        write!(
            f,
            "installed={} compatible={} authenticated={}",
            flag(self.installed),
            flag(self.compatible),
            flag(self.authenticated)
        )?;
        if let Some(path) = &self.path {
            write!(f, " path={}", path.display())?;
        }
        if let Some(version) = &self.version {
            write!(f, " version={version}")?;
        }
        Ok(())
    }
}

/// Source of the binary's readiness.
pub trait ReadinessResolver {
    fn resolve(&self) -> Readiness;
}

/// Resolver that searches the augmented `PATH` and probes `--version`.
#[derive(Debug, Clone)]
pub struct PathResolver {
    config: ClientConfig,
}

impl PathResolver {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl ReadinessResolver for PathResolver {
    #[instrument(skip_all, fields(binary = %self.config.binary.display()))]
    fn resolve(&self) -> Readiness {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let path = match which::which_in(&self.config.binary, Some(search_path(&self.config)), cwd) {
            Ok(path) => path,
            Err(err) => {
                debug!(err = %err, "assistant binary not found");
                return Readiness {
                    authenticated: has_credentials(),
                    ..Readiness::default()
                };
            }
        };

        let version = probe_version(&path, &self.config);
        let compatible = match (&version, parse_version(&self.config.min_version)) {
            (Some(found), Some(min)) => parse_version(found).is_some_and(|found| found >= min),
            _ => false,
        };
        Readiness {
            path: Some(path),
            version,
            installed: true,
            compatible,
            authenticated: has_credentials(),
        }
    }
}

fn probe_version(path: &std::path::Path, config: &ClientConfig) -> Option<String> {
    let mut cmd = Command::new(path);
    cmd.arg("--version");
    let output = match run_command_with_timeout(cmd, config.probe_timeout(), PROBE_OUTPUT_LIMIT) {
        Ok(output) => output,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "version probe failed");
            return None;
        }
    };
    if output.timed_out || !output.status.success() {
        warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "version probe unsuccessful");
        return None;
    }
    extract_version(&String::from_utf8_lossy(&output.stdout))
}

/// First `major.minor.patch` triple in `text`.
pub fn extract_version(text: &str) -> Option<String> {
    VERSION_RE
        .find(text)
        .map(|found| found.as_str().to_string())
}

fn has_credentials() -> bool {
    std::env::var_os("ANTHROPIC_API_KEY").is_some_and(|key| !key.is_empty())
        || dirs::home_dir().is_some_and(|home| home.join(".claude").is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_version_from_banner() {
        assert_eq!(
            extract_version("1.0.43 (Claude Code)\n"),
            Some("1.0.43".to_string())
        );
        assert_eq!(extract_version("no version here"), None);
    }

    #[test]
    fn readiness_display_lists_flags() {
        let readiness = Readiness {
            path: Some(PathBuf::from("/bin/claude")),
            version: Some("1.2.3".to_string()),
            installed: true,
            compatible: false,
            authenticated: true,
        };
        assert!(!readiness.is_ready());
        assert_eq!(
            readiness.to_string(),
            "installed=yes compatible=no authenticated=yes path=/bin/claude version=1.2.3"
        );
    }

    #[test]
    fn missing_binary_is_not_installed() {
        let config = ClientConfig {
            binary: PathBuf::from("relay-test-binary-that-does-not-exist"),
            ..ClientConfig::default()
        };
        let readiness = PathResolver::new(config).resolve();
        assert!(!readiness.installed);
        assert!(!readiness.is_ready());
        assert_eq!(readiness.path, None);
    }
}
