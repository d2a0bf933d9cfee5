//! Launcher abstraction for the assistant process.
//!
//! The [`Launcher`] trait decouples the turn controller from process
//! spawning. Tests use scripted launchers that return supervisors over
//! predetermined events without spawning anything.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ClientError, SpawnError};
use crate::io::config::ClientConfig;
use crate::io::process::{LaunchSpec, Supervisor};
use crate::io::resolver::ReadinessResolver;

/// Install locations under the home directory, searched after the caller's `PATH`.
const HOME_INSTALL_DIRS: &[&str] = &[".local/bin", ".claude/local", ".npm-global/bin", ".bun/bin"];

/// System-wide install locations, searched after the home directories.
const SYSTEM_INSTALL_DIRS: &[&str] = &["/usr/local/bin", "/opt/homebrew/bin", "/usr/bin", "/bin"];

/// Parameters for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub prompt: String,
    /// Session to continue (`--resume`).
    pub session_id: Option<String>,
    /// Overrides the configured model.
    pub model: Option<String>,
    pub workdir: Option<PathBuf>,
    /// Overrides the configured timeout.
    pub timeout: Option<Duration>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Abstraction over how a turn's process is started.
pub trait Launcher {
    fn launch(&self, request: &TurnRequest) -> Result<Supervisor, SpawnError>;
}

/// Launcher that spawns the real assistant binary.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    config: ClientConfig,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, config: ClientConfig) -> Self {
        Self {
            program: program.into(),
            config,
        }
    }

    /// Resolve the binary and refuse to build a launcher unless it is ready.
    pub fn from_resolver<R: ReadinessResolver>(
        config: ClientConfig,
        resolver: &R,
    ) -> Result<Self, ClientError> {
        let readiness = resolver.resolve();
        match (&readiness.path, readiness.is_ready()) {
            (Some(path), true) => Ok(Self::new(path.clone(), config)),
            _ => Err(ClientError::NotReady(readiness)),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Full launch description for `request`.
    pub fn spec(&self, request: &TurnRequest) -> LaunchSpec {
        LaunchSpec {
            program: self.program.clone(),
            args: build_args(request, &self.config),
            workdir: request.workdir.clone(),
            env: vec![("PATH".to_string(), search_path(&self.config))],
            timeout: request.timeout.unwrap_or_else(|| self.config.timeout()),
        }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, request: &TurnRequest) -> Result<Supervisor, SpawnError> {
        Supervisor::start(&self.spec(request))
    }
}

/// Arguments for a single-prompt, non-interactive streaming invocation.
pub fn build_args(request: &TurnRequest, config: &ClientConfig) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        request.prompt.clone(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        // Both are required for character-level streaming.
        "--verbose".to_string(),
        "--include-partial-messages".to_string(),
    ];
    if config.skip_permissions {
        args.push("--dangerously-skip-permissions".to_string());
    }
    if let Some(session_id) = &request.session_id {
        args.push("--resume".to_string());
        args.push(session_id.clone());
    }
    if let Some(model) = request.model.as_ref().or(config.model.as_ref()) {
        args.push("--model".to_string());
        args.push(model.clone());
    }
    args
}

/// The caller's `PATH` extended with the common install directories.
pub fn search_path(config: &ClientConfig) -> OsString {
    let current = std::env::var_os("PATH");
    augment_path(
        current.as_deref(),
        dirs::home_dir().as_deref(),
        &config.extra_path_dirs,
    )
}

/// Append install directories to `current`, skipping entries already present.
pub fn augment_path(current: Option<&OsStr>, home: Option<&Path>, extra: &[PathBuf]) -> OsString {
    let mut entries: Vec<PathBuf> = current
        .map(|path| std::env::split_paths(path).collect())
        .unwrap_or_default();

    let home_dirs = home
        .into_iter()
        .flat_map(|home| HOME_INSTALL_DIRS.iter().map(move |dir| home.join(dir)));
    let system_dirs = SYSTEM_INSTALL_DIRS.iter().map(PathBuf::from);
    for dir in home_dirs.chain(system_dirs).chain(extra.iter().cloned()) {
        if !entries.contains(&dir) {
            entries.push(dir);
        }
    }

    match std::env::join_paths(&entries) {
        Ok(joined) => {
            debug!(entries = entries.len(), "built search path");
            joined
        }
        Err(err) => {
            warn!(err = %err, "could not extend search path, using it unchanged");
            current.map(OsStr::to_os_string).unwrap_or_default()
        }
    }
}
