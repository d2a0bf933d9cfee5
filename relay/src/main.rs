//! Streaming client for the assistant CLI.
//!
//! `relay ask` runs one conversational turn and streams the answer to stdout
//! as it arrives. Diagnostics, tool activity and the session id go to stderr
//! so stdout stays pipeable.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay::error::{ClientError, TurnError};
use relay::exit_codes;
use relay::io::config::{
    ClientConfig, check_timeout_secs, default_config_path, load_config, write_config,
};
use relay::io::launch::{Launcher, ProcessLauncher, TurnRequest};
use relay::io::resolver::{PathResolver, ReadinessResolver};
use relay::logging;
use relay::turn::{RenderSink, TurnController, TurnOutcome, TurnStatus};

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Streaming client for the assistant CLI"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one turn and stream the answer to stdout.
    Ask(AskArgs),
    /// Report whether the assistant binary is installed, compatible and authenticated.
    Doctor {
        /// Config file (defaults to the platform config directory).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config {
        /// Config file (defaults to the platform config directory).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the defaults if the file does not exist yet.
        #[arg(long)]
        init: bool,
    },
}

#[derive(clap::Args)]
struct AskArgs {
    /// Prompt sent to the assistant.
    prompt: String,
    /// Session id to continue.
    #[arg(long)]
    resume: Option<String>,
    /// Model override for this turn.
    #[arg(long)]
    model: Option<String>,
    /// Working directory of the assistant process.
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Timeout override for this turn, in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Echo thinking text to stderr.
    #[arg(long)]
    show_thinking: bool,
    /// Config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Ask(args) => cmd_ask(args),
        Command::Doctor { config } => cmd_doctor(config),
        Command::Config { config, init } => cmd_config(config, init),
    }
}

fn cmd_ask(args: AskArgs) -> Result<i32> {
    if let Some(secs) = args.timeout_secs {
        check_timeout_secs("--timeout-secs", secs)?;
    }
    let cfg = load_config(&config_path(args.config)?)?;
    let launcher = match ProcessLauncher::from_resolver(cfg.clone(), &PathResolver::new(cfg.clone()))
    {
        Ok(launcher) => launcher,
        Err(ClientError::NotReady(readiness)) => {
            eprintln!("assistant not ready: {readiness}");
            return Ok(exit_codes::NOT_READY);
        }
        Err(err) => return Err(err.into()),
    };

    let mut request = TurnRequest::new(args.prompt);
    if let Some(session_id) = args.resume {
        request = request.resume(session_id);
    }
    if let Some(model) = args.model {
        request = request.model(model);
    }
    if let Some(cwd) = args.cwd {
        request = request.workdir(cwd);
    }
    if let Some(secs) = args.timeout_secs {
        request = request.timeout(Duration::from_secs(secs));
    }

    let controller = TurnController::new(launcher, &cfg);
    let mut sink = TerminalSink::new(args.show_thinking);
    let outcome = run_interruptible(&controller, &request, &mut sink)?;

    if let Some(session_id) = &outcome.session_id {
        eprintln!("session: {session_id}");
    }
    Ok(match &outcome.status {
        TurnStatus::Succeeded => exit_codes::OK,
        TurnStatus::Aborted => {
            eprintln!("aborted");
            exit_codes::ABORTED
        }
        TurnStatus::Failed(err) => {
            eprintln!("error: {err}");
            match err {
                TurnError::Timeout(_) => exit_codes::TIMED_OUT,
                _ => exit_codes::FAILED,
            }
        }
    })
}

/// Run the turn with Ctrl-C mapped to [`TurnController::abort`].
#[cfg(unix)]
fn run_interruptible<L: Launcher + Sync>(
    controller: &TurnController<L>,
    request: &TurnRequest,
    sink: &mut dyn RenderSink,
) -> Result<TurnOutcome> {
    use signal_hook::consts::SIGINT;
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT]).context("register SIGINT handler")?;
    let handle = signals.handle();
    std::thread::scope(|scope| {
        scope.spawn(move || {
            for _ in signals.forever() {
                controller.abort();
            }
        });
        let outcome = controller.run_turn(request, sink);
        handle.close();
        outcome.map_err(anyhow::Error::from)
    })
}

#[cfg(not(unix))]
fn run_interruptible<L: Launcher>(
    controller: &TurnController<L>,
    request: &TurnRequest,
    sink: &mut dyn RenderSink,
) -> Result<TurnOutcome> {
    Ok(controller.run_turn(request, sink)?)
}

fn cmd_doctor(config: Option<PathBuf>) -> Result<i32> {
    let cfg = load_config(&config_path(config)?)?;
    let readiness = PathResolver::new(cfg).resolve();
    println!("{readiness}");
    if readiness.is_ready() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::NOT_READY)
    }
}

fn cmd_config(config: Option<PathBuf>, init: bool) -> Result<i32> {
    let path = config_path(config)?;
    if init && !path.exists() {
        write_config(&path, &ClientConfig::default())?;
        eprintln!("wrote {}", path.display());
    }
    let cfg = load_config(&path)?;
    let rendered = toml::to_string_pretty(&cfg).context("serialize config toml")?;
    print!("{rendered}");
    Ok(exit_codes::OK)
}

fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    explicit
        .or_else(default_config_path)
        .context("no config directory on this platform, pass --config")
}

/// Answer text to stdout, everything else to stderr.
struct TerminalSink {
    show_thinking: bool,
    ends_with_newline: bool,
}

impl TerminalSink {
    fn new(show_thinking: bool) -> Self {
        Self {
            show_thinking,
            ends_with_newline: true,
        }
    }
}

impl RenderSink for TerminalSink {
    fn append(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let mut out = io::stdout().lock();
        // A closed stdout must not abort the turn.
        let _ = out.write_all(delta.as_bytes());
        let _ = out.flush();
        self.ends_with_newline = delta.ends_with('\n');
    }

    fn thinking(&mut self, delta: &str) {
        if self.show_thinking {
            let mut err = io::stderr().lock();
            let _ = err.write_all(delta.as_bytes());
            let _ = err.flush();
        }
    }

    fn tool_changed(&mut self, tool: Option<&str>) {
        if let Some(tool) = tool {
            eprintln!("[tool: {tool}]");
        }
    }

    fn finalize(&mut self, _answer: &str, _thinking: Option<&str>) {
        if !self.ends_with_newline {
            println!();
        }
    }
}
