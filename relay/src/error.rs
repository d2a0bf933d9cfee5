//! Error taxonomy for a turn.
//!
//! Decode failures are not listed here: they are recovered per line inside
//! the turn loop and only ever logged.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::io::resolver::Readiness;

/// The external binary could not be started.
#[derive(Debug, Error)]
#[error("failed to spawn {}: {source}", program.display())]
pub struct SpawnError {
    pub program: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Terminal failure of a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("assistant process timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The process reported failure in its `result` record.
    #[error("{0}")]
    Execution(String),
    /// The process exited unsuccessfully without a `result` record.
    #[error("assistant process exited with status {code:?}{}", stderr_suffix(.stderr))]
    Exited { code: Option<i32>, stderr: String },
    #[error("internal error while processing the stream: {0}")]
    Internal(String),
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// Rejection before a turn enters `Running`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("a turn is already running")]
    Busy,
    #[error("assistant binary is not ready: {0}")]
    NotReady(Readiness),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exited_message_includes_trimmed_stderr() {
        let err = TurnError::Exited {
            code: Some(2),
            stderr: "  bad flag\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "assistant process exited with status Some(2): bad flag"
        );
    }

    #[test]
    fn execution_error_is_verbatim() {
        assert_eq!(TurnError::Execution("boom".to_string()).to_string(), "boom");
    }

    #[test]
    fn spawn_error_names_program() {
        let err = SpawnError {
            program: PathBuf::from("/nope/claude"),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert!(err.to_string().starts_with("failed to spawn /nope/claude"));
    }
}
