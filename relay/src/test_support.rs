//! Test-only helpers: scripted launchers, recording sinks and stream line builders.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::error::SpawnError;
use crate::io::launch::{Launcher, TurnRequest};
use crate::io::process::{Supervisor, SupervisorEvent};
use crate::turn::RenderSink;

/// Builders for single NDJSON stream lines.
pub mod lines {
    use serde_json::json;

    pub fn raw(line: &str) -> String {
        line.to_string()
    }

    pub fn system(session_id: Option<&str>) -> String {
        json!({"type": "system", "subtype": "init", "session_id": session_id}).to_string()
    }

    pub fn message_start() -> String {
        json!({"type": "stream_event", "event": {"type": "message_start", "message": {"id": "msg"}}})
            .to_string()
    }

    pub fn block_start(index: usize, kind: &str) -> String {
        let block = match kind {
            "thinking" => json!({"type": "thinking", "thinking": ""}),
            "text" => json!({"type": "text", "text": ""}),
            other => json!({"type": other}),
        };
        json!({"type": "stream_event", "event": {"type": "content_block_start", "index": index, "content_block": block}})
            .to_string()
    }

    pub fn tool_use_start(index: usize, id: &str, name: &str) -> String {
        json!({"type": "stream_event", "event": {"type": "content_block_start", "index": index, "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}}})
            .to_string()
    }

    pub fn text_delta(index: usize, text: &str) -> String {
        json!({"type": "stream_event", "event": {"type": "content_block_delta", "index": index, "delta": {"type": "text_delta", "text": text}}})
            .to_string()
    }

    pub fn thinking_delta(index: usize, thinking: &str) -> String {
        json!({"type": "stream_event", "event": {"type": "content_block_delta", "index": index, "delta": {"type": "thinking_delta", "thinking": thinking}}})
            .to_string()
    }

    pub fn assistant_text(message_id: &str, text: &str) -> String {
        json!({"type": "assistant", "message": {"id": message_id, "role": "assistant", "content": [{"type": "text", "text": text}]}})
            .to_string()
    }

    pub fn assistant_thinking(message_id: &str, thinking: &str) -> String {
        json!({"type": "assistant", "message": {"id": message_id, "role": "assistant", "content": [{"type": "thinking", "thinking": thinking}]}})
            .to_string()
    }

    pub fn assistant_tool_use(message_id: &str, id: &str, name: &str) -> String {
        json!({"type": "assistant", "message": {"id": message_id, "role": "assistant", "content": [{"type": "tool_use", "id": id, "name": name, "input": {}}]}})
            .to_string()
    }

    pub fn user_tool_result(tool_use_id: &str) -> String {
        json!({"type": "user", "message": {"role": "user", "content": [{"type": "tool_result", "tool_use_id": tool_use_id, "content": "ok"}]}})
            .to_string()
    }

    pub fn result_ok(session_id: Option<&str>) -> String {
        json!({"type": "result", "subtype": "success", "is_error": false, "session_id": session_id})
            .to_string()
    }

    pub fn result_ok_with_text(session_id: Option<&str>, text: &str) -> String {
        json!({"type": "result", "subtype": "success", "is_error": false, "session_id": session_id, "result": text})
            .to_string()
    }

    pub fn result_error(errors: &[&str]) -> String {
        json!({"type": "result", "subtype": "error_during_execution", "is_error": true, "errors": errors})
            .to_string()
    }
}

/// One scripted launch.
#[derive(Debug, Clone)]
pub enum Script {
    /// Events delivered in order; the turn ends at the first terminal one or
    /// times out after `timeout` if there is none.
    Events {
        events: Vec<SupervisorEvent>,
        timeout: Duration,
    },
    /// The launcher fails as if the binary were missing.
    SpawnFailure,
}

impl Script {
    /// Stream lines followed by a clean exit.
    pub fn lines(lines: Vec<String>) -> Self {
        let mut events: Vec<SupervisorEvent> = lines.into_iter().map(SupervisorEvent::Line).collect();
        events.push(SupervisorEvent::Closed { code: Some(0) });
        Self::events(events)
    }

    pub fn events(events: Vec<SupervisorEvent>) -> Self {
        Script::Events {
            events,
            timeout: Duration::from_secs(30),
        }
    }

    /// Stream lines and then go quiet without exiting.
    pub fn hanging(lines: Vec<String>, timeout: Duration) -> Self {
        Script::Events {
            events: lines.into_iter().map(SupervisorEvent::Line).collect(),
            timeout,
        }
    }
}

/// Launcher that replays queued scripts and records every request.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedLauncher {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let remaining = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        if remaining > 0 {
            return Err(anyhow!("{remaining} scripted launches were not used"));
        }
        Ok(())
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, request: &TurnRequest) -> Result<Supervisor, SpawnError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match script {
            Some(Script::Events { events, timeout }) => {
                let (tx, rx) = mpsc::channel();
                for event in events {
                    let _ = tx.send(event);
                }
                Ok(Supervisor::from_channel(rx, tx, timeout))
            }
            Some(Script::SpawnFailure) | None => Err(SpawnError {
                program: PathBuf::from("scripted"),
                source: io::Error::new(io::ErrorKind::NotFound, "no scripted launch"),
            }),
        }
    }
}

/// Sink that records every call it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub appended: Vec<String>,
    pub thinking: Vec<String>,
    pub tools: Vec<Option<String>>,
    pub finalized: Vec<(String, Option<String>)>,
}

impl RecordingSink {
    /// Concatenation of every appended delta.
    pub fn appended_text(&self) -> String {
        self.appended.concat()
    }
}

impl RenderSink for RecordingSink {
    fn append(&mut self, delta: &str) {
        self.appended.push(delta.to_string());
    }

    fn thinking(&mut self, delta: &str) {
        self.thinking.push(delta.to_string());
    }

    fn tool_changed(&mut self, tool: Option<&str>) {
        self.tools.push(tool.map(str::to_string));
    }

    fn finalize(&mut self, answer: &str, thinking: Option<&str>) {
        self.finalized
            .push((answer.to_string(), thinking.map(str::to_string)));
    }
}

/// Version reported by [`FakeCli`] scripts.
#[cfg(all(unix, feature = "test-support"))]
pub const FAKE_CLI_VERSION: &str = "1.0.43";

/// Executable shell script standing in for the assistant binary.
#[cfg(all(unix, feature = "test-support"))]
pub struct FakeCli {
    dir: tempfile::TempDir,
    path: PathBuf,
}

#[cfg(all(unix, feature = "test-support"))]
impl FakeCli {
    /// Write `body` as a `/bin/sh` script named `claude`.
    pub fn new(body: &str) -> Result<Self> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(Self { dir, path })
    }

    /// Script that answers `--version`, records its arguments, then runs `body`.
    pub fn responding(body: &str) -> Result<Self> {
        let script = format!(
            "if [ \"$1\" = \"--version\" ]; then\n  echo \"{FAKE_CLI_VERSION} (Claude Code)\"\n  exit 0\nfi\nprintf '%s\\n' \"$@\" > \"$(dirname \"$0\")/args.txt\"\n{body}"
        );
        Self::new(&script)
    }

    /// Like [`FakeCli::responding`], printing `lines` as NDJSON and exiting with `code`.
    pub fn emitting(lines: &[String], code: i32) -> Result<Self> {
        let mut body = String::from("cat <<'RELAY_EOF'\n");
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        body.push_str("RELAY_EOF\n");
        body.push_str(&format!("exit {code}"));
        Self::responding(&body)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Arguments of the last streaming invocation, one per line as recorded.
    pub fn recorded_args(&self) -> Result<Vec<String>> {
        let raw = std::fs::read_to_string(self.dir.path().join("args.txt"))?;
        Ok(raw.lines().map(str::to_string).collect())
    }
}
