//! Orchestration for a single conversational turn.
//!
//! A [`TurnController`] owns at most one running supervisor at a time. It
//! pumps supervisor events through the decoder and the extraction state
//! machine, relays effects to a [`RenderSink`], and settles every turn
//! through one path so the sink is finalized exactly once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::core::decode::decode;
use crate::core::extract::ExtractionState;
use crate::core::heuristic::split_paragraphs;
use crate::core::phase::{Settled, TurnPhase};
use crate::core::types::{Effect, ResultStats, StreamVerdict};
use crate::error::{ClientError, SpawnError, TurnError};
use crate::io::config::ClientConfig;
use crate::io::launch::{Launcher, TurnRequest};
use crate::io::process::{AbortHandle, Supervisor, SupervisorEvent};

/// Characters of an undecodable line kept in the log.
const LOGGED_LINE_CHARS: usize = 200;

/// Receiver of a turn's rendered output.
pub trait RenderSink {
    /// Ordered answer text deltas.
    fn append(&mut self, delta: &str);

    /// Ordered thinking text deltas.
    fn thinking(&mut self, _delta: &str) {}

    /// The current active tool changed.
    fn tool_changed(&mut self, _tool: Option<&str>) {}

    /// Called exactly once per turn, after the last delta.
    fn finalize(&mut self, answer: &str, thinking: Option<&str>);
}

/// How a turn ended.
#[derive(Debug)]
pub enum TurnStatus {
    Succeeded,
    Failed(TurnError),
    Aborted,
}

/// Result of one turn, handed back to the caller for persistence.
#[derive(Debug)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Session id to pass back on the next turn.
    pub session_id: Option<String>,
    pub answer: String,
    pub thinking: Option<String>,
    pub exit_code: Option<i32>,
    pub stats: ResultStats,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TurnStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&TurnError> {
        match &self.status {
            TurnStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Slot {
    phase: TurnPhase,
    abort: Option<AbortHandle>,
    abort_requested: bool,
}

/// Drives one turn at a time against a [`Launcher`].
#[derive(Debug)]
pub struct TurnController<L> {
    launcher: L,
    heuristic_split: bool,
    stderr_tail_bytes: usize,
    slot: Mutex<Slot>,
}

/// How the event loop stopped.
enum LoopEnd {
    Closed { code: Option<i32>, stderr: String },
    TimedOut(Duration),
    Aborted,
    SpawnFailed(SpawnError),
    Panicked(&'static str),
}

impl<L: Launcher> TurnController<L> {
    pub fn new(launcher: L, config: &ClientConfig) -> Self {
        Self {
            launcher,
            heuristic_split: config.heuristic_thinking_split,
            stderr_tail_bytes: config.stderr_tail_bytes,
            slot: Mutex::new(Slot {
                phase: TurnPhase::Idle,
                abort: None,
                abort_requested: false,
            }),
        }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn phase(&self) -> TurnPhase {
        self.lock().phase
    }

    /// Abort the running turn, if any. Safe to call from another thread or
    /// from inside a sink callback.
    pub fn abort(&self) -> bool {
        let mut slot = self.lock();
        if !slot.phase.is_running() {
            return false;
        }
        match slot.abort.clone() {
            Some(handle) => {
                drop(slot);
                handle.abort()
            }
            None => {
                // Not launched yet; honoured as soon as it is.
                slot.abort_requested = true;
                true
            }
        }
    }

    /// Run one turn to completion.
    ///
    /// Rejects with [`ClientError::Busy`] while another turn is running,
    /// leaving that turn untouched. Otherwise the sink is finalized exactly
    /// once, whatever the outcome.
    #[instrument(skip_all, fields(resume = request.session_id.is_some()))]
    pub fn run_turn(
        &self,
        request: &TurnRequest,
        sink: &mut dyn RenderSink,
    ) -> Result<TurnOutcome, ClientError> {
        self.begin()?;
        let _release = ReleaseOnDrop { slot: &self.slot };

        let mut state = ExtractionState::new();
        let launched = panic::catch_unwind(AssertUnwindSafe(|| self.launcher.launch(request)));
        let end = match launched {
            Err(_) => {
                error!("panic while launching the assistant, aborting turn");
                LoopEnd::Panicked("launching the assistant panicked")
            }
            Ok(Err(err)) => LoopEnd::SpawnFailed(err),
            Ok(Ok(mut supervisor)) => {
                let handle = supervisor.abort_handle();
                if self.attach(handle.clone()) {
                    handle.abort();
                }
                let mut tail = StderrTail::new(self.stderr_tail_bytes);
                let pumped = panic::catch_unwind(AssertUnwindSafe(|| {
                    pump(&mut supervisor, &mut state, &mut tail, sink)
                }));
                match pumped {
                    Ok(end) => end,
                    Err(_) => {
                        error!("panic while processing the stream, aborting turn");
                        handle.abort();
                        LoopEnd::Panicked("message processing panicked")
                    }
                }
            }
        };

        let extraction = state.finish();
        let (status, exit_code) = match end {
            LoopEnd::SpawnFailed(err) => (TurnStatus::Failed(err.into()), None),
            LoopEnd::Panicked(what) => (
                TurnStatus::Failed(TurnError::Internal(what.to_string())),
                None,
            ),
            LoopEnd::TimedOut(timeout) => (TurnStatus::Failed(TurnError::Timeout(timeout)), None),
            LoopEnd::Aborted => (TurnStatus::Aborted, None),
            LoopEnd::Closed { code, stderr } => {
                let status = match &extraction.verdict {
                    StreamVerdict::Errored(message) => {
                        TurnStatus::Failed(TurnError::Execution(message.clone()))
                    }
                    StreamVerdict::Completed => TurnStatus::Succeeded,
                    StreamVerdict::Incomplete if code == Some(0) => TurnStatus::Succeeded,
                    StreamVerdict::Incomplete => {
                        TurnStatus::Failed(TurnError::Exited { code, stderr })
                    }
                };
                (status, code)
            }
        };

        let mut thinking = extraction.thinking_opt().map(str::to_string);
        let mut answer = extraction.answer;
        if self.heuristic_split
            && thinking.is_none()
            && matches!(status, TurnStatus::Succeeded)
            && let Some((split_thinking, split_answer)) = split_paragraphs(&answer)
        {
            thinking = Some(split_thinking);
            answer = split_answer;
        }

        sink.finalize(&answer, thinking.as_deref());
        self.settle(&status);

        match &status {
            TurnStatus::Failed(err) => warn!(err = %err, "turn failed"),
            _ => info!(status = ?status, session = ?extraction.session_id, "turn finished"),
        }
        Ok(TurnOutcome {
            status,
            session_id: extraction.session_id,
            answer,
            thinking,
            exit_code,
            stats: extraction.stats,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Result<(), ClientError> {
        let mut slot = self.lock();
        slot.phase = slot.phase.begin().map_err(|_| ClientError::Busy)?;
        slot.abort = None;
        slot.abort_requested = false;
        Ok(())
    }

    /// Store the running turn's abort handle; returns whether an abort was
    /// requested before it existed.
    fn attach(&self, handle: AbortHandle) -> bool {
        let mut slot = self.lock();
        slot.abort = Some(handle);
        slot.abort_requested
    }

    fn settle(&self, status: &TurnStatus) {
        let settled = match status {
            TurnStatus::Succeeded => Settled::Succeeded,
            TurnStatus::Failed(_) => Settled::Failed,
            TurnStatus::Aborted => Settled::Aborted,
        };
        let mut slot = self.lock();
        match slot.phase.settle(settled) {
            Ok(phase) => slot.phase = phase,
            Err(err) => warn!(err = %err, "ignoring turn transition"),
        }
    }
}

/// Returns the controller to `Idle` and drops the supervisor handle on every exit path.
struct ReleaseOnDrop<'a> {
    slot: &'a Mutex<Slot>,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.phase = slot.phase.release().unwrap_or(TurnPhase::Idle);
        slot.abort = None;
        slot.abort_requested = false;
    }
}

fn pump(
    supervisor: &mut Supervisor,
    state: &mut ExtractionState,
    tail: &mut StderrTail,
    sink: &mut dyn RenderSink,
) -> LoopEnd {
    while let Some(event) = supervisor.next_event() {
        match event {
            SupervisorEvent::Line(line) => apply_line(&line, state, sink),
            SupervisorEvent::Stderr(chunk) => tail.push(&chunk),
            SupervisorEvent::Closed { code } => {
                return LoopEnd::Closed {
                    code,
                    stderr: tail.take(),
                };
            }
            SupervisorEvent::TimedOut => return LoopEnd::TimedOut(supervisor.timeout()),
            SupervisorEvent::Aborted => return LoopEnd::Aborted,
        }
    }
    LoopEnd::Closed {
        code: None,
        stderr: tail.take(),
    }
}

fn apply_line(line: &str, state: &mut ExtractionState, sink: &mut dyn RenderSink) {
    if line.trim().is_empty() {
        return;
    }
    let message = match decode(line) {
        Ok(message) => message,
        Err(err) => {
            let excerpt: String = line.chars().take(LOGGED_LINE_CHARS).collect();
            warn!(err = %err, line = %excerpt, "skipping undecodable line");
            return;
        }
    };
    for effect in state.apply(&message) {
        match effect {
            Effect::AnswerDelta(text) => sink.append(&text),
            Effect::ThinkingDelta(text) => sink.thinking(&text),
            Effect::ToolChanged(tool) => sink.tool_changed(tool.as_deref()),
        }
    }
}

/// Last `max` bytes of stderr, cut on a character boundary.
#[derive(Debug)]
struct StderrTail {
    buf: String,
    max: usize,
}

impl StderrTail {
    fn new(max: usize) -> Self {
        Self {
            buf: String::new(),
            max,
        }
    }

    fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
        if self.buf.len() > self.max {
            let mut cut = self.buf.len() - self.max;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    fn take(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, Script, ScriptedLauncher, lines};

    fn controller(scripts: Vec<Script>) -> TurnController<ScriptedLauncher> {
        TurnController::new(ScriptedLauncher::new(scripts), &ClientConfig::default())
    }

    #[test]
    fn stderr_tail_keeps_last_bytes_on_char_boundary() {
        let mut tail = StderrTail::new(4);
        tail.push("abcdé");
        assert_eq!(tail.take(), "cdé");
        tail.push("xyz");
        tail.push("12");
        assert_eq!(tail.take(), "yz12");
    }

    #[test]
    fn successful_turn_relays_deltas_and_finalizes_once() {
        let ctl = controller(vec![Script::lines(vec![
            lines::system(Some("provisional")),
            lines::block_start(0, "text"),
            lines::text_delta(0, "Hel"),
            lines::text_delta(0, "lo"),
            lines::result_ok(Some("abc123")),
        ])]);
        let mut sink = RecordingSink::default();
        let outcome = ctl.run_turn(&TurnRequest::new("hi"), &mut sink).expect("turn");

        assert!(outcome.is_success());
        assert_eq!(outcome.session_id.as_deref(), Some("abc123"));
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(sink.appended, vec!["Hel", "lo"]);
        assert_eq!(sink.finalized, vec![("Hello".to_string(), None)]);
        assert_eq!(ctl.phase(), TurnPhase::Idle);
    }

    #[test]
    fn execution_error_is_surfaced_verbatim() {
        let ctl = controller(vec![Script::lines(vec![lines::result_error(&["boom"])])]);
        let mut sink = RecordingSink::default();
        let outcome = ctl.run_turn(&TurnRequest::new("hi"), &mut sink).expect("turn");

        match outcome.error() {
            Some(TurnError::Execution(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(outcome.answer, "");
        assert_eq!(sink.finalized.len(), 1);
    }

    #[test]
    fn nonzero_exit_without_result_fails_with_stderr() {
        let ctl = controller(vec![Script::events(vec![
            SupervisorEvent::Stderr("unknown option --bogus\n".to_string()),
            SupervisorEvent::Closed { code: Some(2) },
        ])]);
        let mut sink = RecordingSink::default();
        let outcome = ctl.run_turn(&TurnRequest::new("hi"), &mut sink).expect("turn");

        match outcome.error() {
            Some(TurnError::Exited { code, stderr }) => {
                assert_eq!(*code, Some(2));
                assert!(stderr.contains("--bogus"));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_still_finalizes() {
        let ctl = controller(vec![Script::SpawnFailure]);
        let mut sink = RecordingSink::default();
        let outcome = ctl.run_turn(&TurnRequest::new("hi"), &mut sink).expect("turn");

        assert!(matches!(outcome.error(), Some(TurnError::Spawn(_))));
        assert_eq!(sink.finalized, vec![(String::new(), None)]);
        assert_eq!(ctl.phase(), TurnPhase::Idle);
    }

    #[test]
    fn heuristic_split_applies_only_when_enabled() {
        let script = || {
            Script::lines(vec![
                lines::block_start(0, "text"),
                lines::text_delta(0, "Thinking it over.\n\nFinal answer."),
                lines::result_ok(Some("s")),
            ])
        };
        let config = ClientConfig {
            heuristic_thinking_split: true,
            ..ClientConfig::default()
        };
        let ctl = TurnController::new(ScriptedLauncher::new(vec![script()]), &config);
        let mut sink = RecordingSink::default();
        let outcome = ctl.run_turn(&TurnRequest::new("q"), &mut sink).expect("turn");
        assert_eq!(outcome.answer, "Final answer.");
        assert_eq!(outcome.thinking.as_deref(), Some("Thinking it over."));

        let ctl = controller(vec![script()]);
        let mut sink = RecordingSink::default();
        let outcome = ctl.run_turn(&TurnRequest::new("q"), &mut sink).expect("turn");
        assert_eq!(outcome.answer, "Thinking it over.\n\nFinal answer.");
        assert_eq!(outcome.thinking, None);
    }

    #[test]
    fn abort_when_idle_is_a_no_op() {
        let ctl = controller(Vec::new());
        assert!(!ctl.abort());
    }

    struct PanickingSink;

    impl RenderSink for PanickingSink {
        fn append(&mut self, _delta: &str) {
            panic!("renderer exploded");
        }

        fn finalize(&mut self, _answer: &str, _thinking: Option<&str>) {}
    }

    /// A panic while relaying deltas is contained and the turn still settles.
    #[test]
    fn panic_during_processing_fails_turn() {
        let ctl = controller(vec![Script::lines(vec![
            lines::block_start(0, "text"),
            lines::text_delta(0, "boom"),
            lines::result_ok(Some("s")),
        ])]);
        let outcome = ctl
            .run_turn(&TurnRequest::new("q"), &mut PanickingSink)
            .expect("turn");
        assert!(matches!(outcome.error(), Some(TurnError::Internal(_))));
        assert_eq!(ctl.phase(), TurnPhase::Idle);
    }
}
