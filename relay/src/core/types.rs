//! Shared deterministic types for the extraction core.
//!
//! These types are the contract between the extraction state machine and the
//! turn controller. They carry no I/O handles and compare by value.

use serde::Serialize;

/// Observable effect of applying one message, relayed to the renderer in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// New suffix appended to the answer text.
    AnswerDelta(String),
    /// New suffix appended to the thinking text.
    ThinkingDelta(String),
    /// The current active tool changed (`None` when no tool is open).
    ToolChanged(Option<String>),
}

/// Usage figures reported by the terminal `result` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
}

/// How the stream itself ended, as reported by its `result` record.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamVerdict {
    /// No `result` record was seen (process closed, was aborted, or timed out).
    Incomplete,
    /// The process reported success.
    Completed,
    /// The process reported failure; carries the extracted error text.
    Errored(String),
}

/// Final facts extracted from one turn's stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub answer: String,
    pub thinking: String,
    pub session_id: Option<String>,
    pub verdict: StreamVerdict,
    pub stats: ResultStats,
}

impl Extraction {
    /// Thinking text, or `None` when nothing was separated out.
    pub fn thinking_opt(&self) -> Option<&str> {
        if self.thinking.is_empty() {
            None
        } else {
            Some(&self.thinking)
        }
    }
}
