//! Incremental extraction of answer text, thinking text, tool state and the
//! session id from an ordered sequence of decoded stream messages.
//!
//! Routing of deltas is driven by the block index recorded at
//! `content_block_start`, never by arrival order, so interleaved thinking and
//! answer blocks accumulate into their own buffers. Tool tracking is a LIFO
//! approximation: a `tool_result` closes the most recently opened tool.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::core::decode::{
    ContentBlock, Delta, ResultMessage, SnapshotMessage, StreamEvent, StreamMessage,
};
use crate::core::types::{Effect, Extraction, ResultStats, StreamVerdict};

/// Error text used when a failed `result` carries no detail at all.
pub const GENERIC_ERROR: &str = "execution failed";

/// Kind of a content block, recorded per index at block start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    Other,
}

impl BlockKind {
    fn of(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text { .. } => BlockKind::Text,
            ContentBlock::Thinking { .. } => BlockKind::Thinking,
            ContentBlock::ToolUse { .. } => BlockKind::ToolUse,
            ContentBlock::ToolResult { .. } => BlockKind::ToolResult,
            ContentBlock::Other => BlockKind::Other,
        }
    }
}

/// Where a tool block was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Stream,
    Snapshot,
}

/// Mutable accumulator owned by exactly one turn.
#[derive(Debug, Default)]
pub struct ExtractionState {
    block_kinds: HashMap<usize, BlockKind>,
    answer: String,
    thinking: String,
    open_tools: Vec<String>,
    seen_tool_ids: HashSet<String>,
    matched_tool_ids: HashSet<String>,
    session_id: Option<String>,
    saw_stream_event: bool,
    snapshot_answer: String,
    snapshot_thinking: String,
    snapshot_seen: HashSet<(String, bool, String)>,
    result: Option<ResultMessage>,
}

impl ExtractionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one message and return the effects it produced, in order.
    pub fn apply(&mut self, message: &StreamMessage) -> Vec<Effect> {
        let tool_before = self.active_tool().map(str::to_string);
        let mut effects = Vec::new();

        match message {
            StreamMessage::System(system) => {
                // Provisional: never replaces an id that is already recorded.
                if self.session_id.is_none() {
                    self.session_id.clone_from(&system.session_id);
                }
            }
            StreamMessage::Assistant(snapshot) => self.apply_snapshot(snapshot, true),
            StreamMessage::User(snapshot) => self.apply_snapshot(snapshot, false),
            StreamMessage::StreamEvent(stream) => {
                self.saw_stream_event = true;
                self.apply_event(&stream.event, &mut effects);
            }
            StreamMessage::Result(result) => {
                if result.session_id.is_some() {
                    self.session_id.clone_from(&result.session_id);
                }
                self.result = Some(result.clone());
            }
        }

        let tool_after = self.active_tool();
        if tool_before.as_deref() != tool_after {
            effects.push(Effect::ToolChanged(tool_after.map(str::to_string)));
        }
        effects
    }

    fn apply_event(&mut self, event: &StreamEvent, effects: &mut Vec<Effect>) {
        match event {
            // Block indices restart with every message.
            StreamEvent::MessageStart => self.block_kinds.clear(),
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                self.block_kinds.insert(*index, BlockKind::of(content_block));
                self.track_tool(content_block, Origin::Stream);
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let kind = self.block_kind(*index).unwrap_or(BlockKind::Text);
                match delta {
                    Delta::ThinkingDelta { thinking } => self.push_thinking(thinking, effects),
                    Delta::TextDelta { text } if kind == BlockKind::Thinking => {
                        self.push_thinking(text, effects);
                    }
                    Delta::TextDelta { text } => self.push_answer(text, effects),
                    Delta::Other => {}
                }
            }
            StreamEvent::ContentBlockStop { .. } | StreamEvent::Other => {}
        }
    }

    fn push_answer(&mut self, text: &str, effects: &mut Vec<Effect>) {
        if text.is_empty() {
            return;
        }
        self.answer.push_str(text);
        effects.push(Effect::AnswerDelta(text.to_string()));
    }

    fn push_thinking(&mut self, text: &str, effects: &mut Vec<Effect>) {
        if text.is_empty() {
            return;
        }
        self.thinking.push_str(text);
        effects.push(Effect::ThinkingDelta(text.to_string()));
    }

    fn apply_snapshot(&mut self, snapshot: &SnapshotMessage, from_assistant: bool) {
        let message_id = &snapshot.message.id;
        for block in snapshot.message.content.blocks() {
            match block {
                ContentBlock::Text { text } if from_assistant => {
                    self.record_snapshot_text(message_id, false, text);
                }
                ContentBlock::Thinking { thinking } if from_assistant => {
                    self.record_snapshot_text(message_id, true, thinking);
                }
                ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => {
                    self.track_tool(block, Origin::Snapshot);
                }
                _ => {}
            }
        }
    }

    fn record_snapshot_text(&mut self, message_id: &Option<String>, thinking: bool, text: &str) {
        if text.is_empty() {
            return;
        }
        // The same snapshot can be emitted more than once. Without an id,
        // repeated text is taken as distinct content.
        if let Some(id) = message_id
            && !self
                .snapshot_seen
                .insert((id.clone(), thinking, text.to_string()))
        {
            return;
        }
        if thinking {
            self.snapshot_thinking.push_str(text);
        } else {
            self.snapshot_answer.push_str(text);
        }
    }

    fn track_tool(&mut self, block: &ContentBlock, origin: Origin) {
        match block {
            ContentBlock::ToolUse { id, name } => {
                match id {
                    Some(id) => {
                        if !self.seen_tool_ids.insert(id.clone()) {
                            return;
                        }
                    }
                    // Without an id a snapshot echo cannot be told apart from
                    // the streamed block it repeats.
                    None if origin == Origin::Snapshot && self.saw_stream_event => return,
                    None => {}
                }
                self.open_tools.push(name.clone());
            }
            ContentBlock::ToolResult { tool_use_id } => {
                if let Some(id) = tool_use_id
                    && !self.matched_tool_ids.insert(id.clone())
                {
                    return;
                }
                self.open_tools.pop();
            }
            _ => {}
        }
    }

    /// Most recently opened tool that has not been matched by a result.
    pub fn active_tool(&self) -> Option<&str> {
        self.open_tools.last().map(String::as_str)
    }

    pub fn open_tools(&self) -> &[String] {
        &self.open_tools
    }

    pub fn block_kind(&self, index: usize) -> Option<BlockKind> {
        self.block_kinds.get(&index).copied()
    }

    /// Answer text accumulated from deltas so far.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Thinking text accumulated from deltas so far.
    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether a terminal `result` record has been applied.
    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    /// Resolve the final facts of the turn.
    pub fn finish(self) -> Extraction {
        let verdict = match &self.result {
            None => StreamVerdict::Incomplete,
            Some(result) if result.is_error => StreamVerdict::Errored(error_text(result)),
            Some(_) => StreamVerdict::Completed,
        };
        let stats = self
            .result
            .as_ref()
            .map(|result| ResultStats {
                duration_ms: result.duration_ms,
                num_turns: result.num_turns,
                total_cost_usd: result.total_cost_usd,
            })
            .unwrap_or_default();

        let mut answer = prefer_streamed(self.answer, self.snapshot_answer);
        if answer.is_empty()
            && verdict == StreamVerdict::Completed
            && let Some(text) = self.result.and_then(|result| result.result)
        {
            answer = text;
        }

        Extraction {
            answer,
            thinking: prefer_streamed(self.thinking, self.snapshot_thinking),
            session_id: self.session_id,
            verdict,
            stats,
        }
    }
}

fn prefer_streamed(streamed: String, snapshot: String) -> String {
    if streamed.is_empty() {
        snapshot
    } else {
        streamed
    }
}

/// Error text for a failed `result`: the error list, else the result text,
/// else a generic message naming the subtype.
fn error_text(result: &ResultMessage) -> String {
    let listed: Vec<String> = result
        .errors
        .iter()
        .map(|entry| match entry {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .filter(|text| !text.trim().is_empty())
        .collect();
    if !listed.is_empty() {
        return listed.join("\n");
    }
    if let Some(text) = result.result.as_deref()
        && !text.trim().is_empty()
    {
        return text.to_string();
    }
    match &result.subtype {
        Some(subtype) => format!("{GENERIC_ERROR} ({subtype})"),
        None => GENERIC_ERROR.to_string(),
    }
}
