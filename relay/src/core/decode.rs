//! Typed decoding of the assistant process's newline-delimited JSON stream.
//!
//! Each line is one record discriminated by its `"type"` field. Decoding is
//! tolerant in two directions: unknown *inner* kinds (stream events, content
//! blocks, deltas) map to an `Other` variant and are ignored downstream, while
//! an unknown *top-level* kind or a line that is not JSON at all is reported
//! as a [`DecodeError`] that the caller logs and skips.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// One decoded record from the stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Process start; carries a provisional session id.
    System(SystemMessage),
    /// Full snapshot of (part of) an assistant message.
    Assistant(SnapshotMessage),
    /// Tool results reported back to the model.
    User(SnapshotMessage),
    /// One incremental event.
    StreamEvent(StreamEventMessage),
    /// Terminal record with the authoritative session id.
    Result(ResultMessage),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// `assistant` and `user` records share the same envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotMessage {
    pub message: SnapshotBody,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content is either a list of blocks or, for prompt echoes, a bare string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Blocks(Vec<ContentBlock>),
    Text(String),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Blocks(Vec::new())
    }
}

impl MessageContent {
    /// Typed blocks; a bare string carries none.
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEventMessage {
    pub event: StreamEvent,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart,
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

/// A line that could not be turned into a [`StreamMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("unrecognized message (type {kind:?}): {reason}")]
    Unrecognized {
        kind: Option<String>,
        reason: String,
    },
}

/// Decode a single framed line.
pub fn decode(line: &str) -> Result<StreamMessage, DecodeError> {
    let value: Value = serde_json::from_str(line).map_err(DecodeError::Json)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);
    serde_json::from_value(value).map_err(|err| DecodeError::Unrecognized {
        kind,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_system_init() {
        let msg = decode(r#"{"type":"system","subtype":"init","session_id":"s-1","tools":[]}"#)
            .expect("decode");
        assert_eq!(
            msg,
            StreamMessage::System(SystemMessage {
                subtype: Some("init".to_string()),
                session_id: Some("s-1".to_string()),
                model: None,
            })
        );
    }

    #[test]
    fn decodes_block_start_and_delta() {
        let start = decode(
            r#"{"type":"stream_event","event":{"type":"content_block_start","index":1,"content_block":{"type":"thinking","thinking":""}}}"#,
        )
        .expect("start");
        assert!(matches!(
            start,
            StreamMessage::StreamEvent(StreamEventMessage {
                event: StreamEvent::ContentBlockStart {
                    index: 1,
                    content_block: ContentBlock::Thinking { .. }
                },
                ..
            })
        ));

        let delta = decode(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}"#,
        )
        .expect("delta");
        let StreamMessage::StreamEvent(StreamEventMessage { event, .. }) = delta else {
            panic!("expected stream event");
        };
        assert_eq!(
            event,
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: Delta::TextDelta {
                    text: "Hi".to_string()
                }
            }
        );
    }

    /// Inner kinds the client does not act on still decode successfully.
    #[test]
    fn unknown_inner_kinds_decode_as_other() {
        let ping = decode(r#"{"type":"stream_event","event":{"type":"ping"}}"#).expect("ping");
        assert!(matches!(
            ping,
            StreamMessage::StreamEvent(StreamEventMessage {
                event: StreamEvent::Other,
                ..
            })
        ));

        let sig = decode(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"x"}}}"#,
        )
        .expect("signature");
        assert!(matches!(
            sig,
            StreamMessage::StreamEvent(StreamEventMessage {
                event: StreamEvent::ContentBlockDelta {
                    delta: Delta::Other,
                    ..
                },
                ..
            })
        ));
    }

    #[test]
    fn decodes_assistant_snapshot_with_tool_use() {
        let msg = decode(
            r#"{"type":"assistant","message":{"id":"m1","content":[{"type":"text","text":"Reading"},{"type":"tool_use","id":"t1","name":"Read","input":{}}]},"session_id":"s"}"#,
        )
        .expect("assistant");
        let StreamMessage::Assistant(snapshot) = msg else {
            panic!("expected assistant");
        };
        assert_eq!(snapshot.message.id.as_deref(), Some("m1"));
        assert_eq!(
            snapshot.message.content.blocks(),
            &[
                ContentBlock::Text {
                    text: "Reading".to_string()
                },
                ContentBlock::ToolUse {
                    id: Some("t1".to_string()),
                    name: "Read".to_string()
                },
            ]
        );
    }

    #[test]
    fn user_prompt_echo_has_no_blocks() {
        let msg = decode(r#"{"type":"user","message":{"role":"user","content":"hello"}}"#)
            .expect("user");
        let StreamMessage::User(snapshot) = msg else {
            panic!("expected user");
        };
        assert!(snapshot.message.content.blocks().is_empty());
    }

    #[test]
    fn decodes_error_result() {
        let msg = decode(r#"{"type":"result","is_error":true,"errors":["boom"]}"#).expect("result");
        let StreamMessage::Result(result) = msg else {
            panic!("expected result");
        };
        assert!(result.is_error);
        assert_eq!(result.errors, vec![Value::String("boom".to_string())]);
        assert_eq!(result.session_id, None);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = decode(r#"{"type":"assistant""#).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn unknown_top_level_kind_is_unrecognized() {
        let err = decode(r#"{"type":"telemetry","payload":1}"#).unwrap_err();
        match err {
            DecodeError::Unrecognized { kind, .. } => {
                assert_eq!(kind.as_deref(), Some("telemetry"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_type_is_unrecognized() {
        let err = decode(r#"{"payload":1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Unrecognized { kind: None, .. }));
    }
}
