//! Wire types for the assistant platform's streaming protocol.
//!
//! Each SSE `data:` line carries one flat JSON object with no kind tag; the
//! kind of an event is inferred from which fields are present. That inference
//! happens exactly once, in [`StreamEvent::classify`], so downstream code only
//! ever sees the typed [`EventKind`] variants.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tasks::TaskStatus;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One source reference attached to an assistant reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// One transcript entry. The assistant tail is mutated in place by the
/// reconciler while a turn streams; once `done` is set the message is history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_token_ms: Option<u64>,
    /// Reasoning duration in seconds, as reported by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub done: bool,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: String) -> Self {
        Self {
            role,
            content,
            images: None,
            citations: None,
            context_id: None,
            time_to_first_token_ms: None,
            thought_duration: None,
            total_duration_ms: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            tps: None,
            finish_reason: None,
            error: None,
            done: false,
        }
    }

    /// Shallow-merge partial message fields onto this message. Unknown keys
    /// are ignored; a merge that produces an unreadable message leaves the
    /// original untouched.
    pub fn merge_meta(&mut self, meta: &Map<String, Value>) {
        let Ok(Value::Object(mut fields)) = serde_json::to_value(&*self) else {
            return;
        };
        for (key, value) in meta {
            fields.insert(key.clone(), value.clone());
        }
        match serde_json::from_value::<ChatMessage>(Value::Object(fields)) {
            Ok(merged) => *self = merged,
            Err(e) => eprintln!("[PROTOCOL] Skipping unmergeable meta: {}", e),
        }
    }
}

/// Usage and finish fields, merged onto the message all at once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageUpdate {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub tps: Option<f64>,
    pub finish_reason: Option<String>,
}

/// Final per-task summary delivered in a `task_result` record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResultPayload {
    #[serde(default)]
    pub tasks: Vec<TaskOutcome>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Raw decoded form of one `data:` line. Every field is optional because the
/// wire format carries mutually-exclusive kinds in one flat object.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StreamEvent {
    pub chat_id: Option<String>,
    pub meta: Option<Map<String, Value>>,
    pub content: Option<String>,
    /// Presence alone signals "reasoning in progress"; the value is unused.
    pub thought: Option<Value>,
    pub thought_duration: Option<f64>,
    pub total_duration: Option<f64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub tps: Option<f64>,
    pub finish_reason: Option<String>,
    pub citations: Option<Vec<Citation>>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub trace_id: Option<String>,
    pub result: Option<TaskResultPayload>,
    pub error: Option<String>,
}

/// Typed form of a protocol event, produced once at the decode boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    ChatId(String),
    Meta(Map<String, Value>),
    Delta {
        content: Option<String>,
        thought: bool,
    },
    ThoughtDuration(f64),
    TotalDuration(f64),
    Usage(UsageUpdate),
    Citations(Vec<Citation>),
    TaskEvent {
        task_id: String,
        status: TaskStatus,
        error: Option<String>,
        trace_id: Option<String>,
    },
    TaskResult {
        result: TaskResultPayload,
        trace_id: Option<String>,
    },
    StreamError(String),
    Unknown,
}

impl StreamEvent {
    /// Infer the event kind from field presence. Task records are the only
    /// ones with an explicit `type` tag and may carry their own `error`
    /// field, so they are recognized before the chat-stream rules; the rest
    /// follow the reconciler's dispatch precedence. Anything that matches no
    /// rule is `Unknown` and ignored downstream.
    pub fn classify(self) -> EventKind {
        match self.event_type.as_deref() {
            Some("task_event") => {
                let Some(task_id) = self.task_id else {
                    return EventKind::Unknown;
                };
                let Some(status) = self.status.as_deref().and_then(TaskStatus::parse) else {
                    eprintln!(
                        "[PROTOCOL] task_event for {} with unrecognized status {:?}",
                        task_id, self.status
                    );
                    return EventKind::Unknown;
                };
                return EventKind::TaskEvent {
                    task_id,
                    status,
                    error: self.error,
                    trace_id: self.trace_id,
                };
            }
            Some("task_result") => {
                let Some(result) = self.result else {
                    return EventKind::Unknown;
                };
                return EventKind::TaskResult {
                    result,
                    trace_id: self.trace_id,
                };
            }
            _ => {}
        }

        if let Some(id) = self.chat_id {
            return EventKind::ChatId(id);
        }
        if let Some(meta) = self.meta {
            return EventKind::Meta(meta);
        }
        if self.content.is_some() || self.thought.is_some() {
            return EventKind::Delta {
                content: self.content,
                thought: self.thought.is_some(),
            };
        }
        if let Some(secs) = self.thought_duration {
            return EventKind::ThoughtDuration(secs);
        }
        if let Some(secs) = self.total_duration {
            return EventKind::TotalDuration(secs);
        }
        if self.prompt_tokens.is_some()
            || self.completion_tokens.is_some()
            || self.total_tokens.is_some()
            || self.tps.is_some()
            || self.finish_reason.is_some()
        {
            return EventKind::Usage(UsageUpdate {
                prompt_tokens: self.prompt_tokens,
                completion_tokens: self.completion_tokens,
                total_tokens: self.total_tokens,
                tps: self.tps,
                finish_reason: self.finish_reason,
            });
        }
        if let Some(citations) = self.citations {
            return EventKind::Citations(citations);
        }
        if let Some(error) = self.error {
            return EventKind::StreamError(error);
        }
        EventKind::Unknown
    }
}

/// Body of `POST /v1/chat/stream`.
#[derive(Clone, Debug, Serialize)]
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub provider: String,
    pub model: String,
}

/// One sub-task in a batch request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub prompt: String,
    pub provider: String,
    pub model: String,
    /// Absolute expiry, epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ts: Option<i64>,
}

/// Body of `POST /v1/tasks/stream`.
#[derive(Clone, Debug, Serialize)]
pub struct TasksStreamRequest {
    pub parent_chat_id: String,
    pub tasks: Vec<TaskSpec>,
}

/// Body of `POST /v1/tasks/cancel`.
#[derive(Clone, Debug, Serialize)]
pub struct CancelTaskRequest {
    pub parent_chat_id: String,
    pub task_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> EventKind {
        serde_json::from_str::<StreamEvent>(json)
            .expect("valid event json")
            .classify()
    }

    #[test]
    fn test_task_event_wins_over_error_field() {
        // A failed task_event carries its own error string; it must not be
        // mistaken for a terminal stream error.
        let kind = decode(
            r#"{"type":"task_event","task_id":"t1","status":"failed","error":"cancelled","trace_id":"tr"}"#,
        );
        match kind {
            EventKind::TaskEvent {
                task_id,
                status,
                error,
                trace_id,
            } => {
                assert_eq!(task_id, "t1");
                assert_eq!(status, TaskStatus::Failed);
                assert_eq!(error.as_deref(), Some("cancelled"));
                assert_eq!(trace_id.as_deref(), Some("tr"));
            }
            other => panic!("expected TaskEvent, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_id_takes_precedence_over_content() {
        let kind = decode(r#"{"chat_id":"c9","content":"ignored by precedence"}"#);
        assert_eq!(kind, EventKind::ChatId("c9".to_string()));
    }

    #[test]
    fn test_thought_presence_alone_is_a_delta() {
        let kind = decode(r#"{"thought":true}"#);
        assert_eq!(
            kind,
            EventKind::Delta {
                content: None,
                thought: true,
            }
        );
    }

    #[test]
    fn test_usage_fields_group_into_one_update() {
        let kind = decode(r#"{"prompt_tokens":10,"completion_tokens":20,"finish_reason":"stop"}"#);
        match kind {
            EventKind::Usage(usage) => {
                assert_eq!(usage.prompt_tokens, Some(10));
                assert_eq!(usage.completion_tokens, Some(20));
                assert_eq!(usage.total_tokens, None);
                assert_eq!(usage.finish_reason.as_deref(), Some("stop"));
            }
            other => panic!("expected Usage, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_fields_classify_as_unknown() {
        let kind = decode(r#"{"novel_field":42}"#);
        assert_eq!(kind, EventKind::Unknown);
    }

    #[test]
    fn test_bare_error_is_a_stream_error() {
        let kind = decode(r#"{"error":"model exploded"}"#);
        assert_eq!(kind, EventKind::StreamError("model exploded".to_string()));
    }

    #[test]
    fn test_meta_merge_is_shallow_and_ignores_unknown_keys() {
        let mut msg = ChatMessage::new(ChatRole::Assistant, "body".to_string());
        let meta = serde_json::from_str::<Map<String, Value>>(
            r#"{"finish_reason":"length","unknown_key":true}"#,
        )
        .unwrap();
        msg.merge_meta(&meta);
        assert_eq!(msg.finish_reason.as_deref(), Some("length"));
        assert_eq!(msg.content, "body");
    }
}
