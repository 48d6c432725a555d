//! Folds decoded protocol events into the open message of a transcript.
//!
//! Dispatch follows the wire format's field-presence precedence (already
//! resolved into [`EventKind`] at the decode boundary). The fold is a pure
//! merge: accumulated content is never discarded, and an event matching no
//! rule is a no-op so unknown fields stay forward-compatible.

use std::time::Instant;

use crate::conversation::Transcript;
use crate::protocol::EventKind;

/// What applying one event did, for the caller to react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No visible change (unknown event, task traffic, errored message).
    None,
    /// The open message changed.
    Updated,
    /// The server assigned a chat id; the chat-history list is
    /// server-authoritative and should be refreshed.
    ChatIdAssigned,
    /// A terminal error event ended accumulation for this message.
    Errored,
}

pub struct Reconciler {
    turn_started: Instant,
    first_token_seen: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            turn_started: Instant::now(),
            first_token_seen: false,
        }
    }

    /// Call when a turn's stream is opened; time-to-first-token is measured
    /// from here.
    pub fn begin_turn(&mut self) {
        self.turn_started = Instant::now();
        self.first_token_seen = false;
    }

    pub fn apply(&mut self, event: &EventKind, transcript: &mut Transcript) -> ReconcileOutcome {
        self.apply_at(event, transcript, Instant::now())
    }

    /// Like [`apply`](Self::apply) with an injectable clock.
    pub fn apply_at(
        &mut self,
        event: &EventKind,
        transcript: &mut Transcript,
        now: Instant,
    ) -> ReconcileOutcome {
        if let EventKind::ChatId(id) = event {
            transcript.adopt_chat_id(id);
            return ReconcileOutcome::ChatIdAssigned;
        }

        let Some(msg) = transcript.last_assistant_mut() else {
            return ReconcileOutcome::None;
        };

        match event {
            EventKind::ChatId(_) => unreachable!("handled above"),
            EventKind::Meta(meta) => {
                msg.merge_meta(meta);
                ReconcileOutcome::Updated
            }
            EventKind::Delta { content, thought } => {
                if msg.error.is_some() {
                    // Accumulation ended with the error event.
                    return ReconcileOutcome::None;
                }
                if !self.first_token_seen {
                    self.first_token_seen = true;
                    msg.time_to_first_token_ms =
                        Some(now.duration_since(self.turn_started).as_millis() as u64);
                }
                if let Some(fragment) = content {
                    // Content arrives incrementally: concatenate, never replace.
                    msg.content.push_str(fragment);
                }
                let _ = thought;
                ReconcileOutcome::Updated
            }
            EventKind::ThoughtDuration(secs) => {
                msg.thought_duration = Some(*secs);
                ReconcileOutcome::Updated
            }
            EventKind::TotalDuration(secs) => {
                msg.total_duration_ms = Some((secs * 1000.0) as u64);
                ReconcileOutcome::Updated
            }
            EventKind::Usage(usage) => {
                if usage.prompt_tokens.is_some() {
                    msg.prompt_tokens = usage.prompt_tokens;
                }
                if usage.completion_tokens.is_some() {
                    msg.completion_tokens = usage.completion_tokens;
                }
                if usage.total_tokens.is_some() {
                    msg.total_tokens = usage.total_tokens;
                }
                if usage.tps.is_some() {
                    msg.tps = usage.tps;
                }
                if usage.finish_reason.is_some() {
                    msg.finish_reason = usage.finish_reason.clone();
                }
                ReconcileOutcome::Updated
            }
            EventKind::Citations(citations) => {
                // The server sends the full ordered list each time: replace.
                msg.citations = Some(citations.clone());
                ReconcileOutcome::Updated
            }
            EventKind::StreamError(error) => {
                let line = format!("Error: {}", error);
                if msg.content.is_empty() {
                    msg.content = line;
                } else {
                    msg.content.push_str("\n\n");
                    msg.content.push_str(&line);
                }
                msg.error = Some(error.clone());
                ReconcileOutcome::Errored
            }
            // Task traffic is folded by the task lifecycle machine, not here.
            EventKind::TaskEvent { .. } | EventKind::TaskResult { .. } | EventKind::Unknown => {
                ReconcileOutcome::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatMessage, ChatRole, Citation, UsageUpdate};
    use std::time::Duration;

    fn fresh_turn() -> (Reconciler, Transcript) {
        let mut reconciler = Reconciler::new();
        let mut transcript = Transcript::new();
        transcript.push(ChatMessage::new(ChatRole::User, "hi".to_string()));
        transcript.push(ChatMessage::new(ChatRole::Assistant, String::new()));
        reconciler.begin_turn();
        (reconciler, transcript)
    }

    fn delta(content: &str) -> EventKind {
        EventKind::Delta {
            content: Some(content.to_string()),
            thought: false,
        }
    }

    #[test]
    fn test_content_fragments_concatenate_in_order() {
        let (mut reconciler, mut transcript) = fresh_turn();
        for fragment in ["a", "b", "c"] {
            reconciler.apply(&delta(fragment), &mut transcript);
        }
        assert_eq!(transcript.last().unwrap().content, "abc");
    }

    #[test]
    fn test_first_delta_records_time_to_first_token() {
        let (mut reconciler, mut transcript) = fresh_turn();
        let later = reconciler.turn_started + Duration::from_millis(250);
        reconciler.apply_at(&delta("x"), &mut transcript, later);
        assert_eq!(transcript.last().unwrap().time_to_first_token_ms, Some(250));

        // A second delta must not move it.
        let even_later = reconciler.turn_started + Duration::from_millis(900);
        reconciler.apply_at(&delta("y"), &mut transcript, even_later);
        assert_eq!(transcript.last().unwrap().time_to_first_token_ms, Some(250));
    }

    #[test]
    fn test_thought_only_delta_counts_as_first_token() {
        let (mut reconciler, mut transcript) = fresh_turn();
        let later = reconciler.turn_started + Duration::from_millis(40);
        reconciler.apply_at(
            &EventKind::Delta {
                content: None,
                thought: true,
            },
            &mut transcript,
            later,
        );
        let msg = transcript.last().unwrap();
        assert_eq!(msg.time_to_first_token_ms, Some(40));
        assert_eq!(msg.content, "");
    }

    #[test]
    fn test_chat_id_adoption_signals_history_refresh() {
        let (mut reconciler, mut transcript) = fresh_turn();
        let outcome = reconciler.apply(&EventKind::ChatId("c3".to_string()), &mut transcript);
        assert_eq!(outcome, ReconcileOutcome::ChatIdAssigned);
        assert_eq!(transcript.get(0).unwrap().context_id.as_deref(), Some("c3"));
        assert_eq!(transcript.get(1).unwrap().context_id.as_deref(), Some("c3"));
    }

    #[test]
    fn test_total_duration_converts_seconds_to_millis() {
        let (mut reconciler, mut transcript) = fresh_turn();
        reconciler.apply(&EventKind::TotalDuration(2.5), &mut transcript);
        reconciler.apply(&EventKind::ThoughtDuration(1.25), &mut transcript);
        let msg = transcript.last().unwrap();
        assert_eq!(msg.total_duration_ms, Some(2500));
        // thought_duration stays in seconds, verbatim.
        assert_eq!(msg.thought_duration, Some(1.25));
    }

    #[test]
    fn test_citations_replace_rather_than_append() {
        let (mut reconciler, mut transcript) = fresh_turn();
        let first = vec![Citation {
            path: "a.rs".to_string(),
            start_line: Some(1),
            end_line: Some(4),
            start_page: None,
            end_page: None,
            snippet: None,
        }];
        let second = vec![Citation {
            path: "b.rs".to_string(),
            start_line: None,
            end_line: None,
            start_page: None,
            end_page: None,
            snippet: Some("fn main".to_string()),
        }];
        reconciler.apply(&EventKind::Citations(first), &mut transcript);
        reconciler.apply(&EventKind::Citations(second.clone()), &mut transcript);
        assert_eq!(transcript.last().unwrap().citations.as_ref().unwrap(), &second);
    }

    #[test]
    fn test_usage_merge_applies_all_present_fields() {
        let (mut reconciler, mut transcript) = fresh_turn();
        reconciler.apply(
            &EventKind::Usage(UsageUpdate {
                prompt_tokens: Some(12),
                tps: Some(88.5),
                ..Default::default()
            }),
            &mut transcript,
        );
        let msg = transcript.last().unwrap();
        assert_eq!(msg.prompt_tokens, Some(12));
        assert_eq!(msg.tps, Some(88.5));
        assert_eq!(msg.completion_tokens, None);
    }

    #[test]
    fn test_error_event_ends_accumulation() {
        let (mut reconciler, mut transcript) = fresh_turn();
        reconciler.apply(&delta("partial"), &mut transcript);
        let outcome = reconciler.apply(
            &EventKind::StreamError("backend on fire".to_string()),
            &mut transcript,
        );
        assert_eq!(outcome, ReconcileOutcome::Errored);

        // A straggler delta after the error is a no-op.
        let outcome = reconciler.apply(&delta("straggler"), &mut transcript);
        assert_eq!(outcome, ReconcileOutcome::None);

        let msg = transcript.last().unwrap();
        assert_eq!(msg.content, "partial\n\nError: backend on fire");
        assert_eq!(msg.error.as_deref(), Some("backend on fire"));
    }

    #[test]
    fn test_unknown_event_is_a_noop() {
        let (mut reconciler, mut transcript) = fresh_turn();
        reconciler.apply(&delta("kept"), &mut transcript);
        let outcome = reconciler.apply(&EventKind::Unknown, &mut transcript);
        assert_eq!(outcome, ReconcileOutcome::None);
        assert_eq!(transcript.last().unwrap().content, "kept");
    }
}
