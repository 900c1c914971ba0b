//! The event merger: folds one timeline event into the current message list.
//!
//! The merger never fails. Events it cannot use (no message id, duplicates,
//! `Done` for a message that does not exist yet, undecodable payloads) leave
//! the list untouched and are reported through [`MergeOutcome::Skipped`].

use crate::dedup::{DedupKey, DedupRegistry};
use crate::event::{Discarded, EventKind, TimelineEvent};
use crate::message::{ChatMessage, ContentPart, MessageList};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Receiver of the session-level "agent is idle" notification.
pub trait SessionStatus {
    fn mark_idle(&mut self, session_id: &str);
}

impl<F> SessionStatus for F
where
    F: FnMut(&str),
{
    fn mark_idle(&mut self, session_id: &str) {
        self(session_id)
    }
}

/// Status collaborator that ignores idle notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl SessionStatus for Detached {
    fn mark_idle(&mut self, _session_id: &str) {}
}

/// Status collaborator that keeps every idle notification, in order.
#[derive(Debug, Clone, Default)]
pub struct IdleLog {
    pub sessions: Vec<String>,
}

impl SessionStatus for IdleLog {
    fn mark_idle(&mut self, session_id: &str) {
        self.sessions.push(session_id.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A non-completion event without `messageId`.
    MissingMessageId,
    /// Dedup-eligible event whose key was already applied.
    Duplicate(DedupKey),
    /// `Done` for a message that has not been materialized.
    UnknownMessage(String),
    /// Raw input that never decoded into a timeline event.
    Discarded(Discarded),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    Skipped(SkipReason),
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Result of one merge step.
#[derive(Debug, Clone)]
pub struct Merged {
    pub messages: MessageList,
    pub outcome: MergeOutcome,
}

impl Merged {
    fn skipped(prior: &MessageList, reason: SkipReason) -> Self {
        Self {
            messages: Arc::clone(prior),
            outcome: MergeOutcome::Skipped(reason),
        }
    }
}

/// Reducer from timeline events to messages.
///
/// Owns the dedup registry of the session it serves; reset it whenever the
/// session changes.
#[derive(Debug)]
pub struct EventMerger<S> {
    registry: DedupRegistry,
    status: S,
}

impl Default for EventMerger<Detached> {
    fn default() -> Self {
        Self::new(Detached)
    }
}

impl<S: SessionStatus> EventMerger<S> {
    pub fn new(status: S) -> Self {
        Self::with_registry(DedupRegistry::new(), status)
    }

    pub fn with_registry(registry: DedupRegistry, status: S) -> Self {
        Self { registry, status }
    }

    pub fn registry(&self) -> &DedupRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DedupRegistry {
        &mut self.registry
    }

    pub fn status(&self) -> &S {
        &self.status
    }

    /// Forget every applied key.
    pub fn reset(&mut self) {
        self.registry.clear();
    }

    /// Decode a raw transport value and merge it; undecodable input is a no-op.
    pub fn merge_raw(&mut self, raw: &Value, prior: &MessageList) -> Merged {
        match TimelineEvent::from_value(raw) {
            Ok(event) => self.merge(&event, prior),
            Err(reason) => {
                debug!("discarding stream event: {reason}");
                Merged::skipped(prior, SkipReason::Discarded(reason))
            }
        }
    }

    /// Apply one event to `prior` and return the next list.
    pub fn merge(&mut self, event: &TimelineEvent, prior: &MessageList) -> Merged {
        if matches!(event.kind, EventKind::Completion) {
            return self.complete(event, prior);
        }

        let Some(message_id) = event.message_id() else {
            trace!(event_id = %event.id, "event without messageId ignored");
            return Merged::skipped(prior, SkipReason::MissingMessageId);
        };

        let key = DedupKey::for_event(event);
        if let Some(key) = &key {
            if self.registry.has(key) {
                trace!(%key, "duplicate event ignored");
                return Merged::skipped(prior, SkipReason::Duplicate(key.clone()));
            }
        }

        let mut next = prior.to_vec();
        match &event.kind {
            EventKind::Chunk { delta } | EventKind::Token { delta } => {
                let message = ensure_message(&mut next, message_id, event);
                message.push_text(delta);
                message.is_streaming = true;
            }
            EventKind::ToolCall { tool_call } => {
                ensure_message(&mut next, message_id, event)
                    .content
                    .push(ContentPart::ToolUse {
                        tool_call_id: tool_call.tool_call_id.clone(),
                        name: tool_call.name.clone(),
                        input: tool_call.arguments.clone(),
                    });
            }
            EventKind::ToolResult { tool_result } => {
                ensure_message(&mut next, message_id, event)
                    .content
                    .push(ContentPart::ToolResult {
                        tool_use_id: tool_result.tool_call_id.clone(),
                        content: tool_result.payload.clone(),
                        is_error: !tool_result.success,
                    });
            }
            EventKind::Done => match next.iter_mut().find(|m| m.id == message_id) {
                Some(message) => message.finish(),
                None => {
                    trace!(message_id, "done for unknown message ignored");
                    return Merged::skipped(
                        prior,
                        SkipReason::UnknownMessage(message_id.to_string()),
                    );
                }
            },
            EventKind::Completion => return self.complete(event, prior),
        }

        if let Some(key) = key {
            self.registry.remember(key);
        }

        Merged {
            messages: Arc::from(next),
            outcome: MergeOutcome::Applied,
        }
    }

    /// Completion signals are never deduplicated: repeated idle signals are
    /// harmless, and each one sweeps stale streaming flags.
    fn complete(&mut self, event: &TimelineEvent, prior: &MessageList) -> Merged {
        let target = event.message_id();
        let needs_update = prior.iter().any(|m| {
            m.is_streaming || (Some(m.id.as_str()) == target && !(m.delivered && m.read))
        });

        let messages = if needs_update {
            let mut next = prior.to_vec();
            for message in &mut next {
                if Some(message.id.as_str()) == target {
                    message.finish();
                }
                message.is_streaming = false;
            }
            Arc::from(next)
        } else {
            Arc::clone(prior)
        };

        debug!(session_id = %event.session_id, "session idle");
        self.status.mark_idle(&event.session_id);

        Merged {
            messages,
            outcome: MergeOutcome::Applied,
        }
    }
}

/// Find the message for `message_id`, creating a streaming assistant
/// placeholder when the event is the first one seen for it.
pub fn ensure_message<'a>(
    messages: &'a mut Vec<ChatMessage>,
    message_id: &str,
    event: &TimelineEvent,
) -> &'a mut ChatMessage {
    let index = match messages.iter().position(|m| m.id == message_id) {
        Some(index) => index,
        None => {
            messages.push(ChatMessage::placeholder(
                message_id,
                event.session_id.as_str(),
                event.created_at,
            ));
            messages.len() - 1
        }
    };
    &mut messages[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Role;
    use crate::message::empty_list;
    use crate::testing;
    use serde_json::json;

    fn apply(merger: &mut EventMerger<impl SessionStatus>, events: &[TimelineEvent]) -> MessageList {
        events
            .iter()
            .fold(empty_list(), |list, event| merger.merge(event, &list).messages)
    }

    #[test]
    fn test_chunks_append_to_one_text_part() {
        let mut merger = EventMerger::default();
        let list = apply(
            &mut merger,
            &[
                testing::chunk("e1", "m1", "Hello"),
                testing::chunk("e2", "m1", " world"),
            ],
        );
        assert_eq!(list.len(), 1);
        assert_eq!(
            list[0].content,
            vec![ContentPart::Text {
                text: "Hello world".to_string()
            }]
        );
        assert!(list[0].is_streaming);
    }

    #[test]
    fn test_token_and_chunk_share_text_part() {
        let mut merger = EventMerger::default();
        let list = apply(
            &mut merger,
            &[
                testing::token("e1", "m1", "a"),
                testing::chunk("e2", "m1", "b"),
            ],
        );
        assert_eq!(list[0].text(), "ab");
        assert_eq!(list[0].content.len(), 1);
    }

    #[test]
    fn test_placeholder_created_lazily() {
        let mut merger = EventMerger::default();
        let list = apply(
            &mut merger,
            &[testing::tool_call("e1", "m9", "t1", "read_files")],
        );
        let msg = &list[0];
        assert_eq!(msg.id, "m9");
        assert_eq!(msg.session_id, testing::SESSION_ID);
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.is_streaming);
        assert!(!msg.delivered);
        assert!(!msg.read);
    }

    #[test]
    fn test_tool_round_trip() {
        let mut merger = EventMerger::default();
        let list = apply(
            &mut merger,
            &[
                testing::tool_call("e1", "m1", "t1", "read_files"),
                testing::tool_result("e2", "m1", "t1", true),
            ],
        );
        assert_eq!(list[0].content.len(), 2);
        assert!(matches!(
            &list[0].content[0],
            ContentPart::ToolUse { tool_call_id, .. } if tool_call_id == "t1"
        ));
        assert!(matches!(
            &list[0].content[1],
            ContentPart::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "t1"
        ));
    }

    #[test]
    fn test_failed_tool_result_is_error() {
        let mut merger = EventMerger::default();
        let list = apply(&mut merger, &[testing::tool_result("e1", "m1", "t1", false)]);
        assert!(matches!(
            &list[0].content[0],
            ContentPart::ToolResult { is_error: true, .. }
        ));
    }

    #[test]
    fn test_duplicate_tool_call_is_idempotent() {
        let mut merger = EventMerger::default();
        let call = testing::tool_call("e1", "m1", "t1", "read_files");
        let once = merger.merge(&call, &empty_list());
        let twice = merger.merge(&call, &once.messages);

        assert_eq!(once.messages, twice.messages);
        assert!(Arc::ptr_eq(&once.messages, &twice.messages));
        assert_eq!(
            twice.outcome,
            MergeOutcome::Skipped(SkipReason::Duplicate(DedupKey::from("tool_call:t1")))
        );
    }

    #[test]
    fn test_duplicate_tool_result_is_idempotent() {
        let mut merger = EventMerger::default();
        let call = merger.merge(&testing::tool_call("e1", "m1", "t1", "grep"), &empty_list());
        let result = testing::tool_result("e2", "m1", "t1", true);
        let once = merger.merge(&result, &call.messages);
        let twice = merger.merge(&testing::tool_result("e3", "m1", "t1", true), &once.messages);

        assert!(Arc::ptr_eq(&once.messages, &twice.messages));
        assert_eq!(twice.messages[0].content.len(), 2);
        assert_eq!(
            twice.outcome,
            MergeOutcome::Skipped(SkipReason::Duplicate(DedupKey::from("tool_result:t1")))
        );
    }

    #[test]
    fn test_redelivered_done_is_idempotent() {
        let mut merger = EventMerger::default();
        let started = merger.merge(&testing::chunk("e1", "m1", "hi"), &empty_list());
        let done = testing::done("e2", "m1");
        let once = merger.merge(&done, &started.messages);
        let twice = merger.merge(&done, &once.messages);

        assert!(once.outcome.is_applied());
        assert!(Arc::ptr_eq(&once.messages, &twice.messages));
        assert_eq!(
            twice.outcome,
            MergeOutcome::Skipped(SkipReason::Duplicate(DedupKey::from("e2:done")))
        );
    }

    #[test]
    fn test_redelivered_tool_call_with_new_event_id_is_duplicate() {
        let mut merger = EventMerger::default();
        let list = apply(
            &mut merger,
            &[
                testing::tool_call("e1", "m1", "t1", "read_files"),
                testing::tool_call("e7", "m1", "t1", "read_files"),
            ],
        );
        assert_eq!(list[0].content.len(), 1);
    }

    #[test]
    fn test_chunks_are_never_deduplicated() {
        let mut merger = EventMerger::default();
        let chunk = testing::chunk("e1", "m1", "ha");
        let list = apply(&mut merger, &[chunk.clone(), chunk]);
        assert_eq!(list[0].text(), "haha");
    }

    #[test]
    fn test_missing_message_id_is_noop() {
        let mut merger = EventMerger::default();
        let prior = apply(&mut merger, &[testing::chunk("e1", "m1", "x")]);
        let orphan = testing::event(
            "e2",
            None,
            EventKind::Chunk {
                delta: "y".to_string(),
            },
        );
        let merged = merger.merge(&orphan, &prior);
        assert!(Arc::ptr_eq(&prior, &merged.messages));
        assert_eq!(
            merged.outcome,
            MergeOutcome::Skipped(SkipReason::MissingMessageId)
        );
    }

    #[test]
    fn test_malformed_raw_event_leaves_list_untouched() {
        let mut merger = EventMerger::default();
        let prior = apply(&mut merger, &[testing::chunk("e1", "m1", "x")]);
        let raw = json!({"type": "chunk", "id": "e2", "sessionId": "s1", "messageId": "m1"});
        let merged = merger.merge_raw(&raw, &prior);
        assert!(Arc::ptr_eq(&prior, &merged.messages));
        assert!(matches!(
            merged.outcome,
            MergeOutcome::Skipped(SkipReason::Discarded(Discarded::MissingPayload { .. }))
        ));
    }

    #[test]
    fn test_done_finishes_message() {
        let mut merger = EventMerger::default();
        let list = apply(
            &mut merger,
            &[testing::chunk("e1", "m1", "hi"), testing::done("e2", "m1")],
        );
        assert!(!list[0].is_streaming);
        assert!(list[0].delivered);
        assert!(list[0].read);
    }

    #[test]
    fn test_done_for_unknown_message_is_not_remembered() {
        let mut merger = EventMerger::default();
        let done = testing::done("e2", "m1");
        let early = merger.merge(&done, &empty_list());
        assert!(early.messages.is_empty());
        assert_eq!(
            early.outcome,
            MergeOutcome::Skipped(SkipReason::UnknownMessage("m1".to_string()))
        );

        let list = merger.merge(&testing::chunk("e1", "m1", "hi"), &early.messages);
        let late = merger.merge(&done, &list.messages);
        assert!(late.outcome.is_applied());
        assert!(late.messages[0].delivered);
    }

    #[test]
    fn test_completion_clears_every_streaming_flag() {
        let mut merger = EventMerger::default();
        let list = apply(
            &mut merger,
            &[
                testing::chunk("e1", "m1", "a"),
                testing::chunk("e2", "m2", "b"),
                testing::tool_call("e3", "m3", "t1", "grep"),
            ],
        );
        assert!(list.iter().all(|m| m.is_streaming));

        let merged = merger.merge(&testing::completion("e4", Some("m2")), &list);
        assert!(merged.messages.iter().all(|m| !m.is_streaming));
        assert!(merged.messages[1].delivered);
        assert!(!merged.messages[0].delivered);
    }

    #[test]
    fn test_completion_notifies_status_every_time() {
        let mut merger = EventMerger::new(IdleLog::default());
        let completion = testing::completion("e1", None);
        let first = merger.merge(&completion, &empty_list());
        let second = merger.merge(&completion, &first.messages);

        assert!(second.outcome.is_applied());
        assert!(Arc::ptr_eq(&first.messages, &second.messages));
        assert_eq!(merger.status().sessions, vec!["s1", "s1"]);
    }

    #[test]
    fn test_closure_status_collaborator() {
        let mut idle = 0;
        {
            let mut merger = EventMerger::new(|_: &str| idle += 1);
            merger.merge(&testing::completion("e1", None), &empty_list());
        }
        assert_eq!(idle, 1);
    }

    #[test]
    fn test_reset_forgets_applied_keys() {
        let mut merger = EventMerger::default();
        let call = testing::tool_call("e1", "m1", "t1", "read_files");
        merger.merge(&call, &empty_list());
        assert_eq!(merger.registry().len(), 1);

        merger.reset();
        let merged = merger.merge(&call, &empty_list());
        assert!(merged.outcome.is_applied());
    }
}
