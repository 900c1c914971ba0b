//! Display-side post-processing of accepted events.

use crate::event::{EventKind, TimelineEvent};
use crate::message::ChatMessage;
use std::collections::HashMap;

/// Fold runs of adjacent text fragments for the same message into one event.
///
/// The folded event keeps the header (id, timestamps, kind) of the first
/// fragment of the run and sits at its position. Every other event passes
/// through unchanged.
pub fn consolidate_chunks(events: &[TimelineEvent]) -> Vec<TimelineEvent> {
    let mut out: Vec<TimelineEvent> = Vec::with_capacity(events.len());

    for event in events {
        let Some(delta) = event.kind.delta() else {
            out.push(event.clone());
            continue;
        };

        if let Some(last) = out.last_mut() {
            if last.message_id == event.message_id {
                if let EventKind::Chunk { delta: text } | EventKind::Token { delta: text } =
                    &mut last.kind
                {
                    text.push_str(delta);
                    continue;
                }
            }
        }
        out.push(event.clone());
    }

    out
}

/// Whether replaying `events` would leave any message in the streaming state.
///
/// Mirrors the merger's flag rules without building messages: a text fragment
/// marks its message streaming, a tool event creates a streaming message when
/// none exists yet, `Done` settles its message and a completion signal
/// settles all of them.
pub fn has_streaming_events(events: &[TimelineEvent]) -> bool {
    let mut streaming: HashMap<&str, bool> = HashMap::new();

    for event in events {
        match (&event.kind, event.message_id()) {
            (EventKind::Completion, _) => streaming.values_mut().for_each(|s| *s = false),
            (_, None) => {}
            (EventKind::Chunk { .. } | EventKind::Token { .. }, Some(id)) => {
                streaming.insert(id, true);
            }
            (EventKind::ToolCall { .. } | EventKind::ToolResult { .. }, Some(id)) => {
                streaming.entry(id).or_insert(true);
            }
            (EventKind::Done, Some(id)) => {
                if let Some(flag) = streaming.get_mut(id) {
                    *flag = false;
                }
            }
        }
    }

    streaming.values().any(|s| *s)
}

/// Whether any already-merged message is still streaming.
pub fn has_streaming_messages(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| m.is_streaming)
}
