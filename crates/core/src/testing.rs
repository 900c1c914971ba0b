use crate::event::{EventKind, EventSource, Role, TimelineEvent, ToolCall, ToolResult};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Session id used by every builder.
pub const SESSION_ID: &str = "s1";

/// Fixed timestamp so snapshots compare equal across runs.
pub fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Event with arbitrary [`EventKind`].
pub fn event(id: &str, message_id: Option<&str>, kind: EventKind) -> TimelineEvent {
    TimelineEvent {
        id: id.to_string(),
        session_id: SESSION_ID.to_string(),
        message_id: message_id.map(String::from),
        role: Role::Assistant,
        created_at: ts(),
        source: EventSource::Stream,
        kind,
    }
}

pub fn chunk(id: &str, message_id: &str, delta: &str) -> TimelineEvent {
    event(
        id,
        Some(message_id),
        EventKind::Chunk {
            delta: delta.to_string(),
        },
    )
}

pub fn token(id: &str, message_id: &str, delta: &str) -> TimelineEvent {
    event(
        id,
        Some(message_id),
        EventKind::Token {
            delta: delta.to_string(),
        },
    )
}

/// Chunk with an auto-generated event id.
pub fn fresh_chunk(message_id: &str, delta: &str) -> TimelineEvent {
    chunk(&format!("test-{}", next_id()), message_id, delta)
}

pub fn tool_call(id: &str, message_id: &str, tool_call_id: &str, name: &str) -> TimelineEvent {
    event(
        id,
        Some(message_id),
        EventKind::ToolCall {
            tool_call: ToolCall {
                tool_call_id: tool_call_id.to_string(),
                name: name.to_string(),
                arguments: Value::Null,
            },
        },
    )
}

pub fn tool_result(id: &str, message_id: &str, tool_call_id: &str, success: bool) -> TimelineEvent {
    event(
        id,
        Some(message_id),
        EventKind::ToolResult {
            tool_result: ToolResult {
                tool_call_id: tool_call_id.to_string(),
                success,
                payload: Value::Null,
            },
        },
    )
}

pub fn done(id: &str, message_id: &str) -> TimelineEvent {
    event(id, Some(message_id), EventKind::Done)
}

pub fn completion(id: &str, message_id: Option<&str>) -> TimelineEvent {
    event(id, message_id, EventKind::Completion)
}

fn next_id() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
