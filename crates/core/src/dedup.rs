//! Correlation and deduplication registry.
//!
//! Remembers which events have already been applied to a session's message
//! list so that re-delivery over the stream is a no-op. The registry never
//! expires entries on its own; the owning session clears it at teardown.

use crate::event::{EventKind, TimelineEvent};
use std::collections::HashSet;
use std::fmt;

/// Derived identity of a logical event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(String);

impl DedupKey {
    /// Key for a dedup-eligible event, `None` for kinds that must always apply
    /// (text fragments and completion signals).
    pub fn for_event(event: &TimelineEvent) -> Option<Self> {
        match &event.kind {
            EventKind::Chunk { .. } | EventKind::Token { .. } | EventKind::Completion => None,
            EventKind::ToolCall { tool_call } => {
                Some(Self(format!("tool_call:{}", tool_call.tool_call_id)))
            }
            EventKind::ToolResult { tool_result } => {
                Some(Self(format!("tool_result:{}", tool_result.tool_call_id)))
            }
            EventKind::Done => Some(Self(format!("{}:{}", event.id, event.kind.name()))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DedupKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Set of already-applied dedup keys for one session.
#[derive(Debug, Clone, Default)]
pub struct DedupRegistry {
    seen: HashSet<DedupKey>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    pub fn remember(&mut self, key: DedupKey) {
        self.seen.insert(key);
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
