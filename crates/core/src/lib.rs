//! Timeline reconciliation for live AI-agent conversations.
//!
//! Stream events are decoded into [`TimelineEvent`]s, folded into an
//! append-only [`ChatMessage`] list by the [`EventMerger`], and post-processed
//! for display by the consolidator and the tool pairer. The tap store and
//! differ capture the same events at several pipeline stages and report where
//! their representations drift apart.

pub mod consolidate;
pub mod dedup;
pub mod diff;
pub mod event;
pub mod merge;
pub mod message;
pub mod pairing;
pub mod session;
pub mod stream;
pub mod tap;

pub use consolidate::{consolidate_chunks, has_streaming_events, has_streaming_messages};
pub use dedup::{DedupKey, DedupRegistry};
pub use diff::{diff_values, find_mismatches, DiffEntry, DiffMode, Mismatch};
pub use event::{Discarded, EventKind, EventSource, RawEvent, Role, TimelineEvent, ToolCall, ToolResult};
pub use merge::{EventMerger, MergeOutcome, Merged, SessionStatus, SkipReason};
pub use message::{ChatMessage, ContentPart, MessageList};
pub use pairing::{pair_raw_tool_events, pair_tool_events, TimelineEntry, ToolInteraction};
pub use session::{LiveSession, MergeStats};
pub use tap::{message_key, TapLayer, TapRecord, TapSnapshot, TapStore, TapSummary};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
