//! Tool call / tool result pairing for display.

use crate::event::{EventKind, TimelineEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// A tool call unified with its outcome. `result` is `None` while pending.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInteraction {
    pub id: String,
    pub call: TimelineEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TimelineEvent>,
}

impl ToolInteraction {
    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// One row of the display timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entry", content = "data", rename_all = "snake_case")]
pub enum TimelineEntry {
    Event(TimelineEvent),
    ToolInteraction(ToolInteraction),
}

impl TimelineEntry {
    pub fn as_interaction(&self) -> Option<&ToolInteraction> {
        match self {
            Self::ToolInteraction(interaction) => Some(interaction),
            Self::Event(_) => None,
        }
    }
}

fn tool_call_id(event: &TimelineEvent) -> Option<&str> {
    match &event.kind {
        EventKind::ToolCall { tool_call } => Some(&tool_call.tool_call_id),
        _ => None,
    }
}

fn tool_result_id(event: &TimelineEvent) -> Option<&str> {
    match &event.kind {
        EventKind::ToolResult { tool_result } => Some(&tool_result.tool_call_id),
        _ => None,
    }
}

/// Replace every tool call with a [`ToolInteraction`] at the call's position.
///
/// A call is paired with the first later result carrying the same
/// `toolCallId`. Results are never emitted on their own: a result with no
/// earlier call is dropped.
pub fn pair_tool_events(events: &[TimelineEvent]) -> Vec<TimelineEntry> {
    let mut results: HashMap<&str, VecDeque<usize>> = HashMap::new();
    for (index, event) in events.iter().enumerate() {
        if let Some(id) = tool_result_id(event) {
            results.entry(id).or_default().push_back(index);
        }
    }

    let mut out = Vec::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        if let Some(id) = tool_call_id(event) {
            let result = results.get_mut(id).and_then(|queue| {
                while queue.front().is_some_and(|&r| r < index) {
                    if let Some(orphan) = queue.pop_front() {
                        trace!(event_id = %events[orphan].id, "tool result precedes its call");
                    }
                }
                queue.pop_front()
            });
            out.push(TimelineEntry::ToolInteraction(ToolInteraction {
                id: event.id.clone(),
                call: event.clone(),
                result: result.map(|r| events[r].clone()),
            }));
        } else if tool_result_id(event).is_none() {
            out.push(TimelineEntry::Event(event.clone()));
        }
    }

    out
}

/// Decode raw transport values and pair them; entries that fail to decode,
/// malformed tool calls and results included, are dropped silently.
pub fn pair_raw_tool_events(values: &[Value]) -> Vec<TimelineEntry> {
    let events: Vec<TimelineEvent> = values
        .iter()
        .filter_map(|value| match TimelineEvent::from_value(value) {
            Ok(event) => Some(event),
            Err(reason) => {
                trace!("dropping timeline entry: {reason}");
                None
            }
        })
        .collect();
    pair_tool_events(&events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::json;

    #[test]
    fn test_call_and_result_pair() {
        let call = testing::tool_call("e1", "m1", "t1", "read_files");
        let result = testing::tool_result("e2", "m1", "t1", true);
        let out = pair_tool_events(&[call.clone(), result.clone()]);

        assert_eq!(out.len(), 1);
        let interaction = out[0].as_interaction().unwrap();
        assert_eq!(interaction.id, "e1");
        assert_eq!(interaction.call, call);
        assert_eq!(interaction.result.as_ref(), Some(&result));
    }

    #[test]
    fn test_call_without_result_is_pending() {
        let out = pair_tool_events(&[testing::tool_call("e1", "m1", "t1", "read_files")]);
        assert_eq!(out.len(), 1);
        assert!(out[0].as_interaction().unwrap().is_pending());
    }

    #[test]
    fn test_result_without_call_id_yields_nothing() {
        let out = pair_raw_tool_events(&[json!({
            "type": "tool_result",
            "id": "e1",
            "sessionId": "s1",
            "messageId": "m1",
            "toolResult": {"success": true}
        })]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_malformed_call_is_dropped() {
        let out = pair_raw_tool_events(&[
            json!({"type": "tool_call", "id": "e1", "sessionId": "s1", "messageId": "m1"}),
            json!({"type": "chunk", "id": "e2", "sessionId": "s1", "messageId": "m1", "delta": "hi"}),
        ]);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], TimelineEntry::Event(e) if e.id == "e2"));
    }

    #[test]
    fn test_non_tool_events_keep_order_around_interaction() {
        let events = vec![
            testing::chunk("e1", "m1", "Let me look"),
            testing::tool_call("e2", "m1", "t1", "grep"),
            testing::chunk("e3", "m1", "Searching"),
            testing::tool_result("e4", "m1", "t1", false),
            testing::done("e5", "m1"),
        ];
        let out = pair_tool_events(&events);
        let ids: Vec<&str> = out
            .iter()
            .map(|entry| match entry {
                TimelineEntry::Event(e) => e.id.as_str(),
                TimelineEntry::ToolInteraction(i) => i.id.as_str(),
            })
            .collect();
        assert_eq!(ids, vec!["e1", "e2", "e3", "e5"]);
        assert!(!out[1].as_interaction().unwrap().is_pending());
    }

    #[test]
    fn test_result_before_call_is_not_paired() {
        let out = pair_tool_events(&[
            testing::tool_result("e1", "m1", "t1", true),
            testing::tool_call("e2", "m1", "t1", "grep"),
        ]);
        assert_eq!(out.len(), 1);
        assert!(out[0].as_interaction().unwrap().is_pending());
    }

    #[test]
    fn test_repeated_call_ids_pair_in_order() {
        let out = pair_tool_events(&[
            testing::tool_call("e1", "m1", "t1", "grep"),
            testing::tool_result("e2", "m1", "t1", true),
            testing::tool_call("e3", "m2", "t1", "grep"),
            testing::tool_result("e4", "m2", "t1", false),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].as_interaction().unwrap().result.as_ref().unwrap().id,
            "e2"
        );
        assert_eq!(
            out[1].as_interaction().unwrap().result.as_ref().unwrap().id,
            "e4"
        );
    }

    #[test]
    fn test_interaction_serializes_with_entry_tag() {
        let out = pair_tool_events(&[testing::tool_call("e1", "m1", "t1", "grep")]);
        let json = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(json["entry"], "tool_interaction");
        assert_eq!(json["data"]["id"], "e1");
        assert!(json["data"].get("result").is_none());
    }
}
