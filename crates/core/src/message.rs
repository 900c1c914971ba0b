//! Reconciled chat messages, the output of the event merger.

use crate::event::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Immutable, shared list of reconciled messages.
///
/// Every merge step that changes anything builds a new list; a step that
/// changes nothing hands back the very same allocation, so consumers can use
/// [`Arc::ptr_eq`] to skip re-rendering.
pub type MessageList = Arc<[ChatMessage]>;

/// Empty message list, the starting point of every session.
pub fn empty_list() -> MessageList {
    Arc::from(Vec::new())
}

/// A reconciled conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Originating `messageId` of the stream events.
    pub id: String,
    pub session_id: String,
    pub role: Role,
    /// Arrival order is significant.
    #[serde(default)]
    pub content: Vec<ContentPart>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub read: bool,
}

impl ChatMessage {
    /// Placeholder for a message whose first observed event is not its start.
    pub fn placeholder(
        id: impl Into<String>,
        session_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            role: Role::Assistant,
            content: Vec::new(),
            created_at,
            is_streaming: true,
            delivered: false,
            read: false,
        }
    }

    /// Append a text fragment, extending a trailing text part when there is one.
    pub fn push_text(&mut self, delta: &str) {
        match self.content.last_mut() {
            Some(ContentPart::Text { text }) => text.push_str(delta),
            _ => self.content.push(ContentPart::Text {
                text: delta.to_string(),
            }),
        }
    }

    pub fn finish(&mut self) {
        self.is_streaming = false;
        self.delivered = true;
        self.read = true;
    }

    /// Concatenated text of every text part.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// One display unit inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolUse {
        tool_call_id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_text_extends_trailing_text() {
        let mut msg = ChatMessage::placeholder("m1", "s1", Utc::now());
        msg.push_text("Hello");
        msg.push_text(" world");
        assert_eq!(
            msg.content,
            vec![ContentPart::Text {
                text: "Hello world".to_string()
            }]
        );
    }

    #[test]
    fn test_push_text_after_tool_use_starts_new_part() {
        let mut msg = ChatMessage::placeholder("m1", "s1", Utc::now());
        msg.push_text("Reading");
        msg.content.push(ContentPart::ToolUse {
            tool_call_id: "t1".to_string(),
            name: "read_files".to_string(),
            input: Value::Null,
        });
        msg.push_text("Done");
        assert_eq!(msg.content.len(), 3);
        assert_eq!(msg.text(), "ReadingDone");
    }

    #[test]
    fn test_content_part_wire_shape() {
        let part = ContentPart::ToolResult {
            tool_use_id: "t1".to_string(),
            content: serde_json::json!({"ok": true}),
            is_error: false,
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["toolUseId"], "t1");
        assert_eq!(json["isError"], false);
    }
}
