//! Timeline events as delivered by the live stream.
//!
//! Decoding is two-step: a JSON value is first read into the tolerant
//! [`RawEvent`] shape, where every field is optional, and then checked into a
//! typed [`TimelineEvent`]. The check never fails loudly: anything that cannot
//! become a timeline event comes back as a [`Discarded`] reason so callers can
//! count it and move on.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Author of a message or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Normalize cross-provider role labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Self::User),
            "assistant" | "agent" | "model" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// Where an event came from: the live push stream or a canonical backfill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    #[default]
    Stream,
    Backfill,
}

/// An agent-initiated tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// The outcome of a prior [`ToolCall`], correlated by `tool_call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub success: bool,
    #[serde(default)]
    pub payload: Value,
}

/// Kind-specific payload of a [`TimelineEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventKind {
    Chunk { delta: String },
    Token { delta: String },
    ToolCall { tool_call: ToolCall },
    ToolResult { tool_result: ToolResult },
    Done,
    Completion,
}

impl EventKind {
    /// Wire name of the kind, also used in dedup keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Token { .. } => "token",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done => "done",
            Self::Completion => "completion",
        }
    }

    /// Text fragment carried by `Chunk`/`Token`.
    pub fn delta(&self) -> Option<&str> {
        match self {
            Self::Chunk { delta } | Self::Token { delta } => Some(delta),
            _ => None,
        }
    }
}

/// One atomic unit received from the live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: EventSource,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl TimelineEvent {
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Decode a JSON value received from the transport.
    pub fn from_value(value: &Value) -> Result<Self, Discarded> {
        let raw: RawEvent = serde_json::from_value(value.clone())
            .map_err(|e| Discarded::Undecodable(e.to_string()))?;
        raw.parse()
    }

    /// Decode one line of stream text.
    pub fn from_json_str(line: &str) -> Result<Self, Discarded> {
        let raw: RawEvent =
            serde_json::from_str(line).map_err(|e| Discarded::Undecodable(e.to_string()))?;
        raw.parse()
    }
}

/// Why a raw event never became a [`TimelineEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Discarded {
    #[error("undecodable event: {0}")]
    Undecodable(String),
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("{kind} event without its payload")]
    MissingPayload { kind: &'static str },
    #[error("invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Loosely-typed wire shape of an event. Every field is optional so that a
/// half-formed payload still deserializes and can be rejected with a reason.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    pub session_id: Option<String>,
    pub message_id: Option<String>,
    pub role: Option<String>,
    pub created_at: Option<Value>,
    pub source: Option<String>,
    pub delta: Option<String>,
    pub tool_call: Option<RawToolCall>,
    pub tool_result: Option<RawToolResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawToolCall {
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawToolResult {
    pub tool_call_id: Option<String>,
    pub success: Option<bool>,
    pub payload: Option<Value>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl RawEvent {
    /// Check the raw shape into a typed event.
    pub fn parse(self) -> Result<TimelineEvent, Discarded> {
        let kind_name = self
            .kind
            .ok_or_else(|| Discarded::Undecodable("missing `type` discriminant".to_string()))?;

        let kind = match kind_name.as_str() {
            "chunk" => EventKind::Chunk {
                delta: self.delta.ok_or(Discarded::MissingPayload { kind: "chunk" })?,
            },
            "token" => EventKind::Token {
                delta: self.delta.ok_or(Discarded::MissingPayload { kind: "token" })?,
            },
            "tool_call" => EventKind::ToolCall {
                tool_call: parse_tool_call(self.tool_call)?,
            },
            "tool_result" => EventKind::ToolResult {
                tool_result: parse_tool_result(self.tool_result)?,
            },
            "done" => EventKind::Done,
            "completion" => EventKind::Completion,
            _ => return Err(Discarded::UnknownKind(kind_name)),
        };

        let id = non_empty(self.id).ok_or(Discarded::MissingField("id"))?;
        let session_id = non_empty(self.session_id).ok_or(Discarded::MissingField("sessionId"))?;
        let message_id = non_empty(self.message_id);
        if matches!(kind, EventKind::Done) && message_id.is_none() {
            return Err(Discarded::MissingField("messageId"));
        }

        let role = match self.role {
            None => Role::Assistant,
            Some(label) => Role::from_label(&label).ok_or(Discarded::InvalidField {
                field: "role",
                value: label,
            })?,
        };

        let source = match self.source.as_deref() {
            None | Some("stream") => EventSource::Stream,
            Some("backfill") => EventSource::Backfill,
            Some(other) => {
                return Err(Discarded::InvalidField {
                    field: "source",
                    value: other.to_string(),
                });
            }
        };

        let created_at = match self.created_at {
            None | Some(Value::Null) => Utc::now(),
            Some(value) => parse_timestamp(&value).ok_or(Discarded::InvalidField {
                field: "createdAt",
                value: value.to_string(),
            })?,
        };

        Ok(TimelineEvent {
            id,
            session_id,
            message_id,
            role,
            created_at,
            source,
            kind,
        })
    }
}

fn parse_tool_call(raw: Option<RawToolCall>) -> Result<ToolCall, Discarded> {
    let missing = Discarded::MissingPayload { kind: "tool_call" };
    let raw = raw.ok_or_else(|| missing.clone())?;
    Ok(ToolCall {
        tool_call_id: non_empty(raw.tool_call_id).ok_or_else(|| missing.clone())?,
        name: non_empty(raw.name).ok_or(missing)?,
        arguments: raw.arguments.unwrap_or(Value::Null),
    })
}

fn parse_tool_result(raw: Option<RawToolResult>) -> Result<ToolResult, Discarded> {
    let missing = Discarded::MissingPayload {
        kind: "tool_result",
    };
    let raw = raw.ok_or_else(|| missing.clone())?;
    Ok(ToolResult {
        tool_call_id: non_empty(raw.tool_call_id).ok_or(missing)?,
        success: raw.success.unwrap_or(true),
        payload: raw.payload.unwrap_or(Value::Null),
    })
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
