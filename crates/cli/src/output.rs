use std::io::Write;

use anyhow::Result;
use serde::Serialize;
use tidemark_core::{
    ChatMessage, ContentPart, EventKind, MergeStats, Mismatch, TimelineEntry, TimelineEvent,
};

/// Output format for replay and diff results.
#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Single pretty-printed JSON document
    Json,
    /// NDJSON stream: each line is an independent JSON envelope
    Jsonl,
    Text,
}

/// Structured output envelope for line-oriented output.
#[derive(Debug, Serialize)]
pub struct OutputEnvelope {
    pub version: &'static str,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(rename = "@message")]
    pub message: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl OutputEnvelope {
    pub fn new(data_type: &str, message: &str, data: serde_json::Value) -> Self {
        Self {
            version: "0.1",
            data_type: data_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }
}

/// Everything a replay produces.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub stats: MergeStats,
    /// Whether any reconciled message is still streaming.
    pub streaming: bool,
    pub idle_signals: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Vec<TimelineEntry>>,
    pub mismatches: Vec<Mismatch>,
}

pub fn render_replay(
    report: &ReplayReport,
    format: OutputFormat,
    writer: &mut dyn Write,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report)?;
            writeln!(writer, "{json}")?;
        }
        OutputFormat::Jsonl => {
            let mut envelopes = Vec::new();
            for message in report.messages.iter().flatten() {
                envelopes.push(OutputEnvelope::new(
                    "message",
                    &format!("message {}", message.id),
                    serde_json::to_value(message)?,
                ));
            }
            for entry in report.timeline.iter().flatten() {
                envelopes.push(OutputEnvelope::new(
                    "timeline_entry",
                    &entry_label(entry),
                    serde_json::to_value(entry)?,
                ));
            }
            for mismatch in &report.mismatches {
                envelopes.push(mismatch_envelope(mismatch)?);
            }
            envelopes.push(OutputEnvelope::new(
                "stats",
                &format!("{} of {} events applied", report.stats.applied, report.stats.received),
                serde_json::to_value(&report.stats)?,
            ));
            tidemark_core::stream::write_stream(&envelopes, &mut *writer)?;
        }
        OutputFormat::Text => render_replay_text(report, writer)?,
    }
    Ok(())
}

pub fn render_mismatches(
    mismatches: &[Mismatch],
    format: OutputFormat,
    writer: &mut dyn Write,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "count": mismatches.len(),
                "mismatches": mismatches,
            }))?;
            writeln!(writer, "{json}")?;
        }
        OutputFormat::Jsonl => {
            let envelopes = mismatches
                .iter()
                .map(mismatch_envelope)
                .collect::<Result<Vec<_>>>()?;
            tidemark_core::stream::write_stream(&envelopes, &mut *writer)?;
        }
        OutputFormat::Text => write_mismatches_text(mismatches, writer)?,
    }
    Ok(())
}

fn mismatch_envelope(mismatch: &Mismatch) -> Result<OutputEnvelope> {
    Ok(OutputEnvelope::new(
        "mismatch",
        &format!(
            "{} differs in {} place(s)",
            mismatch.event_id,
            mismatch.differences.len()
        ),
        serde_json::to_value(mismatch)?,
    ))
}

fn render_replay_text(report: &ReplayReport, writer: &mut dyn Write) -> Result<()> {
    for message in report.messages.iter().flatten() {
        write_message_text(message, writer)?;
    }
    for entry in report.timeline.iter().flatten() {
        writeln!(writer, "{}", entry_label(entry))?;
    }

    let stats = &report.stats;
    writeln!(
        writer,
        "events: {} received, {} applied, {} duplicate, {} malformed, {} ignored",
        stats.received, stats.applied, stats.duplicates, stats.malformed, stats.ignored
    )?;
    writeln!(
        writer,
        "state: {}",
        if report.streaming { "streaming" } else { "idle" }
    )?;
    write_mismatches_text(&report.mismatches, writer)
}

fn write_message_text(message: &ChatMessage, writer: &mut dyn Write) -> Result<()> {
    let state = if message.is_streaming {
        "streaming"
    } else if message.delivered {
        "delivered"
    } else {
        "pending"
    };
    writeln!(writer, "[{}] {:?} ({state})", message.id, message.role)?;
    for part in &message.content {
        match part {
            ContentPart::Text { text } => writeln!(writer, "  {text}")?,
            ContentPart::ToolUse {
                tool_call_id, name, ..
            } => writeln!(writer, "  > {name} ({tool_call_id})")?,
            ContentPart::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => writeln!(
                writer,
                "  < {tool_use_id} {}",
                if *is_error { "error" } else { "ok" }
            )?,
        }
    }
    Ok(())
}

fn write_mismatches_text(mismatches: &[Mismatch], writer: &mut dyn Write) -> Result<()> {
    if mismatches.is_empty() {
        writeln!(writer, "mismatches: none")?;
        return Ok(());
    }
    writeln!(writer, "mismatches: {}", mismatches.len())?;
    for mismatch in mismatches {
        let layers: Vec<&str> = mismatch.layers.iter().map(|l| l.as_str()).collect();
        writeln!(writer, "  {} [{}]", mismatch.event_id, layers.join(" vs "))?;
        for diff in &mismatch.differences {
            writeln!(
                writer,
                "    {}: {} -> {}",
                if diff.path.is_empty() { "." } else { &diff.path },
                display_side(diff.left_value.as_ref()),
                display_side(diff.right_value.as_ref())
            )?;
        }
    }
    Ok(())
}

fn display_side(value: Option<&serde_json::Value>) -> String {
    value.map_or_else(|| "<absent>".to_string(), ToString::to_string)
}

fn event_label(event: &TimelineEvent) -> String {
    let message = event.message_id().unwrap_or("-");
    match &event.kind {
        EventKind::Chunk { delta } | EventKind::Token { delta } => {
            format!("{} text [{message}] {delta:?}", event.id)
        }
        EventKind::ToolCall { tool_call } => {
            format!("{} tool_call [{message}] {}", event.id, tool_call.name)
        }
        EventKind::ToolResult { tool_result } => format!(
            "{} tool_result [{message}] {}",
            event.id, tool_result.tool_call_id
        ),
        EventKind::Done => format!("{} done [{message}]", event.id),
        EventKind::Completion => format!("{} completion", event.id),
    }
}

fn entry_label(entry: &TimelineEntry) -> String {
    match entry {
        TimelineEntry::Event(event) => event_label(event),
        TimelineEntry::ToolInteraction(interaction) => {
            let name = match &interaction.call.kind {
                EventKind::ToolCall { tool_call } => tool_call.name.as_str(),
                _ => "?",
            };
            let status = match interaction.result.as_ref().map(|r| &r.kind) {
                None => "pending",
                Some(EventKind::ToolResult { tool_result }) if !tool_result.success => "error",
                Some(_) => "ok",
            };
            format!("{} tool {name} ({status})", interaction.id)
        }
    }
}
