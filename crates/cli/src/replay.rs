use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tidemark_core::merge::IdleLog;
use tidemark_core::session::decode_canonical;
use tidemark_core::stream::{read_stream, StreamLine};
use tidemark_core::{
    consolidate_chunks, has_streaming_messages, pair_tool_events, DiffMode, LiveSession,
    MergeOutcome, SkipReason, TimelineEntry, TimelineEvent,
};
use tracing::{debug, info};

use crate::config::CliConfig;
use crate::output::{render_replay, OutputFormat, ReplayReport};

/// What the replay prints besides statistics.
#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
pub enum View {
    /// The reconciled message list
    Messages,
    /// Accepted events, consolidated and paired for display
    Timeline,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub view: View,
    pub canonical: Option<PathBuf>,
    pub tap_export: Option<PathBuf>,
    pub diff_mode: DiffMode,
    pub taps: bool,
    pub consolidate: bool,
    pub pair_tools: bool,
}

impl ReplayOptions {
    /// Options seeded from configuration; command-line flags override afterwards.
    pub fn from_config(config: &CliConfig, view: View) -> Self {
        Self {
            view,
            canonical: None,
            tap_export: None,
            diff_mode: config.taps.diff_mode,
            taps: config.taps.enabled,
            consolidate: config.replay.consolidate,
            pair_tools: config.replay.pair_tools,
        }
    }
}

pub fn run_replay(file: &Path, options: &ReplayOptions, format: OutputFormat) -> Result<()> {
    let handle =
        File::open(file).with_context(|| format!("Failed to open capture {}", file.display()))?;
    let lines = read_stream(BufReader::new(handle))
        .with_context(|| format!("Failed to read capture {}", file.display()))?;
    let canonical = match &options.canonical {
        Some(path) => Some(read_canonical(path)?),
        None => None,
    };

    let report = build_report(&lines, canonical.as_deref(), options)?;
    let stdout = std::io::stdout();
    render_replay(&report, format, &mut stdout.lock())
}

fn read_canonical(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read canonical messages {}", path.display()))?;
    serde_json::from_str::<Vec<Value>>(&content)
        .with_context(|| format!("Canonical messages at {} must be a JSON array", path.display()))
}

/// Replay a capture through a fresh live session.
pub fn build_report(
    lines: &[StreamLine],
    canonical: Option<&[Value]>,
    options: &ReplayOptions,
) -> Result<ReplayReport> {
    if options.tap_export.is_some() && !options.taps {
        bail!("--tap-export needs taps enabled (set [taps] enabled = true)");
    }

    let mut session = LiveSession::new(IdleLog::default());
    if options.taps {
        session = session.with_taps();
    }

    let mut accepted: Vec<TimelineEvent> = Vec::new();
    for line in lines {
        match line {
            StreamLine::Value { line, value } => {
                let outcome = session.ingest_value(value);
                debug!(line, ?outcome, "replayed event");
                if options.view == View::Timeline && keeps_in_timeline(&outcome) {
                    if let Ok(event) = TimelineEvent::from_value(value) {
                        accepted.push(event);
                    }
                }
            }
            StreamLine::Undecodable { line, reason } => {
                session.note_undecodable(&format!("line {line}: {reason}"));
            }
        }
    }

    let mismatches = match canonical {
        Some(values) => {
            let messages = decode_canonical(values);
            session.verify_against_canonical(&messages, options.diff_mode)
        }
        None => session.mismatches(options.diff_mode),
    };

    if let Some(path) = &options.tap_export {
        if let Some(taps) = session.taps() {
            let summary = taps.export_summary();
            let json = serde_json::to_string_pretty(&summary)?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write tap export {}", path.display()))?;
            info!(records = summary.total_records, "exported taps to {}", path.display());
        }
    }

    let messages = session.messages();
    let timeline = match options.view {
        View::Messages => None,
        View::Timeline => Some(timeline_entries(&accepted, options)),
    };

    Ok(ReplayReport {
        stats: session.stats().clone(),
        streaming: has_streaming_messages(messages),
        idle_signals: session.merger().status().sessions.len(),
        messages: (options.view == View::Messages).then(|| messages.to_vec()),
        timeline,
        mismatches,
    })
}

/// Duplicates and undecodable events never reach the display timeline.
fn keeps_in_timeline(outcome: &MergeOutcome) -> bool {
    !matches!(
        outcome,
        MergeOutcome::Skipped(SkipReason::Duplicate(_) | SkipReason::Discarded(_))
    )
}

fn timeline_entries(events: &[TimelineEvent], options: &ReplayOptions) -> Vec<TimelineEntry> {
    let events = if options.consolidate {
        consolidate_chunks(events)
    } else {
        events.to_vec()
    };
    if options.pair_tools {
        pair_tool_events(&events)
    } else {
        events.into_iter().map(TimelineEntry::Event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemark_core::stream::from_stream_str;

    const CAPTURE: &str = r#"{"type":"chunk","id":"e1","sessionId":"s1","messageId":"m1","createdAt":"2026-01-01T00:00:00Z","delta":"Hel"}
{"type":"chunk","id":"e2","sessionId":"s1","messageId":"m1","createdAt":"2026-01-01T00:00:00Z","delta":"lo"}
{"type":"tool_call","id":"e3","sessionId":"s1","messageId":"m1","createdAt":"2026-01-01T00:00:00Z","toolCall":{"toolCallId":"t1","name":"grep"}}
{"type":"tool_call","id":"e3","sessionId":"s1","messageId":"m1","createdAt":"2026-01-01T00:00:00Z","toolCall":{"toolCallId":"t1","name":"grep"}}
not json
{"type":"tool_result","id":"e4","sessionId":"s1","messageId":"m1","createdAt":"2026-01-01T00:00:00Z","toolResult":{"toolCallId":"t1","success":true}}
{"type":"completion","id":"e5","sessionId":"s1","createdAt":"2026-01-01T00:00:00Z"}
"#;

    fn options(view: View) -> ReplayOptions {
        ReplayOptions::from_config(&CliConfig::default(), view)
    }

    #[test]
    fn test_messages_view() {
        let lines = from_stream_str(CAPTURE);
        let report = build_report(&lines, None, &options(View::Messages)).unwrap();

        assert_eq!(report.stats.received, 7);
        assert_eq!(report.stats.applied, 5);
        assert_eq!(report.stats.duplicates, 1);
        assert_eq!(report.stats.malformed, 1);
        assert!(!report.streaming);
        assert_eq!(report.idle_signals, 1);
        assert!(report.timeline.is_none());

        let messages = report.messages.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "Hello");
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn test_timeline_view_consolidates_and_pairs() {
        let lines = from_stream_str(CAPTURE);
        let report = build_report(&lines, None, &options(View::Timeline)).unwrap();

        assert!(report.messages.is_none());
        let timeline = report.timeline.unwrap();
        assert_eq!(timeline.len(), 3);
        match &timeline[0] {
            TimelineEntry::Event(event) => assert_eq!(event.kind.delta(), Some("Hello")),
            other => panic!("expected text event, got {other:?}"),
        }
        let interaction = timeline[1].as_interaction().unwrap();
        assert_eq!(interaction.id, "e3");
        assert!(!interaction.is_pending());
    }

    #[test]
    fn test_timeline_view_without_post_processing() {
        let lines = from_stream_str(CAPTURE);
        let mut opts = options(View::Timeline);
        opts.consolidate = false;
        opts.pair_tools = false;
        let report = build_report(&lines, None, &opts).unwrap();
        assert_eq!(report.timeline.unwrap().len(), 5);
    }

    #[test]
    fn test_canonical_drift_is_reported() {
        let lines = from_stream_str(CAPTURE);
        let canonical = vec![json!({
            "id": "m1", "sessionId": "s1", "role": "assistant",
            "createdAt": "2026-01-01T00:00:00Z",
            "content": [{"type": "text", "text": "Hello!"}],
            "isStreaming": false, "delivered": true, "read": true
        })];
        let report = build_report(&lines, Some(&canonical), &options(View::Messages)).unwrap();

        assert!(!report.mismatches.is_empty());
        assert!(report.mismatches.iter().all(|m| m.event_id == "message:m1"));
        assert!(report.mismatches[0]
            .differences
            .iter()
            .any(|d| d.path == "content.0.text"));
    }

    #[test]
    fn test_tap_export_requires_taps() {
        let mut opts = options(View::Messages);
        opts.taps = false;
        opts.tap_export = Some(PathBuf::from("taps.json"));
        assert!(build_report(&[], None, &opts).is_err());
    }

    #[test]
    fn test_tap_export_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taps.json");
        let mut opts = options(View::Messages);
        opts.tap_export = Some(path.clone());

        build_report(&from_stream_str(CAPTURE), None, &opts).unwrap();

        let exported: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(exported["totalRecords"].as_u64().unwrap() > 0);
        assert_eq!(exported["layers"][0]["layer"], "raw-source");
    }
}
