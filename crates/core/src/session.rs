//! Live session controller.
//!
//! Owns everything one live conversation needs: the merger with its dedup
//! registry, the current message list, merge statistics and, optionally, a tap
//! store. Nothing here resets implicitly; call [`LiveSession::reset`] when the
//! session switches.

use crate::diff::{find_mismatches, DiffMode, Mismatch};
use crate::event::{EventKind, TimelineEvent};
use crate::merge::{Detached, EventMerger, MergeOutcome, SessionStatus, SkipReason};
use crate::message::{empty_list, ChatMessage, MessageList};
use crate::tap::{message_key, TapLayer, TapStore};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Per-session merge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub received: u64,
    pub applied: u64,
    pub duplicates: u64,
    /// Undecodable input and events without a message id.
    pub malformed: u64,
    /// Well-formed events that referenced nothing, e.g. `Done` for an unknown message.
    pub ignored: u64,
    pub completions: u64,
}

impl MergeStats {
    fn record(&mut self, outcome: &MergeOutcome, kind: Option<&EventKind>) {
        self.received += 1;
        match outcome {
            MergeOutcome::Applied => {
                self.applied += 1;
                if matches!(kind, Some(EventKind::Completion)) {
                    self.completions += 1;
                }
            }
            MergeOutcome::Skipped(SkipReason::Duplicate(_)) => self.duplicates += 1,
            MergeOutcome::Skipped(SkipReason::Discarded(_) | SkipReason::MissingMessageId) => {
                self.malformed += 1
            }
            MergeOutcome::Skipped(SkipReason::UnknownMessage(_)) => self.ignored += 1,
        }
    }
}

#[derive(Debug)]
pub struct LiveSession<S = Detached> {
    merger: EventMerger<S>,
    messages: MessageList,
    taps: Option<TapStore>,
    stats: MergeStats,
}

impl Default for LiveSession<Detached> {
    fn default() -> Self {
        Self::new(Detached)
    }
}

impl<S: SessionStatus> LiveSession<S> {
    pub fn new(status: S) -> Self {
        Self {
            merger: EventMerger::new(status),
            messages: empty_list(),
            taps: None,
            stats: MergeStats::default(),
        }
    }

    /// Record raw-source, source-parsed and reconciled-store snapshots.
    ///
    /// Stream snapshots are keyed by event id, message snapshots by
    /// [`message_key`]. For raw input the source-parsed snapshot keeps only the
    /// fields the raw event carried, so defaults filled in by decoding are not
    /// reported as drift while rewritten values (e.g. role `human` → `user`)
    /// are.
    pub fn with_taps(mut self) -> Self {
        self.taps = Some(TapStore::new());
        self
    }

    pub fn messages(&self) -> &MessageList {
        &self.messages
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    pub fn merger(&self) -> &EventMerger<S> {
        &self.merger
    }

    pub fn taps(&self) -> Option<&TapStore> {
        self.taps.as_ref()
    }

    pub fn taps_mut(&mut self) -> Option<&mut TapStore> {
        self.taps.as_mut()
    }

    /// Start over for a new session: forget applied keys, messages, counters
    /// and captured taps.
    pub fn reset(&mut self) {
        debug!(
            messages = self.messages.len(),
            applied = self.stats.applied,
            "resetting live session"
        );
        self.merger.reset();
        self.messages = empty_list();
        self.stats = MergeStats::default();
        if let Some(taps) = self.taps.as_mut() {
            taps.clear();
        }
    }

    /// Decode and merge one value received from the transport.
    pub fn ingest_value(&mut self, raw: &Value) -> MergeOutcome {
        if let Some(taps) = self.taps.as_mut() {
            if let Some(id) = raw.get("id").and_then(Value::as_str) {
                taps.tap(TapLayer::RawSource, id, raw.clone(), Value::Null);
            }
        }

        match TimelineEvent::from_value(raw) {
            Ok(event) => {
                if let Some(taps) = self.taps.as_mut() {
                    let parsed = serde_json::to_value(&event).unwrap_or_default();
                    taps.tap(
                        TapLayer::SourceParsed,
                        event.id.as_str(),
                        project_onto(parsed, raw),
                        json!({ "kind": event.kind.name() }),
                    );
                }
                self.apply(&event)
            }
            Err(reason) => {
                debug!("discarding stream event: {reason}");
                let outcome = MergeOutcome::Skipped(SkipReason::Discarded(reason));
                self.stats.record(&outcome, None);
                outcome
            }
        }
    }

    /// Merge one typed event into the session's message list.
    pub fn ingest(&mut self, event: &TimelineEvent) -> MergeOutcome {
        if let Some(taps) = self.taps.as_mut() {
            taps.tap_serialized(
                TapLayer::SourceParsed,
                event.id.as_str(),
                event,
                json!({ "kind": event.kind.name() }),
            );
        }
        self.apply(event)
    }

    fn apply(&mut self, event: &TimelineEvent) -> MergeOutcome {
        let merged = self.merger.merge(event, &self.messages);
        self.stats.record(&merged.outcome, Some(&event.kind));
        self.messages = merged.messages;

        if merged.outcome.is_applied() {
            self.tap_reconciled(event);
        }
        merged.outcome
    }

    /// Count input the transport could not even split into a JSON value.
    pub fn note_undecodable(&mut self, reason: &str) {
        debug!("undecodable stream input: {reason}");
        self.stats.received += 1;
        self.stats.malformed += 1;
    }

    fn tap_reconciled(&mut self, event: &TimelineEvent) {
        let Some(taps) = self.taps.as_mut() else {
            return;
        };
        let target = event.message_id();
        let touches_all = matches!(event.kind, EventKind::Completion);
        for message in self.messages.iter() {
            if touches_all || Some(message.id.as_str()) == target {
                taps.tap_serialized(
                    TapLayer::ReconciledStore,
                    message_key(&message.id),
                    message,
                    json!({ "lastEventId": event.id }),
                );
            }
        }
    }

    /// Compare canonical messages against the reconciled list, keyed by
    /// [`message_key`]. Only those two layers take part in the comparison; the
    /// canonical snapshots are also kept in the session's taps when enabled.
    pub fn verify_against_canonical(
        &mut self,
        canonical: &[ChatMessage],
        mode: DiffMode,
    ) -> Vec<Mismatch> {
        let mut scratch = TapStore::new();
        for message in canonical {
            scratch.tap_serialized(
                TapLayer::CanonicalProcessed,
                message_key(&message.id),
                message,
                Value::Null,
            );
        }
        for message in self.messages.iter() {
            scratch.tap_serialized(
                TapLayer::ReconciledStore,
                message_key(&message.id),
                message,
                Value::Null,
            );
        }
        if let Some(taps) = self.taps.as_mut() {
            for message in canonical {
                taps.tap_serialized(
                    TapLayer::CanonicalProcessed,
                    message_key(&message.id),
                    message,
                    Value::Null,
                );
            }
        }

        let mismatches = find_mismatches(&scratch.all_tapped(), mode);
        if !mismatches.is_empty() {
            warn!(
                count = mismatches.len(),
                "canonical and reconciled timelines disagree"
            );
        }
        mismatches
    }

    /// Mismatches across everything tapped so far; empty when taps are off.
    pub fn mismatches(&self, mode: DiffMode) -> Vec<Mismatch> {
        self.taps
            .as_ref()
            .map(|taps| find_mismatches(&taps.all_tapped(), mode))
            .unwrap_or_default()
    }
}

/// Keep only the parts of `parsed` whose keys also appear in `raw`, recursing
/// into nested objects. Non-object values are kept whole.
fn project_onto(parsed: Value, raw: &Value) -> Value {
    match (parsed, raw) {
        (Value::Object(parsed), Value::Object(raw)) => Value::Object(
            parsed
                .into_iter()
                .filter_map(|(key, value)| {
                    let raw_value = raw.get(&key)?;
                    Some((key, project_onto(value, raw_value)))
                })
                .collect(),
        ),
        (parsed, _) => parsed,
    }
}

/// Decode canonical-store messages, skipping entries that do not fit the
/// message shape.
pub fn decode_canonical(values: &[Value]) -> Vec<ChatMessage> {
    values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| {
            match serde_json::from_value::<ChatMessage>(value.clone()) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("skipping canonical message at index {index}: {e}");
                    None
                }
            }
        })
        .collect()
}
