//! Cross-layer tap store.
//!
//! Pipeline stages record a snapshot of the event they saw, keyed by layer and
//! event id. The store is a debugging aid: nothing in the merge path reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Pipeline stage at which a snapshot was captured. Ordering follows the
/// pipeline, which is also the order mismatch detection visits layers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TapLayer {
    RawSource,
    SourceParsed,
    RawCanonical,
    CanonicalProcessed,
    ReconciledStore,
    Custom,
}

impl TapLayer {
    pub const ALL: [Self; 6] = [
        Self::RawSource,
        Self::SourceParsed,
        Self::RawCanonical,
        Self::CanonicalProcessed,
        Self::ReconciledStore,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawSource => "raw-source",
            Self::SourceParsed => "source-parsed",
            Self::RawCanonical => "raw-canonical",
            Self::CanonicalProcessed => "canonical-processed",
            Self::ReconciledStore => "reconciled-store",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for TapLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapRecord {
    pub layer: TapLayer,
    pub event_id: String,
    pub event: Value,
    #[serde(default)]
    pub metadata: Value,
    pub captured_at: DateTime<Utc>,
}

/// Tap key for a message snapshot. Keeps message ids apart from event ids,
/// which share the same key space across layers.
pub fn message_key(message_id: &str) -> String {
    format!("message:{message_id}")
}

/// Copy of the whole store: layer → event id → record.
pub type TapSnapshot = BTreeMap<TapLayer, BTreeMap<String, TapRecord>>;

#[derive(Debug, Clone, Default)]
pub struct TapStore {
    layers: TapSnapshot,
}

impl TapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` for `(layer, event_id)`, replacing any earlier capture.
    pub fn tap(&mut self, layer: TapLayer, event_id: impl Into<String>, event: Value, metadata: Value) {
        let event_id = event_id.into();
        let record = TapRecord {
            layer,
            event_id: event_id.clone(),
            event,
            metadata,
            captured_at: Utc::now(),
        };
        self.layers.entry(layer).or_default().insert(event_id, record);
    }

    /// Like [`tap`](Self::tap), serializing `event` first. A value that does
    /// not serialize is captured as `null`.
    pub fn tap_serialized<T: Serialize>(
        &mut self,
        layer: TapLayer,
        event_id: impl Into<String>,
        event: &T,
        metadata: Value,
    ) {
        let snapshot = serde_json::to_value(event).unwrap_or_default();
        self.tap(layer, event_id, snapshot, metadata);
    }

    pub fn get(&self, layer: TapLayer, event_id: &str) -> Option<&TapRecord> {
        self.layers.get(&layer)?.get(event_id)
    }

    /// Defensive copy with an entry for every layer, empty or not.
    pub fn all_tapped(&self) -> TapSnapshot {
        let mut snapshot = self.layers.clone();
        for layer in TapLayer::ALL {
            snapshot.entry(layer).or_default();
        }
        snapshot
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }

    pub fn len(&self) -> usize {
        self.layers.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full structural dump for offline inspection.
    pub fn export_summary(&self) -> TapSummary {
        let layers: Vec<LayerSummary> = TapLayer::ALL
            .into_iter()
            .map(|layer| {
                let records: Vec<TapRecord> = self
                    .layers
                    .get(&layer)
                    .map(|records| records.values().cloned().collect())
                    .unwrap_or_default();
                LayerSummary {
                    layer,
                    count: records.len(),
                    records,
                }
            })
            .collect();

        TapSummary {
            exported_at: Utc::now(),
            total_records: self.len(),
            layers,
        }
    }
}

/// Serializable dump of a [`TapStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapSummary {
    pub exported_at: DateTime<Utc>,
    pub total_records: usize,
    pub layers: Vec<LayerSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    pub layer: TapLayer,
    pub count: usize,
    #[serde(default)]
    pub records: Vec<TapRecord>,
}

impl TapSummary {
    /// Rebuild the snapshot the summary was exported from.
    pub fn into_snapshot(self) -> TapSnapshot {
        let mut snapshot: TapSnapshot = TapLayer::ALL
            .into_iter()
            .map(|layer| (layer, BTreeMap::new()))
            .collect();
        for layer in self.layers {
            let records = snapshot.entry(layer.layer).or_default();
            for record in layer.records {
                records.insert(record.event_id.clone(), record);
            }
        }
        snapshot
    }
}
