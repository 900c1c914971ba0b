//! Structural diffing of tapped snapshots.

use crate::tap::{TapLayer, TapRecord, TapSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One leaf-level disagreement. A side is `None` when the key is absent there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_value: Option<Value>,
}

/// Representation drift for one event id between layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mismatch {
    pub event_id: String,
    /// The layers that were compared, left side first.
    pub layers: Vec<TapLayer>,
    pub differences: Vec<DiffEntry>,
}

/// Which layers of an event are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Only the first two layers (in pipeline order) holding the event.
    #[default]
    FirstTwo,
    /// The first layer against each later one, one mismatch per differing pair.
    AgainstFirst,
}

/// Recursive comparison of two JSON structures, one entry per differing leaf.
/// Paths join object keys and array indexes with `.`.
pub fn diff_values(left: &Value, right: &Value) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    diff_into(String::new(), Some(left), Some(right), &mut out);
    out
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn diff_into(path: String, left: Option<&Value>, right: Option<&Value>, out: &mut Vec<DiffEntry>) {
    match (left, right) {
        (Some(Value::Object(l)), Some(Value::Object(r))) => {
            let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
            for key in keys {
                diff_into(join(&path, key), l.get(key), r.get(key), out);
            }
        }
        (Some(Value::Array(l)), Some(Value::Array(r))) => {
            for index in 0..l.len().max(r.len()) {
                diff_into(
                    join(&path, &index.to_string()),
                    l.get(index),
                    r.get(index),
                    out,
                );
            }
        }
        (Some(Value::Number(l)), Some(Value::Number(r))) if same_number(l, r) => {}
        _ if left == right => {}
        _ => out.push(DiffEntry {
            path,
            left_value: left.cloned(),
            right_value: right.cloned(),
        }),
    }
}

/// `1` and `1.0` are the same number; serializers disagree on which to emit.
fn same_number(left: &serde_json::Number, right: &serde_json::Number) -> bool {
    left == right || matches!((left.as_f64(), right.as_f64()), (Some(l), Some(r)) if l == r)
}

/// Group records by event id across layers and report disagreements.
///
/// With [`DiffMode::FirstTwo`] an event seen in three or more layers is still
/// only checked between its first two; use [`DiffMode::AgainstFirst`] to
/// check every later layer.
pub fn find_mismatches(snapshot: &TapSnapshot, mode: DiffMode) -> Vec<Mismatch> {
    let mut by_event: BTreeMap<&str, Vec<&TapRecord>> = BTreeMap::new();
    for records in snapshot.values() {
        for (event_id, record) in records {
            by_event.entry(event_id.as_str()).or_default().push(record);
        }
    }

    let mut out = Vec::new();
    for (event_id, records) in by_event {
        let Some((first, rest)) = records.split_first() else {
            continue;
        };
        let compared: &[&TapRecord] = match mode {
            DiffMode::FirstTwo => rest.get(..1).unwrap_or_default(),
            DiffMode::AgainstFirst => rest,
        };
        for other in compared {
            let differences = diff_values(&first.event, &other.event);
            if !differences.is_empty() {
                out.push(Mismatch {
                    event_id: event_id.to_string(),
                    layers: vec![first.layer, other.layer],
                    differences,
                });
            }
        }
    }
    out
}
