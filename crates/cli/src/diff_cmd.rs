use std::path::Path;

use anyhow::{Context, Result};
use tidemark_core::{find_mismatches, DiffMode, Mismatch, TapSummary};

use crate::output::{render_mismatches, OutputFormat};

/// Diff a previously exported tap summary.
pub fn run_diff(file: &Path, mode: DiffMode, format: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read tap export {}", file.display()))?;
    let mismatches = diff_export(&content, mode)
        .with_context(|| format!("Invalid tap export {}", file.display()))?;
    let stdout = std::io::stdout();
    render_mismatches(&mismatches, format, &mut stdout.lock())
}

pub fn diff_export(content: &str, mode: DiffMode) -> Result<Vec<Mismatch>> {
    let summary: TapSummary = serde_json::from_str(content)?;
    Ok(find_mismatches(&summary.into_snapshot(), mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tidemark_core::{TapLayer, TapStore};

    #[test]
    fn test_diff_of_exported_store() {
        let mut store = TapStore::new();
        store.tap(TapLayer::RawSource, "e1", json!({"success": true}), Value::Null);
        store.tap(TapLayer::SourceParsed, "e1", json!({"success": false}), Value::Null);
        store.tap(TapLayer::RawSource, "e2", json!({"a": 1}), Value::Null);
        let export = serde_json::to_string(&store.export_summary()).unwrap();

        let mismatches = diff_export(&export, DiffMode::FirstTwo).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].event_id, "e1");
        assert_eq!(mismatches[0].differences[0].path, "success");
    }

    #[test]
    fn test_garbage_export_is_an_error() {
        assert!(diff_export("{\"layers\": 3}", DiffMode::FirstTwo).is_err());
    }
}
