//! Unit discovery: find and parse unit files under a source tree

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::record::Record;

/// File extensions considered unit files
pub const UNIT_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// One parsed source file: records of a single entity type
#[derive(Debug, Clone, PartialEq)]
pub struct ImportUnit {
    /// Where the unit came from
    pub locator: PathBuf,
    /// The single top-level key of the file
    pub entity_name: String,
    /// Everything under the entity key (`meta` and `data`), validated when applied
    pub body: serde_json::Value,
}

impl ImportUnit {
    /// Build a unit from an already-decoded document
    pub fn from_document(locator: impl Into<PathBuf>, document: serde_json::Value) -> Result<Self, String> {
        let serde_json::Value::Object(top) = document else {
            return Err(format!(
                "top level is {}, expected a mapping",
                json_kind(&document)
            ));
        };

        if top.len() != 1 {
            return Err(format!(
                "expected exactly one top-level entity key, found {}",
                top.len()
            ));
        }

        let Some((entity_name, body)) = top.into_iter().next() else {
            return Err("expected exactly one top-level entity key, found 0".to_string());
        };

        Ok(ImportUnit {
            locator: locator.into(),
            entity_name,
            body,
        })
    }

    /// Locator as displayed in reports
    pub fn locator_name(&self) -> String {
        self.locator.display().to_string()
    }

    /// Storage name declared under `meta.storageName`
    pub fn declared_storage_name(&self) -> Option<&str> {
        self.body
            .get("meta")
            .and_then(|meta| meta.get("storageName"))
            .and_then(|name| name.as_str())
    }

    /// Records under `data`: a single map or a list of maps
    pub fn records(&self) -> Result<Vec<Record>, String> {
        let data = self
            .body
            .get("data")
            .ok_or_else(|| "unit has no 'data' section".to_string())?;

        match data {
            serde_json::Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    Record::from_json(item).ok_or_else(|| {
                        format!("data[{}] is {}, expected a mapping", idx, json_kind(item))
                    })
                })
                .collect(),
            other => Record::from_json(other)
                .map(|record| vec![record])
                .ok_or_else(|| format!("'data' is {}, expected a mapping or a list", json_kind(other))),
        }
    }
}

/// A file that could not be turned into a unit
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub locator: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.locator.display(), self.reason)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "empty",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "a mapping",
    }
}

fn is_unit_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| UNIT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Parse unit text; JSON for `.json` locators, YAML otherwise
pub fn parse_unit_str(locator: &Path, text: &str) -> Result<ImportUnit, String> {
    if text.trim().is_empty() {
        return Err("file is empty".to_string());
    }

    let is_json = locator
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let document: serde_json::Value = if is_json {
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?
    } else {
        serde_yaml::from_str(text).map_err(|e| format!("invalid YAML: {}", e))?
    };

    ImportUnit::from_document(locator, document)
}

/// Read and parse one unit file
pub fn parse_unit_file(path: &Path) -> Result<ImportUnit, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("unreadable: {}", e))?;
    parse_unit_str(path, &text)
}

/// Recursively scan `source_root` (a directory or a single file) for unit files.
///
/// Failures are collected per file and never stop the scan.
pub fn discover(source_root: &Path) -> (Vec<ImportUnit>, Vec<ParseFailure>) {
    let mut units = Vec::new();
    let mut failures = Vec::new();

    for entry in WalkDir::new(source_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let locator = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| source_root.to_path_buf());
                log::warn!("Skipping {}: {}", locator.display(), err);
                failures.push(ParseFailure {
                    locator,
                    reason: format!("unreadable: {}", err),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_unit_file(entry.path()) {
            continue;
        }

        match parse_unit_file(entry.path()) {
            Ok(unit) => {
                log::debug!("Discovered {} in {}", unit.entity_name, entry.path().display());
                units.push(unit);
            }
            Err(reason) => {
                log::warn!("Skipping {}: {}", entry.path().display(), reason);
                failures.push(ParseFailure {
                    locator: entry.path().to_path_buf(),
                    reason,
                });
            }
        }
    }

    log::info!(
        "Discovered {} units ({} unparseable) under {}",
        units.len(),
        failures.len(),
        source_root.display()
    );

    (units, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discover_collects_failures() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "widgets.yaml", "Widget:\n  meta:\n    storageName: widgets\n  data:\n    name: Gadget\n");
        write(dir.path(), "nested/items.json", r#"{"LineItem": {"meta": {"storageName": "line_items"}, "data": []}}"#);
        write(dir.path(), "empty.yaml", "   \n");
        write(dir.path(), "broken.yaml", "Widget: [unclosed\n");
        write(dir.path(), "list.yml", "- a\n- b\n");
        write(dir.path(), "two.yaml", "A: {}\nB: {}\n");
        write(dir.path(), "notes.txt", "ignored");

        let (units, failures) = discover(dir.path());

        let entities: Vec<_> = units.iter().map(|u| u.entity_name.as_str()).collect();
        assert_eq!(entities, vec!["LineItem", "Widget"]);

        let mut reasons: Vec<_> = failures
            .iter()
            .map(|f| f.locator.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        reasons.sort();
        assert_eq!(reasons, vec!["broken.yaml", "empty.yaml", "list.yml", "two.yaml"]);
    }

    #[test]
    fn test_discover_single_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "widgets.json", r#"{"Widget": {"data": {"name": "x"}}}"#);

        let (units, failures) = discover(&dir.path().join("widgets.json"));
        assert_eq!(units.len(), 1);
        assert!(failures.is_empty());
    }

    #[test]
    fn test_discover_missing_root() {
        let (units, failures) = discover(Path::new("/definitely/not/here"));
        assert!(units.is_empty());
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_records_single_and_list() {
        let single = ImportUnit::from_document(
            "a.yaml",
            json!({"Widget": {"meta": {"storageName": "widgets"}, "data": {"name": "x"}}}),
        )
        .unwrap();
        assert_eq!(single.declared_storage_name(), Some("widgets"));
        assert_eq!(single.records().unwrap().len(), 1);

        let list = ImportUnit::from_document(
            "b.yaml",
            json!({"Widget": {"data": [{"name": "x"}, {"name": "y"}]}}),
        )
        .unwrap();
        assert_eq!(list.records().unwrap().len(), 2);
    }

    #[test]
    fn test_records_rejects_bad_shapes() {
        let unit = ImportUnit::from_document("a.yaml", json!({"Widget": {"data": [1]}})).unwrap();
        assert!(unit.records().unwrap_err().contains("data[0]"));

        let unit = ImportUnit::from_document("a.yaml", json!({"Widget": {"meta": {}}})).unwrap();
        assert!(unit.records().is_err());
    }
}
