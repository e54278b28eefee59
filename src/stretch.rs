//! Road stretch definitions
//!
//! A stretch is a named, user-facing road section composed of one or more
//! upstream segments. Definitions are static configuration, loaded once at
//! startup and never mutated.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading stretch definitions
#[derive(Debug, Error)]
pub enum StretchConfigError {
    /// The definitions file could not be read
    #[error("failed to read stretch definitions from {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The definitions file is not valid JSON of the expected shape
    #[error("invalid stretch definitions in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    /// The file parsed but defines nothing to aggregate
    #[error("stretch definitions in {path} are empty")]
    Empty { path: String },
}

/// One named stretch and the ordered segment ids composing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StretchDefinition {
    /// Display name, e.g. "Straume - Lyderhorntunnelen"
    #[serde(rename = "stretch")]
    pub name: String,
    /// Upstream segment ids in driving order
    #[serde(rename = "stretchIDs")]
    pub segment_ids: Vec<String>,
}

/// Loads stretch definitions from a JSON file
///
/// The file is an array of `{ "stretch": name, "stretchIDs": [ids...] }`
/// objects; an empty array or a stretch without segment ids is a configuration
/// error, caught at startup rather than at request time.
pub fn load_stretches(path: &Path) -> Result<Vec<StretchDefinition>, StretchConfigError> {
    let display = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|source| StretchConfigError::Io {
        path: display.clone(),
        source,
    })?;
    let stretches: Vec<StretchDefinition> =
        serde_json::from_str(&contents).map_err(|source| StretchConfigError::Json {
            path: display.clone(),
            source,
        })?;

    if stretches.is_empty() || stretches.iter().any(|s| s.segment_ids.is_empty()) {
        return Err(StretchConfigError::Empty { path: display });
    }

    Ok(stretches)
}

/// Flattens all definitions into the set of segment ids worth parsing
pub fn interest_set(stretches: &[StretchDefinition]) -> HashSet<String> {
    stretches
        .iter()
        .flat_map(|s| s.segment_ids.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_JSON: &str = r#"[
        { "stretch": "Straume - Lyderhorntunnelen", "stretchIDs": ["100277", "100176", "100156"] },
        { "stretch": "Lyderhorntunnelen - Straume", "stretchIDs": ["100153", "100173"] }
    ]"#;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn test_loads_definitions_in_file_order() {
        let file = write_file(VALID_JSON);
        let stretches = load_stretches(file.path()).unwrap();

        assert_eq!(stretches.len(), 2);
        assert_eq!(stretches[0].name, "Straume - Lyderhorntunnelen");
        assert_eq!(stretches[0].segment_ids, vec!["100277", "100176", "100156"]);
        assert_eq!(stretches[1].name, "Lyderhorntunnelen - Straume");
    }

    #[test]
    fn test_interest_set_flattens_all_ids() {
        let file = write_file(VALID_JSON);
        let stretches = load_stretches(file.path()).unwrap();
        let ids = interest_set(&stretches);

        assert_eq!(ids.len(), 5);
        assert!(ids.contains("100277"));
        assert!(ids.contains("100173"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_stretches(Path::new("/nonexistent/stretches.json")).unwrap_err();
        assert!(matches!(err, StretchConfigError::Io { .. }));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let file = write_file("{ not json ]");
        let err = load_stretches(file.path()).unwrap_err();
        assert!(matches!(err, StretchConfigError::Json { .. }));
    }

    #[test]
    fn test_empty_array_is_rejected() {
        let file = write_file("[]");
        let err = load_stretches(file.path()).unwrap_err();
        assert!(matches!(err, StretchConfigError::Empty { .. }));
    }

    #[test]
    fn test_stretch_without_segments_is_rejected() {
        let file = write_file(r#"[{ "stretch": "x", "stretchIDs": [] }]"#);
        let err = load_stretches(file.path()).unwrap_err();
        assert!(matches!(err, StretchConfigError::Empty { .. }));
    }
}
