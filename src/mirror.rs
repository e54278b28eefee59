//! Write-only disk mirror for diagnostics
//!
//! Mirrors the latest raw DATEX II document and the latest aggregated table to
//! disk so credential or aggregation problems can be inspected after the fact.
//! The mirror is never read back — the in-memory cache is the only source of
//! truth — and a failed write only produces a warning.

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::warn;

use crate::aggregate::StretchResult;
use crate::datex::SegmentMeasurement;

const RAW_DOCUMENT_FILE: &str = "travel_time_snapshot.xml";
const MEASUREMENTS_FILE: &str = "travel_time_filtered.json";
const RESULT_TABLE_FILE: &str = "result_table.json";

/// Mirrors pipeline artifacts into a cache directory
#[derive(Debug, Clone)]
pub struct DiskMirror {
    mirror_dir: PathBuf,
}

impl DiskMirror {
    /// Creates a mirror under the XDG cache directory
    /// (`~/.cache/veitider/` on Linux)
    ///
    /// Returns `None` when no cache directory can be determined; the service
    /// runs fine without a mirror.
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "veitider")?;
        Some(Self {
            mirror_dir: project_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Creates a mirror at an explicit directory
    pub fn with_dir(mirror_dir: PathBuf) -> Self {
        Self { mirror_dir }
    }

    /// Writes the latest raw document; failures are logged, not returned
    pub fn write_raw_document(&self, xml: &str) {
        if let Err(e) = self.write(RAW_DOCUMENT_FILE, xml.as_bytes()) {
            warn!(error = %e, "failed to mirror raw document to disk");
        }
    }

    /// Writes the measurements that survived interest-set filtering
    pub fn write_measurements(&self, measurements: &[SegmentMeasurement]) {
        let json = match serde_json::to_vec_pretty(measurements) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize measurements for mirror");
                return;
            }
        };
        if let Err(e) = self.write(MEASUREMENTS_FILE, &json) {
            warn!(error = %e, "failed to mirror measurements to disk");
        }
    }

    /// Writes the latest aggregated table as pretty JSON
    pub fn write_result_table(&self, results: &[StretchResult]) {
        let json = match serde_json::to_vec_pretty(results) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize result table for mirror");
                return;
            }
        };
        if let Err(e) = self.write(RESULT_TABLE_FILE, &json) {
            warn!(error = %e, "failed to mirror result table to disk");
        }
    }

    fn write(&self, file: &str, bytes: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.mirror_dir)?;
        fs::write(self.mirror_dir.join(file), bytes)
    }
}
