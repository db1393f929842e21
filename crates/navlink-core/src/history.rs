//! Persistence of time-stamped tool position history.
//!
//! The store appends `(transform, timestamp, uid)` records to a JSON-lines
//! file in the logging folder. Saving is incremental: only entries at or
//! after the last checkpoint are written, and the checkpoint advances after
//! a successful write. Loading is forgiving: it streams records until end
//! of file or the first malformed line, collects unknown uids into a
//! missing-tools report, and never fails outright on bad data.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TrackingError;
use crate::registry::ToolRegistry;
use crate::transform::{now_ms, TimestampMs, Transform3D};

/// File name of the position-history log inside the logging folder.
pub const HISTORY_FILE_NAME: &str = "toolpositions.jsonl";

/// One persisted position sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Uid of the tool the sample belongs to.
    pub uid: String,
    /// Sample time, milliseconds since the Unix epoch.
    pub timestamp: TimestampMs,
    /// The recorded pose.
    pub transform: Transform3D,
}

/// Outcome of a [`PositionHistoryStore::load`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Number of records applied to registered tools.
    pub records: usize,
    /// Uids found in the file but not in the configuration, deduplicated,
    /// empty strings discarded.
    pub missing_tools: Vec<String>,
}

impl LoadReport {
    /// Whether every record matched a registered tool.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_tools.is_empty()
    }
}

/// Incremental reader/writer for per-tool position history.
#[derive(Debug)]
pub struct PositionHistoryStore {
    path: PathBuf,
    checkpoint: TimestampMs,
}

impl PositionHistoryStore {
    /// Create a store writing to `logging_folder/toolpositions.jsonl`.
    #[must_use]
    pub fn new(logging_folder: &Path) -> Self {
        Self {
            path: logging_folder.join(HISTORY_FILE_NAME),
            checkpoint: 0,
        }
    }

    /// The file this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last-saved checkpoint.
    #[must_use]
    pub const fn checkpoint(&self) -> TimestampMs {
        self.checkpoint
    }

    /// Append every history entry with timestamp >= the checkpoint, for
    /// every registered tool. Advances the checkpoint on success and
    /// returns the number of records written.
    pub fn save(&mut self, registry: &ToolRegistry) -> Result<usize, TrackingError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        let mut written = 0;
        for (uid, tool) in registry.iter() {
            for (timestamp, transform) in tool.history().range(self.checkpoint..) {
                let record = PositionRecord {
                    uid: uid.to_string(),
                    timestamp: *timestamp,
                    transform: *transform,
                };
                serde_json::to_writer(&mut writer, &record)
                    .map_err(|e| TrackingError::Persistence(e.into()))?;
                writer.write_all(b"\n")?;
                written += 1;
            }
        }
        writer.flush()?;

        self.checkpoint = now_ms();
        debug!(records = written, path = %self.path.display(), "saved position history");
        Ok(written)
    }

    /// Stream records back into the matching tools' histories.
    ///
    /// Reads until end of file or the first malformed record. Records for
    /// unknown uids are collected into the report instead of failing the
    /// load. A missing file yields an empty report. Advances the
    /// checkpoint so a following save does not re-append what was loaded.
    pub fn load(&mut self, registry: &ToolRegistry) -> Result<LoadReport, TrackingError> {
        let mut report = LoadReport::default();

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.checkpoint = now_ms();
                return Ok(report);
            }
            Err(e) => return Err(TrackingError::Persistence(e)),
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: PositionRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "stopping position-history load at malformed record");
                    break;
                }
            };

            match registry.get(&record.uid) {
                Some(tool) => {
                    tool.insert_history(record.timestamp, record.transform);
                    report.records += 1;
                }
                None => {
                    if !record.uid.is_empty() && !report.missing_tools.contains(&record.uid) {
                        report.missing_tools.push(record.uid);
                    }
                }
            }
        }

        self.checkpoint = now_ms();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::tool::{Capability, CapabilitySet, Tool, TrackedTool};

    fn registry_with(uids: &[&str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.add_real_tools(
            uids.iter()
                .map(|uid| {
                    Arc::new(Tool::new(*uid, *uid, CapabilitySet::single(Capability::Pointer)))
                })
                .collect(),
        );
        registry
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let registry = registry_with(&["p1"]);
        let tool = registry.get("p1").unwrap();
        tool.set_transform(Transform3D::translation(1.0, 2.0, 3.0), 100);
        tool.set_transform(Transform3D::translation(4.0, 5.0, 6.0), 200);

        let mut store = PositionHistoryStore::new(dir.path());
        assert_eq!(store.save(&registry).unwrap(), 2);

        let fresh = registry_with(&["p1"]);
        let mut store2 = PositionHistoryStore::new(dir.path());
        let report = store2.load(&fresh).unwrap();
        assert_eq!(report.records, 2);
        assert!(report.is_clean());

        let history = fresh.get("p1").unwrap().history();
        assert_eq!(history.len(), 2);
        assert!(history[&200].approx_eq(&Transform3D::translation(4.0, 5.0, 6.0), 1e-12));
    }

    #[test]
    fn checkpoint_makes_saves_incremental() {
        let dir = tempdir().unwrap();
        let registry = registry_with(&["p1"]);
        let tool = registry.get("p1").unwrap();
        tool.set_transform(Transform3D::identity(), 100);

        let mut store = PositionHistoryStore::new(dir.path());
        assert_eq!(store.save(&registry).unwrap(), 1);
        // Nothing new since the checkpoint.
        assert_eq!(store.save(&registry).unwrap(), 0);

        tool.set_transform(Transform3D::identity(), now_ms() + 1_000);
        assert_eq!(store.save(&registry).unwrap(), 1);
    }

    #[test]
    fn unknown_uids_go_into_missing_report() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE_NAME);
        let known = PositionRecord {
            uid: "p1".to_string(),
            timestamp: 10,
            transform: Transform3D::identity(),
        };
        let unknown = PositionRecord {
            uid: "ToolX".to_string(),
            timestamp: 20,
            transform: Transform3D::identity(),
        };
        let mut content = String::new();
        for record in [&known, &unknown, &unknown] {
            content.push_str(&serde_json::to_string(record).unwrap());
            content.push('\n');
        }
        // An empty uid must be discarded, not reported.
        content.push_str(
            &serde_json::to_string(&PositionRecord {
                uid: String::new(),
                timestamp: 30,
                transform: Transform3D::identity(),
            })
            .unwrap(),
        );
        content.push('\n');
        std::fs::write(&path, content).unwrap();

        let registry = registry_with(&["p1"]);
        let mut store = PositionHistoryStore::new(dir.path());
        let report = store.load(&registry).unwrap();

        assert_eq!(report.records, 1);
        assert_eq!(report.missing_tools, vec!["ToolX".to_string()]);
        assert_eq!(registry.get("p1").unwrap().history().len(), 1);
    }

    #[test]
    fn malformed_record_stops_but_keeps_earlier_ones() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE_NAME);
        let good = serde_json::to_string(&PositionRecord {
            uid: "p1".to_string(),
            timestamp: 10,
            transform: Transform3D::identity(),
        })
        .unwrap();
        std::fs::write(&path, format!("{good}\nnot-json\n{good}\n")).unwrap();

        let registry = registry_with(&["p1"]);
        let mut store = PositionHistoryStore::new(dir.path());
        let report = store.load(&registry).unwrap();
        assert_eq!(report.records, 1);
    }

    #[test]
    fn missing_file_is_an_empty_load() {
        let dir = tempdir().unwrap();
        let registry = registry_with(&[]);
        let mut store = PositionHistoryStore::new(dir.path());
        let report = store.load(&registry).unwrap();
        assert_eq!(report, LoadReport::default());
    }
}
