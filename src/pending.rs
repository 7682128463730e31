/*
    Queued chords.
    `queue` appends one JSON line per chord without touching the catalog, so it
    stays fast enough to bind to a launcher. `sync` imports the lines later.
*/

use crate::engine::catalog::{Catalog, MIN_CHORD_KEYS};
use crate::engine::keys::KeySet;
use crate::engine::store::ChordStore;
use crate::engine::Chord;
use crate::error::{CatalogError, PersistenceError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const QUICK_CATEGORY: &str = "quick_impulse";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChord {
    pub input_keys: KeySet,
    pub output_text: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub imported: Vec<Chord>,
    pub skipped_conflicts: usize,
    pub failed: Vec<(String, ValidationError)>,
}

#[derive(Debug, Clone)]
pub struct PendingQueue {
    path: PathBuf,
}

impl PendingQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PendingQueue { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&self, keys: KeySet, output_text: &str) -> Result<PendingChord, CatalogError> {
        if keys.len() < MIN_CHORD_KEYS {
            return Err(ValidationError::TooFewKeys(keys.len()).into());
        }
        if output_text.trim().is_empty() {
            return Err(ValidationError::EmptyOutput.into());
        }
        let entry = PendingChord {
            input_keys: keys,
            output_text: output_text.to_string(),
            category: Some(QUICK_CATEGORY.to_string()),
            created_at: Utc::now(),
        };
        let line = serde_json::to_string(&entry).map_err(|e| PersistenceError::Serialize {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| PersistenceError::io(&self.path, e))?;
        Ok(entry)
    }

    /// Unreadable lines are logged and left out.
    pub fn load(&self) -> Result<Vec<PendingChord>, PersistenceError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| PersistenceError::io(&self.path, e))?;
        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "skipping unreadable queued chord");
                    None
                }
            })
            .collect())
    }

    pub fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }
}

/// Import every queued chord. Conflicts are skipped quietly; the queue is
/// cleared once at least one chord made it in.
pub fn sync_pending<S: ChordStore>(
    queue: &PendingQueue,
    catalog: &mut Catalog<S>,
) -> Result<SyncReport, PersistenceError> {
    let mut report = SyncReport::default();
    for entry in queue.load()? {
        let category = entry.category.as_deref().unwrap_or(QUICK_CATEGORY);
        match catalog.add(&entry.input_keys.keys(), &entry.output_text, Some(category), &[]) {
            Ok(chord) => report.imported.push(chord),
            Err(CatalogError::Conflict(_)) => report.skipped_conflicts += 1,
            Err(CatalogError::Validation(e)) => {
                warn!(keys = %entry.input_keys, error = %e, "queued chord rejected");
                report.failed.push((entry.input_keys.to_string(), e));
            }
            Err(CatalogError::Persistence(e)) => return Err(e),
        }
    }
    if !report.imported.is_empty() {
        queue.clear()?;
        info!(imported = report.imported.len(), "queued chords synced");
    }
    Ok(report)
}
