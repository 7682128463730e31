/*
    Durable chord storage.
    Every save rewrites the whole document. The previous copy is moved aside
    first and only deleted once the new one is on disk.
*/

use super::Chord;
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub chords: Vec<Chord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub saved_at: DateTime<Utc>,
    pub chord_count: usize,
}

impl CatalogDocument {
    pub fn new(chords: Vec<Chord>) -> Self {
        CatalogDocument {
            version: FORMAT_VERSION.to_string(),
            metadata: Metadata {
                saved_at: Utc::now(),
                chord_count: chords.len(),
            },
            chords,
        }
    }
}

pub trait ChordStore {
    fn load(&self) -> Result<Vec<Chord>, PersistenceError>;
    fn save(&self, chords: &[Chord]) -> Result<(), PersistenceError>;
}

pub struct YamlStore {
    path: PathBuf,
}

impl YamlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        YamlStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }
}

impl ChordStore for YamlStore {
    fn load(&self) -> Result<Vec<Chord>, PersistenceError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| PersistenceError::io(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(vec![]);
        }
        let doc: CatalogDocument =
            serde_yaml::from_str(&content).map_err(|e| PersistenceError::Deserialize {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        if doc.version != FORMAT_VERSION {
            warn!(version = %doc.version, "loading chord file written by another version");
        }
        debug!(count = doc.chords.len(), path = %self.path.display(), "loaded chords");
        Ok(doc.chords)
    }

    fn save(&self, chords: &[Chord]) -> Result<(), PersistenceError> {
        let doc = CatalogDocument::new(chords.to_vec());
        let yaml = serde_yaml::to_string(&doc).map_err(|e| PersistenceError::Serialize {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        write_with_backup(&self.path, &self.backup_path(), yaml.as_bytes())
    }
}

/// Move the current file to `backup`, write `contents`, then drop the backup.
/// A failed write puts the backup back in place before returning the error.
pub fn write_with_backup(
    path: &Path,
    backup: &Path,
    contents: &[u8],
) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
    }

    let had_previous = path.exists();
    if had_previous {
        fs::rename(path, backup).map_err(|e| PersistenceError::io(path, e))?;
    }

    if let Err(e) = fs::write(path, contents) {
        if had_previous {
            if let Err(restore) = fs::rename(backup, path) {
                warn!(error = %restore, "could not restore {}", backup.display());
            }
        } else {
            let _ = fs::remove_file(path);
        }
        return Err(PersistenceError::io(path, e));
    }

    if had_previous {
        if let Err(e) = fs::remove_file(backup) {
            warn!(error = %e, "could not remove backup {}", backup.display());
        }
    }
    Ok(())
}

/// Write through a sibling temp file and rename over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
    }
    let tmp = path.with_extension("tmp");
    if let Err(e) = fs::write(&tmp, contents) {
        let _ = fs::remove_file(&tmp);
        return Err(PersistenceError::io(&tmp, e));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PersistenceError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::keys::KeySet;
    use crate::engine::OutputType;
    use tempfile::tempdir;

    fn chord(spec: &str, out: &str) -> Chord {
        Chord::new(KeySet::parse(spec).unwrap(), out.to_string())
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = YamlStore::new(dir.path().join("chords.yaml"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_and_reload_is_lossless() {
        let dir = tempdir().unwrap();
        let store = YamlStore::new(dir.path().join("nested").join("chords.yaml"));

        let mut first = chord("asd", "and");
        first.usage_count = 7;
        first.category = Some("words".to_string());
        first.tags = vec!["common".to_string(), "english".to_string()];
        let mut second = chord("cmd+t+h", "echo hi");
        second.output_type = OutputType::Command;

        store.save(&[first.clone(), second.clone()]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![first, second]);
        assert!(!store.backup_path().exists());
    }

    #[test]
    fn document_carries_version_and_count() {
        let dir = tempdir().unwrap();
        let store = YamlStore::new(dir.path().join("chords.yaml"));
        store.save(&[chord("as", "as"), chord("df", "if")]).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(doc["version"].as_str(), Some(FORMAT_VERSION));
        assert_eq!(doc["metadata"]["chord_count"].as_u64(), Some(2));
        assert_eq!(doc["chords"][0]["input_keys"][0].as_str(), Some("a"));
    }

    #[test]
    fn failed_write_restores_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chords.yaml");
        fs::write(&path, "original").unwrap();

        // a directory squatting on the backup name makes the rename fail first
        let backup = dir.path().join("chords.yaml.bak");
        fs::create_dir(&backup).unwrap();
        fs::write(backup.join("keep"), "x").unwrap();

        assert!(write_with_backup(&path, &backup, b"new").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn atomic_write_replaces_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("karabiner.json");
        fs::write(&path, "{}").unwrap();
        write_atomic(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        assert!(!path.with_extension("tmp").exists());
    }
}
