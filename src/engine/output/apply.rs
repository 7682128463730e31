/*
    Writing compiled rules into karabiner.json.
    Rules we own are recognised by their description prefix and replaced
    wholesale; everything else in the file is carried over untouched.
*/

use super::karabiner::SIMULTANEOUS_THRESHOLD;
use super::{CompiledRules, Compiler};
use crate::engine::catalog::Catalog;
use crate::engine::groups::DisabledGroups;
use crate::engine::store::{write_atomic, ChordStore};
use crate::error::CompileError;
use chrono::Local;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_PROFILE: &str = "Chordkit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub rules_written: usize,
    pub rules_replaced: usize,
    pub rules_preserved: usize,
    pub backup: Option<PathBuf>,
}

/// Returned by `pause`; hand it back to `resume` to reselect the profile.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PausedProfile {
    pub previous: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub profile_name: String,
    pub backup_count: usize,
    pub global_threshold_ms: u64,
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        EngineConfig {
            path: path.into(),
            profile_name: DEFAULT_PROFILE.to_string(),
            backup_count: 5,
            global_threshold_ms: 100,
        }
    }

    pub fn load(&self) -> Result<Value, CompileError> {
        if !self.path.exists() {
            return Ok(default_document());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| CompileError::Read {
            path: self.path.clone(),
            source,
        })?;
        let doc: Value = serde_json::from_str(&content).map_err(|source| CompileError::Parse {
            path: self.path.clone(),
            source,
        })?;
        if !doc.is_object() {
            return Err(CompileError::InvalidDocument(
                "top level is not an object".to_string(),
            ));
        }
        Ok(doc)
    }

    fn save(&self, doc: &Value) -> Result<(), CompileError> {
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| CompileError::InvalidDocument(e.to_string()))?;
        write_atomic(&self.path, json.as_bytes())?;
        Ok(())
    }

    /// Copy the current file aside under a timestamped name, keeping the newest few.
    pub fn backup(&self) -> Result<Option<PathBuf>, CompileError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let stem = file_stem(&self.path);
        let stamp = Local::now().format("%Y%m%d_%H%M%S%3f");
        let backup = self.path.with_file_name(format!("{stem}.backup.{stamp}.json"));
        fs::copy(&self.path, &backup).map_err(|source| CompileError::Write {
            path: backup.clone(),
            source,
        })?;
        self.prune_backups(&stem);
        Ok(Some(backup))
    }

    fn prune_backups(&self, stem: &str) {
        let Some(dir) = self.path.parent() else {
            return;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        let prefix = format!("{stem}.backup.");
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy())
                    .map_or(false, |n| n.starts_with(&prefix) && n.ends_with(".json"))
            })
            .collect();
        backups.sort();
        let excess = backups.len().saturating_sub(self.backup_count);
        for old in &backups[..excess] {
            if let Err(e) = fs::remove_file(old) {
                warn!(error = %e, "could not remove old backup {}", old.display());
            }
        }
    }

    /// Replace our rules in the managed profile and write the file back.
    pub fn apply(
        &self,
        compiled: &CompiledRules,
        prefix: &str,
    ) -> Result<ApplyReport, CompileError> {
        let mut doc = self.load()?;
        let backup = self.backup()?;

        let profile = self.ensure_profile(&mut doc)?;
        let mods = object_entry(profile, "complex_modifications")?;
        object_entry(mods, "parameters")?
            .insert(SIMULTANEOUS_THRESHOLD.to_string(), json!(self.global_threshold_ms));

        let existing = match mods.remove("rules") {
            Some(Value::Array(rules)) => rules,
            Some(Value::Null) | None => vec![],
            Some(_) => {
                return Err(CompileError::InvalidDocument(
                    "complex_modifications.rules is not a list".to_string(),
                ))
            }
        };
        let before = existing.len();
        let mut rules: Vec<Value> = existing
            .into_iter()
            .filter(|r| !r["description"].as_str().map_or(false, |d| d.starts_with(prefix)))
            .collect();
        let preserved = rules.len();

        for rule in &compiled.rules {
            let value = serde_json::to_value(rule)
                .map_err(|e| CompileError::InvalidDocument(e.to_string()))?;
            rules.push(value);
        }
        mods.insert("rules".to_string(), Value::Array(rules));

        self.save(&doc)?;
        info!(
            rules = compiled.rules.len(),
            chords = compiled.chord_count,
            path = %self.path.display(),
            "applied rules"
        );
        Ok(ApplyReport {
            rules_written: compiled.rules.len(),
            rules_replaced: before - preserved,
            rules_preserved: preserved,
            backup,
        })
    }

    fn ensure_profile<'a>(
        &self,
        doc: &'a mut Value,
    ) -> Result<&'a mut Map<String, Value>, CompileError> {
        let root = doc.as_object_mut().ok_or_else(|| {
            CompileError::InvalidDocument("top level is not an object".to_string())
        })?;
        let profiles = root
            .entry("profiles")
            .or_insert_with(|| json!([]))
            .as_array_mut()
            .ok_or_else(|| CompileError::InvalidDocument("profiles is not a list".to_string()))?;

        let index = match profiles
            .iter()
            .position(|p| p["name"].as_str() == Some(self.profile_name.as_str()))
        {
            Some(i) => i,
            None => {
                let profile = match profiles.first() {
                    Some(template) => {
                        let mut copy = template.clone();
                        copy["name"] = json!(self.profile_name);
                        copy["selected"] = json!(false);
                        copy
                    }
                    None => json!({
                        "name": self.profile_name,
                        "selected": true,
                        "complex_modifications": {
                            "parameters": {
                                SIMULTANEOUS_THRESHOLD: self.global_threshold_ms,
                                "basic.to_delayed_action_delay_milliseconds": 500,
                                "basic.to_if_alone_timeout_milliseconds": 1000,
                                "basic.to_if_held_down_threshold_milliseconds": 500
                            },
                            "rules": []
                        }
                    }),
                };
                debug!(profile = %self.profile_name, "creating profile");
                profiles.push(profile);
                profiles.len() - 1
            }
        };
        profiles[index]
            .as_object_mut()
            .ok_or_else(|| CompileError::InvalidDocument("profile is not an object".to_string()))
    }

    pub fn active_profile(&self) -> Result<Option<String>, CompileError> {
        let doc = self.load()?;
        Ok(selected_profile(&doc))
    }

    pub fn activate(&self) -> Result<(), CompileError> {
        self.select(&self.profile_name.clone())
    }

    /// Switch away from our profile if it is the selected one.
    pub fn pause(&self) -> Result<Option<PausedProfile>, CompileError> {
        let mut doc = self.load()?;
        if selected_profile(&doc).as_deref() != Some(self.profile_name.as_str()) {
            return Ok(None);
        }
        if let Some(profiles) = doc["profiles"].as_array_mut() {
            let mut replaced = false;
            for profile in profiles.iter_mut() {
                let ours = profile["name"].as_str() == Some(self.profile_name.as_str());
                let select = !ours && !replaced;
                replaced |= select;
                profile["selected"] = json!(select);
            }
        }
        self.save(&doc)?;
        info!(profile = %self.profile_name, "paused profile");
        Ok(Some(PausedProfile {
            previous: self.profile_name.clone(),
        }))
    }

    pub fn resume(&self, paused: PausedProfile) -> Result<(), CompileError> {
        self.select(&paused.previous)?;
        info!(profile = %paused.previous, "resumed profile");
        Ok(())
    }

    fn select(&self, name: &str) -> Result<(), CompileError> {
        let mut doc = self.load()?;
        let profiles = doc["profiles"]
            .as_array_mut()
            .ok_or_else(|| CompileError::InvalidDocument("no profiles to select".to_string()))?;
        if !profiles.iter().any(|p| p["name"].as_str() == Some(name)) {
            return Err(CompileError::InvalidDocument(format!("profile {name} not found")));
        }
        for profile in profiles.iter_mut() {
            profile["selected"] = json!(profile["name"].as_str() == Some(name));
        }
        self.save(&doc)
    }
}

/// Compile and apply in one step, the way every catalog change is published.
pub struct RuleSync {
    pub compiler: Compiler,
    pub engine: EngineConfig,
    pub disabled: DisabledGroups,
}

impl RuleSync {
    pub fn sync<S: ChordStore>(&self, catalog: &Catalog<S>) -> Result<ApplyReport, CompileError> {
        let compiled = self.compiler.compile(catalog.iter(), &self.disabled);
        self.engine.apply(&compiled, &self.compiler.prefix)
    }
}

fn default_document() -> Value {
    json!({
        "global": {
            "check_for_updates_on_startup": true,
            "show_in_menu_bar": true,
            "show_profile_name_in_menu_bar": false
        },
        "profiles": []
    })
}

fn selected_profile(doc: &Value) -> Option<String> {
    doc["profiles"]
        .as_array()?
        .iter()
        .find(|p| p["selected"].as_bool().unwrap_or(false))
        .and_then(|p| p["name"].as_str())
        .map(str::to_string)
}

fn object_entry<'a>(
    map: &'a mut Map<String, Value>,
    key: &str,
) -> Result<&'a mut Map<String, Value>, CompileError> {
    let entry = map.entry(key).or_insert_with(|| json!({}));
    if entry.is_null() {
        *entry = json!({});
    }
    entry
        .as_object_mut()
        .ok_or_else(|| CompileError::InvalidDocument(format!("{key} is not an object")))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "karabiner".to_string())
}
