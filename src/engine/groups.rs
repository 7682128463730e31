/*
    Rule groups.
    A group is either a category or a length bucket. Groups can be switched off
    as a whole; the switched-off names live in their own small document.
*/

use super::store::write_atomic;
use super::Chord;
use crate::error::PersistenceError;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Group<'a> {
    pub name: String,
    pub chords: Vec<&'a Chord>,
}

impl Group<'_> {
    pub fn longest(&self) -> usize {
        self.chords
            .iter()
            .map(|c| c.non_modifier_count())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStatus {
    pub name: String,
    pub enabled: bool,
    pub chord_count: usize,
}

pub fn group_name(chord: &Chord) -> String {
    if let Some(category) = chord.category.as_deref().filter(|c| !c.is_empty()) {
        return format!("{} Chords", title_case(category));
    }
    match chord.non_modifier_count() {
        0..=2 => "2-Key Chords (Quick)".to_string(),
        3 => "3-Key Chords (Standard)".to_string(),
        4 => "4-Key Chords (Extended)".to_string(),
        _ => "5+ Key Chords (Complex)".to_string(),
    }
}

fn title_case(s: &str) -> String {
    s.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Longer chords come first everywhere, so a short chord never shadows a
/// longer one that contains it.
pub fn group_chords<'a, I>(chords: I) -> Vec<Group<'a>>
where
    I: IntoIterator<Item = &'a Chord>,
{
    let mut by_name: BTreeMap<String, Vec<&'a Chord>> = BTreeMap::new();
    for chord in chords {
        by_name.entry(group_name(chord)).or_default().push(chord);
    }

    let mut groups: Vec<Group<'a>> = by_name
        .into_iter()
        .map(|(name, mut chords)| {
            chords.sort_by_cached_key(|c| {
                (Reverse(c.non_modifier_count()), c.input_keys.to_string())
            });
            Group { name, chords }
        })
        .collect();
    groups.sort_by(|a, b| b.longest().cmp(&a.longest()).then_with(|| a.name.cmp(&b.name)));
    groups
}

pub fn group_status<'a, I>(chords: I, disabled: &DisabledGroups) -> Vec<GroupStatus>
where
    I: IntoIterator<Item = &'a Chord>,
{
    group_chords(chords)
        .into_iter()
        .map(|g| GroupStatus {
            enabled: disabled.is_enabled(&g.name),
            chord_count: g.chords.len(),
            name: g.name,
        })
        .collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DisabledDocument {
    #[serde(default)]
    disabled_groups: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DisabledGroups {
    path: Option<PathBuf>,
    names: BTreeSet<String>,
}

impl DisabledGroups {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let names = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| PersistenceError::io(&path, e))?;
            if content.trim().is_empty() {
                BTreeSet::new()
            } else {
                serde_yaml::from_str::<DisabledDocument>(&content)
                    .map_err(|e| PersistenceError::Deserialize {
                        path: path.clone(),
                        message: e.to_string(),
                    })?
                    .disabled_groups
            }
        } else {
            BTreeSet::new()
        };
        Ok(DisabledGroups {
            path: Some(path),
            names,
        })
    }

    /// A set that is never written anywhere.
    pub fn in_memory<I: IntoIterator<Item = String>>(names: I) -> Self {
        DisabledGroups {
            path: None,
            names: names.into_iter().collect(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_enabled(&self, group: &str) -> bool {
        !self.names.contains(group)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Returns whether the group is enabled afterwards.
    pub fn set_enabled(&mut self, group: &str, enabled: bool) -> Result<bool, PersistenceError> {
        let changed = if enabled {
            self.names.remove(group)
        } else {
            self.names.insert(group.to_string())
        };
        if changed {
            if let Err(e) = self.save() {
                if enabled {
                    self.names.insert(group.to_string());
                } else {
                    self.names.remove(group);
                }
                return Err(e);
            }
            info!(group, enabled, "group state changed");
        }
        Ok(enabled)
    }

    pub fn toggle(&mut self, group: &str) -> Result<bool, PersistenceError> {
        let enable = !self.is_enabled(group);
        self.set_enabled(group, enable)
    }

    fn save(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let doc = DisabledDocument {
            disabled_groups: self.names.clone(),
        };
        let yaml = serde_yaml::to_string(&doc).map_err(|e| PersistenceError::Serialize {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(path, yaml.as_bytes())
    }
}
