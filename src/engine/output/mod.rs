/*
    Rule compiler.
    Turns a catalog snapshot into Karabiner rules. Compilation never touches
    the catalog; writing the result out lives in `apply`.
*/

pub mod apply;
pub mod karabiner;
pub mod keystrokes;

use super::groups::{group_chords, DisabledGroups};
use super::store::write_atomic;
use super::{Chord, OutputType, Sensitivity};
use crate::error::PersistenceError;
use karabiner::{
    key_code_name, modifier_name, FromEvent, FromModifiers, KeyCode, Manipulator, Parameters,
    Rule, SimultaneousOptions, ToEvent,
};
use keystrokes::{transliterate, KeyStroke};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const RULE_PREFIX: &str = "Chordkit:";

/// A fixed shortcut that runs a shell command, independent of any chord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Launcher {
    pub description: String,
    pub key_code: String,
    pub modifiers: Vec<String>,
    pub shell_command: String,
}

pub fn default_launchers() -> Vec<Launcher> {
    vec![
        Launcher {
            description: "Launch Impulse Mode (control+option+delete)".to_string(),
            key_code: "delete_or_backspace".to_string(),
            modifiers: vec!["control".to_string(), "option".to_string()],
            shell_command: "osascript \
                -e 'tell application \"Terminal\" to do script \"chordkit impulse\"' \
                -e 'tell application \"Terminal\" to activate'"
                .to_string(),
        },
        // Asks for keys and output in a dialog and queues the chord, without a terminal.
        Launcher {
            description: "Launch Quick Chord Dialog (command+option+delete)".to_string(),
            key_code: "delete_or_backspace".to_string(),
            modifiers: vec!["command".to_string(), "option".to_string()],
            shell_command: "osascript \
                -e 'set k to text returned of (display dialog \"Keys\" default answer \"\")' \
                -e 'set o to text returned of (display dialog \"Output\" default answer \"\")' \
                -e 'set q to quoted form of k & \" \" & quoted form of o' \
                -e 'do shell script \"chordkit queue \" & q'"
                .to_string(),
        },
        Launcher {
            description: "Sync Queued Chords (shift+option+delete)".to_string(),
            key_code: "delete_or_backspace".to_string(),
            modifiers: vec!["shift".to_string(), "option".to_string()],
            shell_command: "chordkit sync".to_string(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRules {
    pub rules: Vec<Rule>,
    pub chord_count: usize,
    pub skipped_groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Compiler {
    pub sensitivity: Sensitivity,
    pub prefix: String,
    pub launchers: Vec<Launcher>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new(Sensitivity::default())
    }
}

impl Compiler {
    pub fn new(sensitivity: Sensitivity) -> Self {
        Compiler {
            sensitivity,
            prefix: RULE_PREFIX.to_string(),
            launchers: default_launchers(),
        }
    }

    pub fn with_launchers(mut self, launchers: Vec<Launcher>) -> Self {
        self.launchers = launchers;
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Launcher rules first, then one rule per enabled group.
    pub fn compile<'a, I>(&self, chords: I, disabled: &DisabledGroups) -> CompiledRules
    where
        I: IntoIterator<Item = &'a Chord>,
    {
        let mut rules = self.launcher_rules();
        let mut chord_count = 0;
        let mut skipped_groups = vec![];

        for group in group_chords(chords) {
            if !disabled.is_enabled(&group.name) {
                debug!(group = %group.name, "skipping disabled group");
                skipped_groups.push(group.name);
                continue;
            }
            let manipulators: Vec<Manipulator> = group
                .chords
                .iter()
                .filter_map(|c| self.chord_manipulator(c))
                .collect();
            if manipulators.is_empty() {
                continue;
            }
            chord_count += manipulators.len();
            rules.push(Rule {
                description: format!("{} {}", self.prefix, group.name),
                manipulators,
            });
        }

        CompiledRules {
            rules,
            chord_count,
            skipped_groups,
        }
    }

    /// A standalone rule for one chord, as used by the per-group export files.
    pub fn chord_rule(&self, chord: &Chord) -> Option<Rule> {
        let manipulator = self.chord_manipulator(chord)?;
        Some(Rule {
            description: format!(
                "{} {} → {} (sensitivity: {}ms)",
                self.prefix,
                chord.input_keys,
                chord.output_text,
                self.sensitivity.threshold_ms(&chord.input_keys)
            ),
            manipulators: vec![manipulator],
        })
    }

    pub fn chord_manipulator(&self, chord: &Chord) -> Option<Manipulator> {
        let keys = chord.input_keys.non_modifiers().keys();
        if keys.is_empty() {
            warn!(keys = %chord.input_keys, "chord has no non-modifier keys, not compiled");
            return None;
        }
        let mandatory: Vec<String> = chord
            .input_keys
            .modifiers()
            .keys()
            .into_iter()
            .filter_map(modifier_name)
            .map(str::to_string)
            .collect();

        Some(Manipulator {
            kind: "basic".to_string(),
            from: FromEvent {
                simultaneous: Some(
                    keys.iter()
                        .map(|k| KeyCode {
                            key_code: key_code_name(k).to_string(),
                        })
                        .collect(),
                ),
                simultaneous_options: Some(SimultaneousOptions::default()),
                modifiers: (!mandatory.is_empty()).then(|| FromModifiers { mandatory }),
                ..Default::default()
            },
            to: self.output_events(chord),
            conditions: vec![],
            parameters: Some(Parameters {
                simultaneous_threshold_milliseconds: self
                    .sensitivity
                    .threshold_ms(&chord.input_keys),
            }),
        })
    }

    pub fn output_events(&self, chord: &Chord) -> Vec<ToEvent> {
        match chord.output_type {
            OutputType::Text | OutputType::Macro => text_events(&chord.output_text),
            OutputType::Command => command_events(&chord.output_text),
        }
    }

    pub fn launcher_rules(&self) -> Vec<Rule> {
        self.launchers
            .iter()
            .map(|l| Rule {
                description: format!("{} {}", self.prefix, l.description),
                manipulators: vec![Manipulator {
                    kind: "basic".to_string(),
                    from: FromEvent {
                        key_code: Some(l.key_code.clone()),
                        modifiers: Some(FromModifiers {
                            mandatory: l.modifiers.clone(),
                        }),
                        ..Default::default()
                    },
                    to: vec![ToEvent::shell(&l.shell_command)],
                    conditions: vec![],
                    parameters: None,
                }],
            })
            .collect()
    }

    /// One `{title, rules}` file per group plus one for the launchers.
    pub fn export_rule_files<'a, I>(
        &self,
        chords: I,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, PersistenceError>
    where
        I: IntoIterator<Item = &'a Chord>,
    {
        fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))?;
        let mut written = vec![];

        for group in group_chords(chords) {
            let rules: Vec<Rule> = group.chords.iter().filter_map(|c| self.chord_rule(c)).collect();
            if rules.is_empty() {
                continue;
            }
            let path = dir.join(format!("{}.json", export_file_stem(&group.name)));
            write_rule_file(&path, &format!("{} {}", self.prefix, group.name), &rules)?;
            written.push(path);
        }

        let path = dir.join("launcher_rules.json");
        write_rule_file(&path, &format!("{} Launchers", self.prefix), &self.launcher_rules())?;
        written.push(path);
        Ok(written)
    }
}

/// Keystrokes for the text, then one space so consecutive chords stay separate words.
fn text_events(text: &str) -> Vec<ToEvent> {
    let mut events: Vec<ToEvent> = transliterate(text).iter().map(to_event).collect();
    events.push(ToEvent::key("spacebar"));
    events
}

fn command_events(command: &str) -> Vec<ToEvent> {
    vec![ToEvent::shell(command)]
}

fn to_event(stroke: &KeyStroke) -> ToEvent {
    ToEvent {
        key_code: Some(stroke.key_code.clone()),
        modifiers: if stroke.shift {
            vec!["shift".to_string()]
        } else {
            vec![]
        },
        shell_command: None,
    }
}

fn export_file_stem(group: &str) -> String {
    group
        .to_lowercase()
        .replace('+', "plus")
        .replace(['(', ')'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn write_rule_file(path: &Path, title: &str, rules: &[Rule]) -> Result<(), PersistenceError> {
    let doc = serde_json::json!({ "title": title, "rules": rules });
    let json = serde_json::to_string_pretty(&doc).map_err(|e| PersistenceError::Serialize {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    write_atomic(path, json.as_bytes())
}
