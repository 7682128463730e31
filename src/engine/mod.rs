/*
    Main chord module.
    Holds the chord record, output kinds and the sensitivity table shared by
    the impulse detector and the rule compiler.
*/

pub mod batch;
pub mod catalog;
pub mod groups;
pub mod keys;
pub mod output;
pub mod store;
pub mod suggest;

use chrono::{DateTime, Utc};
use keys::KeySet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Text,
    Command,
    // Reserved; compiles as Text.
    Macro,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub id: Uuid,
    pub input_keys: KeySet,
    pub output_text: String,
    #[serde(default)]
    pub output_type: OutputType,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Chord {
    pub fn new(input_keys: KeySet, output_text: String) -> Self {
        let now = Utc::now();
        Chord {
            id: Uuid::new_v4(),
            input_keys,
            output_text,
            output_type: OutputType::Text,
            created_at: now,
            modified_at: now,
            usage_count: 0,
            category: None,
            tags: vec![],
        }
    }

    pub fn non_modifier_count(&self) -> usize {
        self.input_keys.non_modifier_count()
    }
}

/// Millisecond thresholds by chord length. Shorter chords get stricter timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sensitivity {
    pub two_keys: u64,
    pub three_keys: u64,
    pub four_keys: u64,
    pub five_plus_keys: u64,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity {
            two_keys: 50,
            three_keys: 75,
            four_keys: 100,
            five_plus_keys: 125,
        }
    }
}

impl Sensitivity {
    // Only non-modifier keys count towards the length.
    pub fn threshold_ms(&self, keys: &KeySet) -> u64 {
        self.for_length(keys.non_modifier_count())
    }

    pub fn for_length(&self, non_modifier_keys: usize) -> u64 {
        match non_modifier_keys {
            0..=2 => self.two_keys,
            3 => self.three_keys,
            4 => self.four_keys,
            _ => self.five_plus_keys,
        }
    }

    pub fn label(&self, keys: &KeySet) -> &'static str {
        match keys.non_modifier_count() {
            0..=2 => "strict",
            3 => "moderate",
            4 => "default",
            _ => "relaxed",
        }
    }
}
