/*
    Karabiner-Elements complex modification types.
    Only the parts we emit are modeled; the rest of karabiner.json is handled
    as raw JSON so foreign settings survive a rewrite.
*/

use serde::{Deserialize, Serialize};

pub const SIMULTANEOUS_THRESHOLD: &str = "basic.simultaneous_threshold_milliseconds";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub description: String,
    pub manipulators: Vec<Manipulator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manipulator {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: FromEvent,
    pub to: Vec<ToEvent>,
    #[serde(default)]
    pub conditions: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(rename = "basic.simultaneous_threshold_milliseconds")]
    pub simultaneous_threshold_milliseconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FromEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simultaneous: Option<Vec<KeyCode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simultaneous_options: Option<SimultaneousOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<FromModifiers>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCode {
    pub key_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimultaneousOptions {
    pub key_down_order: String,
    pub key_up_order: String,
    pub key_up_when: String,
}

impl Default for SimultaneousOptions {
    fn default() -> Self {
        SimultaneousOptions {
            key_down_order: "insensitive".to_string(),
            key_up_order: "insensitive".to_string(),
            key_up_when: "any".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromModifiers {
    pub mandatory: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_command: Option<String>,
}

impl ToEvent {
    pub fn key(key_code: &str) -> Self {
        ToEvent {
            key_code: Some(key_code.to_string()),
            ..Default::default()
        }
    }

    pub fn shell(command: &str) -> Self {
        ToEvent {
            shell_command: Some(command.to_string()),
            ..Default::default()
        }
    }
}

/// Karabiner's name for one of our modifier keys.
pub fn modifier_name(key: &str) -> Option<&'static str> {
    match key {
        "cmd" => Some("command"),
        "shift" => Some("shift"),
        "option" => Some("option"),
        "control" => Some("control"),
        _ => None,
    }
}

/// Karabiner key code for a non-modifier vocabulary key.
pub fn key_code_name(key: &str) -> &str {
    match key {
        "return" => "return_or_enter",
        "space" => "spacebar",
        "backspace" => "delete_or_backspace",
        "delete" => "delete_forward",
        "up" => "up_arrow",
        "down" => "down_arrow",
        "left" => "left_arrow",
        "right" => "right_arrow",
        other => other,
    }
}
