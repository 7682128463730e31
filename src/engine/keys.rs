/*
    Key vocabulary and normalization.
    A key-set is stored as a bitmask over KEY_ORDER, so two key-sets are equal
    exactly when they contain the same canonical keys, whatever order they were typed in.
*/

use crate::error::ValidationError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const KEY_ORDER: [&str; 50] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r", "s",
    "t", "u", "v", "w", "x", "y", "z", //
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", //
    "space", "return", "tab", "delete", "escape", "backspace", "up", "down", "left", "right", //
    "cmd", "shift", "option", "control",
];
pub const MODIFIERS: [&str; 4] = ["cmd", "shift", "option", "control"];
const ALIASES: [(&str, &str); 3] = [("command", "cmd"), ("opt", "option"), ("ctrl", "control")];

lazy_static! {
    static ref KEY_INDEX: HashMap<&'static str, usize> =
        KEY_ORDER.iter().enumerate().map(|(i, k)| (*k, i)).collect();
    static ref MODIFIER_MASK: u64 = MODIFIERS
        .iter()
        .fold(0, |mask, m| mask | 1 << KEY_INDEX[m]);
    static ref SPEC_SEPARATOR: Regex = Regex::new(r"[+,\s]+").unwrap();
    static ref RUN_TOGETHER: Regex = Regex::new(r"^[a-z0-9]+$").unwrap();
}

// Resolve one raw token to its canonical vocabulary entry.
pub fn canonical_key(raw: &str) -> Result<&'static str, ValidationError> {
    let lower = raw.trim().to_lowercase();
    let resolved = ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, key)| *key)
        .unwrap_or(lower.as_str());
    KEY_INDEX
        .get_key_value(resolved)
        .map(|(k, _)| *k)
        .ok_or_else(|| ValidationError::InvalidKey(raw.to_string()))
}

pub fn is_modifier(key: &str) -> bool {
    MODIFIERS.contains(&key)
}

/// Canonicalize raw tokens into the fixed key order. Duplicates collapse.
pub fn normalize<S: AsRef<str>>(raw: &[S]) -> Result<Vec<&'static str>, ValidationError> {
    Ok(KeySet::from_raw(raw)?.keys())
}

/// Split a user key spec such as "a+s+d", "a s d", "asd" or "cmd+a+s" into raw tokens.
pub fn split_key_spec(spec: &str) -> Vec<String> {
    let mut tokens = vec![];
    for part in SPEC_SEPARATOR.split(spec.trim()) {
        if part.is_empty() {
            continue;
        }
        let lower = part.to_lowercase();
        if canonical_key(&lower).is_err() && RUN_TOGETHER.is_match(&lower) {
            tokens.extend(lower.chars().map(|c| c.to_string()));
        } else {
            tokens.push(part.to_string());
        }
    }
    tokens
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeySet(u64);

impl KeySet {
    pub fn new() -> Self {
        KeySet(0)
    }

    pub fn from_raw<S: AsRef<str>>(raw: &[S]) -> Result<Self, ValidationError> {
        let mut set = KeySet::new();
        for token in raw {
            set.insert(canonical_key(token.as_ref())?);
        }
        Ok(set)
    }

    pub fn parse(spec: &str) -> Result<Self, ValidationError> {
        Self::from_raw(&split_key_spec(spec))
    }

    // Callers pass canonical keys only; anything else is ignored.
    pub fn insert(&mut self, key: &str) {
        if let Some(i) = KEY_INDEX.get(key) {
            self.0 |= 1 << i;
        }
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(i) = KEY_INDEX.get(key) {
            self.0 &= !(1 << i);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        KEY_INDEX.get(key).map_or(false, |i| self.0 & 1 << i != 0)
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn keys(&self) -> Vec<&'static str> {
        KEY_ORDER
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & 1 << i != 0)
            .map(|(_, k)| *k)
            .collect()
    }

    pub fn modifiers(&self) -> KeySet {
        KeySet(self.0 & *MODIFIER_MASK)
    }

    pub fn non_modifiers(&self) -> KeySet {
        KeySet(self.0 & !*MODIFIER_MASK)
    }

    pub fn non_modifier_count(&self) -> usize {
        self.non_modifiers().len()
    }

    pub fn union(&self, other: &KeySet) -> KeySet {
        KeySet(self.0 | other.0)
    }

    pub fn intersection(&self, other: &KeySet) -> KeySet {
        KeySet(self.0 & other.0)
    }

    pub fn is_subset(&self, other: &KeySet) -> bool {
        self.0 & other.0 == self.0
    }
}

impl fmt::Display for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keys().join("+"))
    }
}

impl Serialize for KeySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let keys = self.keys();
        let mut seq = serializer.serialize_seq(Some(keys.len()))?;
        for k in keys {
            seq.serialize_element(k)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for KeySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeySetVisitor;
        impl<'de> Visitor<'de> for KeySetVisitor {
            type Value = KeySet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of key names")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<KeySet, A::Error> {
                let mut set = KeySet::new();
                while let Some(raw) = seq.next_element::<String>()? {
                    set.insert(canonical_key(&raw).map_err(de::Error::custom)?);
                }
                Ok(set)
            }
        }
        deserializer.deserialize_seq(KeySetVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(canonical_key(" Command ").unwrap(), "cmd");
        assert_eq!(canonical_key("OPT").unwrap(), "option");
        assert_eq!(canonical_key("ctrl").unwrap(), "control");
        assert_eq!(canonical_key("Return").unwrap(), "return");
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert_eq!(
            canonical_key("f13"),
            Err(ValidationError::InvalidKey("f13".to_string()))
        );
        assert!(normalize(&["a", "$"]).is_err());
    }

    #[test]
    fn normalize_is_order_independent_and_idempotent() {
        let keys = ["s", "cmd", "A", "d"];
        let once = normalize(&keys).unwrap();
        assert_eq!(once, vec!["a", "d", "s", "cmd"]);
        assert_eq!(normalize(&once).unwrap(), once);

        // every rotation and reversal of the same multiset
        for shift in 0..keys.len() {
            let mut perm = keys.to_vec();
            perm.rotate_left(shift);
            assert_eq!(normalize(&perm).unwrap(), once);
            perm.reverse();
            assert_eq!(normalize(&perm).unwrap(), once);
        }
    }

    #[test]
    fn duplicates_collapse() {
        assert_eq!(normalize(&["a", "a", "s"]).unwrap(), vec!["a", "s"]);
    }

    #[test]
    fn key_specs_split() {
        assert_eq!(split_key_spec("a+s+d"), vec!["a", "s", "d"]);
        assert_eq!(split_key_spec("asd"), vec!["a", "s", "d"]);
        assert_eq!(split_key_spec("cmd+a s"), vec!["cmd", "a", "s"]);
        assert_eq!(split_key_spec("space,tab"), vec!["space", "tab"]);
        assert_eq!(split_key_spec("Shift+Ab"), vec!["Shift", "a", "b"]);
    }

    #[test]
    fn modifier_partition() {
        let set = KeySet::parse("cmd+shift+a+s").unwrap();
        assert_eq!(set.non_modifier_count(), 2);
        assert_eq!(set.modifiers().keys(), vec!["cmd", "shift"]);
        assert_eq!(set.to_string(), "a+s+cmd+shift");
    }

    #[test]
    fn subset_checks() {
        let small = KeySet::parse("as").unwrap();
        let big = KeySet::parse("asd").unwrap();
        assert!(small.is_subset(&big));
        assert!(!big.is_subset(&small));
        assert_eq!(small.intersection(&big), small);
    }
}
