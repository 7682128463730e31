//! Publishing tests
//!
//! Catalog changes compiled into karabiner.json, end to end.

use chordkit::engine::catalog::Catalog;
use chordkit::engine::groups::DisabledGroups;
use chordkit::engine::output::apply::{EngineConfig, RuleSync};
use chordkit::engine::output::{Compiler, RULE_PREFIX};
use chordkit::engine::store::YamlStore;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn rule_sync(dir: &Path) -> RuleSync {
    RuleSync {
        compiler: Compiler::default().with_launchers(vec![]),
        engine: EngineConfig::new(dir.join("karabiner.json")),
        disabled: DisabledGroups::load(dir.join("disabled_groups.yaml")).unwrap(),
    }
}

fn read(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn our_rules(doc: &Value) -> Vec<Value> {
    doc["profiles"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "Chordkit")
        .unwrap()["complex_modifications"]["rules"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["description"].as_str().unwrap().starts_with(RULE_PREFIX))
        .cloned()
        .collect()
}

// ========================================================================
// Chord rules
// ========================================================================

#[test]
fn test_three_key_chord_is_published() {
    let dir = tempdir().unwrap();
    let mut catalog = Catalog::open(YamlStore::new(dir.path().join("chords.yaml"))).unwrap();
    catalog.add(&["a", "s", "d"], "and", None, &[]).unwrap();

    let report = rule_sync(dir.path()).sync(&catalog).unwrap();
    assert_eq!(report.rules_written, 1);

    let rules = our_rules(&read(&dir.path().join("karabiner.json")));
    assert_eq!(rules.len(), 1);
    let m = &rules[0]["manipulators"][0];
    assert_eq!(
        m["from"]["simultaneous"],
        json!([{"key_code": "a"}, {"key_code": "d"}, {"key_code": "s"}])
    );
    assert_eq!(m["parameters"]["basic.simultaneous_threshold_milliseconds"], 75);
    let typed: Vec<&str> = m["to"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["key_code"].as_str().unwrap())
        .collect();
    assert_eq!(typed, vec!["a", "n", "d", "spacebar"]);
}

#[test]
fn test_shifted_output_uses_shift_modifier() {
    let dir = tempdir().unwrap();
    let mut catalog = Catalog::open(YamlStore::new(dir.path().join("chords.yaml"))).unwrap();
    catalog.add(&["h", "i"], "Hi!", None, &[]).unwrap();

    rule_sync(dir.path()).sync(&catalog).unwrap();
    let rules = our_rules(&read(&dir.path().join("karabiner.json")));
    let to = &rules[0]["manipulators"][0]["to"];
    assert_eq!(to[0], json!({"key_code": "h", "modifiers": ["shift"]}));
    assert_eq!(to[1], json!({"key_code": "i"}));
    assert_eq!(to[2], json!({"key_code": "1", "modifiers": ["shift"]}));
    assert_eq!(to[3], json!({"key_code": "spacebar"}));
}

#[test]
fn test_compile_is_deterministic_across_insertion_order() {
    let dir = tempdir().unwrap();
    let mut first = Catalog::open(YamlStore::new(dir.path().join("one.yaml"))).unwrap();
    let mut second = Catalog::open(YamlStore::new(dir.path().join("two.yaml"))).unwrap();
    let specs: [(&[&str], &str); 4] = [
        (&["a", "s"], "as"),
        (&["t", "h", "e"], "the"),
        (&["w", "i", "t", "h"], "with"),
        (&["j", "k"], "jk"),
    ];
    for (keys, out) in specs {
        first.add(keys, out, None, &[]).unwrap();
    }
    for (keys, out) in specs.iter().rev() {
        second.add(keys, out, None, &[]).unwrap();
    }

    let compiler = Compiler::default();
    let disabled = DisabledGroups::default();
    let a = compiler.compile(first.iter(), &disabled);
    let b = compiler.compile(second.iter(), &disabled);
    assert_eq!(a, b);

    let chord_rules: Vec<&str> = a
        .rules
        .iter()
        .map(|r| r.description.as_str())
        .filter(|d| d.contains("Chords"))
        .collect();
    assert_eq!(
        chord_rules,
        vec![
            "Chordkit: 4-Key Chords (Extended)",
            "Chordkit: 3-Key Chords (Standard)",
            "Chordkit: 2-Key Chords (Quick)",
        ]
    );
}

// ========================================================================
// Document handling
// ========================================================================

#[test]
fn test_republish_replaces_rules_and_keeps_foreign_ones() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("karabiner.json");
    fs::write(
        &path,
        serde_json::to_string_pretty(&json!({
            "global": {"show_in_menu_bar": false},
            "profiles": [{
                "name": "Default",
                "selected": true,
                "complex_modifications": {
                    "rules": [{"description": "Caps to Escape", "manipulators": []}]
                }
            }]
        }))
        .unwrap(),
    )
    .unwrap();

    let mut catalog = Catalog::open(YamlStore::new(dir.path().join("chords.yaml"))).unwrap();
    catalog.add(&["a", "s"], "as", None, &[]).unwrap();
    let sync = rule_sync(dir.path());
    sync.sync(&catalog).unwrap();

    catalog.remove_by_input(&["a", "s"]).unwrap();
    catalog.add(&["q", "w"], "question", None, &[]).unwrap();
    let report = sync.sync(&catalog).unwrap();
    assert_eq!(report.rules_replaced, 1);
    assert!(report.backup.is_some());

    let doc = read(&path);
    assert_eq!(doc["global"]["show_in_menu_bar"], false);
    let default = &doc["profiles"][0];
    assert_eq!(default["name"], "Default");
    assert_eq!(default["selected"], true);
    assert_eq!(
        default["complex_modifications"]["rules"][0]["description"],
        "Caps to Escape"
    );

    let rules = our_rules(&doc);
    assert_eq!(rules.len(), 1);
    assert_eq!(
        rules[0]["manipulators"][0]["from"]["simultaneous"],
        json!([{"key_code": "q"}, {"key_code": "w"}])
    );
}

#[test]
fn test_disabled_group_is_left_out() {
    let dir = tempdir().unwrap();
    let mut catalog = Catalog::open(YamlStore::new(dir.path().join("chords.yaml"))).unwrap();
    catalog.add(&["a", "s"], "as", None, &[]).unwrap();
    catalog.add(&["g", "m"], "good morning", Some("greetings"), &[]).unwrap();

    let mut sync = rule_sync(dir.path());
    sync.disabled.set_enabled("Greetings Chords", false).unwrap();
    sync.sync(&catalog).unwrap();

    let descriptions: Vec<String> = our_rules(&read(&dir.path().join("karabiner.json")))
        .iter()
        .map(|r| r["description"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(descriptions, vec!["Chordkit: 2-Key Chords (Quick)"]);

    let reloaded = DisabledGroups::load(dir.path().join("disabled_groups.yaml")).unwrap();
    assert!(!reloaded.is_enabled("Greetings Chords"));
}

#[test]
fn test_export_writes_one_file_per_group() {
    let dir = tempdir().unwrap();
    let mut catalog = Catalog::open(YamlStore::new(dir.path().join("chords.yaml"))).unwrap();
    catalog.add(&["a", "s", "d"], "and", None, &[]).unwrap();
    catalog.add(&["a", "s"], "as", None, &[]).unwrap();

    let out = dir.path().join("export");
    let files = Compiler::default().export_rule_files(catalog.iter(), &out).unwrap();
    assert_eq!(files.len(), 3);
    for file in &files {
        let doc = read(file);
        assert!(doc["title"].as_str().unwrap().starts_with(RULE_PREFIX));
        assert!(doc["rules"].is_array());
    }
    assert!(out.join("launcher_rules.json").exists());
}
