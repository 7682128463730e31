use super::keys::KeySet;
use super::store::{ChordStore, YamlStore};
use super::{Chord, OutputType};
use crate::error::{CatalogError, PersistenceError, ValidationError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MIN_CHORD_KEYS: usize = 2;

/// Which existing chords block a new key-set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Only an identical key-set conflicts. `{a,s}` and `{a,s,d}` coexist.
    #[default]
    Exact,
    /// Subsets and supersets conflict as well.
    Overlap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Input,
    Output,
    All,
}

#[derive(Debug, Clone)]
pub struct Statistics {
    pub total: usize,
    pub total_usage: u64,
    pub distinct_categories: usize,
    pub most_used: Vec<Chord>,
    pub by_length: BTreeMap<usize, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub oldest: Option<Chord>,
    pub newest: Option<Chord>,
}

#[derive(Debug, Clone)]
pub struct Similar {
    pub chord: Chord,
    pub similarity: f32,
    pub shared: KeySet,
}

/// All chords plus two lookup maps kept in step with them.
pub struct Catalog<S: ChordStore = YamlStore> {
    store: S,
    policy: ConflictPolicy,
    chords: HashMap<Uuid, Chord>,
    order: Vec<Uuid>,
    by_input: HashMap<KeySet, Uuid>,
    by_output: HashMap<String, Vec<Uuid>>,
}

impl<S: ChordStore> Catalog<S> {
    pub fn open(store: S) -> Result<Self, PersistenceError> {
        let loaded = store.load()?;
        let mut catalog = Catalog {
            store,
            policy: ConflictPolicy::default(),
            chords: HashMap::new(),
            order: vec![],
            by_input: HashMap::new(),
            by_output: HashMap::new(),
        };
        for chord in loaded {
            if catalog.by_input.contains_key(&chord.input_keys) {
                warn!(keys = %chord.input_keys, "dropping duplicate chord from storage");
                continue;
            }
            let at = catalog.order.len();
            catalog.attach(chord, at);
        }
        Ok(catalog)
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&Chord> {
        self.chords.get(id)
    }

    pub fn find_by_input(&self, keys: &KeySet) -> Option<&Chord> {
        self.by_input.get(keys).and_then(|id| self.chords.get(id))
    }

    pub fn find_by_output(&self, output_text: &str) -> Vec<&Chord> {
        self.by_output
            .get(output_text)
            .map(|ids| ids.iter().filter_map(|id| self.chords.get(id)).collect())
            .unwrap_or_default()
    }

    /// Chords in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Chord> {
        self.order.iter().filter_map(|id| self.chords.get(id))
    }

    pub fn add<K: AsRef<str>>(
        &mut self,
        input_keys: &[K],
        output_text: &str,
        category: Option<&str>,
        tags: &[String],
    ) -> Result<Chord, CatalogError> {
        self.add_with_type(input_keys, output_text, OutputType::Text, category, tags)
    }

    pub fn add_with_type<K: AsRef<str>>(
        &mut self,
        input_keys: &[K],
        output_text: &str,
        output_type: OutputType,
        category: Option<&str>,
        tags: &[String],
    ) -> Result<Chord, CatalogError> {
        let keys = KeySet::from_raw(input_keys)?;
        if keys.len() < MIN_CHORD_KEYS {
            return Err(ValidationError::TooFewKeys(keys.len()).into());
        }
        if output_text.trim().is_empty() {
            return Err(ValidationError::EmptyOutput.into());
        }
        if let Some(existing) = self.conflicts(&keys).into_iter().next() {
            return Err(existing.clone().into());
        }

        let mut chord = Chord::new(keys, output_text.to_string());
        chord.output_type = output_type;
        chord.category = category.filter(|c| !c.is_empty()).map(str::to_string);
        chord.tags = tags.to_vec();

        let at = self.order.len();
        self.attach(chord.clone(), at);
        if let Err(e) = self.persist() {
            self.detach(&chord.id);
            return Err(e.into());
        }
        info!(keys = %chord.input_keys, output = %chord.output_text, "added chord");
        Ok(chord)
    }

    /// Existing chords that would block `keys` under the current policy.
    pub fn conflicts(&self, keys: &KeySet) -> Vec<&Chord> {
        let mut found: Vec<&Chord> = self.find_by_input(keys).into_iter().collect();
        if self.policy == ConflictPolicy::Overlap {
            found.extend(self.iter().filter(|c| {
                c.input_keys != *keys
                    && (c.input_keys.is_subset(keys) || keys.is_subset(&c.input_keys))
            }));
        }
        found
    }

    pub fn remove_by_input<K: AsRef<str>>(
        &mut self,
        input_keys: &[K],
    ) -> Result<Option<Chord>, CatalogError> {
        let keys = KeySet::from_raw(input_keys)?;
        match self.by_input.get(&keys).copied() {
            Some(id) => self.remove(&id),
            None => Ok(None),
        }
    }

    /// Removes the earliest added chord whose output matches exactly.
    pub fn remove_by_output(&mut self, output_text: &str) -> Result<Option<Chord>, CatalogError> {
        let first = self
            .by_output
            .get(output_text)
            .and_then(|ids| ids.first())
            .copied();
        match first {
            Some(id) => self.remove(&id),
            None => Ok(None),
        }
    }

    pub fn remove(&mut self, id: &Uuid) -> Result<Option<Chord>, CatalogError> {
        let Some((chord, at)) = self.detach(id) else {
            return Ok(None);
        };
        if let Err(e) = self.persist() {
            self.attach(chord, at);
            return Err(e.into());
        }
        info!(keys = %chord.input_keys, output = %chord.output_text, "removed chord");
        Ok(Some(chord))
    }

    /// Every chord, oldest first.
    pub fn list_all(&self) -> Vec<&Chord> {
        let mut all: Vec<&Chord> = self.iter().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    pub fn search(&self, query: &str, scope: SearchScope) -> Vec<&Chord> {
        let query = query.to_lowercase();
        let mut results: Vec<&Chord> = vec![];
        let mut seen = HashSet::new();

        if matches!(scope, SearchScope::Input | SearchScope::All) {
            for chord in self.iter() {
                if chord.input_keys.to_string().contains(&query) && seen.insert(chord.id) {
                    results.push(chord);
                }
            }
        }
        if matches!(scope, SearchScope::Output | SearchScope::All) {
            for chord in self.iter() {
                if chord.output_text.to_lowercase().contains(&query) && seen.insert(chord.id) {
                    results.push(chord);
                }
            }
        }
        results
    }

    pub fn increment_usage(&mut self, id: &Uuid) -> Result<Option<Chord>, CatalogError> {
        let Some(chord) = self.chords.get_mut(id) else {
            return Ok(None);
        };
        let previous = (chord.usage_count, chord.modified_at);
        chord.usage_count += 1;
        chord.modified_at = Utc::now();

        if let Err(e) = self.persist() {
            if let Some(chord) = self.chords.get_mut(id) {
                (chord.usage_count, chord.modified_at) = previous;
            }
            return Err(e.into());
        }
        Ok(self.chords.get(id).cloned())
    }

    pub fn statistics(&self, top_n: usize) -> Statistics {
        let mut by_length = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        for chord in self.iter() {
            *by_length.entry(chord.non_modifier_count()).or_insert(0) += 1;
            let category = chord.category.clone().unwrap_or_else(|| "uncategorized".to_string());
            *by_category.entry(category).or_insert(0) += 1;
        }

        let mut most_used: Vec<Chord> = self.iter().cloned().collect();
        most_used.sort_by(|a, b| b.usage_count.cmp(&a.usage_count));
        most_used.truncate(top_n);

        let oldest = self.iter().min_by_key(|c| c.created_at).cloned();
        let newest = self.iter().max_by_key(|c| c.created_at).cloned();

        Statistics {
            total: self.len(),
            total_usage: self.iter().map(|c| c.usage_count).sum(),
            distinct_categories: self
                .iter()
                .filter_map(|c| c.category.as_deref())
                .collect::<HashSet<_>>()
                .len(),
            most_used,
            by_length,
            by_category,
            oldest,
            newest,
        }
    }

    /// Chords sharing at least half of the larger key-set with `keys`, most similar first.
    pub fn similar(&self, keys: &KeySet) -> Vec<Similar> {
        let mut found: Vec<Similar> = self
            .iter()
            .filter_map(|chord| {
                let shared = keys.intersection(&chord.input_keys);
                if shared.is_empty() {
                    return None;
                }
                let similarity =
                    shared.len() as f32 / keys.len().max(chord.input_keys.len()) as f32;
                (similarity >= 0.5).then(|| Similar {
                    chord: chord.clone(),
                    similarity,
                    shared,
                })
            })
            .collect();
        found.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        found
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        let snapshot: Vec<Chord> = self.iter().cloned().collect();
        self.store.save(&snapshot)
    }

    fn attach(&mut self, chord: Chord, at: usize) {
        let id = chord.id;
        self.by_input.insert(chord.input_keys, id);
        self.by_output
            .entry(chord.output_text.clone())
            .or_default()
            .push(id);
        self.order.insert(at.min(self.order.len()), id);
        self.chords.insert(id, chord);
        // output ids follow insertion order
        let order = &self.order;
        if let Some(ids) = self.by_output.get_mut(&self.chords[&id].output_text) {
            ids.sort_by_key(|i| order.iter().position(|o| o == i));
        }
    }

    fn detach(&mut self, id: &Uuid) -> Option<(Chord, usize)> {
        let chord = self.chords.remove(id)?;
        let at = self.order.iter().position(|o| o == id).unwrap_or(self.order.len());
        self.order.retain(|o| o != id);
        self.by_input.remove(&chord.input_keys);
        if let Some(ids) = self.by_output.get_mut(&chord.output_text) {
            ids.retain(|o| o != id);
            if ids.is_empty() {
                self.by_output.remove(&chord.output_text);
            }
        }
        debug!(keys = %chord.input_keys, "detached chord");
        Some((chord, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FlakyStore {
        fail: Cell<bool>,
        saved: RefCell<Vec<Chord>>,
        saves: Cell<usize>,
    }

    impl ChordStore for &FlakyStore {
        fn load(&self) -> Result<Vec<Chord>, PersistenceError> {
            Ok(self.saved.borrow().clone())
        }

        fn save(&self, chords: &[Chord]) -> Result<(), PersistenceError> {
            if self.fail.get() {
                return Err(PersistenceError::io(
                    "chords.yaml",
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ));
            }
            self.saves.set(self.saves.get() + 1);
            *self.saved.borrow_mut() = chords.to_vec();
            Ok(())
        }
    }

    fn catalog(store: &FlakyStore) -> Catalog<&FlakyStore> {
        Catalog::open(store).unwrap()
    }

    #[test]
    fn add_normalizes_and_persists() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        let chord = cat.add(&["S", "a", "D"], "and", None, &[]).unwrap();
        assert_eq!(chord.input_keys.keys(), vec!["a", "d", "s"]);
        assert_eq!(store.saved.borrow().len(), 1);
        assert!(cat.find_by_input(&KeySet::parse("das").unwrap()).is_some());
    }

    #[test]
    fn validation_errors() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        assert!(matches!(
            cat.add(&["a"], "a", None, &[]),
            Err(CatalogError::Validation(ValidationError::TooFewKeys(1)))
        ));
        assert!(matches!(
            cat.add(&["a", "a"], "a", None, &[]),
            Err(CatalogError::Validation(ValidationError::TooFewKeys(1)))
        ));
        assert!(matches!(
            cat.add(&["a", "s"], "  ", None, &[]),
            Err(CatalogError::Validation(ValidationError::EmptyOutput))
        ));
        assert!(matches!(
            cat.add(&["a", "§"], "x", None, &[]),
            Err(CatalogError::Validation(ValidationError::InvalidKey(_)))
        ));
        assert_eq!(store.saves.get(), 0);
    }

    #[test]
    fn same_keyset_conflicts_until_removed() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        let first = cat.add(&["a", "s", "d"], "and", None, &[]).unwrap();

        match cat.add(&["d", "s", "a"], "sad", None, &[]) {
            Err(CatalogError::Conflict(existing)) => assert_eq!(existing.id, first.id),
            other => panic!("expected conflict, got {:?}", other),
        }

        cat.remove_by_input(&["a", "s", "d"]).unwrap().unwrap();
        assert!(cat.add(&["d", "s", "a"], "sad", None, &[]).is_ok());
    }

    #[test]
    fn overlapping_keysets_coexist_by_default() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        cat.add(&["a", "s"], "as", None, &[]).unwrap();
        cat.add(&["a", "s", "d"], "and", None, &[]).unwrap();
        assert_eq!(cat.len(), 2);
    }

    #[test]
    fn overlap_policy_rejects_subsets() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store).with_policy(ConflictPolicy::Overlap);
        cat.add(&["a", "s", "d"], "and", None, &[]).unwrap();
        assert!(matches!(
            cat.add(&["a", "s"], "as", None, &[]),
            Err(CatalogError::Conflict(_))
        ));
        assert!(matches!(
            cat.add(&["a", "s", "d", "f"], "asdf", None, &[]),
            Err(CatalogError::Conflict(_))
        ));
        assert!(cat.add(&["a", "f"], "af", None, &[]).is_ok());
    }

    #[test]
    fn remove_missing_keyset_changes_nothing() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        cat.add(&["a", "s"], "as", None, &[]).unwrap();
        let before: Vec<Chord> = cat.iter().cloned().collect();
        let saves = store.saves.get();

        assert!(cat.remove_by_input(&["q", "w"]).unwrap().is_none());
        assert_eq!(cat.iter().cloned().collect::<Vec<_>>(), before);
        assert_eq!(store.saves.get(), saves);
    }

    #[test]
    fn remove_by_output_takes_the_earliest() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        let first = cat.add(&["t", "h"], "the", None, &[]).unwrap();
        let second = cat.add(&["t", "e"], "the", None, &[]).unwrap();

        assert_eq!(cat.remove_by_output("the").unwrap().unwrap().id, first.id);
        assert_eq!(cat.remove_by_output("the").unwrap().unwrap().id, second.id);
        assert!(cat.remove_by_output("the").unwrap().is_none());
    }

    #[test]
    fn failed_save_rolls_back_memory() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        let kept = cat.add(&["a", "s"], "as", None, &[]).unwrap();

        store.fail.set(true);
        assert!(matches!(
            cat.add(&["q", "w"], "qw", None, &[]),
            Err(CatalogError::Persistence(_))
        ));
        assert!(cat.find_by_input(&KeySet::parse("qw").unwrap()).is_none());
        assert!(cat.find_by_output("qw").is_empty());

        assert!(cat.remove_by_input(&["a", "s"]).is_err());
        assert_eq!(cat.find_by_input(&kept.input_keys).unwrap().id, kept.id);
        assert_eq!(cat.find_by_output("as").len(), 1);

        assert!(cat.increment_usage(&kept.id).is_err());
        assert_eq!(cat.get(&kept.id).unwrap().usage_count, 0);
    }

    #[test]
    fn search_scopes() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        cat.add(&["a", "n", "d"], "and", None, &[]).unwrap();
        cat.add(&["t", "h"], "Hand", None, &[]).unwrap();
        cat.add(&["q", "z"], "quiz", None, &[]).unwrap();

        assert_eq!(cat.search("A+D", SearchScope::Input).len(), 1);
        assert_eq!(cat.search("and", SearchScope::Output).len(), 2);
        let all = cat.search("h", SearchScope::All);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].output_text, "Hand");
    }

    #[test]
    fn usage_and_statistics() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        let a = cat.add(&["a", "s"], "as", Some("words"), &[]).unwrap();
        cat.add(&["a", "s", "d"], "and", Some("words"), &[]).unwrap();
        cat.add(&["cmd", "q", "w"], "quit", Some("apps"), &[]).unwrap();

        let bumped = cat.increment_usage(&a.id).unwrap().unwrap();
        assert_eq!(bumped.usage_count, 1);
        assert!(bumped.modified_at >= a.modified_at);
        cat.increment_usage(&a.id).unwrap();
        assert!(cat.increment_usage(&Uuid::new_v4()).unwrap().is_none());

        let stats = cat.statistics(2);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.total_usage, 2);
        assert_eq!(stats.distinct_categories, 2);
        assert_eq!(stats.most_used.len(), 2);
        assert_eq!(stats.most_used[0].id, a.id);
        assert_eq!(stats.by_length[&2], 2);
        assert_eq!(stats.by_length[&3], 1);
        assert_eq!(stats.oldest.unwrap().id, a.id);
    }

    #[test]
    fn similar_chords_share_half_the_keys() {
        let store = FlakyStore::default();
        let mut cat = catalog(&store);
        cat.add(&["a", "s", "d"], "and", None, &[]).unwrap();
        cat.add(&["a", "x", "y", "z"], "axyz", None, &[]).unwrap();

        let found = cat.similar(&KeySet::parse("as").unwrap());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].chord.output_text, "and");
        assert_eq!(found[0].shared.keys(), vec!["a", "s"]);
    }

    #[test]
    fn reopen_preserves_order() {
        let store = FlakyStore::default();
        {
            let mut cat = catalog(&store);
            cat.add(&["a", "s"], "one", None, &[]).unwrap();
            cat.add(&["q", "w"], "two", None, &[]).unwrap();
        }
        let cat = catalog(&store);
        let outputs: Vec<&str> = cat.list_all().iter().map(|c| c.output_text.as_str()).collect();
        assert_eq!(outputs, vec!["one", "two"]);
    }
}
