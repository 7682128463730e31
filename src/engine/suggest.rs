/*
    Built-in chord suggestions.
*/

use super::catalog::Catalog;
use super::keys::KeySet;
use super::store::ChordStore;

const COMMON_CHORDS: [(&str, &str); 18] = [
    // words
    ("t+h+e", "the"),
    ("a+n+d", "and"),
    ("t+h+a", "that"),
    ("w+i+t", "with"),
    ("f+o+r", "for"),
    ("t+h+i", "this"),
    ("y+o+u", "you"),
    ("h+a+v", "have"),
    ("b+u+t", "but"),
    ("n+o+t", "not"),
    // programming
    ("f+u+n", "function"),
    ("r+e+t", "return"),
    ("i+m+p", "import"),
    ("c+l+s", "class"),
    ("d+e+f", "def"),
    // phrases
    ("t+y", "thank you"),
    ("p+l+s", "please"),
    ("b+t+w", "by the way"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub keys: KeySet,
    pub output_text: &'static str,
}

/// Common chords whose key-set is still free, at most `limit` of them.
pub fn suggestions<S: ChordStore>(catalog: &Catalog<S>, limit: usize) -> Vec<Suggestion> {
    COMMON_CHORDS
        .iter()
        .filter_map(|(spec, output_text)| {
            let keys = KeySet::parse(spec).ok()?;
            catalog.find_by_input(&keys).is_none().then_some(Suggestion {
                keys,
                output_text: *output_text,
            })
        })
        .take(limit)
        .collect()
}
