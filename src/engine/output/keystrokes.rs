/*
    Character to keystroke transliteration for a US layout.
*/

use lazy_static::lazy_static;
use std::collections::HashMap;

const PUNCTUATION: [(char, &str, bool); 30] = [
    ('.', "period", false),
    (',', "comma", false),
    (';', "semicolon", false),
    (':', "semicolon", true),
    ('\'', "quote", false),
    ('"', "quote", true),
    ('-', "hyphen", false),
    ('_', "hyphen", true),
    ('=', "equal_sign", false),
    ('+', "equal_sign", true),
    ('[', "open_bracket", false),
    (']', "close_bracket", false),
    ('{', "open_bracket", true),
    ('}', "close_bracket", true),
    ('\\', "backslash", false),
    ('|', "backslash", true),
    ('/', "slash", false),
    ('?', "slash", true),
    ('`', "grave_accent_and_tilde", false),
    ('~', "grave_accent_and_tilde", true),
    ('!', "1", true),
    ('@', "2", true),
    ('#', "3", true),
    ('$', "4", true),
    ('%', "5", true),
    ('^', "6", true),
    ('&', "7", true),
    ('*', "8", true),
    ('(', "9", true),
    (')', "0", true),
];

lazy_static! {
    static ref PUNCTUATION_KEYS: HashMap<char, (&'static str, bool)> = PUNCTUATION
        .iter()
        .map(|(c, key, shift)| (*c, (*key, *shift)))
        .collect();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStroke {
    pub key_code: String,
    pub shift: bool,
}

impl KeyStroke {
    pub fn plain(key_code: &str) -> Self {
        KeyStroke {
            key_code: key_code.to_string(),
            shift: false,
        }
    }

    pub fn shifted(key_code: &str) -> Self {
        KeyStroke {
            key_code: key_code.to_string(),
            shift: true,
        }
    }
}

pub fn char_to_keystroke(c: char) -> Option<KeyStroke> {
    match c {
        ' ' => Some(KeyStroke::plain("spacebar")),
        '\n' => Some(KeyStroke::plain("return_or_enter")),
        '\t' => Some(KeyStroke::plain("tab")),
        'a'..='z' | '0'..='9' => Some(KeyStroke::plain(c.encode_utf8(&mut [0; 4]))),
        'A'..='Z' => Some(KeyStroke::shifted(c.to_ascii_lowercase().encode_utf8(&mut [0; 4]))),
        _ => PUNCTUATION_KEYS.get(&c).map(|(key, shift)| KeyStroke {
            key_code: key.to_string(),
            shift: *shift,
        }),
    }
}

/// Characters with no key on the layout are dropped.
pub fn transliterate(text: &str) -> Vec<KeyStroke> {
    text.chars().filter_map(char_to_keystroke).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_digits() {
        assert_eq!(char_to_keystroke('h'), Some(KeyStroke::plain("h")));
        assert_eq!(char_to_keystroke('H'), Some(KeyStroke::shifted("h")));
        assert_eq!(char_to_keystroke('7'), Some(KeyStroke::plain("7")));
    }

    #[test]
    fn whitespace_keys() {
        assert_eq!(
            transliterate(" \n\t"),
            vec![
                KeyStroke::plain("spacebar"),
                KeyStroke::plain("return_or_enter"),
                KeyStroke::plain("tab"),
            ]
        );
    }

    #[test]
    fn punctuation_table() {
        assert_eq!(char_to_keystroke('!'), Some(KeyStroke::shifted("1")));
        assert_eq!(char_to_keystroke('.'), Some(KeyStroke::plain("period")));
        assert_eq!(char_to_keystroke('_'), Some(KeyStroke::shifted("hyphen")));
        assert_eq!(char_to_keystroke('"'), Some(KeyStroke::shifted("quote")));
    }

    #[test]
    fn unknown_characters_are_skipped() {
        assert_eq!(transliterate("é€a"), vec![KeyStroke::plain("a")]);
    }
}
