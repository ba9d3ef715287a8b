//! Ukrainian text ordering for list sorting.
//!
//! Strings are compared as sequences of weights. Case and diacritics do not
//! affect the weight, so "Олена" and "олена" compare equal. Punctuation and
//! spaces sort first, then digits, Cyrillic, Latin and any other script.

use std::cmp::Ordering;

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

const UKRAINIAN_ALPHABET: [char; 33] = [
    'а', 'б', 'в', 'г', 'ґ', 'д', 'е', 'є', 'ж', 'з', 'и', 'і', 'ї', 'й', 'к', 'л', 'м', 'н', 'о',
    'п', 'р', 'с', 'т', 'у', 'ф', 'х', 'ц', 'ч', 'ш', 'щ', 'ь', 'ю', 'я',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CharClass {
    Separator = 1,
    Digit = 2,
    Cyrillic = 3,
    Latin = 4,
    Other = 5,
}

fn weight(class: CharClass, index: u32) -> u32 {
    ((class as u32) << 24) | (index & 0x00FF_FFFF)
}

/// Position in the Ukrainian alphabet. Other Cyrillic letters fall back to
/// their NFD base (ё to е) or to the `Other` class.
fn cyrillic_index(ch: char) -> Option<u32> {
    UKRAINIAN_ALPHABET
        .iter()
        .position(|letter| *letter == ch)
        .map(|index| index as u32)
}

fn push_weights(ch: char, weights: &mut Vec<u32>) {
    for lower in ch.to_lowercase() {
        if let Some(index) = cyrillic_index(lower) {
            weights.push(weight(CharClass::Cyrillic, index));
            continue;
        }
        // ї and й decompose to base + mark, so the alphabet lookup runs first.
        for base in std::iter::once(lower)
            .nfd()
            .filter(|decomposed| !is_combining_mark(*decomposed))
        {
            let entry = if base.is_ascii_digit() {
                weight(CharClass::Digit, base as u32)
            } else if base.is_ascii_lowercase() {
                weight(CharClass::Latin, base as u32)
            } else if let Some(index) = cyrillic_index(base) {
                weight(CharClass::Cyrillic, index)
            } else if base.is_alphanumeric() {
                weight(CharClass::Other, base as u32)
            } else {
                weight(CharClass::Separator, base as u32)
            };
            weights.push(entry);
        }
    }
}

/// Sort key for `text`; keys compare the way [`compare`] does.
pub fn sort_key(text: &str) -> Vec<u32> {
    let mut weights = Vec::with_capacity(text.len());
    for ch in text.chars() {
        push_weights(ch, &mut weights);
    }
    weights
}

pub fn compare(left: &str, right: &str) -> Ordering {
    sort_key(left).cmp(&sort_key(right))
}
