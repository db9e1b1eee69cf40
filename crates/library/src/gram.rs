//! Sliding byte grams over normalized text.
//!
//! The widths are part of the on-disk index format: changing either one
//! invalidates every stored index entry.

use std::collections::BTreeSet;

use crate::normalize::normalize;

/// Gram width in bytes for runs of single-byte (ASCII) text.
pub const GRAM_SIZE_ASCII: usize = 4;
/// Gram width in bytes for runs containing multi-byte characters.
pub const GRAM_SIZE_NON_ASCII: usize = 6;

pub type GramSet = BTreeSet<Vec<u8>>;

/// Width of the gram starting at byte `start`, or `None` when the text ends
/// before the gram would be complete.
///
/// Grams are byte slices and need not fall on character boundaries.
fn gram_len_at(bytes: &[u8], start: usize) -> Option<usize> {
    let mut is_ascii = true;
    for offset in 0..=GRAM_SIZE_NON_ASCII {
        if (offset == GRAM_SIZE_ASCII && is_ascii) || offset == GRAM_SIZE_NON_ASCII {
            return Some(offset);
        }
        if start + offset == bytes.len() {
            return None;
        }
        is_ascii = is_ascii && bytes[start + offset].is_ascii();
    }
    None
}

/// Tokenizes already-normalized text into its deduplicated gram set.
pub fn tokenize(text: &str) -> GramSet {
    let mut grams = GramSet::new();
    tokenize_into(text, &mut grams);
    grams
}

pub fn tokenize_into(text: &str, grams: &mut GramSet) {
    let bytes = text.as_bytes();
    if bytes.len() < GRAM_SIZE_ASCII {
        return;
    }
    for start in 0..=bytes.len() - GRAM_SIZE_ASCII {
        if let Some(len) = gram_len_at(bytes, start) {
            grams.insert(bytes[start..start + len].to_vec());
        }
    }
}

/// The leading gram of already-normalized text; `None` when the text is too
/// short to form one.
pub fn first_gram(text: &str) -> Option<&[u8]> {
    let bytes = text.as_bytes();
    if bytes.len() < GRAM_SIZE_ASCII {
        return None;
    }
    gram_len_at(bytes, 0).map(|len| &bytes[..len])
}

/// Union of grams over every given field after lower-casing and normalizing.
pub fn index_grams<'a, I>(fields: I) -> GramSet
where
    I: IntoIterator<Item = &'a str>,
{
    let mut grams = GramSet::new();
    for field in fields {
        tokenize_into(&normalize(&field.to_lowercase()), &mut grams);
    }
    grams
}
