//! Folding of free text into the canonical form used for both indexing and
//! querying.

use unicode_normalization::UnicodeNormalization;

/// Standalone combining marks removed after compatibility decomposition.
const STRIPPED_MARKS: &[char] = &[
    '\u{0300}', // grave
    '\u{0301}', // acute
    '\u{0302}', // circumflex
    '\u{0303}', // tilde
    '\u{0304}', // macron
    '\u{0306}', // breve
    '\u{0307}', // dot above
    '\u{0308}', // diaeresis
    '\u{0309}', // hook above
    '\u{030A}', // ring above
    '\u{030B}', // double acute
    '\u{030C}', // caron
    '\u{031B}', // horn
    '\u{0323}', // dot below
    '\u{0326}', // comma below
    '\u{0327}', // cedilla
    '\u{0328}', // ogonek
];

fn is_stripped_mark(ch: char) -> bool {
    STRIPPED_MARKS.contains(&ch)
}

fn expand_ligature(ch: char) -> Option<&'static str> {
    match ch {
        'æ' => Some("ae"),
        'ĳ' => Some("ij"),
        'œ' => Some("oe"),
        'ß' => Some("ss"),
        _ => None,
    }
}

/// NFKD, strip diacritics, lower-case, then expand the lower-case ligatures.
///
/// Lower-casing can itself produce a stripped mark (`İ` lowers to `i` plus a
/// dot above), so marks are filtered again while expanding ligatures; that
/// keeps the function idempotent.
pub fn normalize(text: &str) -> String {
    let stripped: String = text.nfkd().filter(|ch| !is_stripped_mark(*ch)).collect();
    let lowered = stripped.to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        if is_stripped_mark(ch) {
            continue;
        }
        match expand_ligature(ch) {
            Some(expansion) => out.push_str(expansion),
            None => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_accents_and_expands_ligatures() {
        assert_eq!(normalize("ÁÅÇÈñöûÆĲŒß"), "aacenouaeijoess");
    }

    #[test]
    fn compatibility_forms_are_folded() {
        assert_eq!(normalize("ﬁnal"), "final");
        assert_eq!(normalize("Ｔｏｋｙｏ"), "tokyo");
        assert_eq!(normalize("Ǆ"), "dz");
    }

    #[test]
    fn unlisted_scripts_pass_through() {
        assert_eq!(normalize("日本語"), "日本語");
        assert_eq!(normalize("Москва"), "москва");
    }

    #[test]
    fn dotted_capital_i_stays_idempotent() {
        let once = normalize("İstanbul");
        assert_eq!(once, "istanbul");
        assert_eq!(normalize(&once), once);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(text in "[a-zA-Z0-9À-ɏͰ-Ͽ ]{0,24}") {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalize_ignores_case(text in "[a-zA-Z0-9À-ɏͰ-Ͽ ]{0,24}") {
            // Final sigma and dotless i do not survive an upper/lower round trip.
            prop_assume!(text.to_uppercase().to_lowercase() == text.to_lowercase());
            prop_assert_eq!(normalize(&text.to_uppercase()), normalize(&text));
        }
    }
}
