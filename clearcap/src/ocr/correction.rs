use serde::{Deserialize, Serialize};

/// How hard the corrector leans towards digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionMode {
    /// Fold look-alike glyphs only when they touch a digit.
    #[default]
    Conservative,
    /// Additionally fold the full letter table everywhere. Only safe for
    /// captchas known to be numeric.
    Aggressive,
}

/// Glyphs that are folded when a neighbour is a digit.
const NEIGHBOUR_FOLDS: &[(char, char)] = &[
    ('O', '0'),
    ('o', '0'),
    ('I', '1'),
    ('l', '1'),
    ('Z', '2'),
    ('S', '5'),
    ('B', '8'),
];

const AGGRESSIVE_FOLDS: &[(char, char)] = &[
    ('O', '0'),
    ('o', '0'),
    ('Q', '0'),
    ('D', '0'),
    ('I', '1'),
    ('l', '1'),
    ('i', '1'),
    ('L', '1'),
    ('Z', '2'),
    ('z', '2'),
    ('A', '4'),
    ('S', '5'),
    ('s', '5'),
    ('G', '6'),
    ('b', '6'),
    ('T', '7'),
    ('B', '8'),
    ('g', '9'),
    ('q', '9'),
];

fn fold(table: &[(char, char)], c: char) -> Option<char> {
    table
        .iter()
        .find(|(glyph, _)| *glyph == c)
        .map(|(_, digit)| *digit)
}

/// Clean up raw recognizer output.
///
/// Keeps alphanumerics only, then folds look-alike glyphs into digits. The
/// neighbour rule runs until nothing changes, which makes the function
/// idempotent.
pub fn correct_text(raw: &str, mode: CorrectionMode) -> String {
    let mut chars: Vec<char> = raw.chars().filter(|c| c.is_alphanumeric()).collect();

    if mode == CorrectionMode::Aggressive {
        for c in chars.iter_mut() {
            if let Some(digit) = fold(AGGRESSIVE_FOLDS, *c) {
                *c = digit;
            }
        }
    }

    loop {
        let mut changed = false;
        for i in 0..chars.len() {
            let Some(digit) = fold(NEIGHBOUR_FOLDS, chars[i]) else {
                continue;
            };
            let left = i > 0 && chars[i - 1].is_ascii_digit();
            let right = chars.get(i + 1).is_some_and(|c| c.is_ascii_digit());
            if left || right {
                chars[i] = digit;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    chars.into_iter().collect()
}
