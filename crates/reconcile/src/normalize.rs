use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Splits free text into comparable tokens: diacritics stripped, lowercased,
/// any non-alphanumeric run treated as a separator.
///
/// Single-character tokens are dropped unless that would leave nothing.
pub fn normalize(text: &str) -> Vec<String> {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();

    let tokens: Vec<String> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    if tokens.iter().all(|t| t.chars().count() < 2) {
        return tokens;
    }
    tokens.into_iter().filter(|t| t.chars().count() >= 2).collect()
}

/// The normalized form joined with single spaces, used for exact comparison.
pub fn normalized_phrase(text: &str) -> String {
    normalize(text).join(" ")
}
