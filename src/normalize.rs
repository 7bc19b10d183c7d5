//! Shared normalization functions for song, artist and genre keys and for
//! generated file names.
//!
//! Identity in the preparation stage is defined by these keys, so any change
//! here changes which rows are considered the same song or artist.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Characters kept in generated file names besides ASCII alphanumerics.
const FILE_STEM_EXTRA: [char; 3] = [' ', '-', '_'];

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Strip diacritics and transliterate to ASCII, keeping the original casing.
/// e.g., "Beyoncé" → "Beyonce"
pub fn strip_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped)
}

/// Matching key for a track name, artist name or genre token: trimmed,
/// inner whitespace collapsed, lowercased. Letters are never transliterated
/// and punctuation is kept, so "Résumé" and "Resume" stay distinct.
/// e.g., "  The  Beatles " → "the beatles"
pub fn identity_key(s: &str) -> String {
    MULTI_SPACE.replace_all(s.trim(), " ").to_lowercase()
}

/// Turn a song name into something safe to embed in a file name.
/// Keeps ASCII alphanumerics, space, `-` and `_`; spaces become `_`.
/// Returns an empty string when nothing survives.
pub fn sanitize_file_stem(name: &str) -> String {
    let kept: String = strip_to_ascii(name)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || FILE_STEM_EXTRA.contains(c))
        .collect();
    MULTI_SPACE
        .replace_all(kept.trim(), " ")
        .replace(' ', "_")
}
