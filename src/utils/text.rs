//! Text helpers for output files.

use unicode_segmentation::UnicodeSegmentation;

/// Characters that are unsafe in filenames on common filesystems.
const UNSAFE: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Turn an arbitrary title into a filesystem-safe filename stem.
///
/// Unsafe characters become underscores and the result is clamped to
/// `max_len` graphemes, so multi-byte titles never split inside a character.
pub fn safe_filename(title: &str, max_len: usize) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if UNSAFE.contains(&c) { '_' } else { c })
        .collect();
    replaced.graphemes(true).take(max_len).collect()
}
