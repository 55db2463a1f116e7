//! Output sanitization applied before anything is persisted.
//!
//! Generated file contents and model text can contain stray control bytes
//! (null bytes from truncated tool output, terminal bells from shell runs).
//! Persisted content may later be rendered or embedded elsewhere, so both
//! the success and failure paths run through the same sanitizer.

use std::collections::BTreeMap;

/// Strip control characters from a string, keeping `\n`, `\r`, and `\t`.
/// All other characters are preserved in their original order.
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Sanitize every value in a file map. Keys (paths) are passed through
/// `sanitize_text` as well, since they end up in persisted JSON.
pub fn sanitize_files(files: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    files
        .iter()
        .map(|(path, content)| (sanitize_text(path), sanitize_text(content)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_null_bytes_and_bells() {
        let input = "abc\u{0}def\u{7}ghi";
        assert_eq!(sanitize_text(input), "abcdefghi");
    }

    #[test]
    fn preserves_newlines_tabs_and_carriage_returns() {
        let input = "line1\n\tline2\r\n";
        assert_eq!(sanitize_text(input), input);
    }

    #[test]
    fn preserves_relative_order_of_kept_characters() {
        let input = "a\u{1}b\u{2}c";
        assert_eq!(sanitize_text(input), "abc");
    }

    #[test]
    fn strips_delete_character() {
        assert_eq!(sanitize_text("x\u{7f}y"), "xy");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(sanitize_text(""), "");
    }

    #[test]
    fn unicode_content_is_untouched() {
        let input = "héllo wörld — ✓";
        assert_eq!(sanitize_text(input), input);
    }

    #[test]
    fn sanitize_files_cleans_values() {
        let mut files = BTreeMap::new();
        files.insert("app.tsx".to_string(), "const x = 1;\u{0}\n".to_string());
        let cleaned = sanitize_files(&files);
        assert_eq!(cleaned.get("app.tsx").unwrap(), "const x = 1;\n");
    }
}
