//! Oracle-style parallel hint parsing and rewriting.
//!
//! Pure functions over `/*+ PARALLEL(n) ... */`-shaped hint strings. No
//! allocation state is held between calls.

use regex::Regex;
use std::sync::OnceLock;

fn parallel_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)PARALLEL\s*\(\s*(\d+)\s*\)").unwrap())
}

/// Extract the parallel degree from a hint string.
///
/// Returns `default` if `hint` is `None`, empty, or has no `PARALLEL(n)` lexeme.
pub fn parse(hint: Option<&str>, default: u32) -> u32 {
    let Some(hint) = hint else {
        return default;
    };
    if hint.is_empty() {
        return default;
    }

    parallel_pattern()
        .captures(hint)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(default)
}

/// Build a new hint string for the given parallel degree.
pub fn build(parallel: u32, include_full: bool) -> String {
    if include_full {
        format!("/*+ PARALLEL({parallel}) FULL(A) */")
    } else {
        format!("/*+ PARALLEL({parallel}) */")
    }
}

/// Adjust the parallel degree within an existing hint, preserving all other
/// tokens. Synthesizes a fresh hint if `original` has no `PARALLEL(n)` lexeme.
pub fn adjust(original: &str, new_parallel: u32) -> String {
    if original.is_empty() || !parallel_pattern().is_match(original) {
        return build(new_parallel, true);
    }

    let replacement = format!("PARALLEL({new_parallel})");
    parallel_pattern()
        .replace(original, replacement.as_str())
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extracts_degree() {
        assert_eq!(parse(Some("/*+ PARALLEL(8) FULL(A) */"), 1), 8);
        assert_eq!(parse(Some("/*+ PARALLEL(16) */"), 1), 16);
    }

    #[test]
    fn parse_tolerates_whitespace_and_case() {
        assert_eq!(parse(Some("/*+ parallel ( 4 ) */"), 1), 4);
    }

    #[test]
    fn parse_falls_back_to_default() {
        assert_eq!(parse(Some("/*+ FULL(A) */"), 1), 1);
        assert_eq!(parse(None, 1), 1);
        assert_eq!(parse(Some(""), 1), 1);
    }

    #[test]
    fn build_includes_full_by_default() {
        assert_eq!(build(8, true), "/*+ PARALLEL(8) FULL(A) */");
        assert_eq!(build(16, false), "/*+ PARALLEL(16) */");
    }

    #[test]
    fn adjust_replaces_preserving_other_tokens() {
        assert_eq!(
            adjust("/*+ PARALLEL(8) FULL(A) */", 4),
            "/*+ PARALLEL(4) FULL(A) */"
        );
        assert_eq!(
            adjust("/*+ PARALLEL(16) INDEX(B) */", 2),
            "/*+ PARALLEL(2) INDEX(B) */"
        );
    }

    #[test]
    fn adjust_synthesizes_when_absent() {
        assert_eq!(adjust("", 8), build(8, true));
    }

    #[test]
    fn parse_adjust_round_trip() {
        let hints = ["/*+ PARALLEL(8) FULL(A) */", "/*+ FULL(A) INDEX(B) */", ""];
        for h in hints {
            for n in [1u32, 2, 16, 64] {
                let adjusted = adjust(h, n);
                assert_eq!(parse(Some(&adjusted), 0), n);
            }
        }
    }
}
