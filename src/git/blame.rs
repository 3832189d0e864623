//! Parsers for `git blame` porcelain and incremental output.

use std::sync::LazyLock;

use regex::Regex;

// First line of `blame -L n,n --porcelain`: `<sha> <source> <result> ...`.
static PORCELAIN_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{40}|[0-9a-f]{64}) (\d+)").expect("blame porcelain regex")
});

/// Extract `(sha, source line)` from the first porcelain output line.
pub(crate) fn parse_porcelain_head(line: &str) -> Option<(String, u32)> {
    let caps = PORCELAIN_HEAD.captures(line)?;
    let line_no = caps[2].parse().ok()?;
    Some((caps[1].to_owned(), line_no))
}

/// Blame reports an all-zero object name for uncommitted lines.
pub(crate) fn is_null_sha(sha: &str) -> bool {
    (sha.len() == 40 || sha.len() == 64) && sha.bytes().all(|b| b == b'0')
}

/// Match an incremental-blame group header for `commit` and return
/// `(source line, result line, span)`.
///
/// Headers look like `<sha> <source> <result> <span>`; all other incremental
/// lines (`author`, `filename`, ...) fall through as `None`.
pub(crate) fn parse_incremental_mapping(line: &str, commit: &str) -> Option<(u32, u32, u32)> {
    let rest = line.strip_prefix(commit)?;
    // Tolerate trailing non-space junk on the object name.
    let rest = rest.trim_start_matches(|c: char| !c.is_whitespace());
    let mut parts = rest.split_whitespace();
    let source = parts.next()?.parse().ok()?;
    let result = parts.next()?.parse().ok()?;
    let span = parts.next()?.parse().ok()?;
    Some((source, result, span))
}

/// Map a sought base line through an incremental group, if it falls inside.
pub(crate) fn map_through_group(
    sought_line: u32,
    (source, result, span): (u32, u32, u32),
) -> Option<u32> {
    if source <= sought_line && sought_line < source + span {
        Some(result + (sought_line - source))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA1: &str = "49790a4b09b4c5fd24bee38b5a97fa41e9a82531";
    const SHA256: &str = "a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3";

    #[test]
    fn porcelain_head_parses_both_hash_widths() {
        let (sha, line) = parse_porcelain_head(&format!("{SHA1} 12 14 1")).unwrap();
        assert_eq!(sha, SHA1);
        assert_eq!(line, 12);

        let (sha, line) = parse_porcelain_head(&format!("{SHA256} 3 3")).unwrap();
        assert_eq!(sha, SHA256);
        assert_eq!(line, 3);

        assert_eq!(parse_porcelain_head("author Someone"), None);
        assert_eq!(parse_porcelain_head("49790a 12 14"), None);
    }

    #[test]
    fn null_sha_detection() {
        assert!(is_null_sha(&"0".repeat(40)));
        assert!(is_null_sha(&"0".repeat(64)));
        assert!(!is_null_sha(SHA1));
        assert!(!is_null_sha("000"));
    }

    #[test]
    fn incremental_mapping_matches_only_sought_commit() {
        let line = format!("{SHA1} 5 9 3");
        assert_eq!(parse_incremental_mapping(&line, SHA1), Some((5, 9, 3)));
        assert_eq!(parse_incremental_mapping(&line, SHA256), None);
        assert_eq!(parse_incremental_mapping("filename src/lib.rs", SHA1), None);
    }

    #[test]
    fn group_mapping_respects_span() {
        // Lines 5..8 of the base moved to 9..12.
        assert_eq!(map_through_group(5, (5, 9, 3)), Some(9));
        assert_eq!(map_through_group(7, (5, 9, 3)), Some(11));
        assert_eq!(map_through_group(8, (5, 9, 3)), None);
        assert_eq!(map_through_group(4, (5, 9, 3)), None);
    }
}
