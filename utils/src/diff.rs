//! Unified patches and change stats.

use similar::{ChangeTag, TextDiff};

const CONTEXT_LINES: usize = 3;

/// Unified patch between the current and proposed content of `file_name`.
///
/// Headers read `Current` / `Proposed` so that confirmation prompts show
/// which side is on disk. Returns an empty string when nothing changed.
#[must_use]
pub fn unified_patch(file_name: &str, current: &str, proposed: &str) -> String {
    if current == proposed {
        return String::new();
    }
    let diff = TextDiff::from_lines(current, proposed);
    let mut patch = format!("Index: {file_name}\n");
    patch.push_str(
        &diff
            .unified_diff()
            .context_radius(CONTEXT_LINES)
            .header(&format!("{file_name}\tCurrent"), &format!("{file_name}\tProposed"))
            .to_string(),
    );
    patch
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub added: u32,
    pub removed: u32,
}

#[must_use]
pub fn diff_stats(current: &str, proposed: &str) -> DiffStats {
    let diff = TextDiff::from_lines(current, proposed);
    let mut stats = DiffStats::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stats.added += 1,
            ChangeTag::Delete => stats.removed += 1,
            ChangeTag::Equal => {}
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::{DiffStats, diff_stats, unified_patch};

    #[test]
    fn identical_content_has_empty_patch() {
        assert!(unified_patch("a.txt", "same\n", "same\n").is_empty());
    }

    #[test]
    fn patch_has_headers_and_hunk() {
        let patch = unified_patch("a.txt", "one\ntwo\n", "one\nthree\n");
        assert!(patch.starts_with("Index: a.txt\n"));
        assert!(patch.contains("--- a.txt\tCurrent"));
        assert!(patch.contains("+++ a.txt\tProposed"));
        assert!(patch.contains("-two"));
        assert!(patch.contains("+three"));
    }

    #[test]
    fn stats_count_lines() {
        assert_eq!(
            diff_stats("a\nb\n", "a\nc\nd\n"),
            DiffStats {
                added: 2,
                removed: 1
            }
        );
    }
}
