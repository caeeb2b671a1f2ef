//! Text helpers for tool output.

/// Appended to output that was cut short.
pub const TRUNCATION_MARKER: &str = "\n\n... [output truncated]";

/// Truncate `output` to at most `max_len` bytes, marker included.
///
/// Never splits a UTF-8 character.
#[must_use]
pub fn truncate_output(output: String, max_len: usize) -> String {
    if output.len() <= max_len {
        return output;
    }
    if max_len <= TRUNCATION_MARKER.len() {
        return TRUNCATION_MARKER[..max_len].to_string();
    }
    let mut end = max_len - TRUNCATION_MARKER.len();
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::{TRUNCATION_MARKER, truncate_output};

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("abc".to_string(), 10), "abc");
    }

    #[test]
    fn long_output_gets_marker() {
        let out = truncate_output("x".repeat(100), 40);
        assert_eq!(out.len(), 40);
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn respects_char_boundaries() {
        let input = "é".repeat(30);
        let out = truncate_output(input, TRUNCATION_MARKER.len() + 5);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.trim_end_matches(TRUNCATION_MARKER), "éé");
    }
}
