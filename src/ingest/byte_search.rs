//! Substring search over byte buffers.

/// Find the first full occurrence of `needle` that starts at or after `start`
/// and lies entirely within `haystack[start..start + count]`.
///
/// Returns the absolute index into `haystack`. The window is clamped to the
/// haystack length. `needle` must not be empty.
pub fn find(haystack: &[u8], needle: &[u8], start: usize, count: usize) -> Option<usize> {
    debug_assert!(!needle.is_empty(), "empty needle");
    if count < needle.len() || start >= haystack.len() {
        return None;
    }
    let end = start.saturating_add(count).min(haystack.len());
    let window = &haystack[start..end];
    if window.len() < needle.len() {
        return None;
    }

    let first = needle[0];
    let last_start = window.len() - needle.len();
    let mut i = 0;
    while i <= last_start {
        match window[i..=last_start].iter().position(|&b| b == first) {
            Some(offset) => {
                let candidate = i + offset;
                if &window[candidate..candidate + needle.len()] == needle {
                    return Some(start + candidate);
                }
                i = candidate + 1;
            }
            None => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_when_count_shorter_than_needle() {
        let hay = b"--boundary";
        assert_eq!(find(hay, b"--boundary", 0, 9), None);
        assert_eq!(find(hay, b"--boundary", 0, 10), Some(0));
    }

    #[test]
    fn finds_needle_flush_with_window_end() {
        let hay = b"xxxxxABCyyyy";
        // window [2, 8) ends right after "ABC"
        assert_eq!(find(hay, b"ABC", 2, 6), Some(5));
        assert_eq!(find(hay, b"ABC", 2, 5), None);
    }

    #[test]
    fn skips_partial_prefix_matches() {
        let hay = b"AAB-AABAABC";
        assert_eq!(find(hay, b"AABC", 0, hay.len()), Some(7));
    }

    #[test]
    fn respects_start_offset() {
        let hay = b"\r\n\r\nbody\r\n\r\n";
        assert_eq!(find(hay, b"\r\n\r\n", 1, hay.len() - 1), Some(8));
    }

    #[test]
    fn clamps_window_to_haystack() {
        assert_eq!(find(b"abc", b"bc", 0, 100), Some(1));
        assert_eq!(find(b"abc", b"bc", 5, 10), None);
    }
}
