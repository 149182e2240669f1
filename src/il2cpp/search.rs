//! Byte pattern search.

/// Longest proper prefix of `needle[..=i]` that is also a suffix, for every `i`.
fn prefix_table(needle: &[u8]) -> Vec<usize> {
    let mut table = vec![0; needle.len()];
    let mut len = 0;
    let mut i = 1;
    while i < needle.len() {
        if needle[i] == needle[len] {
            len += 1;
            table[i] = len;
            i += 1;
        } else if len != 0 {
            len = table[len - 1];
        } else {
            table[i] = 0;
            i += 1;
        }
    }
    table
}

/// Offsets of every occurrence of `needle` in `haystack`, in ascending order.
///
/// Knuth-Morris-Pratt: linear in the haystack, which matters for multi-megabyte memory images.
/// Overlapping occurrences are all reported. An empty needle matches nowhere.
///
/// # Examples
///
/// ```rust
/// use webmodkit::il2cpp::pattern_search;
///
/// assert_eq!(pattern_search(b"abcabcab", b"cab"), [2, 5]);
/// assert!(pattern_search(b"abc", b"x").is_empty());
/// ```
#[must_use]
pub fn pattern_search(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut matches = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return matches;
    }

    let table = prefix_table(needle);
    let mut matched = 0;
    for (i, &byte) in haystack.iter().enumerate() {
        while matched > 0 && byte != needle[matched] {
            matched = table[matched - 1];
        }
        if byte == needle[matched] {
            matched += 1;
        }
        if matched == needle.len() {
            matches.push(i + 1 - needle.len());
            matched = table[matched - 1];
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix() {
        assert_eq!(prefix_table(b"aabaaab"), [0, 1, 0, 1, 2, 2, 3]);
    }

    #[test]
    fn search() {
        let mut haystack = vec![0u8; 600];
        haystack[10..23].copy_from_slice(b"mscorlib.dll\0");
        haystack[500..513].copy_from_slice(b"mscorlib.dll\0");
        assert_eq!(pattern_search(&haystack, b"mscorlib.dll\0"), [10, 500]);
        assert!(pattern_search(&haystack[..400][20..], b"mscorlib.dll\0").is_empty());
    }

    #[test]
    fn overlapping_and_edges() {
        assert_eq!(pattern_search(b"aaaa", b"aa"), [0, 1, 2]);
        assert!(pattern_search(b"aaaa", b"").is_empty());
        assert!(pattern_search(b"a", b"aa").is_empty());
        assert_eq!(pattern_search(b"ab", b"ab"), [0]);
    }
}
