//! Loose version comparison for catalog records
//!
//! Catalog versions are not semver: they are dot-separated segments
//! that may mix digits and letters (`4.2.1`, `10.5b3`, `2024.06`).
//! Comparison is numeric per segment with a lexicographic tie-break on
//! any non-numeric remainder; missing segments compare as zero.

use std::cmp::Ordering;

/// Compare two loose version strings.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();
    let len = a_parts.len().max(b_parts.len());

    for i in 0..len {
        let pa = a_parts.get(i).copied().unwrap_or("0");
        let pb = b_parts.get(i).copied().unwrap_or("0");
        match compare_segment(pa, pb) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// True when `candidate` is strictly newer than `current`.
#[must_use]
pub fn is_newer(candidate: &str, current: &str) -> bool {
    compare_versions(candidate, current) == Ordering::Greater
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    let (a_num, a_rest) = split_numeric(a);
    let (b_num, b_rest) = split_numeric(b);
    match a_num.cmp(&b_num) {
        Ordering::Equal => a_rest.cmp(b_rest),
        other => other,
    }
}

/// Split a segment into its leading numeric value and the remainder.
fn split_numeric(segment: &str) -> (u64, &str) {
    let end = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    let value = segment[..end].parse::<u64>().unwrap_or(0);
    (value, &segment[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_numeric_ordering() {
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "10.0"), Ordering::Less);
    }

    #[test]
    fn missing_segments_compare_as_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
    }

    #[test]
    fn alphanumeric_segments_tie_break() {
        assert_eq!(compare_versions("10.5b3", "10.5b2"), Ordering::Greater);
        assert_eq!(compare_versions("10.5", "10.5b2"), Ordering::Less);
        assert_eq!(compare_versions("1.0a", "1.0"), Ordering::Greater);
    }

    #[test]
    fn is_newer_is_strict() {
        assert!(is_newer("4.2.1", "4.2"));
        assert!(!is_newer("4.2", "4.2.0"));
    }
}
