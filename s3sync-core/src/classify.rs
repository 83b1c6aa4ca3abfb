//! Size threshold classification
//!
//! Decides whether a file fits in a single object or must be split.

use crate::MAX_SINGLE_OBJECT_SIZE;

/// How a file of a given size is uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Fits in one PUT
    Whole,
    /// Exceeds the single-object limit
    Split,
}

/// Classify against the store's single-PUT limit
pub fn classify(size_bytes: u64) -> SizeClass {
    classify_with_limit(size_bytes, MAX_SINGLE_OBJECT_SIZE)
}

/// Classify against an explicit limit. A size equal to the limit is `Whole`.
pub fn classify_with_limit(size_bytes: u64, limit: u64) -> SizeClass {
    if size_bytes > limit {
        SizeClass::Split
    } else {
        SizeClass::Whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        assert_eq!(classify(0), SizeClass::Whole);
        assert_eq!(classify(MAX_SINGLE_OBJECT_SIZE - 1), SizeClass::Whole);
        assert_eq!(classify(MAX_SINGLE_OBJECT_SIZE), SizeClass::Whole);
        assert_eq!(classify(MAX_SINGLE_OBJECT_SIZE + 1), SizeClass::Split);
        assert_eq!(classify(u64::MAX), SizeClass::Split);
    }

    #[test]
    fn test_custom_limit() {
        assert_eq!(classify_with_limit(4, 4), SizeClass::Whole);
        assert_eq!(classify_with_limit(5, 4), SizeClass::Split);
    }
}
