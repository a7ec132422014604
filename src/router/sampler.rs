//! Fixed-ratio sampling of numbered signals to the secondary destination
//!
//! The decision is computed once when a signal number is allocated and
//! persisted in `signal_tracking.forwarded_to_secondary`. Edits always follow
//! the persisted decision, even if the configured denominator changes later.

/// Default 1-in-N sampling ratio
pub const DEFAULT_SAMPLING_DENOMINATOR: u64 = 10;

/// Whether signal `n` is also delivered to the secondary destination
///
/// Pure: true iff `n` is a positive multiple of the denominator. A zero
/// denominator disables sampling entirely.
pub fn should_sample_to_secondary(signal_number: i64, denominator: u64) -> bool {
    if denominator == 0 || signal_number <= 0 {
        return false;
    }
    signal_number % denominator as i64 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_denominator_every_tenth() {
        for n in 1..=9 {
            assert!(!should_sample_to_secondary(n, 10), "signal {} must not sample", n);
        }
        assert!(should_sample_to_secondary(10, 10));
        assert!(!should_sample_to_secondary(11, 10));
        assert!(should_sample_to_secondary(20, 10));
        assert!(should_sample_to_secondary(100, 10));
    }

    #[test]
    fn test_alternate_denominators() {
        assert!(should_sample_to_secondary(5, 5));
        assert!(!should_sample_to_secondary(6, 5));
        assert!(should_sample_to_secondary(1, 1));
        assert!(should_sample_to_secondary(2, 1));
    }

    #[test]
    fn test_zero_denominator_never_samples() {
        for n in 1..=50 {
            assert!(!should_sample_to_secondary(n, 0));
        }
    }

    #[test]
    fn test_non_positive_numbers_never_sample() {
        assert!(!should_sample_to_secondary(0, 10));
        assert!(!should_sample_to_secondary(-10, 10));
    }
}
