//! Result-code taxonomy and the aggregation rule used across parallel tasks.
//!
//! Codes follow one convention everywhere in the crate:
//!
//! - negative: infrastructure failure (the work could not run at all)
//! - zero: success
//! - positive: the work ran and reported a failure (count or exit status)

/// Work completed successfully.
pub const SUCCESS: i32 = 0;
/// Work could not run (spawn failure, hook error, timeout, missing prerequisite).
pub const INFRASTRUCTURE_FAILURE: i32 = -1;
/// The caller's progress callback asked the orchestration to stop.
pub const CANCELLED: i32 = -2;

/// Fold one task's code into a running aggregate.
///
/// Negative codes dominate everything and the most negative one wins. A
/// positive code only replaces an aggregate that is still zero, so the first
/// reported failure (in submission order) is kept over later ones.
pub fn combine(aggregate: i32, code: i32) -> i32 {
    if code < 0 {
        return aggregate.min(code);
    }
    if code > 0 && aggregate == SUCCESS {
        return code;
    }
    aggregate
}

/// Aggregate a sequence of codes in submission order.
pub fn combine_all<I: IntoIterator<Item = i32>>(codes: I) -> i32 {
    codes.into_iter().fold(SUCCESS, combine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_success_is_success() {
        assert_eq!(combine_all([0, 0, 0]), SUCCESS);
        assert_eq!(combine_all(std::iter::empty()), SUCCESS);
    }

    #[test]
    fn most_negative_wins_over_positive() {
        assert_eq!(combine_all([3, -1, 5, -4, 0]), -4);
        assert_eq!(combine_all([-4, 3, -1]), -4);
        assert_eq!(combine_all([7, -2]), -2);
    }

    #[test]
    fn first_positive_wins_without_negatives() {
        assert_eq!(combine_all([0, 2, 9, 1]), 2);
        assert_eq!(combine_all([9, 2]), 9);
    }

    #[test]
    fn positive_never_replaces_negative() {
        assert_eq!(combine(-1, 5), -1);
    }
}
