//! Property-based invariants that should hold for any input, not just
//! the handful of examples the unit tests happen to cover.

use operon::duration::Duration;
use operon::path::OperationPath;
use operon::state::{derive_status, OperationStatus, StatusInputs};
use proptest::prelude::*;

proptest! {
    /// `Duration::new` always normalizes so the attosecond remainder is
    /// non-negative and strictly less than one second's worth, regardless
    /// of how far out of range the raw components were.
    #[test]
    fn duration_normalization_keeps_attos_in_range(seconds in any::<i32>(), attos in any::<i64>()) {
        let d = Duration::new(seconds as i64, attos);
        prop_assert!(d.subsecond_attos() >= 0);
        prop_assert!(d.subsecond_attos() < 1_000_000_000_000_000_000);
    }

    /// Negation is its own inverse.
    #[test]
    fn duration_double_negate_is_identity(seconds in -1_000_000i64..1_000_000i64) {
        let d = Duration::from_secs(seconds);
        prop_assert_eq!(d.negate().negate(), d);
    }

    /// Dividing by zero never panics and always yields zero, the crate's
    /// blanket "bad backoff input never panics" stance.
    #[test]
    fn duration_div_by_zero_is_always_zero(seconds in -1_000_000i64..1_000_000i64) {
        let d = Duration::from_secs(seconds);
        prop_assert_eq!(d.div_int(0), Duration::ZERO);
    }

    /// A path is always a prefix of itself, and of itself with any
    /// further elements appended.
    #[test]
    fn path_is_prefix_of_itself_and_its_extensions(
        segments in prop::collection::vec(0i64..1000, 0..6),
        extra in 0i64..1000,
    ) {
        let path = OperationPath::from_elements(segments.into_iter().map(|s| s.into()));
        prop_assert!(path.is_prefix_of(&path));
        let extended = path.appending(extra);
        prop_assert!(path.is_prefix_of(&extended));
    }

    /// Prefix matching is never symmetric for genuinely distinct-length
    /// paths: a strictly longer extension is never a prefix of the
    /// shorter path it extends.
    #[test]
    fn longer_path_is_never_a_prefix_of_its_own_shorter_prefix(
        segments in prop::collection::vec(0i64..1000, 0..6),
        extra in 0i64..1000,
    ) {
        let path = OperationPath::from_elements(segments.into_iter().map(|s| s.into()));
        let extended = path.appending(extra);
        prop_assert!(!extended.is_prefix_of(&path));
    }

    /// Status derivation is a pure function of its inputs: loading always
    /// wins, and with no updates at all the result is always idle,
    /// regardless of whatever else is passed in `current`/`error`.
    #[test]
    fn loading_always_wins_over_any_other_inputs(
        value_update_count in 0u64..5,
        error_update_count in 0u64..5,
        has_current in any::<bool>(),
        has_error in any::<bool>(),
    ) {
        let status = derive_status(StatusInputs::<i32, String> {
            is_loading: true,
            value_update_count,
            error_update_count,
            value_last_updated_at: None,
            error_last_updated_at: None,
            current: &if has_current { Some(0) } else { None },
            error: &if has_error { Some(String::new()) } else { None },
        });
        prop_assert_eq!(status, OperationStatus::Loading);
    }

    /// With no updates ever recorded and not loading, status is always
    /// idle regardless of whatever stray `current`/`error` values are
    /// passed (which should never happen in practice, but the function
    /// itself must still be total and deterministic).
    #[test]
    fn no_updates_and_not_loading_is_always_idle(
        has_current in any::<bool>(),
        has_error in any::<bool>(),
    ) {
        let status = derive_status(StatusInputs::<i32, String> {
            is_loading: false,
            value_update_count: 0,
            error_update_count: 0,
            value_last_updated_at: None,
            error_last_updated_at: None,
            current: &if has_current { Some(0) } else { None },
            error: &if has_error { Some(String::new()) } else { None },
        });
        prop_assert_eq!(status, OperationStatus::Idle);
    }
}
