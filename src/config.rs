//! `RuntimeConfig` — process-wide defaults a [`crate::client::Client`] is
//! built with.
//!
//! Mirrors the teacher's `StoreConfig` (`store/mod.rs`): a small struct of
//! independently documented knobs with sane defaults, rather than a single
//! monolithic "options bag" threaded everywhere.
//!
//! | Field | Default | Meaning |
//! |---|---|---|
//! | `max_history_length` | `25` | Mutation history capacity a fresh store is seeded with, absent a `MaxHistoryLength` modifier. |
//! | `test_mode` | `false` | When `true`, [`crate::client::DefaultStoreCreator`] disables retries, backoff sleeps, and signal-driven reruns. |

use crate::error::RuntimeError;

/// Process-wide defaults applied when a [`crate::client::Client`] creates
/// a new store and no more specific override was supplied.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    max_history_length: usize,
    test_mode: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_history_length: 25,
            test_mode: false,
        }
    }
}

impl RuntimeConfig {
    /// The production defaults: retries and backoff enabled, real sleeps.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config suited to tests: [`RuntimeConfig::test_mode`] is `true`.
    /// See `spec.md` §6, "Defaults policy": "in test contexts... retries
    /// and signal-driven reruns are disabled and delays are instant".
    pub fn for_tests() -> Self {
        Self {
            test_mode: true,
            ..Self::default()
        }
    }

    /// The mutation history capacity a fresh store is seeded with.
    pub fn max_history_length(&self) -> usize {
        self.max_history_length
    }

    /// Override the default history capacity. Returns a
    /// [`RuntimeError::PreconditionViolation`] if `n == 0`.
    pub fn with_max_history_length(mut self, n: usize) -> Result<Self, RuntimeError> {
        if n == 0 {
            return Err(RuntimeError::PreconditionViolation {
                field: "max_history_length",
                value: 0,
            });
        }
        self.max_history_length = n;
        Ok(self)
    }

    /// `true` if this config should drive the test-mode default policy.
    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// Toggle test mode.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_defaults_are_not_test_mode() {
        let config = RuntimeConfig::new();
        assert!(!config.test_mode());
        assert_eq!(config.max_history_length(), 25);
    }

    #[test]
    fn for_tests_enables_test_mode() {
        assert!(RuntimeConfig::for_tests().test_mode());
    }

    #[test]
    fn rejects_zero_history_length() {
        let err = RuntimeConfig::new().with_max_history_length(0).unwrap_err();
        assert!(matches!(err, RuntimeError::PreconditionViolation { value: 0, .. }));
    }
}
