//! Extension traits for handling results without unwrap/expect/panic.

use std::fmt::Display;

/// Combinators for failures that should be logged and then tolerated.
///
/// Implemented for any `Result` whose error can be displayed, so host,
/// engine and `anyhow` errors all share it.
pub trait ResultExt<T> {
    /// Convert to an `Option`, logging the error at warn level.
    fn ok_logged(self, operation: &str) -> Option<T>;

    /// Get the value or its default, logging the error at warn level.
    fn or_default_logged(self, operation: &str) -> T
    where
        T: Default;

    /// Inspect the error message without consuming the result.
    fn inspect_error<F: FnOnce(&str)>(self, f: F) -> Self;
}

impl<T, E: Display> ResultExt<T> for std::result::Result<T, E> {
    fn ok_logged(self, operation: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(operation, error = %e, "Operation failed");
                None
            }
        }
    }

    fn or_default_logged(self, operation: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(operation, error = %e, "Operation failed, using default");
                T::default()
            }
        }
    }

    fn inspect_error<F: FnOnce(&str)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(&e.to_string());
        }
        self
    }
}
