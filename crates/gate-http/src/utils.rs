//! Internal helper macros.

/// Early-returns with an error when a condition does not hold.
///
/// Like `assert!`, but produces an `Err` instead of panicking, which keeps
/// validation checks in decoding paths on the `Result` track.
///
/// # Example
///
/// ```ignore
/// ensure!(offset <= MAX_HEADER_BYTES, ParseError::too_large_header(offset, MAX_HEADER_BYTES));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
