use firv_core::diagnostics::{report_error, report_error_with_context};
use firv_core::error::Error;

/// Create a pass error, recording it on the diagnostic channel.
pub fn pass_error(message: impl Into<String>) -> Error {
    report_error(message)
}

pub fn pass_error_with_context(context: impl Into<String>, message: impl Into<String>) -> Error {
    report_error_with_context(context, message)
}

/// Return early with a pass error.
#[macro_export]
macro_rules! pass_bail {
    ($message:expr) => {
        return Err($crate::error::pass_error($message))
    };
    ($context:expr, $message:expr) => {
        return Err($crate::error::pass_error_with_context($context, $message))
    };
}

/// Ensure a condition holds, or return a pass error.
#[macro_export]
macro_rules! pass_ensure {
    ($cond:expr, $message:expr) => {
        if !($cond) {
            $crate::pass_bail!($message);
        }
    };
    ($cond:expr, $context:expr, $message:expr) => {
        if !($cond) {
            $crate::pass_bail!($context, $message);
        }
    };
}
