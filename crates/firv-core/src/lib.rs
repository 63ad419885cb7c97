pub mod diagnostics;
pub mod error;
pub mod ir;
pub mod pretty;

// Re-export so downstream crates log through one tracing instance.
pub use tracing;

pub type Error = crate::error::Error;
pub type Result<T> = crate::error::Result<T>;
