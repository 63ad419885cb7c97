use crate::diagnostics::Diagnostic;
use eyre::Error as EyreError;
use std::result;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// An IR construction request that cannot produce well-typed IR, e.g.
    /// storing through a non-pointer or indexing past a struct's fields.
    #[error("malformed IR: {0}")]
    MalformedIr(String),
    /// A function failed structural verification.
    #[error("verification of `{function}` failed: {message}")]
    Verification { function: String, message: String },
    /// An error that was also recorded on the diagnostic channel.
    #[error("{0}")]
    Diagnostic(Diagnostic),
    #[error("generic error: {0}")]
    Generic(EyreError),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn malformed_ir(message: impl Into<String>) -> Self {
        Error::MalformedIr(message.into())
    }

    pub fn verification(function: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Verification {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn diagnostic(diagnostic: Diagnostic) -> Self {
        Error::Diagnostic(diagnostic)
    }
}

impl From<EyreError> for Error {
    fn from(err: EyreError) -> Self {
        Error::Generic(err)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(EyreError::msg(s))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(EyreError::msg(s.to_string()))
    }
}
