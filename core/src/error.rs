//! Error taxonomy shared by every distributed operation.
//!
//! Errors are raised on the process that detects them and are never agreed
//! upon across the grid. Callers are expected to pass identical shapes and
//! grids on every process so that a failing precondition fails everywhere.

use gridmat_kernels::KernelError;
use thiserror::Error;

/// Error type for grid, distribution and algorithm operations.
///
/// Every variant carries the name of the operation that raised it in place of
/// an ambient call stack.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Storage could not be obtained.
    #[error("{op}: allocation failed: {msg}")]
    Allocation { op: &'static str, msg: String },
    /// A global or local index lies outside the matrix.
    #[error("{op}: index out of bounds: {msg}")]
    OutOfBounds { op: &'static str, msg: String },
    /// A constructor or tunable received an invalid parameter.
    #[error("{op}: invalid argument: {msg}")]
    Argument { op: &'static str, msg: String },
    /// Nonconformal shapes, mismatched grids, illegal distributions or
    /// writes through a locked view.
    #[error("{op}: logic error: {msg}")]
    Logic { op: &'static str, msg: String },
    /// Numerical failure, such as an iteration that did not converge.
    #[error("{op}: runtime error: {msg}")]
    Runtime { op: &'static str, msg: String },
    #[error("{op}: {msg}")]
    Generic { op: &'static str, msg: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn allocation(op: &'static str, msg: impl Into<String>) -> Self {
        Error::Allocation {
            op,
            msg: msg.into(),
        }
    }

    pub fn out_of_bounds(op: &'static str, msg: impl Into<String>) -> Self {
        Error::OutOfBounds {
            op,
            msg: msg.into(),
        }
    }

    pub fn argument(op: &'static str, msg: impl Into<String>) -> Self {
        Error::Argument {
            op,
            msg: msg.into(),
        }
    }

    pub fn logic(op: &'static str, msg: impl Into<String>) -> Self {
        Error::Logic {
            op,
            msg: msg.into(),
        }
    }

    pub fn runtime(op: &'static str, msg: impl Into<String>) -> Self {
        Error::Runtime {
            op,
            msg: msg.into(),
        }
    }

    pub fn generic(op: &'static str, msg: impl Into<String>) -> Self {
        Error::Generic {
            op,
            msg: msg.into(),
        }
    }

    /// Name of the operation that raised the error.
    pub fn op(&self) -> &'static str {
        match self {
            Error::Allocation { op, .. }
            | Error::OutOfBounds { op, .. }
            | Error::Argument { op, .. }
            | Error::Logic { op, .. }
            | Error::Runtime { op, .. }
            | Error::Generic { op, .. } => op,
        }
    }

    /// Integer status code used at foreign-language boundaries.
    ///
    /// `0` is reserved for success.
    pub fn status_code(&self) -> i32 {
        match self {
            Error::Allocation { .. } => 1,
            Error::OutOfBounds { .. } => 2,
            Error::Argument { .. } => 3,
            Error::Logic { .. } => 4,
            Error::Runtime { .. } => 5,
            Error::Generic { .. } => -1,
        }
    }
}

/// Status code of a whole result, `0` on success.
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.status_code(),
    }
}

impl From<KernelError> for Error {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Singular { .. } => Error::runtime("local kernel", err.to_string()),
            other => Error::logic("local kernel", other.to_string()),
        }
    }
}
