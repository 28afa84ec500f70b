//! Local dense kernels for `gridmat`.
//!
//! Every routine here works on a single process's column-major buffer and never
//! communicates. The distributed layer in `gridmat` calls into these the same
//! way a distributed BLAS calls a vendor BLAS on its local blocks.

use num_traits::{Float, FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_gemm;
pub mod cpu_level1;
pub mod cpu_transpose;
pub mod cpu_triangular;
pub mod layout;

pub use cpu_gemm::gemm;
pub use cpu_level1::{axpy, nrm2, scal, sum_of_squares};
pub use cpu_transpose::transpose;
pub use cpu_triangular::{trmm, trsm};
pub use layout::{MatMut, MatRef};

#[derive(Error, Debug, PartialEq)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Invalid leading dimension {ldim} for a matrix with {rows} rows")]
    InvalidLeadingDimension { rows: usize, ldim: usize },
    #[error("Buffer of length {len} is too short, need {required}")]
    BufferTooShort { len: usize, required: usize },
    #[error("Singular triangular matrix: zero pivot at {index}")]
    Singular { index: usize },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// This mirrors `Scalar` in the main crate to avoid circular dependencies.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// Elements that additionally support square roots (norms).
pub trait KernelReal: KernelElem + Float {}

impl<T> KernelReal for T where T: KernelElem + Float {}

/// How an operand enters a product. Only real scalars are supported, so
/// `Adjoint` behaves like `Transpose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Normal,
    Transpose,
    Adjoint,
}

impl Orientation {
    pub fn is_transposed(self) -> bool {
        !matches!(self, Orientation::Normal)
    }
}

/// Which side a triangular operand is applied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// Which triangle of a matrix is referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpperOrLower {
    Lower,
    Upper,
}

/// Whether the diagonal of a triangular matrix is implicitly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOrNonUnit {
    NonUnit,
    Unit,
}
