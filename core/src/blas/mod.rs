//! # Blocked level-3 operations
//!
//! Every routine here follows the same pattern: walk one dimension in panels
//! with a [`PanelLoop`](crate::panel::PanelLoop), redistribute the current
//! panel into the handful of distributions that make the update local, run a
//! local kernel, and (when needed) reduce the partial results back.
//!
//! ## The stationary-C product
//!
//! With $C$ in `[MC,MR]`, the process at $(s, t)$ owns rows $i \equiv s$ and
//! columns $j \equiv t$ of $C$. Splitting the inner dimension into panels,
//! $$
//! C = \sum_k A_k B_k,
//! $$
//! it needs rows $i \equiv s$ of $A_k$ (an `[MC,*]` panel) and columns
//! $j \equiv t$ of $B_k$ (a `[*,MR]` panel). Both come from one all-gather
//! each, and the update is a plain local `gemm`.
//!
//! ## Supported variants
//!
//! | routine | variants |
//! |---|---|
//! | [`gemm`] | `NN`, `TN` |
//! | [`trsm`] | left, lower or upper, normal |
//! | [`trmm`] | right, lower, transpose |
//! | [`syrk`] | lower or upper, normal or transpose |
//! | [`trr2k`] | `NNNN`, `NNTT` |
//!
//! Anything else fails with a logic error. Outputs stored in a distribution
//! other than `[MC,MR]` are converted in and out around the computation.

mod gemm;
mod syrk;
mod trmm;
mod trr2k;
mod trsm;

pub use gemm::gemm;
pub use syrk::syrk;
pub use trmm::trmm;
pub use trr2k::trr2k;
pub use trsm::trsm;

use crate::comm::Communicator;
use crate::dist::Distribution;
use crate::dist_matrix::DistMatrix;
use crate::error::{Error, Result};
use crate::matrix::LocalMatrix;
use crate::Scalar;
use gridmat_kernels::UpperOrLower;

/// Runs `f` on an `[MC,MR]` copy of `x` and writes the result back, or
/// directly on `x` when it already is `[MC,MR]`.
pub(crate) fn with_mc_mr<'g, T, C, R>(
    x: &mut DistMatrix<'g, T, C>,
    f: impl FnOnce(&mut DistMatrix<'g, T, C>) -> Result<R>,
) -> Result<R>
where
    T: Scalar,
    C: Communicator,
{
    if x.dist() == Distribution::MC_MR {
        return f(x);
    }
    let mut proxy = x.redistribute(Distribution::MC_MR)?;
    let out = f(&mut proxy)?;
    x.copy_from(&proxy)?;
    Ok(out)
}

pub(crate) fn in_triangle(uplo: UpperOrLower, i: usize, j: usize) -> bool {
    match uplo {
        UpperOrLower::Lower => i >= j,
        UpperOrLower::Upper => i <= j,
    }
}

/// Adds the entries of `update`, a block shaped like `c`'s local store, to
/// `c` wherever the global position lies in the `uplo` triangle.
pub(crate) fn add_to_triangle<T: Scalar, C: Communicator>(
    c: &mut DistMatrix<'_, T, C>,
    uplo: UpperOrLower,
    update: &LocalMatrix<T>,
) -> Result<()> {
    let (local_height, local_width) = (c.local_height(), c.local_width());
    if update.height() != local_height || update.width() != local_width {
        return Err(Error::logic(
            "add_to_triangle",
            format!(
                "{}x{} update for a {}x{} local block",
                update.height(),
                update.width(),
                local_height,
                local_width
            ),
        ));
    }
    let (col, row) = (c.col_layout(), c.row_layout());
    let delta = update.to_packed()?;
    let mut data = c.local().to_packed()?;
    for lj in 0..local_width {
        let j = row.global_index(lj);
        for li in 0..local_height {
            if in_triangle(uplo, col.global_index(li), j) {
                data[li + lj * local_height] += delta[li + lj * local_height];
            }
        }
    }
    c.local_mut().fill_from_packed(&data)
}

/// Logic error for a shape combination an operation cannot accept.
pub(crate) fn nonconformal(op: &'static str, detail: impl Into<String>) -> Error {
    Error::logic(op, format!("nonconformal operands: {}", detail.into()))
}

/// Logic error for an operand orientation with no implementation.
pub(crate) fn unsupported(op: &'static str, detail: impl Into<String>) -> Error {
    Error::logic(op, format!("unsupported variant: {}", detail.into()))
}

pub(crate) fn check_square<T: Scalar, C: Communicator>(
    op: &'static str,
    name: &str,
    a: &DistMatrix<'_, T, C>,
) -> Result<usize> {
    if a.height() != a.width() {
        return Err(nonconformal(
            op,
            format!("{} is {}x{}, expected square", name, a.height(), a.width()),
        ));
    }
    Ok(a.height())
}
