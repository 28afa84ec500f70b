//! Vector and matrix norms.
//!
//! Local contributions are kept as a `(scale, sum of squares)` pair so that
//! combining them across processes never overflows or underflows.

use crate::blas::gemm;
use crate::comm::Communicator;
use crate::config::{DEFAULT_TWO_NORM_MAX_ITS, DEFAULT_TWO_NORM_TOL};
use crate::dist::Distribution;
use crate::dist_matrix::DistMatrix;
use crate::error::{Error, Result};
use crate::matrix::LocalMatrix;
use crate::RealScalar;
use gridmat_kernels::{self as kernels, Orientation};
use tracing::{debug_span, trace};

/// Seed of the starting vector of [`two_norm_estimate`].
const POWER_ITERATION_SEED: u64 = 0x5eed;

fn local_sum_of_squares<T: RealScalar>(local: &LocalMatrix<T>) -> Result<(T, T)> {
    local.with_ref(kernels::sum_of_squares)
}

/// Merges `(scale, ssq)` pairs into `scale * sqrt(ssq)`.
fn combine<T: RealScalar>(parts: &[Vec<T>]) -> T {
    let mut scale = T::zero();
    let mut ssq = T::one();
    for part in parts {
        let &[s, q] = part.as_slice() else { continue };
        if s == T::zero() {
            continue;
        }
        if scale < s {
            let ratio = scale / s;
            ssq = q + ssq * ratio * ratio;
            scale = s;
        } else {
            let ratio = s / scale;
            ssq += q * ratio * ratio;
        }
    }
    scale * ssq.sqrt()
}

/// Euclidean norm of a row or column vector. Collective; every process
/// returns the same value.
///
/// For an `[MC,MR]` column vector only the grid column holding it
/// participates in the reduction, then broadcasts along each grid row.
/// Other distributions are converted to `[MC,MR]` first.
pub fn nrm2<T: RealScalar, C: Communicator>(x: &DistMatrix<'_, T, C>) -> Result<T> {
    let op = "nrm2";
    if x.width() != 1 && x.height() != 1 {
        return Err(Error::logic(
            op,
            format!("a {}x{} matrix is not a vector", x.height(), x.width()),
        ));
    }
    if x.dist() != Distribution::MC_MR {
        return nrm2(&x.redistribute(Distribution::MC_MR)?);
    }
    let grid = x.grid();
    let (holds_vector, gather, spread, root) = if x.width() == 1 {
        (grid.col() == x.row_align(), grid.mc_comm(), grid.mr_comm(), x.row_align())
    } else {
        (grid.row() == x.col_align(), grid.mr_comm(), grid.mc_comm(), x.col_align())
    };
    let mut norm = Vec::with_capacity(1);
    if holds_vector {
        let (scale, ssq) = local_sum_of_squares(x.local())?;
        let parts = gather.all_gather(&[scale, ssq])?;
        norm.push(combine(&parts));
    }
    spread.broadcast(&mut norm, root)?;
    norm.first()
        .copied()
        .ok_or_else(|| Error::generic(op, "vector holder broadcast no value"))
}

/// Frobenius norm of a matrix in any distribution. Collective.
pub fn frobenius_norm<T: RealScalar, C: Communicator>(a: &DistMatrix<'_, T, C>) -> Result<T> {
    let grid = a.grid();
    let contribution = if a.dist().is_primary(grid.row(), grid.col()) {
        let (scale, ssq) = local_sum_of_squares(a.local())?;
        vec![scale, ssq]
    } else {
        Vec::new()
    };
    let parts = grid.vc_comm().all_gather(&contribution)?;
    Ok(combine(&parts))
}

/// Estimates the spectral norm by power iteration on `A^T A`.
///
/// Stops once consecutive estimates of `||A||_2` differ by at most
/// `tol * max(m, n)`; fails with a runtime error if that has not happened
/// after `max_its` iterations.
pub fn two_norm_estimate<T: RealScalar, C: Communicator>(
    a: &DistMatrix<'_, T, C>,
    tol: T,
    max_its: usize,
) -> Result<T> {
    let op = "two_norm_estimate";
    let (m, n) = (a.height(), a.width());
    let grid = a.grid();
    let _span = debug_span!("two_norm_estimate", m, n, max_its).entered();

    let mut x = DistMatrix::<T, C>::with_shape(grid, Distribution::MC_MR, n, 1)?;
    let mut y = DistMatrix::<T, C>::with_shape(grid, Distribution::MC_MR, m, 1)?;
    let mut seed = POWER_ITERATION_SEED;
    x.set_to_random(seed)?;
    let norm = nrm2(&x)?;
    if norm != T::zero() {
        x.scale(T::one() / norm)?;
    }

    let threshold = tol * T::from_usize(m.max(n)).unwrap_or_else(T::one);
    let mut estimate = T::zero();
    for iteration in 1..=max_its {
        let last = estimate;
        gemm(Orientation::Normal, Orientation::Normal, T::one(), a, &x, T::zero(), &mut y)?;
        gemm(Orientation::Transpose, Orientation::Normal, T::one(), a, &y, T::zero(), &mut x)?;
        // `x` now holds `A^T A x` for unit `x`, so its norm estimates `||A||_2^2`
        let squared = nrm2(&x)?;
        if squared == T::zero() {
            seed += 1;
            x.set_to_random(seed)?;
        } else {
            x.scale(T::one() / squared)?;
        }
        estimate = squared.sqrt();
        trace!(iteration, ?estimate, "power iteration");
        if (estimate - last).abs() <= threshold {
            return Ok(estimate);
        }
    }
    Err(Error::runtime(
        op,
        format!("no convergence within {} iterations", max_its),
    ))
}

/// [`two_norm_estimate`] with the default tolerance and iteration cap.
pub fn two_norm<T: RealScalar, C: Communicator>(a: &DistMatrix<'_, T, C>) -> Result<T> {
    let tol = T::from_f64(DEFAULT_TWO_NORM_TOL).unwrap_or_else(T::epsilon);
    two_norm_estimate(a, tol, DEFAULT_TWO_NORM_MAX_ITS)
}
