//! Triangular solve and multiply on local column-major blocks.

use crate::{
    KernelElem, KernelError, MatMut, MatRef, Orientation, Result, Side, UnitOrNonUnit,
    UpperOrLower, gemm,
};
use rayon::prelude::*;

/// Dense packed copy of the referenced triangle of `op(A)`. Returns the
/// buffer and whether the triangle ended up lower after applying `op`.
fn triangle_of<T: KernelElem>(
    uplo: UpperOrLower,
    orient: Orientation,
    diag: UnitOrNonUnit,
    a: MatRef<'_, T>,
) -> (Vec<T>, bool) {
    let n = a.rows();
    let lower = (uplo == UpperOrLower::Lower) != orient.is_transposed();
    let mut out = vec![T::zero(); n * n];
    for j in 0..n {
        for i in 0..n {
            let in_triangle = if lower { i >= j } else { i <= j };
            if !in_triangle {
                continue;
            }
            out[i + j * n] = if i == j && diag == UnitOrNonUnit::Unit {
                T::one()
            } else if orient.is_transposed() {
                a.get(j, i)
            } else {
                a.get(i, j)
            };
        }
    }
    (out, lower)
}

fn check_square<T: KernelElem>(a: &MatRef<'_, T>, side: Side, b_rows: usize, b_cols: usize) -> Result<usize> {
    let n = match side {
        Side::Left => b_rows,
        Side::Right => b_cols,
    };
    if a.rows() != n || a.cols() != n {
        return Err(KernelError::ShapeMismatch {
            expected: vec![n, n],
            got: vec![a.rows(), a.cols()],
        });
    }
    Ok(n)
}

/// Solves `M y = rhs` in place for a packed triangular `M`.
fn substitute<T: KernelElem>(m: &[T], n: usize, lower: bool, rhs: &mut [T]) {
    if lower {
        for i in 0..n {
            let mut acc = rhs[i];
            for l in 0..i {
                acc -= m[i + l * n] * rhs[l];
            }
            rhs[i] = acc / m[i + i * n];
        }
    } else {
        for i in (0..n).rev() {
            let mut acc = rhs[i];
            for l in i + 1..n {
                acc -= m[i + l * n] * rhs[l];
            }
            rhs[i] = acc / m[i + i * n];
        }
    }
}

/// Triangular solve with multiple right-hand sides.
///
/// `Left`: `B := alpha op(A)^-1 B`. `Right`: `B := alpha B op(A)^-1`.
/// Only the `uplo` triangle of `A` is referenced.
pub fn trsm<T>(
    side: Side,
    uplo: UpperOrLower,
    orient: Orientation,
    diag: UnitOrNonUnit,
    alpha: T,
    a: MatRef<'_, T>,
    b: &mut MatMut<'_, T>,
) -> Result<()>
where
    T: KernelElem,
{
    let (rows, cols) = (b.rows(), b.cols());
    let n = check_square(&a, side, rows, cols)?;
    // pivots are checked even when `b` is empty
    if diag == UnitOrNonUnit::NonUnit {
        if let Some(index) = (0..n).find(|&i| a.get(i, i) == T::zero()) {
            return Err(KernelError::Singular { index });
        }
    }
    if rows == 0 || cols == 0 {
        return Ok(());
    }

    let (tri, lower) = triangle_of(uplo, orient, diag, a);
    match side {
        Side::Left => {
            let (data, ldim) = b.raw_mut();
            data.par_chunks_mut(ldim)
                .take(cols)
                .for_each(|column| {
                    let column = &mut column[..rows];
                    for x in column.iter_mut() {
                        *x *= alpha;
                    }
                    substitute(&tri, n, lower, column);
                });
        }
        Side::Right => {
            // x op(A) = b is op(A)^T x^T = b^T, one row at a time
            let mut tri_t = vec![T::zero(); n * n];
            for j in 0..n {
                for i in 0..n {
                    tri_t[j + i * n] = tri[i + j * n];
                }
            }
            let mut row = vec![T::zero(); n];
            for i in 0..rows {
                for (j, x) in row.iter_mut().enumerate() {
                    *x = alpha * b.get(i, j);
                }
                substitute(&tri_t, n, !lower, &mut row);
                for (j, &x) in row.iter().enumerate() {
                    b.set(i, j, x);
                }
            }
        }
    }
    Ok(())
}

/// Triangular matrix-matrix multiplication.
///
/// `Left`: `B := alpha op(A) B`. `Right`: `B := alpha B op(A)`.
pub fn trmm<T>(
    side: Side,
    uplo: UpperOrLower,
    orient: Orientation,
    diag: UnitOrNonUnit,
    alpha: T,
    a: MatRef<'_, T>,
    b: &mut MatMut<'_, T>,
) -> Result<()>
where
    T: KernelElem,
{
    let (rows, cols) = (b.rows(), b.cols());
    let n = check_square(&a, side, rows, cols)?;
    if rows == 0 || cols == 0 {
        return Ok(());
    }

    let (tri, _) = triangle_of(uplo, orient, diag, a);
    let tri = MatRef::packed(&tri, n, n)?;
    let b_packed = b.as_mat_ref().to_packed();
    let b_copy = MatRef::packed(&b_packed, rows, cols)?;
    match side {
        Side::Left => gemm(Orientation::Normal, Orientation::Normal, alpha, tri, b_copy, T::zero(), b),
        Side::Right => gemm(Orientation::Normal, Orientation::Normal, alpha, b_copy, tri, T::zero(), b),
    }
}
