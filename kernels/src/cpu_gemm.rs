use crate::{KernelElem, KernelError, MatMut, MatRef, Orientation, Result};
use rayon::prelude::*;

/// General matrix-matrix multiplication.
///
/// `C := alpha op(A) op(B) + beta C`
///
/// When `beta` is zero the previous contents of `C` are ignored rather than
/// scaled, so uninitialized (or NaN-filled) outputs are safe.
///
/// `op(A)` is packed row by row and `op(B)` column by column before the
/// product so the innermost loop walks two contiguous slices.
pub fn gemm<T>(
    orient_a: Orientation,
    orient_b: Orientation,
    alpha: T,
    a: MatRef<'_, T>,
    b: MatRef<'_, T>,
    beta: T,
    c: &mut MatMut<'_, T>,
) -> Result<()>
where
    T: KernelElem,
{
    let (m, k) = if orient_a.is_transposed() {
        (a.cols(), a.rows())
    } else {
        (a.rows(), a.cols())
    };
    let (k_b, n) = if orient_b.is_transposed() {
        (b.cols(), b.rows())
    } else {
        (b.rows(), b.cols())
    };

    if k != k_b {
        return Err(KernelError::ShapeMismatch {
            expected: vec![k],
            got: vec![k_b],
        });
    }
    if c.rows() != m || c.cols() != n {
        return Err(KernelError::ShapeMismatch {
            expected: vec![m, n],
            got: vec![c.rows(), c.cols()],
        });
    }
    if m == 0 || n == 0 {
        return Ok(());
    }

    // Row i of op(A) lives at a_rows[i * k..(i + 1) * k]
    let mut a_rows = vec![T::zero(); m * k];
    for i in 0..m {
        for l in 0..k {
            a_rows[i * k + l] = if orient_a.is_transposed() {
                a.get(l, i)
            } else {
                a.get(i, l)
            };
        }
    }
    // Column j of op(B) lives at b_cols[j * k..(j + 1) * k]
    let mut b_cols = vec![T::zero(); k * n];
    for j in 0..n {
        for l in 0..k {
            b_cols[j * k + l] = if orient_b.is_transposed() {
                b.get(j, l)
            } else {
                b.get(l, j)
            };
        }
    }

    let (c_data, ldc) = c.raw_mut();
    c_data
        .par_chunks_mut(ldc)
        .take(n)
        .enumerate()
        .for_each(|(j, c_col)| {
            let b_col = &b_cols[j * k..(j + 1) * k];
            for (i, c_elem) in c_col.iter_mut().take(m).enumerate() {
                let a_row = &a_rows[i * k..(i + 1) * k];
                let mut sum = T::zero();
                for (&val_a, &val_b) in a_row.iter().zip(b_col.iter()) {
                    sum += val_a * val_b;
                }
                *c_elem = if beta == T::zero() {
                    alpha * sum
                } else {
                    beta * *c_elem + alpha * sum
                };
            }
        });

    Ok(())
}
