use crate::{KernelElem, KernelError, KernelReal, MatMut, MatRef, Result};

/// `X := alpha X`
pub fn scal<T: KernelElem>(alpha: T, x: &mut MatMut<'_, T>) {
    for j in 0..x.cols() {
        for v in x.column_mut(j) {
            *v *= alpha;
        }
    }
}

/// `Y := alpha X + Y`
pub fn axpy<T: KernelElem>(alpha: T, x: MatRef<'_, T>, y: &mut MatMut<'_, T>) -> Result<()> {
    if x.rows() != y.rows() || x.cols() != y.cols() {
        return Err(KernelError::ShapeMismatch {
            expected: vec![y.rows(), y.cols()],
            got: vec![x.rows(), x.cols()],
        });
    }
    for j in 0..x.cols() {
        let src = x.column(j);
        for (dst, &s) in y.column_mut(j).iter_mut().zip(src) {
            *dst += alpha * s;
        }
    }
    Ok(())
}

/// Scaled sum of squares `(scale, ssq)` with `scale^2 * ssq = sum |x_ij|^2`.
///
/// Keeping the running maximum out of the squares avoids overflow for
/// entries near the top of the floating-point range.
pub fn sum_of_squares<T: KernelReal>(x: MatRef<'_, T>) -> (T, T) {
    let mut scale = T::zero();
    let mut ssq = T::one();
    for j in 0..x.cols() {
        for &v in x.column(j) {
            if v == T::zero() {
                continue;
            }
            let abs = v.abs();
            if scale < abs {
                let ratio = scale / abs;
                ssq = T::one() + ssq * ratio * ratio;
                scale = abs;
            } else {
                let ratio = abs / scale;
                ssq += ratio * ratio;
            }
        }
    }
    (scale, ssq)
}

/// Frobenius norm of a local block.
pub fn nrm2<T: KernelReal>(x: MatRef<'_, T>) -> T {
    let (scale, ssq) = sum_of_squares(x);
    scale * ssq.sqrt()
}
