use crate::{KernelElem, MatRef};
use rayon::prelude::*;

/// Transposes a column-major view into a freshly packed buffer.
///
/// The result is `a.cols() x a.rows()` with leading dimension
/// `max(a.cols(), 1)`. Each output column is row `j` of the input, so
/// the work is split over output columns.
pub fn transpose<T>(a: MatRef<'_, T>) -> Vec<T>
where
    T: KernelElem,
{
    let m = a.rows();
    let n = a.cols();
    let mut out = vec![T::zero(); m * n];
    if m == 0 || n == 0 {
        return out;
    }

    out.par_chunks_mut(n).enumerate().for_each(|(i, out_col)| {
        for (j, out_elem) in out_col.iter_mut().enumerate() {
            *out_elem = a.get(i, j);
        }
    });

    out
}
