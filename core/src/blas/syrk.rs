use super::{add_to_triangle, check_square, nonconformal, with_mc_mr};
use crate::comm::Communicator;
use crate::dist::Distribution;
use crate::dist_matrix::DistMatrix;
use crate::error::Result;
use crate::matrix::LocalMatrix;
use crate::panel::{Direction, PanelLoop};
use crate::Scalar;
use gridmat_kernels::{Orientation, UpperOrLower};
use tracing::debug_span;

/// Symmetric rank-k update of one triangle of `C`:
/// `C := alpha A A^T + beta C` (`Normal`) or `C := alpha A^T A + beta C`
/// (`Transpose`). Entries outside the `uplo` triangle are left alone.
pub fn syrk<T: Scalar, C: Communicator>(
    uplo: UpperOrLower,
    orient: Orientation,
    alpha: T,
    a: &DistMatrix<'_, T, C>,
    beta: T,
    c: &mut DistMatrix<'_, T, C>,
) -> Result<()> {
    let op = "syrk";
    let n = check_square(op, "C", c)?;
    let (a_rows, k) = if orient.is_transposed() {
        (a.width(), a.height())
    } else {
        (a.height(), a.width())
    };
    if a_rows != n {
        return Err(nonconformal(
            op,
            format!("op(A) has {} rows but C is {}x{}", a_rows, n, n),
        ));
    }
    let _span = debug_span!("syrk", ?uplo, ?orient, n, k).entered();

    with_mc_mr(c, |c| {
        c.scale_trapezoidal(beta, uplo, 0)?;
        for panel in PanelLoop::with_default_blocksize(k, Direction::Forward)? {
            let mut update = LocalMatrix::new(c.local_height(), c.local_width());
            if orient.is_transposed() {
                let a1 = a.locked_view(panel.offset, 0, panel.size, n)?;
                let mut a1_star_mc = DistMatrix::new_aligned_with(Distribution::STAR_MC, &*c)?;
                a1_star_mc.copy_from(&a1)?;
                let mut a1_star_mr = DistMatrix::new_aligned_with(Distribution::STAR_MR, &*c)?;
                a1_star_mr.copy_from(&a1)?;
                update.gemm(
                    Orientation::Transpose,
                    Orientation::Normal,
                    alpha,
                    a1_star_mc.local(),
                    a1_star_mr.local(),
                    T::zero(),
                )?;
            } else {
                let a1 = a.locked_view(0, panel.offset, n, panel.size)?;
                let mut a1_mc_star = DistMatrix::new_aligned_with(Distribution::MC_STAR, &*c)?;
                a1_mc_star.copy_from(&a1)?;
                let mut a1_mr_star = DistMatrix::new_aligned_with(Distribution::MR_STAR, &*c)?;
                a1_mr_star.copy_from(&a1)?;
                update.gemm(
                    Orientation::Normal,
                    Orientation::Transpose,
                    alpha,
                    a1_mc_star.local(),
                    a1_mr_star.local(),
                    T::zero(),
                )?;
            }
            add_to_triangle(c, uplo, &update)?;
        }
        Ok(())
    })
}
