use super::{nonconformal, unsupported, with_mc_mr};
use crate::comm::Communicator;
use crate::dist::Distribution;
use crate::dist_matrix::DistMatrix;
use crate::error::Result;
use crate::panel::{Direction, PanelLoop};
use crate::Scalar;
use gridmat_kernels::Orientation;
use tracing::debug_span;

/// `C := alpha op(A) B + beta C`, keeping `C` stationary.
///
/// `op(A)` may be `A` or `A^T`; `B` must enter untransposed.
pub fn gemm<T: Scalar, C: Communicator>(
    orient_a: Orientation,
    orient_b: Orientation,
    alpha: T,
    a: &DistMatrix<'_, T, C>,
    b: &DistMatrix<'_, T, C>,
    beta: T,
    c: &mut DistMatrix<'_, T, C>,
) -> Result<()> {
    let op = "gemm";
    if orient_b.is_transposed() {
        return Err(unsupported(op, format!("B oriented {:?}", orient_b)));
    }
    let (m, k) = if orient_a.is_transposed() {
        (a.width(), a.height())
    } else {
        (a.height(), a.width())
    };
    let n = b.width();
    if b.height() != k || c.height() != m || c.width() != n {
        return Err(nonconformal(
            op,
            format!(
                "op(A) {}x{}, B {}x{}, C {}x{}",
                m,
                k,
                b.height(),
                b.width(),
                c.height(),
                c.width()
            ),
        ));
    }
    let _span = debug_span!("gemm", ?orient_a, m, n, k).entered();

    with_mc_mr(c, |c| {
        c.scale(beta)?;
        for panel in PanelLoop::with_default_blocksize(k, Direction::Forward)? {
            let mut b1_star_mr = DistMatrix::new_aligned_with(Distribution::STAR_MR, &*c)?;
            b1_star_mr.copy_from(&b.locked_view(panel.offset, 0, panel.size, n)?)?;
            if orient_a.is_transposed() {
                let mut a1_star_mc = DistMatrix::new_aligned_with(Distribution::STAR_MC, &*c)?;
                a1_star_mc.copy_from(&a.locked_view(panel.offset, 0, panel.size, m)?)?;
                c.local_mut().gemm(
                    Orientation::Transpose,
                    Orientation::Normal,
                    alpha,
                    a1_star_mc.local(),
                    b1_star_mr.local(),
                    T::one(),
                )?;
            } else {
                let mut a1_mc_star = DistMatrix::new_aligned_with(Distribution::MC_STAR, &*c)?;
                a1_mc_star.copy_from(&a.locked_view(0, panel.offset, m, panel.size)?)?;
                c.local_mut().gemm(
                    Orientation::Normal,
                    Orientation::Normal,
                    alpha,
                    a1_mc_star.local(),
                    b1_star_mr.local(),
                    T::one(),
                )?;
            }
        }
        Ok(())
    })
}
