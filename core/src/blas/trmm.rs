use super::{check_square, nonconformal, unsupported, with_mc_mr};
use crate::comm::Communicator;
use crate::dist::Distribution;
use crate::dist_matrix::DistMatrix;
use crate::error::Result;
use crate::panel::{Direction, PanelLoop};
use crate::Scalar;
use gridmat_kernels::{Orientation, Side, UnitOrNonUnit, UpperOrLower};
use tracing::debug_span;

/// Triangular multiply `X := alpha X L^T` with `L` lower triangular.
///
/// Columns of `X` are processed from the last panel backward, so the
/// untouched leading columns `X0` are still available when panel `X1`
/// needs them:
///
/// `X1 := X1 L11^T + X0 L10^T`
///
/// The first term is local on a `[VC,*]` copy of `X1`; the second is formed
/// as an `[MC,*]` partial product and reduced onto `X1` with a sum-scatter.
pub fn trmm<T: Scalar, C: Communicator>(
    side: Side,
    uplo: UpperOrLower,
    orient: Orientation,
    diag: UnitOrNonUnit,
    alpha: T,
    l: &DistMatrix<'_, T, C>,
    x: &mut DistMatrix<'_, T, C>,
) -> Result<()> {
    let op = "trmm";
    if side != Side::Right || uplo != UpperOrLower::Lower || !orient.is_transposed() {
        return Err(unsupported(
            op,
            format!("{:?} side, {:?} triangle, {:?} L", side, uplo, orient),
        ));
    }
    let n = check_square(op, "L", l)?;
    if x.width() != n {
        return Err(nonconformal(
            op,
            format!("L is {}x{} but X has {} columns", n, n, x.width()),
        ));
    }
    let m = x.height();
    let _span = debug_span!("trmm", ?diag, m, n).entered();

    with_mc_mr(x, |x| {
        x.scale(alpha)?;
        for panel in PanelLoop::with_default_blocksize(n, Direction::Backward)? {
            let (k, nb) = (panel.offset, panel.size);
            let mut x1 = x.view(0, k, m, nb)?;
            let x0 = x.locked_view(0, 0, m, k)?;

            let l11_star_star = l.locked_view(k, k, nb, nb)?.redistribute(Distribution::STAR_STAR)?;
            let mut x1_vc_star = x1.redistribute(Distribution::VC_STAR)?;
            x1_vc_star.local_mut().trmm(
                Side::Right,
                UpperOrLower::Lower,
                Orientation::Transpose,
                diag,
                T::one(),
                l11_star_star.local(),
            )?;
            x1.copy_from(&x1_vc_star)?;

            let mut l10_star_mr = DistMatrix::new_aligned_with(Distribution::STAR_MR, &x0)?;
            l10_star_mr.copy_from(&l.locked_view(k, 0, nb, k)?)?;
            let mut d1_mc_star = DistMatrix::new_aligned_with(Distribution::MC_STAR, &x1)?;
            d1_mc_star.resize(m, nb)?;
            d1_mc_star.local_mut().gemm(
                Orientation::Normal,
                Orientation::Transpose,
                T::one(),
                x0.local(),
                l10_star_mr.local(),
                T::zero(),
            )?;
            x1.sum_scatter_update(T::one(), &d1_mc_star)?;
        }
        Ok(())
    })
}
