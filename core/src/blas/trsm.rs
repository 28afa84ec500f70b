use super::{check_square, nonconformal, unsupported, with_mc_mr};
use crate::comm::Communicator;
use crate::dist::Distribution;
use crate::dist_matrix::DistMatrix;
use crate::error::Result;
use crate::panel::{Direction, PanelLoop};
use crate::Scalar;
use gridmat_kernels::{Orientation, Side, UnitOrNonUnit, UpperOrLower};
use tracing::debug_span;

/// Triangular solve `X := alpha op(A)^-1 X` from the left.
///
/// Lower-triangular systems are swept forward, upper-triangular ones
/// backward. Each step solves the diagonal block redundantly against an
/// `[*,VR]` copy of the panel of `X`, then removes its contribution from the
/// rest of `X` with a local `gemm`. A zero pivot in a non-unit system is a
/// runtime error on every process.
pub fn trsm<T: Scalar, C: Communicator>(
    side: Side,
    uplo: UpperOrLower,
    orient: Orientation,
    diag: UnitOrNonUnit,
    alpha: T,
    a: &DistMatrix<'_, T, C>,
    x: &mut DistMatrix<'_, T, C>,
) -> Result<()> {
    let op = "trsm";
    if side != Side::Left || orient.is_transposed() {
        return Err(unsupported(op, format!("{:?} side with {:?} A", side, orient)));
    }
    let m = check_square(op, "A", a)?;
    if x.height() != m {
        return Err(nonconformal(
            op,
            format!("A is {}x{} but X has {} rows", m, m, x.height()),
        ));
    }
    let n = x.width();
    let _span = debug_span!("trsm", ?uplo, ?diag, m, n).entered();

    let direction = match uplo {
        UpperOrLower::Lower => Direction::Forward,
        UpperOrLower::Upper => Direction::Backward,
    };
    with_mc_mr(x, |x| {
        x.scale(alpha)?;
        for panel in PanelLoop::with_default_blocksize(m, direction)? {
            let (k, nb) = (panel.offset, panel.size);
            // rows of X still to be updated, and the block of A coupling them
            // to the current panel
            let (mut rest, a_rest) = match uplo {
                UpperOrLower::Lower => {
                    let end = panel.end();
                    (
                        x.view(end, 0, m - end, n)?,
                        a.locked_view(end, k, m - end, nb)?,
                    )
                }
                UpperOrLower::Upper => (x.view(0, 0, k, n)?, a.locked_view(0, k, k, nb)?),
            };

            let a11_star_star = a.locked_view(k, k, nb, nb)?.redistribute(Distribution::STAR_STAR)?;
            let mut x1 = x.view(k, 0, nb, n)?;
            let mut x1_star_vr = x1.redistribute(Distribution::STAR_VR)?;
            x1_star_vr
                .local_mut()
                .trsm(Side::Left, uplo, Orientation::Normal, diag, T::one(), a11_star_star.local())?;

            let mut x1_star_mr = DistMatrix::new_aligned_with(Distribution::STAR_MR, &rest)?;
            x1_star_mr.copy_from(&x1_star_vr)?;
            x1.copy_from(&x1_star_mr)?;

            let mut a_rest_mc_star = DistMatrix::new_aligned_with(Distribution::MC_STAR, &rest)?;
            a_rest_mc_star.copy_from(&a_rest)?;
            rest.local_mut().gemm(
                Orientation::Normal,
                Orientation::Normal,
                T::zero() - T::one(),
                a_rest_mc_star.local(),
                x1_star_mr.local(),
                T::one(),
            )?;
        }
        Ok(())
    })
}
