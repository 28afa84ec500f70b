use super::{add_to_triangle, check_square, nonconformal, unsupported, with_mc_mr};
use crate::comm::Communicator;
use crate::dist::Distribution;
use crate::dist_matrix::DistMatrix;
use crate::error::Result;
use crate::matrix::LocalMatrix;
use crate::panel::{Direction, PanelLoop};
use crate::Scalar;
use gridmat_kernels::{Orientation, UpperOrLower};
use tracing::debug_span;

/// Triangular rank-2k update
/// `E := alpha A B + beta op(C) op(D) + gamma E` on the `uplo` triangle.
///
/// `op(C) op(D)` is either `C D` or `C^T D^T`; mixed orientations are not
/// supported. `E` is scaled by `gamma` once, before the panel sweep over the
/// inner dimension.
#[allow(clippy::too_many_arguments)]
pub fn trr2k<T: Scalar, C: Communicator>(
    uplo: UpperOrLower,
    orient_c: Orientation,
    orient_d: Orientation,
    alpha: T,
    a: &DistMatrix<'_, T, C>,
    b: &DistMatrix<'_, T, C>,
    beta: T,
    c: &DistMatrix<'_, T, C>,
    d: &DistMatrix<'_, T, C>,
    gamma: T,
    e: &mut DistMatrix<'_, T, C>,
) -> Result<()> {
    let op = "trr2k";
    let transposed = match (orient_c.is_transposed(), orient_d.is_transposed()) {
        (false, false) => false,
        (true, true) => true,
        _ => {
            return Err(unsupported(
                op,
                format!("C oriented {:?} with D oriented {:?}", orient_c, orient_d),
            ));
        }
    };
    let n = check_square(op, "E", e)?;
    let r = a.width();
    let (c_shape, d_shape) = if transposed {
        ((r, n), (n, r))
    } else {
        ((n, r), (r, n))
    };
    if (a.height(), a.width()) != (n, r)
        || (b.height(), b.width()) != (r, n)
        || (c.height(), c.width()) != c_shape
        || (d.height(), d.width()) != d_shape
    {
        return Err(nonconformal(
            op,
            format!(
                "A {}x{}, B {}x{}, C {}x{}, D {}x{}, E {}x{}",
                a.height(),
                a.width(),
                b.height(),
                b.width(),
                c.height(),
                c.width(),
                d.height(),
                d.width(),
                n,
                n
            ),
        ));
    }
    let _span = debug_span!("trr2k", ?uplo, transposed, n, r).entered();

    with_mc_mr(e, |e| {
        e.scale_trapezoidal(gamma, uplo, 0)?;
        for panel in PanelLoop::with_default_blocksize(r, Direction::Forward)? {
            let (k, nb) = (panel.offset, panel.size);
            let mut a1_mc_star = DistMatrix::new_aligned_with(Distribution::MC_STAR, &*e)?;
            a1_mc_star.copy_from(&a.locked_view(0, k, n, nb)?)?;
            let mut b1_star_mr = DistMatrix::new_aligned_with(Distribution::STAR_MR, &*e)?;
            b1_star_mr.copy_from(&b.locked_view(k, 0, nb, n)?)?;

            let mut update = LocalMatrix::new(e.local_height(), e.local_width());
            update.gemm(
                Orientation::Normal,
                Orientation::Normal,
                alpha,
                a1_mc_star.local(),
                b1_star_mr.local(),
                T::zero(),
            )?;
            if transposed {
                let mut c1_star_mc = DistMatrix::new_aligned_with(Distribution::STAR_MC, &*e)?;
                c1_star_mc.copy_from(&c.locked_view(k, 0, nb, n)?)?;
                let mut d1_mr_star = DistMatrix::new_aligned_with(Distribution::MR_STAR, &*e)?;
                d1_mr_star.copy_from(&d.locked_view(0, k, n, nb)?)?;
                update.gemm(
                    Orientation::Transpose,
                    Orientation::Transpose,
                    beta,
                    c1_star_mc.local(),
                    d1_mr_star.local(),
                    T::one(),
                )?;
            } else {
                let mut c1_mc_star = DistMatrix::new_aligned_with(Distribution::MC_STAR, &*e)?;
                c1_mc_star.copy_from(&c.locked_view(0, k, n, nb)?)?;
                let mut d1_star_mr = DistMatrix::new_aligned_with(Distribution::STAR_MR, &*e)?;
                d1_star_mr.copy_from(&d.locked_view(k, 0, nb, n)?)?;
                update.gemm(
                    Orientation::Normal,
                    Orientation::Normal,
                    beta,
                    c1_mc_star.local(),
                    d1_star_mr.local(),
                    T::one(),
                )?;
            }
            add_to_triangle(e, uplo, &update)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blas::in_triangle;
    use crate::comm::run_spmd;
    use crate::config::BlocksizeGuard;
    use crate::error::Error;
    use crate::grid::{Grid, GridOrder};

    fn ramp(len: usize, modulus: usize, offset: f64) -> Vec<f64> {
        (0..len).map(|v| (v % modulus) as f64 - offset).collect()
    }

    fn expected(
        uplo: UpperOrLower,
        transposed: bool,
        (n, r): (usize, usize),
        [a, b, c, d, e]: [&[f64]; 5],
        (alpha, beta, gamma): (f64, f64, f64),
    ) -> Vec<f64> {
        let mut out = e.to_vec();
        for j in 0..n {
            for i in 0..n {
                if !in_triangle(uplo, i, j) {
                    continue;
                }
                let ab: f64 = (0..r).map(|l| a[i + l * n] * b[l + j * r]).sum();
                let cd: f64 = if transposed {
                    (0..r).map(|l| c[l + i * r] * d[j + l * n]).sum()
                } else {
                    (0..r).map(|l| c[i + l * n] * d[l + j * r]).sum()
                };
                out[i + j * n] = alpha * ab + beta * cd + gamma * e[i + j * n];
            }
        }
        out
    }

    fn run(uplo: UpperOrLower, orient: Orientation) -> (Vec<Vec<f64>>, Vec<f64>) {
        let (n, r) = (5, 4);
        let transposed = orient.is_transposed();
        let a = ramp(n * r, 5, 2.0);
        let b = ramp(r * n, 3, 1.0);
        let c = ramp(n * r, 4, 0.0);
        let d = ramp(r * n, 7, 3.0);
        let e = ramp(n * n, 6, 2.0);
        let (c_shape, d_shape) = if transposed { ((r, n), (n, r)) } else { ((n, r), (r, n)) };
        let want = expected(uplo, transposed, (n, r), [&a, &b, &c, &d, &e], (2.0, -1.0, 0.5));
        let globals = run_spmd(4, |comm| {
            let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
            let _bs = BlocksizeGuard::new(3).unwrap();
            let load = |(h, w): (usize, usize), data: &[f64]| {
                let mut m = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, h, w).unwrap();
                m.from_global(h, w, data).unwrap();
                m
            };
            let da = load((n, r), &a);
            let db = load((r, n), &b);
            let dc = load(c_shape, &c);
            let dd = load(d_shape, &d);
            let mut de = load((n, n), &e);
            trr2k(uplo, orient, orient, 2.0, &da, &db, -1.0, &dc, &dd, 0.5, &mut de).unwrap();
            de.to_global().unwrap()
        });
        (globals, want)
    }

    #[test]
    fn test_nnnn_lower() {
        let (globals, want) = run(UpperOrLower::Lower, Orientation::Normal);
        for g in globals {
            assert_eq!(g, want);
        }
    }

    #[test]
    fn test_nntt_upper() {
        let (globals, want) = run(UpperOrLower::Upper, Orientation::Transpose);
        for g in globals {
            assert_eq!(g, want);
        }
    }

    #[test]
    fn test_mixed_orientation_rejected() {
        run_spmd(1, |comm| {
            let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
            let m = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 2, 2).unwrap();
            let mut e = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 2, 2).unwrap();
            let err = trr2k(
                UpperOrLower::Lower,
                Orientation::Normal,
                Orientation::Transpose,
                1.0,
                &m,
                &m,
                1.0,
                &m,
                &m,
                1.0,
                &mut e,
            )
            .unwrap_err();
            assert!(matches!(err, Error::Logic { .. }));
        });
    }
}
