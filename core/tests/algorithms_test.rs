use approx::assert_abs_diff_eq;
use gridmat::blas::{gemm, syrk, trmm, trr2k, trsm};
use gridmat::config::BlocksizeGuard;
use gridmat::norm::{frobenius_norm, nrm2, two_norm};
use gridmat::{
    DistMatrix, Distribution, Error, Grid, GridOrder, Orientation, Side, UnitOrNonUnit,
    UpperOrLower, run_spmd,
};

/// Packed column-major `op(A) op(B)` for an `m x k` times `k x n` product.
fn reference_product(
    orient_a: Orientation,
    orient_b: Orientation,
    a: &[f64],
    b: &[f64],
    m: usize,
    k: usize,
    n: usize,
) -> Vec<f64> {
    let at = |i: usize, l: usize| if orient_a.is_transposed() { a[l + i * k] } else { a[i + l * m] };
    let bt = |l: usize, j: usize| if orient_b.is_transposed() { b[j + l * n] } else { b[l + j * k] };
    let mut c = vec![0.0; m * n];
    for j in 0..n {
        for i in 0..m {
            c[i + j * m] = (0..k).map(|l| at(i, l) * bt(l, j)).sum();
        }
    }
    c
}

fn assert_close(got: &[f64], expected: &[f64], what: &str) {
    assert_eq!(got.len(), expected.len(), "{}: length", what);
    for (k, (&g, &e)) in got.iter().zip(expected).enumerate() {
        assert!((g - e).abs() <= 1e-10, "{}: entry {} expected {}, got {}", what, k, e, g);
    }
}

fn random_global<'g>(
    grid: &'g Grid<gridmat::ThreadComm>,
    dist: Distribution,
    height: usize,
    width: usize,
    seed: u64,
) -> (DistMatrix<'g, f64>, Vec<f64>) {
    let mut m = DistMatrix::<f64>::with_shape(grid, dist, height, width).unwrap();
    m.set_to_random(seed).unwrap();
    let global = m.to_global().unwrap();
    (m, global)
}

/// Unit lower 4 x 4 solve with a single right-hand side and blocksize 2,
/// checked against forward substitution.
#[test]
fn test_trsm_unit_lower_blocked() {
    #[rustfmt::skip]
    let l = vec![
        1.0, 2.0, -1.0, 0.5,
        0.0, 1.0, 3.0, 1.0,
        0.0, 0.0, 1.0, -2.0,
        0.0, 0.0, 0.0, 1.0,
    ];
    let b = vec![1.0, 4.0, 2.0, -1.0];
    let mut expected = b.clone();
    for i in 0..4 {
        for k in 0..i {
            expected[i] -= l[i + k * 4] * expected[k];
        }
    }

    let results = run_spmd(4, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let _bs = BlocksizeGuard::new(2).unwrap();
        let mut a = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 4, 4).unwrap();
        let mut x = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 4, 1).unwrap();
        a.from_global(4, 4, &l).unwrap();
        x.from_global(4, 1, &b).unwrap();
        trsm(
            Side::Left,
            UpperOrLower::Lower,
            Orientation::Normal,
            UnitOrNonUnit::Unit,
            1.0,
            &a,
            &mut x,
        )
        .unwrap();
        x.to_global().unwrap()
    });
    for (rank, x) in results.iter().enumerate() {
        assert_eq!(x, &expected, "Rank {}: wrong solution", rank);
    }
}

#[test]
fn test_trsm_solution_reproduces_rhs() {
    let (n, nrhs) = (9, 3);
    let results = run_spmd(6, |comm| {
        let grid = Grid::new(comm, GridOrder::RowMajor).unwrap();
        let _bs = BlocksizeGuard::new(4).unwrap();
        let (mut u, _) = random_global(&grid, Distribution::MC_MR, n, n, 11);
        u.make_trapezoidal(UpperOrLower::Upper, 0).unwrap();
        for i in 0..n {
            u.update(i, i, 4.0).unwrap();
        }
        let (mut x, b) = random_global(&grid, Distribution::STAR_VR, n, nrhs, 12);
        trsm(
            Side::Left,
            UpperOrLower::Upper,
            Orientation::Normal,
            UnitOrNonUnit::NonUnit,
            2.0,
            &u,
            &mut x,
        )
        .unwrap();
        let mut rebuilt = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, n, nrhs).unwrap();
        gemm(Orientation::Normal, Orientation::Normal, 0.5, &u, &x, 0.0, &mut rebuilt).unwrap();
        (rebuilt.to_global().unwrap(), b)
    });
    for (rebuilt, b) in results {
        assert_close(&rebuilt, &b, "U X / 2");
    }
}

#[test]
fn test_gemm_matches_reference_for_every_blocksize() {
    let (m, k, n) = (7, 5, 6);
    for blocksize in [1, 2, 3, 128] {
        let results = run_spmd(6, |comm| {
            let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
            let _bs = BlocksizeGuard::new(blocksize).unwrap();
            let (a, a_global) = random_global(&grid, Distribution::VR_STAR, m, k, 1);
            let (at, at_global) = random_global(&grid, Distribution::STAR_MC, k, m, 2);
            let (b, b_global) = random_global(&grid, Distribution::MR_MC, k, n, 3);
            let (mut c, c_global) = random_global(&grid, Distribution::STAR_VC, m, n, 4);
            let (mut d, d_global) = random_global(&grid, Distribution::MC_MR, m, n, 5);

            gemm(Orientation::Normal, Orientation::Normal, 2.0, &a, &b, -1.0, &mut c).unwrap();
            gemm(Orientation::Transpose, Orientation::Normal, 1.0, &at, &b, 0.5, &mut d).unwrap();
            assert_eq!(c.dist(), Distribution::STAR_VC);

            let mut expected_c = reference_product(Orientation::Normal, Orientation::Normal, &a_global, &b_global, m, k, n);
            for (e, &old) in expected_c.iter_mut().zip(&c_global) {
                *e = 2.0 * *e - old;
            }
            let mut expected_d = reference_product(Orientation::Transpose, Orientation::Normal, &at_global, &b_global, m, k, n);
            for (e, &old) in expected_d.iter_mut().zip(&d_global) {
                *e += 0.5 * old;
            }
            (c.to_global().unwrap(), expected_c, d.to_global().unwrap(), expected_d)
        });
        for (c, expected_c, d, expected_d) in results {
            assert_close(&c, &expected_c, "A B");
            assert_close(&d, &expected_d, "A^T B");
        }
    }
}

#[test]
fn test_gemm_rejects_nonconformal_operands() {
    let errors = run_spmd(4, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let a = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 3, 4).unwrap();
        let b = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 5, 2).unwrap();
        let mut c = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 3, 2).unwrap();
        gemm(Orientation::Normal, Orientation::Normal, 1.0, &a, &b, 0.0, &mut c).unwrap_err()
    });
    for err in errors {
        assert!(matches!(err, Error::Logic { .. }), "unexpected {:?}", err);
    }
}

#[test]
fn test_syrk_touches_only_its_triangle() {
    let (n, k) = (6, 4);
    let results = run_spmd(4, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let _bs = BlocksizeGuard::new(3).unwrap();
        let (a, a_global) = random_global(&grid, Distribution::MC_MR, n, k, 21);
        let (mut c, c_global) = random_global(&grid, Distribution::MC_MR, n, n, 22);
        syrk(UpperOrLower::Lower, Orientation::Normal, 1.5, &a, 2.0, &mut c).unwrap();
        (c.to_global().unwrap(), a_global, c_global)
    });
    for (c, a, old) in results {
        let aat = reference_product(Orientation::Normal, Orientation::Transpose, &a, &a, n, k, n);
        for j in 0..n {
            for i in 0..n {
                let expected = if i >= j {
                    1.5 * aat[i + j * n] + 2.0 * old[i + j * n]
                } else {
                    old[i + j * n]
                };
                assert_abs_diff_eq!(c[i + j * n], expected, epsilon = 1e-10);
            }
        }
    }
}

#[test]
fn test_trmm_right_lower_transpose() {
    let (m, n) = (5, 7);
    let results = run_spmd(6, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let _bs = BlocksizeGuard::new(3).unwrap();
        let (mut l, _) = random_global(&grid, Distribution::MC_MR, n, n, 31);
        l.make_trapezoidal(UpperOrLower::Lower, 0).unwrap();
        let l_global = l.to_global().unwrap();
        let (mut x, x_global) = random_global(&grid, Distribution::MC_MR, m, n, 32);
        trmm(
            Side::Right,
            UpperOrLower::Lower,
            Orientation::Transpose,
            UnitOrNonUnit::NonUnit,
            -1.0,
            &l,
            &mut x,
        )
        .unwrap();
        (x.to_global().unwrap(), x_global, l_global)
    });
    for (x, x_old, l) in results {
        let expected: Vec<f64> = reference_product(Orientation::Normal, Orientation::Transpose, &x_old, &l, m, n, n)
            .into_iter()
            .map(|v| -v)
            .collect();
        assert_close(&x, &expected, "X L^T");
    }
}

#[test]
fn test_trr2k_lower_update() {
    let (n, r) = (6, 5);
    let results = run_spmd(4, |comm| {
        let grid = Grid::new(comm, GridOrder::RowMajor).unwrap();
        let _bs = BlocksizeGuard::new(2).unwrap();
        let (a, a_g) = random_global(&grid, Distribution::MC_MR, n, r, 41);
        let (b, b_g) = random_global(&grid, Distribution::MC_MR, r, n, 42);
        let (c, c_g) = random_global(&grid, Distribution::MC_MR, n, r, 43);
        let (d, d_g) = random_global(&grid, Distribution::MC_MR, r, n, 44);
        let (mut e, e_g) = random_global(&grid, Distribution::MC_MR, n, n, 45);
        trr2k(
            UpperOrLower::Lower,
            Orientation::Normal,
            Orientation::Normal,
            1.0,
            &a,
            &b,
            -2.0,
            &c,
            &d,
            0.5,
            &mut e,
        )
        .unwrap();
        let ab = reference_product(Orientation::Normal, Orientation::Normal, &a_g, &b_g, n, r, n);
        let cd = reference_product(Orientation::Normal, Orientation::Normal, &c_g, &d_g, n, r, n);
        let expected: Vec<f64> = (0..n * n)
            .map(|k| {
                let (i, j) = (k % n, k / n);
                if i >= j {
                    ab[k] - 2.0 * cd[k] + 0.5 * e_g[k]
                } else {
                    e_g[k]
                }
            })
            .collect();
        (e.to_global().unwrap(), expected)
    });
    for (e, expected) in results {
        assert_close(&e, &expected, "trr2k");
    }
}

#[test]
fn test_norms_agree_with_reference() {
    let results = run_spmd(6, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let (a, a_global) = random_global(&grid, Distribution::VC_STAR, 8, 5, 51);
        let (x, x_global) = random_global(&grid, Distribution::STAR_MD, 1, 9, 52);
        let mut diag = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 4, 4).unwrap();
        diag.from_global(
            4,
            4,
            &[3.0, 0.0, 0.0, 0.0, 0.0, -7.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 2.0],
        )
        .unwrap();
        (
            frobenius_norm(&a).unwrap(),
            two_norm(&a).unwrap(),
            nrm2(&x).unwrap(),
            two_norm(&diag).unwrap(),
            a_global,
            x_global,
        )
    });
    let first = results[0].0;
    for (frobenius, two, vector, diagonal, a, x) in results {
        assert_eq!(frobenius, first, "every process reports the same norm");
        let expected = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert_abs_diff_eq!(frobenius, expected, epsilon = 1e-12);
        // ||A||_F / sqrt(rank) <= ||A||_2 <= ||A||_F
        assert!(two <= frobenius * (1.0 + 1e-6));
        assert!(two >= frobenius / 5f64.sqrt() * (1.0 - 1e-6));
        assert_abs_diff_eq!(vector, x.iter().map(|v| v * v).sum::<f64>().sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(diagonal, 7.0, epsilon = 1e-4);
    }
}

#[test]
fn test_algorithms_emit_trace_output() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
    let results = run_spmd(2, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let mut a = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 3, 3).unwrap();
        let mut c = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 3, 3).unwrap();
        a.set_to_identity().unwrap();
        gemm(Orientation::Normal, Orientation::Normal, 1.0, &a, &a, 0.0, &mut c).unwrap();
        c.to_global().unwrap()
    });
    for c in results {
        assert_eq!(c, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    }
}
