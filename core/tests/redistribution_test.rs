use gridmat::{Dist, DistMatrix, Distribution, Error, Grid, GridOrder, ThreadComm, run_spmd};
use std::thread;

/// `a(i, j) = i + 100 j`, exact in floating point
fn indexed(height: usize, width: usize) -> Vec<f64> {
    (0..width)
        .flat_map(|j| (0..height).map(move |i| (i + 100 * j) as f64))
        .collect()
}

fn assert_locals_match(m: &DistMatrix<'_, f64>, data: &[f64]) {
    assert_eq!(m.local_height(), m.col_layout().local_length(m.height()));
    assert_eq!(m.local_width(), m.row_layout().local_length(m.width()));
    for lj in 0..m.local_width() {
        for li in 0..m.local_height() {
            let (i, j) = (m.global_row(li), m.global_col(lj));
            assert!(m.owns(i, j));
            assert_eq!(
                m.get_local(li, lj).unwrap(),
                data[i + j * m.height()],
                "{} entry ({}, {})",
                m.dist(),
                i,
                j
            );
        }
    }
}

fn nonzero_alignment(dist: Dist, grid: &Grid<ThreadComm>) -> usize {
    1 % dist.alignment_modulus(grid)
}

#[test]
fn test_round_trips_between_all_distributions() {
    let (height, width) = (7, 5);
    let data = indexed(height, width);
    for (p, order) in [
        (1, GridOrder::ColumnMajor),
        (4, GridOrder::ColumnMajor),
        (6, GridOrder::ColumnMajor),
        (6, GridOrder::RowMajor),
    ] {
        run_spmd(p, |comm| {
            let grid = Grid::new(comm, order).unwrap();
            for src in Distribution::ALL {
                let mut a = DistMatrix::<f64>::aligned(
                    &grid,
                    src,
                    height,
                    width,
                    nonzero_alignment(src.col, &grid),
                    nonzero_alignment(src.row, &grid),
                )
                .unwrap();
                a.from_global(height, width, &data).unwrap();
                for dst in Distribution::ALL {
                    let b = a.redistribute(dst).unwrap();
                    assert_eq!(b.dist(), dst);
                    assert_eq!((b.height(), b.width()), (height, width));
                    assert_locals_match(&b, &data);

                    let mut back = DistMatrix::<f64>::new(&grid, src).unwrap();
                    back.copy_from(&b).unwrap();
                    assert_locals_match(&back, &data);
                }
            }
        });
    }
}

#[test]
fn test_redistribute_from_offset_view() {
    let data = indexed(9, 8);
    run_spmd(6, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        for src in Distribution::ALL {
            let mut a = DistMatrix::<f64>::with_shape(&grid, src, 9, 8).unwrap();
            a.from_global(9, 8, &data).unwrap();
            let view = a.locked_view(2, 3, 5, 4).unwrap();
            let sub: Vec<f64> = (3..7)
                .flat_map(|j| (2..7).map(move |i| (i + 100 * j) as f64))
                .collect();
            assert_locals_match(&view, &sub);
            for dst in Distribution::ALL {
                let b = view.redistribute(dst).unwrap();
                assert_locals_match(&b, &sub);
            }
        }
    });
}

#[test]
fn test_assignment_into_view_respects_its_alignment() {
    let data = indexed(6, 6);
    let globals = run_spmd(4, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let mut target = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 6, 6).unwrap();
        let mut block = DistMatrix::<f64>::with_shape(&grid, Distribution::VR_STAR, 3, 2).unwrap();
        block.from_global(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        target.from_global(6, 6, &data).unwrap();
        let mut window = target.view(1, 3, 3, 2).unwrap();
        window.copy_from(&block).unwrap();
        target.to_global().unwrap()
    });
    let mut expected = data.clone();
    for (k, (i, j)) in [(1, 3), (2, 3), (3, 3), (1, 4), (2, 4), (3, 4)].into_iter().enumerate() {
        expected[i + j * 6] = (k + 1) as f64;
    }
    for g in globals {
        assert_eq!(g, expected);
    }
}

/// 2 x 2 grid, a 4 x 4 `[MC,MR]` matrix gathered into `[*,*]`: every process
/// ends up with the whole matrix.
#[test]
fn test_gather_to_every_process() {
    let world_size = 4;
    let data = indexed(4, 4);
    let mut handles = vec![];
    for comm in ThreadComm::world(world_size) {
        let data = data.clone();
        let handle = thread::spawn(move || {
            let rank = comm.world_rank();
            let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
            assert_eq!((grid.height(), grid.width()), (2, 2));

            let mut a = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 4, 4).unwrap();
            a.from_global(4, 4, &data).unwrap();
            assert_eq!((a.local_height(), a.local_width()), (2, 2));

            let full = a.redistribute(Distribution::STAR_STAR).unwrap();
            assert_eq!((full.local_height(), full.local_width()), (4, 4));
            assert_eq!(
                full.local().to_packed().unwrap(),
                data,
                "Rank {}: local store is not the full matrix",
                rank
            );
        });
        handles.push(handle);
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_grid_height_must_divide_size() {
    let errors = run_spmd(6, |comm| Grid::with_height(comm, 4, GridOrder::ColumnMajor).unwrap_err());
    for err in errors {
        assert!(matches!(err, Error::Argument { .. }));
        assert_eq!(err.status_code(), 3);
    }
}

#[test]
fn test_every_entry_has_one_primary_owner() {
    let owners = run_spmd(6, |comm| {
        let grid = Grid::new(comm, GridOrder::RowMajor).unwrap();
        let mut counts = Vec::new();
        for dist in Distribution::ALL {
            let a = DistMatrix::<f64>::aligned(
                &grid,
                dist,
                5,
                4,
                nonzero_alignment(dist.col, &grid),
                nonzero_alignment(dist.row, &grid),
            )
            .unwrap();
            let primary = dist.is_primary(grid.row(), grid.col());
            for j in 0..4 {
                for i in 0..5 {
                    let mine = primary && a.owns(i, j);
                    if mine {
                        assert_eq!(a.owner_of(i, j).unwrap(), grid.vc_rank());
                    }
                    counts.push(mine as usize);
                }
            }
        }
        counts
    });
    let total = owners[0].len();
    for k in 0..total {
        assert_eq!(owners.iter().map(|c| c[k]).sum::<usize>(), 1);
    }
}

#[test]
fn test_get_and_set_agree_across_processes() {
    let values = run_spmd(6, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let mut out = Vec::new();
        for dist in Distribution::ALL {
            let mut a = DistMatrix::<f64>::with_shape(&grid, dist, 4, 3).unwrap();
            a.set(3, 2, 8.0).unwrap();
            a.update(3, 2, 1.0).unwrap();
            a.set(0, 1, -1.0).unwrap();
            out.push((a.get(3, 2).unwrap(), a.get(0, 1).unwrap(), a.get(1, 1).unwrap()));
        }
        out
    });
    for per_process in values {
        for v in per_process {
            assert_eq!(v, (9.0, -1.0, 0.0));
        }
    }
}

#[test]
fn test_sum_scatter_matches_explicit_sum() {
    // every process contributes i + 10 j, so each entry sums to that times
    // the size of the team the source is replicated over
    let globals = run_spmd(6, |comm| {
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        let mut out = Vec::new();
        for (src, dst, team) in [
            (Distribution::MC_STAR, Distribution::MC_MR, grid.width()),
            (Distribution::STAR_MR, Distribution::MC_MR, grid.height()),
            (Distribution::STAR_STAR, Distribution::MD_STAR, grid.size()),
            (Distribution::STAR_STAR, Distribution::STAR_VR, grid.size()),
        ] {
            let mut partial = DistMatrix::<f64>::with_shape(&grid, src, 5, 4).unwrap();
            let values: Vec<f64> = (0..4)
                .flat_map(|j| (0..5).map(move |i| (i + 10 * j) as f64))
                .collect();
            partial.from_global(5, 4, &values).unwrap();
            let mut total = DistMatrix::<f64>::new(&grid, dst).unwrap();
            total.sum_scatter_from(&partial).unwrap();
            out.push((team, total.to_global().unwrap()));
        }
        out
    });
    for per_process in globals {
        for (team, g) in per_process {
            for j in 0..4 {
                for i in 0..5 {
                    assert_eq!(g[i + 5 * j], (team * (i + 10 * j)) as f64, "entry ({}, {})", i, j);
                }
            }
        }
    }
}
