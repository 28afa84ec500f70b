//! Two-dimensional process grids.
//!
//! A [`Grid`] arranges the `p` processes of a communicator as an `r x c`
//! array and derives the sub-communicators every distribution needs:
//!
//! | name | members | size | rank |
//! |---|---|---|---|
//! | `MC` | same grid column | `r` | grid row |
//! | `MR` | same grid row | `c` | grid column |
//! | `VC` | everyone, column-major | `p` | `row + col * r` |
//! | `VR` | everyone, row-major | `p` | `col + row * c` |
//! | `MD` | same diagonal path | `lcm(r, c)` | position on the path |
//! | `MD⊥` | same position, other paths | `gcd(r, c)` | path |
//!
//! Diagonal path `k` visits the processes `(j mod r, (k + j) mod c)` for
//! `j = 0..lcm`, so the `gcd` paths partition the grid.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use tracing::debug;

/// How linear ranks of the parent communicator map onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GridOrder {
    /// Rank `q` sits at `(q mod r, q / r)`.
    #[default]
    ColumnMajor,
    /// Rank `q` sits at `(q / c, q mod c)`.
    RowMajor,
}

/// Largest divisor of `p` that does not exceed `sqrt(p)`.
pub fn find_factor(p: usize) -> usize {
    if p == 0 {
        return 1;
    }
    let mut factor = (p as f64).sqrt() as usize;
    while factor * factor > p {
        factor -= 1;
    }
    while (factor + 1) * (factor + 1) <= p {
        factor += 1;
    }
    while p % factor != 0 {
        factor -= 1;
    }
    factor
}

pub fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

pub fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

/// Immutable `r x c` process grid together with its sub-communicators.
///
/// Construction is collective over the communicator. Every accessor is a
/// local lookup.
pub struct Grid<C: Communicator> {
    order: GridOrder,
    height: usize,
    width: usize,
    size: usize,
    row: usize,
    col: usize,
    gcd: usize,
    lcm: usize,
    diag_path: Vec<usize>,
    diag_path_rank: Vec<usize>,
    comm: C,
    vc_comm: C,
    vr_comm: C,
    mc_comm: C,
    mr_comm: C,
    md_comm: C,
    md_perp_comm: C,
}

impl<C: Communicator> Grid<C> {
    /// Builds a grid whose height is [`find_factor`] of the communicator size.
    pub fn new(comm: C, order: GridOrder) -> Result<Self> {
        let height = find_factor(comm.size());
        Self::with_height(comm, height, order)
    }

    /// Builds a grid with an explicit height.
    ///
    /// Fails with an argument error, before any communication, if `height`
    /// is zero or does not divide the communicator size.
    pub fn with_height(comm: C, height: usize, order: GridOrder) -> Result<Self> {
        let size = comm.size();
        if height == 0 {
            return Err(Error::argument("Grid::with_height", "grid height must be positive"));
        }
        if size % height != 0 {
            return Err(Error::argument(
                "Grid::with_height",
                format!("grid height {} does not divide {} processes", height, size),
            ));
        }
        let width = size / height;
        let (row, col) = match order {
            GridOrder::ColumnMajor => (comm.rank() % height, comm.rank() / height),
            GridOrder::RowMajor => (comm.rank() / width, comm.rank() % width),
        };
        let gcd = gcd(height, width);
        let lcm = lcm(height, width);

        let mut diag_path = vec![0; size];
        let mut diag_path_rank = vec![0; size];
        for path in 0..gcd {
            for j in 0..lcm {
                let vc = (j % height) + ((path + j) % width) * height;
                diag_path[vc] = path;
                diag_path_rank[vc] = j;
            }
        }

        let vc = row + col * height;
        let vr = col + row * width;
        let vc_comm = comm.split(0, vc)?;
        let vr_comm = comm.split(0, vr)?;
        let mc_comm = comm.split(col, row)?;
        let mr_comm = comm.split(row, col)?;
        let md_comm = comm.split(diag_path[vc], diag_path_rank[vc])?;
        let md_perp_comm = comm.split(diag_path_rank[vc], diag_path[vc])?;

        debug!(
            height,
            width,
            row,
            col,
            ?order,
            "constructed process grid"
        );

        Ok(Self {
            order,
            height,
            width,
            size,
            row,
            col,
            gcd,
            lcm,
            diag_path,
            diag_path_rank,
            comm,
            vc_comm,
            vr_comm,
            mc_comm,
            mr_comm,
            md_comm,
            md_perp_comm,
        })
    }

    pub fn order(&self) -> GridOrder {
        self.order
    }

    /// Number of grid rows `r`.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of grid columns `c`.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn gcd(&self) -> usize {
        self.gcd
    }

    pub fn lcm(&self) -> usize {
        self.lcm
    }

    pub fn vc_rank(&self) -> usize {
        self.row + self.col * self.height
    }

    pub fn vr_rank(&self) -> usize {
        self.col + self.row * self.width
    }

    /// Position of this process on its diagonal path.
    pub fn md_rank(&self) -> usize {
        self.diag_path_rank[self.vc_rank()]
    }

    /// Index of this process's diagonal path.
    pub fn md_perp_rank(&self) -> usize {
        self.diag_path[self.vc_rank()]
    }

    /// Diagonal path of the process with VC rank `vc`.
    pub fn diag_path(&self, vc: usize) -> usize {
        self.diag_path[vc]
    }

    /// Position of the process with VC rank `vc` on its diagonal path.
    pub fn diag_path_rank(&self, vc: usize) -> usize {
        self.diag_path_rank[vc]
    }

    /// VC rank of the first process on diagonal path `path`.
    pub fn first_vc_rank(&self, path: usize) -> usize {
        self.diag_vc(path, 0)
    }

    /// VC rank of the process at position `j` of diagonal path `path`.
    pub fn diag_vc(&self, path: usize, j: usize) -> usize {
        (j % self.height) + ((path + j) % self.width) * self.height
    }

    pub fn coords_of_vc(&self, vc: usize) -> (usize, usize) {
        (vc % self.height, vc / self.height)
    }

    pub fn coords_of_vr(&self, vr: usize) -> (usize, usize) {
        (vr / self.width, vr % self.width)
    }

    pub fn vc_to_vr(&self, vc: usize) -> usize {
        let (row, col) = self.coords_of_vc(vc);
        col + row * self.width
    }

    pub fn vr_to_vc(&self, vr: usize) -> usize {
        let (row, col) = self.coords_of_vr(vr);
        row + col * self.height
    }

    /// The communicator the grid was built from.
    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn vc_comm(&self) -> &C {
        &self.vc_comm
    }

    pub fn vr_comm(&self) -> &C {
        &self.vr_comm
    }

    /// Processes in this grid column, ranked by grid row.
    pub fn mc_comm(&self) -> &C {
        &self.mc_comm
    }

    /// Processes in this grid row, ranked by grid column.
    pub fn mr_comm(&self) -> &C {
        &self.mr_comm
    }

    pub fn md_comm(&self) -> &C {
        &self.md_comm
    }

    pub fn md_perp_comm(&self) -> &C {
        &self.md_perp_comm
    }
}

impl<C: Communicator> std::fmt::Debug for Grid<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("row", &self.row)
            .field("col", &self.col)
            .field("order", &self.order)
            .finish()
    }
}
