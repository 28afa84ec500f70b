//! Distribution descriptors and the index arithmetic behind them.
//!
//! A matrix distribution is a pair of per-axis rules. Along one axis, the
//! process at grid position `(row, col)` owns every global index `g` with
//! `g mod stride == shift`, stored at local index `g / stride`. The shift is
//! the distance from this process to the *alignment*, the process owning
//! global index 0.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::grid::Grid;
use std::fmt;

/// How one axis of a matrix is spread over the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dist {
    /// Cyclic over grid rows (the `MC` communicator).
    MC,
    /// Cyclic over grid columns (the `MR` communicator).
    MR,
    /// Cyclic along a diagonal path of the grid.
    MD,
    /// Cyclic over all processes in column-major order.
    VC,
    /// Cyclic over all processes in row-major order.
    VR,
    /// Replicated on every process.
    Star,
}

impl Dist {
    /// Whether ownership along this axis depends on the grid row.
    pub fn uses_row(self) -> bool {
        matches!(self, Dist::MC | Dist::MD | Dist::VC | Dist::VR)
    }

    /// Whether ownership along this axis depends on the grid column.
    pub fn uses_col(self) -> bool {
        matches!(self, Dist::MR | Dist::MD | Dist::VC | Dist::VR)
    }

    /// Distance between consecutive locally owned indices.
    pub fn stride<C: Communicator>(self, grid: &Grid<C>) -> usize {
        match self {
            Dist::MC => grid.height(),
            Dist::MR => grid.width(),
            Dist::MD => grid.lcm(),
            Dist::VC | Dist::VR => grid.size(),
            Dist::Star => 1,
        }
    }

    /// Number of distinct alignments.
    pub fn alignment_modulus<C: Communicator>(self, grid: &Grid<C>) -> usize {
        match self {
            Dist::MD => grid.size(),
            other => other.stride(grid),
        }
    }

    /// Whether every index owned under `self` is also owned under `coarser`
    /// for compatible alignments.
    pub fn refines(self, coarser: Dist) -> bool {
        self == coarser
            || coarser == Dist::Star
            || matches!((coarser, self), (Dist::MC, Dist::VC) | (Dist::MR, Dist::VR))
    }

    /// Alignment an axis distributed by `self` should take to line up with
    /// an axis distributed by `source` with alignment `align`, if the two
    /// are compatible.
    pub fn compatible_alignment<C: Communicator>(
        self,
        source: Dist,
        align: usize,
        grid: &Grid<C>,
    ) -> Option<usize> {
        match (self, source) {
            (Dist::Star, _) | (_, Dist::Star) => None,
            (target, source) if target == source => Some(align),
            (Dist::MC, Dist::VC) => Some(align % grid.height()),
            (Dist::MR, Dist::VR) => Some(align % grid.width()),
            (Dist::VC, Dist::MC) | (Dist::VR, Dist::MR) => Some(align),
            _ => None,
        }
    }

    /// Alignment of the sub-range starting at global index `offset` of an
    /// axis aligned at `align`: the process owning `offset`.
    pub fn advance<C: Communicator>(self, align: usize, offset: usize, grid: &Grid<C>) -> usize {
        match self {
            Dist::Star => 0,
            Dist::MD => {
                let path = grid.diag_path(align);
                let pos = (grid.diag_path_rank(align) + offset) % grid.lcm();
                grid.diag_vc(path, pos)
            }
            other => (align + offset) % other.stride(grid),
        }
    }
}

impl fmt::Display for Dist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dist::MC => "MC",
            Dist::MR => "MR",
            Dist::MD => "MD",
            Dist::VC => "VC",
            Dist::VR => "VR",
            Dist::Star => "*",
        };
        f.write_str(name)
    }
}

/// A `(column, row)` distribution pair; only the thirteen legal pairs can
/// be constructed through [`Distribution::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Distribution {
    /// Distribution of the column index, i.e. of the rows.
    pub col: Dist,
    /// Distribution of the row index, i.e. of the columns.
    pub row: Dist,
}

impl Distribution {
    pub const MC_MR: Distribution = Distribution::pair(Dist::MC, Dist::MR);
    pub const MC_STAR: Distribution = Distribution::pair(Dist::MC, Dist::Star);
    pub const STAR_MR: Distribution = Distribution::pair(Dist::Star, Dist::MR);
    pub const MR_MC: Distribution = Distribution::pair(Dist::MR, Dist::MC);
    pub const MR_STAR: Distribution = Distribution::pair(Dist::MR, Dist::Star);
    pub const STAR_MC: Distribution = Distribution::pair(Dist::Star, Dist::MC);
    pub const MD_STAR: Distribution = Distribution::pair(Dist::MD, Dist::Star);
    pub const STAR_MD: Distribution = Distribution::pair(Dist::Star, Dist::MD);
    pub const VC_STAR: Distribution = Distribution::pair(Dist::VC, Dist::Star);
    pub const STAR_VC: Distribution = Distribution::pair(Dist::Star, Dist::VC);
    pub const VR_STAR: Distribution = Distribution::pair(Dist::VR, Dist::Star);
    pub const STAR_VR: Distribution = Distribution::pair(Dist::Star, Dist::VR);
    pub const STAR_STAR: Distribution = Distribution::pair(Dist::Star, Dist::Star);

    pub const ALL: [Distribution; 13] = [
        Self::MC_MR,
        Self::MC_STAR,
        Self::STAR_MR,
        Self::MR_MC,
        Self::MR_STAR,
        Self::STAR_MC,
        Self::MD_STAR,
        Self::STAR_MD,
        Self::VC_STAR,
        Self::STAR_VC,
        Self::VR_STAR,
        Self::STAR_VR,
        Self::STAR_STAR,
    ];

    const fn pair(col: Dist, row: Dist) -> Self {
        Distribution { col, row }
    }

    /// Validated constructor.
    pub fn new(col: Dist, row: Dist) -> Result<Self> {
        let dist = Self::pair(col, row);
        if !dist.is_legal() {
            return Err(Error::logic(
                "Distribution::new",
                format!("{} is not a supported distribution", dist),
            ));
        }
        Ok(dist)
    }

    pub fn is_legal(&self) -> bool {
        Self::ALL.contains(self)
    }

    /// The distribution of the transposed matrix.
    pub fn transposed(&self) -> Self {
        Self::pair(self.row, self.col)
    }

    /// Whether ownership depends on the grid row.
    pub fn uses_row(&self) -> bool {
        self.col.uses_row() || self.row.uses_row()
    }

    /// Whether ownership depends on the grid column.
    pub fn uses_col(&self) -> bool {
        self.col.uses_col() || self.row.uses_col()
    }

    /// Whether the process at `(row, col)` is the designated holder of the
    /// entries it owns. Grid coordinates the distribution ignores must be 0.
    pub fn is_primary(&self, row: usize, col: usize) -> bool {
        (self.uses_row() || row == 0) && (self.uses_col() || col == 0)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.col, self.row)
    }
}

/// Number of indices in `0..n` congruent to `shift` modulo `stride`.
pub fn local_length(n: usize, shift: usize, stride: usize) -> usize {
    if shift >= n {
        0
    } else {
        (n - shift - 1) / stride + 1
    }
}

/// Ownership rule of one axis for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisLayout {
    pub stride: usize,
    /// `None` when the process owns nothing on this axis (off the diagonal
    /// path of an `MD` axis).
    pub shift: Option<usize>,
}

impl AxisLayout {
    /// Layout of an axis distributed by `dist` with alignment `align`, as seen
    /// by the process at grid position `(row, col)`.
    pub fn of<C: Communicator>(dist: Dist, align: usize, grid: &Grid<C>, row: usize, col: usize) -> Self {
        let r = grid.height();
        let c = grid.width();
        let p = grid.size();
        let stride = dist.stride(grid);
        let shift = match dist {
            Dist::Star => Some(0),
            Dist::MC => Some((row + r - align % r) % r),
            Dist::MR => Some((col + c - align % c) % c),
            Dist::VC => Some((row + col * r + p - align % p) % p),
            Dist::VR => Some((col + row * c + p - align % p) % p),
            Dist::MD => {
                let me = row + col * r;
                let align = align % p;
                if grid.diag_path(me) == grid.diag_path(align) {
                    let lcm = grid.lcm();
                    Some((grid.diag_path_rank(me) + lcm - grid.diag_path_rank(align)) % lcm)
                } else {
                    None
                }
            }
        };
        Self { stride, shift }
    }

    pub fn local_length(&self, n: usize) -> usize {
        self.shift.map_or(0, |shift| local_length(n, shift, self.stride))
    }

    pub fn owns(&self, g: usize) -> bool {
        self.shift == Some(g % self.stride)
    }

    /// Local index of an owned global index.
    pub fn local_index(&self, g: usize) -> usize {
        g / self.stride
    }

    /// Global index of local index `l`. Only meaningful when `shift` is set.
    pub fn global_index(&self, l: usize) -> usize {
        self.shift.unwrap_or(0) + l * self.stride
    }

    /// Owned global indices in `0..n`, ascending.
    pub fn owned(&self, n: usize) -> impl Iterator<Item = usize> + use<> {
        let (start, count) = match self.shift {
            Some(shift) => (shift, local_length(n, shift, self.stride)),
            None => (0, 0),
        };
        let stride = self.stride;
        (0..count).map(move |l| start + l * stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadComm;
    use crate::grid::GridOrder;

    #[test]
    fn test_local_length_partitions_extent() {
        for n in 0..20 {
            for stride in 1..6 {
                let total: usize = (0..stride).map(|shift| local_length(n, shift, stride)).sum();
                assert_eq!(total, n, "n = {}, stride = {}", n, stride);
            }
        }
        assert_eq!(local_length(5, 7, 3), 0);
    }

    #[test]
    fn test_legal_pairs() {
        assert_eq!(Distribution::ALL.len(), 13);
        assert!(Distribution::new(Dist::MC, Dist::MR).is_ok());
        assert!(Distribution::new(Dist::VC, Dist::Star).is_ok());

        let err = Distribution::new(Dist::MC, Dist::MC).unwrap_err();
        assert!(matches!(err, Error::Logic { .. }));
        assert!(Distribution::new(Dist::VC, Dist::VR).is_err());
        assert!(Distribution::new(Dist::MD, Dist::MR).is_err());

        for dist in Distribution::ALL {
            assert!(dist.transposed().is_legal());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Distribution::MC_MR.to_string(), "[MC,MR]");
        assert_eq!(Distribution::STAR_VR.to_string(), "[*,VR]");
    }

    #[test]
    fn test_refines() {
        assert!(Dist::VC.refines(Dist::MC));
        assert!(Dist::VR.refines(Dist::MR));
        assert!(Dist::MD.refines(Dist::Star));
        assert!(!Dist::MC.refines(Dist::VC));
        assert!(!Dist::VC.refines(Dist::MR));
    }

    #[test]
    fn test_primary_process() {
        // [MC,*] is replicated across grid columns
        assert!(Distribution::MC_STAR.is_primary(1, 0));
        assert!(!Distribution::MC_STAR.is_primary(1, 1));
        assert!(Distribution::MC_MR.is_primary(1, 1));
        assert!(Distribution::STAR_STAR.is_primary(0, 0));
        assert!(!Distribution::STAR_STAR.is_primary(0, 1));
    }

    #[test]
    fn test_layouts_on_single_process() {
        let comm = ThreadComm::world(1).pop().unwrap();
        let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
        for dist in [Dist::MC, Dist::MR, Dist::MD, Dist::VC, Dist::VR, Dist::Star] {
            let layout = AxisLayout::of(dist, 0, &grid, 0, 0);
            assert_eq!(layout.local_length(5), 5);
            assert_eq!(layout.owned(5).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_every_index_has_one_owner() {
        // 2 x 3 grid; layouts are pure functions of the coordinates so the
        // check runs for every process from a single one.
        let results = crate::comm::run_spmd(6, |comm| {
            let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
            if grid.vc_rank() != 0 {
                return;
            }
            let n = 17;
            for dist in [Dist::MC, Dist::MR, Dist::MD, Dist::VC, Dist::VR] {
                for align in 0..dist.alignment_modulus(&grid) {
                    // Distinct owners per index among the processes that
                    // would replicate it
                    let mut counts = vec![0; n];
                    let mut total = 0;
                    for vc in 0..grid.size() {
                        let (row, col) = grid.coords_of_vc(vc);
                        let primary = (dist.uses_row() || row == 0) && (dist.uses_col() || col == 0);
                        let layout = AxisLayout::of(dist, align, &grid, row, col);
                        if !primary {
                            continue;
                        }
                        total += layout.local_length(n);
                        for g in layout.owned(n) {
                            assert!(layout.owns(g));
                            assert_eq!(layout.global_index(layout.local_index(g)), g);
                            counts[g] += 1;
                        }
                    }
                    assert_eq!(total, n, "{} aligned at {}", dist, align);
                    assert!(counts.iter().all(|&k| k == 1), "{} aligned at {}", dist, align);
                }
            }
        });
        assert_eq!(results.len(), 6);
    }

    #[test]
    fn test_md_alignment_advance() {
        crate::comm::run_spmd(4, |comm| {
            let grid = Grid::new(comm, GridOrder::ColumnMajor).unwrap();
            // 2 x 2 grid has two diagonal paths of length 2
            let start = grid.diag_vc(1, 0);
            let next = Dist::MD.advance(start, 1, &grid);
            assert_eq!(grid.diag_path(next), 1);
            assert_eq!(grid.diag_path_rank(next), 1);
            assert_eq!(Dist::MD.advance(start, 2, &grid), start);
            assert_eq!(Dist::MC.advance(1, 3, &grid), 0);
        });
    }
}
