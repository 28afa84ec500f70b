//! Distributed matrices.
//!
//! A [`DistMatrix`] is one process's share of a global `height x width`
//! matrix: the grid it lives on, its [`Distribution`], the alignment of each
//! axis and the [`LocalMatrix`] holding exactly the entries this process owns.
//! All thirteen distributions share this one type; conversions between them
//! go through [`DistMatrix::copy_from`].

use crate::comm::{Communicator, ThreadComm};
use crate::dist::{AxisLayout, Dist, Distribution};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::matrix::LocalMatrix;
use crate::{Scalar, redist};
use gridmat_kernels::UpperOrLower;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::fmt;

pub struct DistMatrix<'g, T: Scalar, C: Communicator = ThreadComm> {
    pub(crate) grid: &'g Grid<C>,
    pub(crate) dist: Distribution,
    pub(crate) height: usize,
    pub(crate) width: usize,
    pub(crate) col_align: usize,
    pub(crate) row_align: usize,
    pub(crate) col_constrained: bool,
    pub(crate) row_constrained: bool,
    pub(crate) viewing: bool,
    pub(crate) locked: bool,
    /// Global position of entry `(0, 0)` within the matrix owning the storage.
    pub(crate) origin: (usize, usize),
    pub(crate) local: LocalMatrix<T>,
}

impl<'g, T: Scalar, C: Communicator> DistMatrix<'g, T, C> {
    /// Empty `0 x 0` matrix with free alignments.
    pub fn new(grid: &'g Grid<C>, dist: Distribution) -> Result<Self> {
        Self::with_shape(grid, dist, 0, 0)
    }

    /// Zero-filled matrix with free alignments.
    pub fn with_shape(grid: &'g Grid<C>, dist: Distribution, height: usize, width: usize) -> Result<Self> {
        if !dist.is_legal() {
            return Err(Error::logic(
                "DistMatrix::with_shape",
                format!("{} is not a supported distribution", dist),
            ));
        }
        let mut matrix = Self {
            grid,
            dist,
            height,
            width,
            col_align: 0,
            row_align: 0,
            col_constrained: false,
            row_constrained: false,
            viewing: false,
            locked: false,
            origin: (0, 0),
            local: LocalMatrix::new(0, 0),
        };
        matrix.reallocate();
        Ok(matrix)
    }

    /// Zero-filled matrix with fixed alignments on its distributed axes.
    pub fn aligned(
        grid: &'g Grid<C>,
        dist: Distribution,
        height: usize,
        width: usize,
        col_align: usize,
        row_align: usize,
    ) -> Result<Self> {
        let op = "DistMatrix::aligned";
        for (axis, align) in [(dist.col, col_align), (dist.row, row_align)] {
            if align >= axis.alignment_modulus(grid) {
                return Err(Error::argument(
                    op,
                    format!("alignment {} is invalid for a {} axis", align, axis),
                ));
            }
        }
        let mut matrix = Self::with_shape(grid, dist, 0, 0)?;
        matrix.col_align = col_align;
        matrix.row_align = row_align;
        matrix.col_constrained = dist.col != Dist::Star;
        matrix.row_constrained = dist.row != Dist::Star;
        matrix.height = height;
        matrix.width = width;
        matrix.reallocate();
        Ok(matrix)
    }

    /// Empty matrix on `other`'s grid, aligned with it as by
    /// [`DistMatrix::align_with`].
    pub fn new_aligned_with<U: Scalar>(dist: Distribution, other: &DistMatrix<'g, U, C>) -> Result<Self> {
        let mut matrix = Self::new(other.grid, dist)?;
        matrix.align_with(other)?;
        Ok(matrix)
    }

    fn reallocate(&mut self) {
        let height = self.col_layout().local_length(self.height);
        let width = self.row_layout().local_length(self.width);
        self.local = LocalMatrix::new(height, width);
    }

    pub fn grid(&self) -> &'g Grid<C> {
        self.grid
    }

    pub fn dist(&self) -> Distribution {
        self.dist
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn col_align(&self) -> usize {
        self.col_align
    }

    pub fn row_align(&self) -> usize {
        self.row_align
    }

    pub fn col_constrained(&self) -> bool {
        self.col_constrained
    }

    pub fn row_constrained(&self) -> bool {
        self.row_constrained
    }

    pub fn is_view(&self) -> bool {
        self.viewing
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Column-axis layout of this process.
    pub fn col_layout(&self) -> AxisLayout {
        self.col_layout_at(self.grid.row(), self.grid.col())
    }

    /// Row-axis layout of this process.
    pub fn row_layout(&self) -> AxisLayout {
        self.row_layout_at(self.grid.row(), self.grid.col())
    }

    /// Column-axis layout of the process at grid position `(row, col)`.
    pub fn col_layout_at(&self, row: usize, col: usize) -> AxisLayout {
        AxisLayout::of(self.dist.col, self.col_align, self.grid, row, col)
    }

    pub fn row_layout_at(&self, row: usize, col: usize) -> AxisLayout {
        AxisLayout::of(self.dist.row, self.row_align, self.grid, row, col)
    }

    /// `None` when this process owns no rows (off the diagonal path).
    pub fn col_shift(&self) -> Option<usize> {
        self.col_layout().shift
    }

    pub fn row_shift(&self) -> Option<usize> {
        self.row_layout().shift
    }

    pub fn col_stride(&self) -> usize {
        self.dist.col.stride(self.grid)
    }

    pub fn row_stride(&self) -> usize {
        self.dist.row.stride(self.grid)
    }

    pub fn local_height(&self) -> usize {
        self.local.height()
    }

    pub fn local_width(&self) -> usize {
        self.local.width()
    }

    /// Whether this process can own any entry at all.
    pub fn participating(&self) -> bool {
        self.col_shift().is_some() && self.row_shift().is_some()
    }

    /// Global row of local row `li`.
    pub fn global_row(&self, li: usize) -> usize {
        self.col_layout().global_index(li)
    }

    /// Global column of local column `lj`.
    pub fn global_col(&self, lj: usize) -> usize {
        self.row_layout().global_index(lj)
    }

    pub fn local(&self) -> &LocalMatrix<T> {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut LocalMatrix<T> {
        &mut self.local
    }

    /// Changes the global shape, re-deriving local storage.
    pub fn resize(&mut self, height: usize, width: usize) -> Result<()> {
        if self.viewing {
            return Err(Error::logic("DistMatrix::resize", "cannot resize a view"));
        }
        self.height = height;
        self.width = width;
        let local_height = self.col_layout().local_length(height);
        let local_width = self.row_layout().local_length(width);
        self.local.resize(local_height, local_width)
    }

    pub(crate) fn check_same_grid(&self, op: &'static str, other: &Grid<C>) -> Result<()> {
        if !std::ptr::eq(self.grid, other) {
            return Err(Error::logic(op, "matrices are distributed over different grids"));
        }
        Ok(())
    }

    fn check_unlocked(&self, op: &'static str) -> Result<()> {
        if self.locked {
            return Err(Error::logic(op, "cannot modify a locked view"));
        }
        Ok(())
    }

    fn check_global(&self, op: &'static str, i: usize, j: usize) -> Result<()> {
        if i >= self.height || j >= self.width {
            return Err(Error::out_of_bounds(
                op,
                format!("({}, {}) outside a {}x{} matrix", i, j, self.height, self.width),
            ));
        }
        Ok(())
    }

    fn set_alignments(&mut self, op: &'static str, col: Option<usize>, row: Option<usize>) -> Result<()> {
        if self.viewing {
            return Err(Error::logic(op, "cannot realign a view"));
        }
        let mut changed = false;
        if let Some(align) = col {
            changed |= align != self.col_align;
            self.col_align = align;
            self.col_constrained = true;
        }
        if let Some(align) = row {
            changed |= align != self.row_align;
            self.row_align = align;
            self.row_constrained = true;
        }
        if changed {
            self.reallocate();
        }
        Ok(())
    }

    fn alignment_from<U: Scalar>(&self, target: Dist, other: &DistMatrix<'_, U, C>) -> Option<usize> {
        [
            (other.dist.col, other.col_align),
            (other.dist.row, other.row_align),
        ]
        .into_iter()
        .find_map(|(source, align)| target.compatible_alignment(source, align, self.grid))
    }

    /// Adopts the alignments of `other` on every axis that has a compatible
    /// counterpart and marks those axes constrained.
    ///
    /// Re-aligning to the current alignment leaves shape and data untouched;
    /// any real change re-derives (and zeroes) local storage.
    pub fn align_with<U: Scalar>(&mut self, other: &DistMatrix<'_, U, C>) -> Result<()> {
        let op = "DistMatrix::align_with";
        self.check_same_grid(op, other.grid)?;
        let col = self.alignment_from(self.dist.col, other);
        let row = self.alignment_from(self.dist.row, other);
        self.set_alignments(op, col, row)
    }

    pub fn align_cols_with<U: Scalar>(&mut self, other: &DistMatrix<'_, U, C>) -> Result<()> {
        let op = "DistMatrix::align_cols_with";
        self.check_same_grid(op, other.grid)?;
        let col = self.alignment_from(self.dist.col, other);
        self.set_alignments(op, col, None)
    }

    pub fn align_rows_with<U: Scalar>(&mut self, other: &DistMatrix<'_, U, C>) -> Result<()> {
        let op = "DistMatrix::align_rows_with";
        self.check_same_grid(op, other.grid)?;
        let row = self.alignment_from(self.dist.row, other);
        self.set_alignments(op, None, row)
    }

    /// Lets the next assignment pick any alignment.
    pub fn free_alignments(&mut self) {
        if !self.viewing {
            self.col_constrained = false;
            self.row_constrained = false;
        }
    }

    /// Whether this process stores entry `(i, j)`.
    pub fn owns(&self, i: usize, j: usize) -> bool {
        self.col_layout().owns(i) && self.row_layout().owns(j)
    }

    /// VC rank of the process designated to hold entry `(i, j)`; replicas
    /// elsewhere are copies of it.
    pub fn owner_of(&self, i: usize, j: usize) -> Result<usize> {
        let op = "DistMatrix::owner_of";
        self.check_global(op, i, j)?;
        let grid = self.grid;
        (0..grid.size())
            .find(|&vc| {
                let (row, col) = grid.coords_of_vc(vc);
                self.dist.is_primary(row, col)
                    && self.col_layout_at(row, col).owns(i)
                    && self.row_layout_at(row, col).owns(j)
            })
            .ok_or_else(|| Error::generic(op, format!("no process owns ({}, {})", i, j)))
    }

    /// Reads a global entry. Collective over the whole grid; every process
    /// returns the same value.
    pub fn get(&self, i: usize, j: usize) -> Result<T> {
        let op = "DistMatrix::get";
        self.check_global(op, i, j)?;
        let grid = self.grid;
        let root = self.owner_of(i, j)?;
        let mut value = Vec::with_capacity(1);
        if grid.vc_rank() == root {
            let (col, row) = (self.col_layout(), self.row_layout());
            value.push(self.local.get(col.local_index(i), row.local_index(j))?);
        }
        grid.vc_comm().broadcast(&mut value, root)?;
        value
            .first()
            .copied()
            .ok_or_else(|| Error::generic(op, "owner broadcast no value"))
    }

    /// Writes a global entry on every process holding a replica. Not
    /// collective.
    pub fn set(&mut self, i: usize, j: usize, value: T) -> Result<()> {
        let op = "DistMatrix::set";
        self.check_global(op, i, j)?;
        self.check_unlocked(op)?;
        if self.owns(i, j) {
            let (col, row) = (self.col_layout(), self.row_layout());
            self.local.set(col.local_index(i), row.local_index(j), value)?;
        }
        Ok(())
    }

    /// Adds to a global entry on every process holding a replica.
    pub fn update(&mut self, i: usize, j: usize, value: T) -> Result<()> {
        let op = "DistMatrix::update";
        self.check_global(op, i, j)?;
        self.check_unlocked(op)?;
        if self.owns(i, j) {
            let (col, row) = (self.col_layout(), self.row_layout());
            self.local.update(col.local_index(i), row.local_index(j), value)?;
        }
        Ok(())
    }

    pub fn get_local(&self, li: usize, lj: usize) -> Result<T> {
        self.local.get(li, lj)
    }

    pub fn set_local(&mut self, li: usize, lj: usize, value: T) -> Result<()> {
        self.local.set(li, lj, value)
    }

    pub fn update_local(&mut self, li: usize, lj: usize, value: T) -> Result<()> {
        self.local.update(li, lj, value)
    }

    /// Geometry of the `height x width` window at `(i, j)`: the window's
    /// alignments plus the local offset and extent of its entries.
    fn window(&self, op: &'static str, i: usize, j: usize, height: usize, width: usize) -> Result<Self> {
        if i + height > self.height || j + width > self.width {
            return Err(Error::out_of_bounds(
                op,
                format!(
                    "{}x{} window at ({}, {}) exceeds a {}x{} matrix",
                    height, width, i, j, self.height, self.width
                ),
            ));
        }
        let grid = self.grid;
        Ok(Self {
            grid,
            dist: self.dist,
            height,
            width,
            col_align: self.dist.col.advance(self.col_align, i, grid),
            row_align: self.dist.row.advance(self.row_align, j, grid),
            col_constrained: true,
            row_constrained: true,
            viewing: true,
            locked: self.locked,
            origin: (self.origin.0 + i, self.origin.1 + j),
            local: LocalMatrix::new(0, 0),
        })
    }

    fn local_window(&self, view: &Self, i: usize, j: usize) -> (usize, usize, usize, usize) {
        (
            self.col_layout().local_length(i),
            self.row_layout().local_length(j),
            view.col_layout().local_length(view.height),
            view.row_layout().local_length(view.width),
        )
    }

    /// Window sharing this matrix's local storage; writes through it are
    /// visible here.
    pub fn view(&mut self, i: usize, j: usize, height: usize, width: usize) -> Result<Self> {
        let mut view = self.window("DistMatrix::view", i, j, height, width)?;
        let (li, lj, lh, lw) = self.local_window(&view, i, j);
        view.local = self.local.view(li, lj, lh, lw)?;
        Ok(view)
    }

    /// Read-only window sharing this matrix's local storage.
    pub fn locked_view(&self, i: usize, j: usize, height: usize, width: usize) -> Result<Self> {
        let mut view = self.window("DistMatrix::locked_view", i, j, height, width)?;
        let (li, lj, lh, lw) = self.local_window(&view, i, j);
        view.locked = true;
        view.local = self.local.locked_view(li, lj, lh, lw)?;
        Ok(view)
    }

    /// Assigns `src` to `self`, redistributing as needed.
    ///
    /// An owning matrix takes `src`'s shape; a view must already match it and
    /// must not overlap `src` within shared storage.
    pub fn copy_from(&mut self, src: &DistMatrix<'_, T, C>) -> Result<()> {
        let op = "DistMatrix::copy_from";
        self.check_same_grid(op, src.grid)?;
        self.check_unlocked(op)?;
        if self.viewing {
            if self.height != src.height || self.width != src.width {
                return Err(Error::logic(
                    op,
                    format!(
                        "cannot assign a {}x{} matrix to a {}x{} view",
                        src.height, src.width, self.height, self.width
                    ),
                ));
            }
            if self.local.shares_storage(&src.local) && self.overlaps(src) {
                return Err(Error::logic(op, "view overlaps the source"));
            }
        }
        redist::redistribute(src, self)
    }

    /// Whether the global rectangles of two windows into the same storage
    /// intersect. Every process agrees since views always share the buffer.
    fn overlaps(&self, other: &DistMatrix<'_, T, C>) -> bool {
        let disjoint = |a: usize, a_len: usize, b: usize, b_len: usize| {
            a_len == 0 || b_len == 0 || a + a_len <= b || b + b_len <= a
        };
        !(disjoint(self.origin.0, self.height, other.origin.0, other.height)
            || disjoint(self.origin.1, self.width, other.origin.1, other.width))
    }

    /// New matrix holding the same values under `dist`.
    pub fn redistribute(&self, dist: Distribution) -> Result<DistMatrix<'g, T, C>> {
        let mut out = DistMatrix::new(self.grid, dist)?;
        out.copy_from(self)?;
        Ok(out)
    }

    /// `self := sum over the processes sharing src's layout of src`,
    /// scattered into `self`'s distribution.
    pub fn sum_scatter_from(&mut self, src: &DistMatrix<'_, T, C>) -> Result<()> {
        redist::sum_scatter(src, self, T::one(), false)
    }

    /// `self += alpha * (reduce-scatter of src)`
    pub fn sum_scatter_update(&mut self, alpha: T, src: &DistMatrix<'_, T, C>) -> Result<()> {
        redist::sum_scatter(src, self, alpha, true)
    }

    fn sum_over(&mut self, op: &'static str, comm: &C) -> Result<()> {
        self.check_unlocked(op)?;
        let mut data = self.local.to_packed()?;
        comm.all_reduce_sum(&mut data)?;
        self.local.fill_from_packed(&data)
    }

    /// Sums the local stores across each grid row, in place.
    pub fn sum_over_row(&mut self) -> Result<()> {
        let grid = self.grid;
        self.sum_over("DistMatrix::sum_over_row", grid.mr_comm())
    }

    /// Sums the local stores down each grid column, in place.
    pub fn sum_over_col(&mut self) -> Result<()> {
        let grid = self.grid;
        self.sum_over("DistMatrix::sum_over_col", grid.mc_comm())
    }

    /// Rewrites every local entry as `f(i, j, old)` with global `(i, j)`.
    fn map_entries(&mut self, op: &'static str, f: impl Fn(usize, usize, T) -> T) -> Result<()> {
        self.check_unlocked(op)?;
        let (col, row) = (self.col_layout(), self.row_layout());
        let local_height = self.local.height();
        let mut data = self.local.to_packed()?;
        for lj in 0..self.local.width() {
            let j = row.global_index(lj);
            for li in 0..local_height {
                let k = li + lj * local_height;
                data[k] = f(col.global_index(li), j, data[k]);
            }
        }
        self.local.fill_from_packed(&data)
    }

    pub fn set_to_zero(&mut self) -> Result<()> {
        self.check_unlocked("DistMatrix::set_to_zero")?;
        self.local.set_to_zero()
    }

    pub fn set_to_identity(&mut self) -> Result<()> {
        self.map_entries("DistMatrix::set_to_identity", |i, j, _| {
            if i == j { T::one() } else { T::zero() }
        })
    }

    /// Fills with values uniform in `[-1, 1]`.
    ///
    /// Each global column draws from its own generator seeded by `seed` and
    /// the column index, so replicas on different processes agree.
    pub fn set_to_random(&mut self, seed: u64) -> Result<()> {
        let op = "DistMatrix::set_to_random";
        self.check_unlocked(op)?;
        let (col, row) = (self.col_layout(), self.row_layout());
        let local_height = self.local.height();
        let height = self.height;
        let mut data = vec![T::zero(); local_height * self.local.width()];
        if local_height > 0 {
            data.par_chunks_mut(local_height)
                .enumerate()
                .for_each(|(lj, column)| {
                    let j = row.global_index(lj) as u64;
                    let mut rng = StdRng::seed_from_u64(seed ^ j.wrapping_mul(0x9E37_79B9_7F4A_7C15));
                    let mut li = 0;
                    for i in 0..height {
                        let sample: f64 = rng.random_range(-1.0..=1.0);
                        if li < local_height && col.global_index(li) == i {
                            column[li] = T::from_f64(sample).unwrap_or_else(T::zero);
                            li += 1;
                        }
                    }
                });
        }
        self.local.fill_from_packed(&data)
    }

    /// Zeroes the entries outside a trapezoid: for `Lower`, entries with
    /// `j - i > offset`; for `Upper`, entries with `j - i < offset`.
    pub fn make_trapezoidal(&mut self, uplo: UpperOrLower, offset: isize) -> Result<()> {
        self.map_entries("DistMatrix::make_trapezoidal", |i, j, v| {
            let diff = j as isize - i as isize;
            let keep = match uplo {
                UpperOrLower::Lower => diff <= offset,
                UpperOrLower::Upper => diff >= offset,
            };
            if keep { v } else { T::zero() }
        })
    }

    /// Scales only the entries inside the trapezoid kept by
    /// [`DistMatrix::make_trapezoidal`].
    pub fn scale_trapezoidal(&mut self, alpha: T, uplo: UpperOrLower, offset: isize) -> Result<()> {
        self.map_entries("DistMatrix::scale_trapezoidal", |i, j, v| {
            let diff = j as isize - i as isize;
            let inside = match uplo {
                UpperOrLower::Lower => diff <= offset,
                UpperOrLower::Upper => diff >= offset,
            };
            if inside { alpha * v } else { v }
        })
    }

    pub fn scale(&mut self, alpha: T) -> Result<()> {
        self.check_unlocked("DistMatrix::scale")?;
        self.local.scale(alpha)
    }

    /// `self := src^T`
    ///
    /// `src` is first redistributed into the transpose of `self`'s
    /// distribution, after which the transpose is purely local.
    pub fn transpose_from(&mut self, src: &DistMatrix<'_, T, C>) -> Result<()> {
        let op = "DistMatrix::transpose_from";
        self.check_same_grid(op, src.grid)?;
        self.check_unlocked(op)?;
        if self.viewing && (self.height != src.width || self.width != src.height) {
            return Err(Error::logic(
                op,
                format!(
                    "cannot store the transpose of a {}x{} matrix in a {}x{} view",
                    src.height, src.width, self.height, self.width
                ),
            ));
        }
        let mut tmp = DistMatrix::new(self.grid, self.dist.transposed())?;
        if self.viewing || self.col_constrained {
            tmp.row_align = self.col_align;
            tmp.row_constrained = true;
        }
        if self.viewing || self.row_constrained {
            tmp.col_align = self.row_align;
            tmp.col_constrained = true;
        }
        tmp.copy_from(src)?;
        let data = tmp.local.transpose()?.to_packed()?;
        if !self.viewing {
            self.col_align = tmp.row_align;
            self.row_align = tmp.col_align;
            self.height = src.width;
            self.width = src.height;
            self.reallocate();
        }
        self.local.fill_from_packed(&data)
    }

    /// Replicated packed column-major copy of the whole matrix. Collective.
    pub fn to_global(&self) -> Result<Vec<T>> {
        self.redistribute(Distribution::STAR_STAR)?.local.to_packed()
    }

    /// Fills the locally owned entries from a packed column-major copy of the
    /// whole matrix that every process holds. Not collective.
    pub fn from_global(&mut self, height: usize, width: usize, data: &[T]) -> Result<()> {
        let op = "DistMatrix::from_global";
        if data.len() != height * width {
            return Err(Error::argument(
                op,
                format!("{} values for a {}x{} matrix", data.len(), height, width),
            ));
        }
        if self.viewing {
            if (height, width) != (self.height, self.width) {
                return Err(Error::logic(op, "view shape does not match the data"));
            }
        } else {
            self.resize(height, width)?;
        }
        self.map_entries(op, |i, j, _| data[i + j * height])
    }

    /// The main diagonal as an `[MD,*]` column vector, aligned so that no
    /// communication is needed.
    pub fn get_diagonal(&self) -> Result<DistMatrix<'g, T, C>> {
        let op = "DistMatrix::get_diagonal";
        if self.dist != Distribution::MC_MR {
            return Err(Error::logic(
                op,
                format!("diagonal extraction expects [MC,MR], got {}", self.dist),
            ));
        }
        let grid = self.grid;
        let n = self.height.min(self.width);
        let align = self.col_align + self.row_align * grid.height();
        let mut diag = DistMatrix::aligned(grid, Distribution::MD_STAR, n, 1, align, 0)?;
        let (col, row) = (self.col_layout(), self.row_layout());
        let values = diag
            .col_layout()
            .owned(n)
            .map(|k| self.local.get(col.local_index(k), row.local_index(k)))
            .collect::<Result<Vec<T>>>()?;
        diag.local.fill_from_packed(&values)?;
        Ok(diag)
    }
}

impl<T: Scalar, C: Communicator> fmt::Debug for DistMatrix<'_, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistMatrix")
            .field("dist", &self.dist)
            .field("height", &self.height)
            .field("width", &self.width)
            .field("col_align", &self.col_align)
            .field("row_align", &self.row_align)
            .field("viewing", &self.viewing)
            .field("locked", &self.locked)
            .field("local", &self.local)
            .finish()
    }
}
