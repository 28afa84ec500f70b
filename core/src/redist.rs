//! Redistribution between the thirteen distributions.
//!
//! Every conversion is decomposed into a short route of primitive steps:
//!
//! * **copy**: same distribution and alignments, purely local
//! * **filter**: the target is a refinement of the source, so every process
//!   already holds what it needs and drops the rest
//! * **gather**: one axis coarsens; the processes that together hold the
//!   coarser slice all-gather their pieces
//! * **permute**: the owners change but the replication pattern does not;
//!   a point-to-point all-to-all over the VC communicator
//! * **via**: go through an intermediate distribution
//!
//! When an alignment requirement cannot be met (the target is a view or its
//! alignments are pinned) the route runs into a freely aligned temporary and
//! finishes with an all-to-all exchange.

use crate::comm::Communicator;
use crate::dist::{Dist, Distribution};
use crate::dist_matrix::DistMatrix;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::Scalar;
use tracing::trace;

/// Upper bound on nested intermediate steps. The longest real route has
/// four.
const MAX_ROUTE_DEPTH: usize = 8;

/// Matrix axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// The column index (rows of the matrix).
    Col,
    /// The row index (columns of the matrix).
    Row,
}

/// First step of a redistribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Copy,
    Filter,
    Gather(Axis),
    Permute,
    Via(Distribution),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Same,
    Refine,
    Coarsen,
    Other,
}

fn relation(src: Dist, dst: Dist) -> Relation {
    if src == dst {
        Relation::Same
    } else if dst.refines(src) {
        Relation::Refine
    } else if src.refines(dst) {
        Relation::Coarsen
    } else {
        Relation::Other
    }
}

fn is_permutation(src: Distribution, dst: Distribution) -> bool {
    use Distribution as D;
    matches!(
        (src, dst),
        (D::MC_MR, D::MR_MC)
            | (D::MR_MC, D::MC_MR)
            | (D::VC_STAR, D::VR_STAR)
            | (D::VR_STAR, D::VC_STAR)
            | (D::STAR_VC, D::STAR_VR)
            | (D::STAR_VR, D::STAR_VC)
    )
}

/// Intermediate axis for moving a single axis between unrelated
/// distributions.
fn vector_step(src: Dist, dst: Dist) -> Option<Dist> {
    match (src, dst) {
        (Dist::MC, Dist::MR) | (Dist::MC, Dist::VR) => Some(Dist::VC),
        (Dist::VC, Dist::MR) => Some(Dist::VR),
        (Dist::MR, Dist::MC) | (Dist::MR, Dist::VC) => Some(Dist::VR),
        (Dist::VR, Dist::MC) => Some(Dist::VC),
        _ => None,
    }
}

fn legal(col: Dist, row: Dist) -> Option<Distribution> {
    Distribution::new(col, row).ok()
}

/// First step from `src` to `dst`.
pub fn plan(src: Distribution, dst: Distribution) -> Route {
    use Relation::*;
    if src == dst {
        return Route::Copy;
    }
    let col = relation(src.col, dst.col);
    let row = relation(src.row, dst.row);
    let keeps = |r: Relation| matches!(r, Same | Refine);
    if keeps(col) && keeps(row) {
        return Route::Filter;
    }
    match (col, row) {
        (Coarsen, Same) => return Route::Gather(Axis::Col),
        (Same, Coarsen) => return Route::Gather(Axis::Row),
        _ => {}
    }
    if is_permutation(src, dst) {
        return Route::Permute;
    }
    if col == Coarsen {
        if let Some(mid) = legal(dst.col, src.row) {
            return Route::Via(mid);
        }
    }
    if row == Coarsen {
        if let Some(mid) = legal(src.col, dst.row) {
            return Route::Via(mid);
        }
    }
    if col == Other && keeps(row) {
        if let Some(mid) = vector_step(src.col, dst.col).and_then(|step| legal(step, src.row)) {
            return Route::Via(mid);
        }
    }
    if row == Other && keeps(col) {
        if let Some(mid) = vector_step(src.row, dst.row).and_then(|step| legal(src.col, step)) {
            return Route::Via(mid);
        }
    }
    Route::Via(Distribution::STAR_STAR)
}

/// A sub-communicator of the grid together with the grid position of each
/// of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Team {
    /// `mc_comm`: this process's grid column.
    ProcessColumn,
    /// `mr_comm`: this process's grid row.
    ProcessRow,
    /// `vc_comm`
    ColumnMajor,
    /// `vr_comm`
    RowMajor,
    /// `md_comm`: this process's diagonal path.
    Diagonal,
}

impl Team {
    fn over(dist: Dist) -> Option<Team> {
        match dist {
            Dist::MC => Some(Team::ProcessColumn),
            Dist::MR => Some(Team::ProcessRow),
            Dist::VC => Some(Team::ColumnMajor),
            Dist::VR => Some(Team::RowMajor),
            Dist::MD => Some(Team::Diagonal),
            Dist::Star => None,
        }
    }

    fn comm<C: Communicator>(self, grid: &Grid<C>) -> &C {
        match self {
            Team::ProcessColumn => grid.mc_comm(),
            Team::ProcessRow => grid.mr_comm(),
            Team::ColumnMajor => grid.vc_comm(),
            Team::RowMajor => grid.vr_comm(),
            Team::Diagonal => grid.md_comm(),
        }
    }

    fn member<C: Communicator>(self, grid: &Grid<C>, q: usize) -> (usize, usize) {
        match self {
            Team::ProcessColumn => (q, grid.col()),
            Team::ProcessRow => (grid.row(), q),
            Team::ColumnMajor => grid.coords_of_vc(q),
            Team::RowMajor => grid.coords_of_vr(q),
            Team::Diagonal => {
                let path = grid.diag_path(grid.vc_rank());
                grid.coords_of_vc(grid.diag_vc(path, q))
            }
        }
    }
}

/// Whether an axis aligned at `src_align` under `src` already lines up with
/// one aligned at `dst_align` under `dst`, so that no exchange is needed.
fn axis_aligned<C: Communicator>(src: Dist, src_align: usize, dst: Dist, dst_align: usize, grid: &Grid<C>) -> bool {
    match (src, dst) {
        (Dist::Star, _) | (_, Dist::Star) => true,
        (s, d) if s == d => src_align == dst_align,
        (Dist::MC, Dist::VC) | (Dist::VC, Dist::MC) => {
            let (mc, vc) = if src == Dist::MC { (src_align, dst_align) } else { (dst_align, src_align) };
            vc % grid.height() == mc
        }
        (Dist::MR, Dist::VR) | (Dist::VR, Dist::MR) => {
            let (mr, vr) = if src == Dist::MR { (src_align, dst_align) } else { (dst_align, src_align) };
            vr % grid.width() == mr
        }
        _ => false,
    }
}

fn aligned<T: Scalar, C: Communicator>(src: &DistMatrix<'_, T, C>, dst: &DistMatrix<'_, T, C>) -> bool {
    let grid = src.grid;
    axis_aligned(src.dist.col, src.col_align, dst.dist.col, dst.col_align, grid)
        && axis_aligned(src.dist.row, src.row_align, dst.dist.row, dst.row_align, grid)
}

/// Gives `dst` the shape of `src` and, on unconstrained axes, an alignment
/// compatible with `src` (same axis first, then the other one).
fn prepare_target<T: Scalar, C: Communicator>(
    op: &'static str,
    src: &DistMatrix<'_, T, C>,
    dst: &mut DistMatrix<'_, T, C>,
) -> Result<()> {
    if dst.viewing {
        if dst.height != src.height || dst.width != src.width {
            return Err(Error::logic(
                op,
                format!(
                    "{}x{} view cannot hold a {}x{} matrix",
                    dst.height, dst.width, src.height, src.width
                ),
            ));
        }
        return Ok(());
    }
    let grid = src.grid;
    let pick = |target: Dist, same: (Dist, usize), other: (Dist, usize)| {
        target
            .compatible_alignment(same.0, same.1, grid)
            .or_else(|| target.compatible_alignment(other.0, other.1, grid))
            .unwrap_or(0)
    };
    let src_col = (src.dist.col, src.col_align);
    let src_row = (src.dist.row, src.row_align);
    if !dst.col_constrained {
        dst.col_align = pick(dst.dist.col, src_col, src_row);
    }
    if !dst.row_constrained {
        dst.row_align = pick(dst.dist.row, src_row, src_col);
    }
    dst.height = src.height;
    dst.width = src.width;
    let local_height = dst.col_layout().local_length(dst.height);
    let local_width = dst.row_layout().local_length(dst.width);
    dst.local.resize(local_height, local_width)
}

/// `dst := src` in `dst`'s distribution.
pub(crate) fn redistribute<T: Scalar, C: Communicator>(
    src: &DistMatrix<'_, T, C>,
    dst: &mut DistMatrix<'_, T, C>,
) -> Result<()> {
    run(src, dst, 0)
}

fn run<T: Scalar, C: Communicator>(
    src: &DistMatrix<'_, T, C>,
    dst: &mut DistMatrix<'_, T, C>,
    depth: usize,
) -> Result<()> {
    let op = "redistribute";
    if depth > MAX_ROUTE_DEPTH {
        return Err(Error::logic(
            op,
            format!("no route from {} to {}", src.dist, dst.dist),
        ));
    }
    prepare_target(op, src, dst)?;
    let route = plan(src.dist, dst.dist);
    trace!(from = %src.dist, to = %dst.dist, ?route, depth, "redistribution step");
    let grid = src.grid;
    match route {
        Route::Copy if aligned(src, dst) => {
            let data = src.local.to_packed()?;
            dst.local.fill_from_packed(&data)
        }
        Route::Copy | Route::Permute => exchange(src, dst),
        Route::Filter | Route::Gather(_) if !aligned(src, dst) => {
            let mut tmp = DistMatrix::new(grid, dst.dist)?;
            run(src, &mut tmp, depth + 1)?;
            exchange(&tmp, dst)
        }
        Route::Filter => filter(src, dst),
        Route::Gather(axis) => gather(src, dst, axis),
        Route::Via(mid) => {
            let mut tmp = DistMatrix::new(grid, mid)?;
            run(src, &mut tmp, depth + 1)?;
            run(&tmp, dst, depth + 1)
        }
    }
}

/// Keeps the entries of the local block that `dst` owns here.
fn filter<T: Scalar, C: Communicator>(src: &DistMatrix<'_, T, C>, dst: &mut DistMatrix<'_, T, C>) -> Result<()> {
    let data = src.local.to_packed()?;
    let (src_col, src_row) = (src.col_layout(), src.row_layout());
    let src_height = src.local_height();
    let (dst_col, dst_row) = (dst.col_layout(), dst.row_layout());
    let (local_height, local_width) = (dst.local_height(), dst.local_width());
    let mut out = Vec::with_capacity(local_height * local_width);
    for lj in 0..local_width {
        let sj = src_row.local_index(dst_row.global_index(lj));
        for li in 0..local_height {
            let si = src_col.local_index(dst_col.global_index(li));
            out.push(data[si + sj * src_height]);
        }
    }
    dst.local.fill_from_packed(&out)
}

/// Scatters one team member's packed local block into `out`, the packed
/// local block of `dst`.
fn unpack_member<T: Scalar, C: Communicator>(
    src: &DistMatrix<'_, T, C>,
    dst: &DistMatrix<'_, T, C>,
    member: (usize, usize),
    block: &[T],
    out: &mut [T],
) -> Result<()> {
    let (row, col) = member;
    let (src_col, src_row) = (src.col_layout_at(row, col), src.row_layout_at(row, col));
    let member_height = src_col.local_length(src.height);
    let member_width = src_row.local_length(src.width);
    if block.len() != member_height * member_width {
        return Err(Error::logic(
            "redistribute",
            format!(
                "block from ({}, {}) holds {} entries, expected {}",
                row,
                col,
                block.len(),
                member_height * member_width
            ),
        ));
    }
    let (dst_col, dst_row) = (dst.col_layout(), dst.row_layout());
    let local_height = dst.local_height();
    for lj in 0..member_width {
        let j = src_row.global_index(lj);
        if !dst_row.owns(j) {
            continue;
        }
        let dj = dst_row.local_index(j);
        for li in 0..member_height {
            let i = src_col.global_index(li);
            if dst_col.owns(i) {
                out[dst_col.local_index(i) + dj * local_height] = block[li + lj * member_height];
            }
        }
    }
    Ok(())
}

fn gather<T: Scalar, C: Communicator>(
    src: &DistMatrix<'_, T, C>,
    dst: &mut DistMatrix<'_, T, C>,
    axis: Axis,
) -> Result<()> {
    let (from, to, align) = match axis {
        Axis::Col => (src.dist.col, dst.dist.col, src.col_align),
        Axis::Row => (src.dist.row, dst.dist.row, src.row_align),
    };
    let team = match (from, to) {
        (Dist::MD, Dist::Star) => return gather_diagonal(src, dst, align),
        (from, Dist::Star) => Team::over(from),
        (Dist::VC, Dist::MC) => Some(Team::ProcessRow),
        (Dist::VR, Dist::MR) => Some(Team::ProcessColumn),
        _ => None,
    };
    let team = team.ok_or_else(|| {
        Error::logic(
            "redistribute",
            format!("cannot gather a {} axis into {}", from, to),
        )
    })?;
    let grid = src.grid;
    let blocks = team.comm(grid).all_gather(&src.local.to_packed()?)?;
    let mut out = vec![T::zero(); dst.local_height() * dst.local_width()];
    for (q, block) in blocks.iter().enumerate() {
        unpack_member(src, dst, team.member(grid, q), block, &mut out)?;
    }
    dst.local.fill_from_packed(&out)
}

/// `MD -> *`: the processes on the source's diagonal path gather the axis,
/// then each broadcasts the result to the processes off the path.
fn gather_diagonal<T: Scalar, C: Communicator>(
    src: &DistMatrix<'_, T, C>,
    dst: &mut DistMatrix<'_, T, C>,
    align: usize,
) -> Result<()> {
    let grid = src.grid;
    let path = grid.diag_path(align);
    let mut out = vec![T::zero(); dst.local_height() * dst.local_width()];
    if grid.diag_path(grid.vc_rank()) == path {
        let blocks = grid.md_comm().all_gather(&src.local.to_packed()?)?;
        for (q, block) in blocks.iter().enumerate() {
            unpack_member(src, dst, Team::Diagonal.member(grid, q), block, &mut out)?;
        }
    }
    grid.md_perp_comm().broadcast(&mut out, path)?;
    dst.local.fill_from_packed(&out)
}

/// General all-to-all over the VC communicator: each primary holder of an
/// entry sends it to every process that owns it under `dst`.
fn exchange<T: Scalar, C: Communicator>(src: &DistMatrix<'_, T, C>, dst: &mut DistMatrix<'_, T, C>) -> Result<()> {
    let grid = src.grid;
    let (height, width) = (src.height, src.width);
    let data = src.local.to_packed()?;
    let (src_col, src_row) = (src.col_layout(), src.row_layout());
    let src_height = src.local_height();
    let sending = src.dist.is_primary(grid.row(), grid.col());

    let blocks = (0..grid.size())
        .map(|q| {
            if !sending {
                return Vec::new();
            }
            let (row, col) = grid.coords_of_vc(q);
            let (dst_col, dst_row) = (dst.col_layout_at(row, col), dst.row_layout_at(row, col));
            let rows: Vec<usize> = src_col.owned(height).filter(|&i| dst_col.owns(i)).collect();
            let mut block = Vec::new();
            for j in src_row.owned(width).filter(|&j| dst_row.owns(j)) {
                let sj = src_row.local_index(j);
                block.extend(rows.iter().map(|&i| data[src_col.local_index(i) + sj * src_height]));
            }
            block
        })
        .collect();
    let received = grid.vc_comm().all_to_all(blocks)?;

    let (dst_col, dst_row) = (dst.col_layout(), dst.row_layout());
    let local_height = dst.local_height();
    let mut out = vec![T::zero(); local_height * dst.local_width()];
    for (q, block) in received.iter().enumerate() {
        let (row, col) = grid.coords_of_vc(q);
        if !src.dist.is_primary(row, col) {
            continue;
        }
        let (from_col, from_row) = (src.col_layout_at(row, col), src.row_layout_at(row, col));
        let rows: Vec<usize> = from_col.owned(height).filter(|&i| dst_col.owns(i)).collect();
        let cols: Vec<usize> = from_row.owned(width).filter(|&j| dst_row.owns(j)).collect();
        if block.len() != rows.len() * cols.len() {
            return Err(Error::logic(
                "redistribute",
                format!(
                    "process {} sent {} entries, expected {}",
                    q,
                    block.len(),
                    rows.len() * cols.len()
                ),
            ));
        }
        let mut values = block.iter();
        for &j in &cols {
            let dj = dst_row.local_index(j);
            for (&i, &value) in rows.iter().zip(values.by_ref()) {
                out[dst_col.local_index(i) + dj * local_height] = value;
            }
        }
    }
    dst.local.fill_from_packed(&out)
}

/// Sums `src` over the processes that replicate it and scatters the result
/// into `dst`; with `accumulate` the result is added to `dst` scaled by
/// `alpha`.
pub(crate) fn sum_scatter<T: Scalar, C: Communicator>(
    src: &DistMatrix<'_, T, C>,
    dst: &mut DistMatrix<'_, T, C>,
    alpha: T,
    accumulate: bool,
) -> Result<()> {
    let op = if accumulate {
        "DistMatrix::sum_scatter_update"
    } else {
        "DistMatrix::sum_scatter_from"
    };
    dst.check_same_grid(op, src.grid)?;
    if dst.locked {
        return Err(Error::logic(op, "cannot modify a locked view"));
    }
    if !(dst.dist.col.refines(src.dist.col) && dst.dist.row.refines(src.dist.row)) {
        return Err(Error::logic(
            op,
            format!("{} cannot be sum-scattered into {}", src.dist, dst.dist),
        ));
    }
    let team = match (src.dist.uses_row(), src.dist.uses_col()) {
        (true, false) => Team::ProcessRow,
        (false, true) => Team::ProcessColumn,
        (false, false) => Team::ColumnMajor,
        (true, true) => {
            return Err(Error::logic(
                op,
                format!("{} is not replicated over any grid axis", src.dist),
            ));
        }
    };
    if accumulate {
        if dst.height != src.height || dst.width != src.width {
            return Err(Error::logic(
                op,
                format!(
                    "cannot add a {}x{} sum into a {}x{} matrix",
                    src.height, src.width, dst.height, dst.width
                ),
            ));
        }
    } else {
        prepare_target(op, src, dst)?;
    }

    let grid = src.grid;
    if !aligned(src, dst) {
        let mut tmp = DistMatrix::new(grid, dst.dist)?;
        sum_scatter(src, &mut tmp, T::one(), false)?;
        let mut realigned =
            DistMatrix::aligned(grid, dst.dist, dst.height, dst.width, dst.col_align, dst.row_align)?;
        exchange(&tmp, &mut realigned)?;
        return combine(op, dst, realigned.local.to_packed()?, alpha, accumulate);
    }
    trace!(from = %src.dist, to = %dst.dist, ?team, "sum-scatter");

    let data = src.local.to_packed()?;
    let (src_col, src_row) = (src.col_layout(), src.row_layout());
    let src_height = src.local_height();
    let comm = team.comm(grid);
    let blocks = (0..comm.size())
        .map(|q| {
            let (row, col) = team.member(grid, q);
            let (dst_col, dst_row) = (dst.col_layout_at(row, col), dst.row_layout_at(row, col));
            let mut block = Vec::new();
            for j in dst_row.owned(src.width) {
                let sj = src_row.local_index(j);
                block.extend(dst_col.owned(src.height).map(|i| data[src_col.local_index(i) + sj * src_height]));
            }
            block
        })
        .collect();
    let summed = comm.reduce_scatter_sum(blocks)?;
    combine(op, dst, summed, alpha, accumulate)
}

fn combine<T: Scalar, C: Communicator>(
    op: &'static str,
    dst: &mut DistMatrix<'_, T, C>,
    summed: Vec<T>,
    alpha: T,
    accumulate: bool,
) -> Result<()> {
    let expected = dst.local_height() * dst.local_width();
    if summed.len() != expected {
        return Err(Error::logic(
            op,
            format!("reduced block holds {} entries, expected {}", summed.len(), expected),
        ));
    }
    let data = if accumulate {
        let mut current = dst.local.to_packed()?;
        for (c, s) in current.iter_mut().zip(summed) {
            *c += alpha * s;
        }
        current
    } else {
        summed.into_iter().map(|s| alpha * s).collect()
    };
    dst.local.fill_from_packed(&data)
}
