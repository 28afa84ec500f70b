//! # gridmat
//!
//! Distributed dense linear algebra over a two-dimensional process grid.
//!
//! A [`Grid`] arranges `p` processes as an `r x c` mesh and derives the
//! sub-communicators every distribution needs. A [`DistMatrix`] stores one
//! process's share of a global matrix under one of thirteen
//! [`Distribution`]s, and assigning one distributed matrix to another
//! redistributes it with the collectives of the [`Communicator`] it runs on.
//! The blocked algorithms in [`blas`] and [`norm`] are built from those
//! redistributions plus local kernels from `gridmat-kernels`.
//!
//! Programs are SPMD: every process runs the same code and enters the same
//! collectives in the same order. [`run_spmd`] simulates `p` processes with
//! one thread each.
//!
//! ## Example
//!
//! ```rust
//! use gridmat::{DistMatrix, Distribution, Grid, GridOrder, run_spmd};
//!
//! let results = run_spmd(4, |comm| -> gridmat::Result<Vec<f64>> {
//!     let grid = Grid::new(comm, GridOrder::ColumnMajor)?;
//!     let mut a = DistMatrix::<f64>::with_shape(&grid, Distribution::MC_MR, 3, 3)?;
//!     a.set_to_identity()?;
//!     // gathers the whole matrix on every process
//!     a.to_global()
//! });
//! for global in results {
//!     assert_eq!(global.unwrap(), vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
//! }
//! ```

pub mod blas;
pub mod comm;
pub mod config;
pub mod dist;
pub mod dist_matrix;
pub mod error;
pub mod grid;
pub mod matrix;
pub mod norm;
pub mod panel;
pub mod redist;
pub mod scalar;

pub use comm::{Communicator, ThreadComm, run_spmd};
pub use dist::{AxisLayout, Dist, Distribution};
pub use dist_matrix::DistMatrix;
pub use error::{Error, Result};
pub use grid::{Grid, GridOrder};
pub use matrix::LocalMatrix;
pub use panel::{Direction, Panel, PanelLoop};
pub use scalar::{RealScalar, Scalar};

pub use gridmat_kernels::{Orientation, Side, UnitOrNonUnit, UpperOrLower};
