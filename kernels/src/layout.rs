//! Column-major matrix views over borrowed buffers.
//!
//! Entry `(i, j)` lives at `data[i + j * ldim]`. The leading dimension may be
//! larger than the row count, which is how a sub-block of a bigger local
//! buffer is described without copying.

use crate::{KernelElem, KernelError, Result};

fn required_len(rows: usize, cols: usize, ldim: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        ldim * (cols - 1) + rows
    }
}

fn check(len: usize, rows: usize, cols: usize, ldim: usize) -> Result<()> {
    if ldim < rows.max(1) {
        return Err(KernelError::InvalidLeadingDimension { rows, ldim });
    }
    let required = required_len(rows, cols, ldim);
    if len < required {
        return Err(KernelError::BufferTooShort { len, required });
    }
    Ok(())
}

/// Immutable column-major view.
#[derive(Debug, Clone, Copy)]
pub struct MatRef<'a, T> {
    data: &'a [T],
    rows: usize,
    cols: usize,
    ldim: usize,
}

impl<'a, T: KernelElem> MatRef<'a, T> {
    pub fn new(data: &'a [T], rows: usize, cols: usize, ldim: usize) -> Result<Self> {
        check(data.len(), rows, cols, ldim)?;
        Ok(Self {
            data,
            rows,
            cols,
            ldim,
        })
    }

    /// A packed view (`ldim == max(rows, 1)`).
    pub fn packed(data: &'a [T], rows: usize, cols: usize) -> Result<Self> {
        Self::new(data, rows, cols, rows.max(1))
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ldim(&self) -> usize {
        self.ldim
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        self.data[i + j * self.ldim]
    }

    pub fn column(&self, j: usize) -> &'a [T] {
        // an empty window may be backed by an empty slice
        if self.rows == 0 {
            return &self.data[0..0];
        }
        let start = j * self.ldim;
        &self.data[start..start + self.rows]
    }

    /// Copies the view into a packed column-major vector.
    pub fn to_packed(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.rows * self.cols);
        for j in 0..self.cols {
            out.extend_from_slice(self.column(j));
        }
        out
    }
}

/// Mutable column-major view.
#[derive(Debug)]
pub struct MatMut<'a, T> {
    data: &'a mut [T],
    rows: usize,
    cols: usize,
    ldim: usize,
}

impl<'a, T: KernelElem> MatMut<'a, T> {
    pub fn new(data: &'a mut [T], rows: usize, cols: usize, ldim: usize) -> Result<Self> {
        check(data.len(), rows, cols, ldim)?;
        Ok(Self {
            data,
            rows,
            cols,
            ldim,
        })
    }

    pub fn packed(data: &'a mut [T], rows: usize, cols: usize) -> Result<Self> {
        Self::new(data, rows, cols, rows.max(1))
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ldim(&self) -> usize {
        self.ldim
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        self.data[i + j * self.ldim]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: T) {
        self.data[i + j * self.ldim] = value;
    }

    pub fn column_mut(&mut self, j: usize) -> &mut [T] {
        if self.rows == 0 {
            return &mut self.data[0..0];
        }
        let start = j * self.ldim;
        &mut self.data[start..start + self.rows]
    }

    pub fn as_mat_ref(&self) -> MatRef<'_, T> {
        MatRef {
            data: &*self.data,
            rows: self.rows,
            cols: self.cols,
            ldim: self.ldim,
        }
    }

    /// The raw buffer together with its leading dimension, used by kernels
    /// that split the storage into per-column chunks.
    pub(crate) fn raw_mut(&mut self) -> (&mut [T], usize) {
        (&mut *self.data, self.ldim)
    }
}
