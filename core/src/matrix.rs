//! Per-process dense storage.
//!
//! A [`LocalMatrix`] is a column-major window `(offset, height, width, ldim)`
//! into a buffer shared through `Rc<RefCell<_>>`. Views alias their owner's
//! buffer, so writes through a view are visible in the owner. Locked views
//! refuse every mutation.

use crate::Scalar;
use crate::error::{Error, Result};
use gridmat_kernels::{
    self as kernels, MatMut, MatRef, Orientation, Side, UnitOrNonUnit, UpperOrLower,
};
use std::cell::RefCell;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

pub struct LocalMatrix<T> {
    buffer: Rc<RefCell<Vec<T>>>,
    offset: usize,
    height: usize,
    width: usize,
    ldim: usize,
    viewing: bool,
    locked: bool,
}

impl<T: Scalar> LocalMatrix<T> {
    /// Zero-filled `height x width` matrix with a packed leading dimension.
    pub fn new(height: usize, width: usize) -> Self {
        let ldim = height.max(1);
        Self {
            buffer: Rc::new(RefCell::new(vec![T::zero(); ldim * width])),
            offset: 0,
            height,
            width,
            ldim,
            viewing: false,
            locked: false,
        }
    }

    /// Wraps packed column-major data.
    pub fn from_vec(data: Vec<T>, height: usize, width: usize) -> Result<Self> {
        if data.len() != height * width {
            return Err(Error::argument(
                "LocalMatrix::from_vec",
                format!("{} values for a {}x{} matrix", data.len(), height, width),
            ));
        }
        let mut m = Self::new(height, width);
        m.fill_from_packed(&data)?;
        Ok(m)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn ldim(&self) -> usize {
        self.ldim
    }

    pub fn is_view(&self) -> bool {
        self.viewing
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Whether `self` and `other` alias the same buffer.
    pub fn shares_storage(&self, other: &LocalMatrix<T>) -> bool {
        Rc::ptr_eq(&self.buffer, &other.buffer)
    }

    fn span(&self) -> Range<usize> {
        if self.height == 0 || self.width == 0 {
            0..0
        } else {
            self.offset..self.offset + self.ldim * (self.width - 1) + self.height
        }
    }

    fn check_index(&self, op: &'static str, i: usize, j: usize) -> Result<()> {
        if i >= self.height || j >= self.width {
            return Err(Error::out_of_bounds(
                op,
                format!("({}, {}) outside a {}x{} local matrix", i, j, self.height, self.width),
            ));
        }
        Ok(())
    }

    fn check_unlocked(&self, op: &'static str) -> Result<()> {
        if self.locked {
            return Err(Error::logic(op, "cannot modify a locked view"));
        }
        Ok(())
    }

    pub fn get(&self, i: usize, j: usize) -> Result<T> {
        self.check_index("LocalMatrix::get", i, j)?;
        Ok(self.buffer.borrow()[self.offset + i + j * self.ldim])
    }

    pub fn set(&mut self, i: usize, j: usize, value: T) -> Result<()> {
        self.check_unlocked("LocalMatrix::set")?;
        self.check_index("LocalMatrix::set", i, j)?;
        self.buffer.borrow_mut()[self.offset + i + j * self.ldim] = value;
        Ok(())
    }

    pub fn update(&mut self, i: usize, j: usize, value: T) -> Result<()> {
        self.check_unlocked("LocalMatrix::update")?;
        self.check_index("LocalMatrix::update", i, j)?;
        self.buffer.borrow_mut()[self.offset + i + j * self.ldim] += value;
        Ok(())
    }

    /// Runs `f` on an immutable kernel view of the window.
    pub fn with_ref<R>(&self, f: impl FnOnce(MatRef<'_, T>) -> R) -> Result<R> {
        let buffer = self
            .buffer
            .try_borrow()
            .map_err(|_| Error::logic("LocalMatrix::with_ref", "storage is being written"))?;
        let view = MatRef::new(&buffer[self.span()], self.height, self.width, self.ldim)?;
        Ok(f(view))
    }

    /// Runs `f` on a mutable kernel view of the window.
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut MatMut<'_, T>) -> R) -> Result<R> {
        self.check_unlocked("LocalMatrix::with_mut")?;
        let span = self.span();
        let mut buffer = self
            .buffer
            .try_borrow_mut()
            .map_err(|_| Error::logic("LocalMatrix::with_mut", "storage is already borrowed"))?;
        let mut view = MatMut::new(&mut buffer[span], self.height, self.width, self.ldim)?;
        Ok(f(&mut view))
    }

    /// Packed column-major copy of the window.
    pub fn to_packed(&self) -> Result<Vec<T>> {
        self.with_ref(|m| m.to_packed())
    }

    /// Overwrites the window from packed column-major data.
    pub fn fill_from_packed(&mut self, data: &[T]) -> Result<()> {
        let (height, width) = (self.height, self.width);
        if data.len() != height * width {
            return Err(Error::logic(
                "LocalMatrix::fill_from_packed",
                format!("{} values for a {}x{} window", data.len(), height, width),
            ));
        }
        self.with_mut(|m| {
            for j in 0..width {
                m.column_mut(j)
                    .copy_from_slice(&data[j * height..(j + 1) * height]);
            }
        })
    }

    pub fn fill(&mut self, value: T) -> Result<()> {
        self.with_mut(|m| {
            for j in 0..m.cols() {
                m.column_mut(j).fill(value);
            }
        })
    }

    pub fn set_to_zero(&mut self) -> Result<()> {
        self.fill(T::zero())
    }

    /// Reallocates to a zero-filled `height x width` buffer.
    pub fn resize(&mut self, height: usize, width: usize) -> Result<()> {
        if self.viewing {
            return Err(Error::logic("LocalMatrix::resize", "cannot resize a view"));
        }
        if height == self.height && width == self.width {
            return Ok(());
        }
        *self = Self::new(height, width);
        Ok(())
    }

    fn make_view(&self, op: &'static str, i: usize, j: usize, height: usize, width: usize, locked: bool) -> Result<Self> {
        if i + height > self.height || j + width > self.width {
            return Err(Error::out_of_bounds(
                op,
                format!(
                    "{}x{} window at ({}, {}) exceeds a {}x{} matrix",
                    height, width, i, j, self.height, self.width
                ),
            ));
        }
        Ok(Self {
            buffer: Rc::clone(&self.buffer),
            offset: self.offset + i + j * self.ldim,
            height,
            width,
            ldim: self.ldim,
            viewing: true,
            locked,
        })
    }

    /// Mutable window sharing this matrix's storage.
    pub fn view(&mut self, i: usize, j: usize, height: usize, width: usize) -> Result<Self> {
        self.make_view("LocalMatrix::view", i, j, height, width, self.locked)
    }

    /// Read-only window sharing this matrix's storage.
    pub fn locked_view(&self, i: usize, j: usize, height: usize, width: usize) -> Result<Self> {
        self.make_view("LocalMatrix::locked_view", i, j, height, width, true)
    }

    /// Owned deep copy of the window.
    pub fn duplicate(&self) -> Result<Self> {
        Self::from_vec(self.to_packed()?, self.height, self.width)
    }

    /// Packed transpose.
    pub fn transpose(&self) -> Result<Self> {
        let data = self.with_ref(kernels::transpose)?;
        Self::from_vec(data, self.width, self.height)
    }

    pub fn scale(&mut self, alpha: T) -> Result<()> {
        self.with_mut(|m| kernels::scal(alpha, m))
    }

    /// `self := alpha x + self`
    pub fn axpy(&mut self, alpha: T, x: &LocalMatrix<T>) -> Result<()> {
        let packed = x.to_packed()?;
        let x = MatRef::packed(&packed, x.height, x.width)?;
        self.with_mut(|y| kernels::axpy(alpha, x, y))??;
        Ok(())
    }

    /// `self := alpha op(A) op(B) + beta self`
    pub fn gemm(
        &mut self,
        orient_a: Orientation,
        orient_b: Orientation,
        alpha: T,
        a: &LocalMatrix<T>,
        b: &LocalMatrix<T>,
        beta: T,
    ) -> Result<()> {
        let a_data = a.to_packed()?;
        let b_data = b.to_packed()?;
        let a = MatRef::packed(&a_data, a.height, a.width)?;
        let b = MatRef::packed(&b_data, b.height, b.width)?;
        self.with_mut(|c| kernels::gemm(orient_a, orient_b, alpha, a, b, beta, c))??;
        Ok(())
    }

    /// Triangular solve against the square matrix `a`, in place.
    pub fn trsm(
        &mut self,
        side: Side,
        uplo: UpperOrLower,
        orient: Orientation,
        diag: UnitOrNonUnit,
        alpha: T,
        a: &LocalMatrix<T>,
    ) -> Result<()> {
        let a_data = a.to_packed()?;
        let a = MatRef::packed(&a_data, a.height, a.width)?;
        self.with_mut(|b| kernels::trsm(side, uplo, orient, diag, alpha, a, b))??;
        Ok(())
    }

    /// Triangular multiply by the square matrix `a`, in place.
    pub fn trmm(
        &mut self,
        side: Side,
        uplo: UpperOrLower,
        orient: Orientation,
        diag: UnitOrNonUnit,
        alpha: T,
        a: &LocalMatrix<T>,
    ) -> Result<()> {
        let a_data = a.to_packed()?;
        let a = MatRef::packed(&a_data, a.height, a.width)?;
        self.with_mut(|b| kernels::trmm(side, uplo, orient, diag, alpha, a, b))??;
        Ok(())
    }
}

impl<T: Scalar> fmt::Debug for LocalMatrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMatrix")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("ldim", &self.ldim)
            .field("viewing", &self.viewing)
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LocalMatrix<f64> {
        // [1 4 7; 2 5 8; 3 6 9]
        LocalMatrix::from_vec((1..=9).map(f64::from).collect(), 3, 3).unwrap()
    }

    #[test]
    fn test_new_is_zero() {
        let m = LocalMatrix::<f32>::new(2, 3);
        assert_eq!(m.ldim(), 2);
        assert_eq!(m.to_packed().unwrap(), vec![0.0; 6]);

        let empty = LocalMatrix::<f32>::new(0, 4);
        assert_eq!(empty.ldim(), 1);
        assert!(empty.to_packed().unwrap().is_empty());
    }

    #[test]
    fn test_from_vec_length_checked() {
        let err = LocalMatrix::from_vec(vec![1.0; 5], 2, 3).unwrap_err();
        assert!(matches!(err, Error::Argument { .. }));
    }

    #[test]
    fn test_view_aliases_owner() {
        let mut m = sample();
        let mut v = m.view(1, 1, 2, 2).unwrap();
        assert_eq!(v.get(0, 0).unwrap(), 5.0);
        assert_eq!(v.to_packed().unwrap(), vec![5.0, 6.0, 8.0, 9.0]);

        v.set(1, 1, -1.0).unwrap();
        assert_eq!(m.get(2, 2).unwrap(), -1.0);
        assert!(v.shares_storage(&m));
    }

    #[test]
    fn test_locked_view_rejects_writes() {
        let m = sample();
        let mut v = m.locked_view(0, 0, 2, 2).unwrap();
        assert!(matches!(v.set(0, 0, 1.0), Err(Error::Logic { .. })));
        assert!(matches!(v.scale(2.0), Err(Error::Logic { .. })));

        // Views of a locked view stay locked
        let mut inner = v.view(0, 0, 1, 1).unwrap();
        assert!(inner.is_locked());
        assert!(inner.set(0, 0, 3.0).is_err());
    }

    #[test]
    fn test_view_cannot_resize() {
        let mut m = sample();
        let mut v = m.view(0, 0, 1, 1).unwrap();
        assert!(matches!(v.resize(2, 2), Err(Error::Logic { .. })));
        m.resize(4, 1).unwrap();
        assert_eq!((m.height(), m.width()), (4, 1));
        // The old view keeps the previous buffer alive
        assert_eq!(v.get(0, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_view_bounds() {
        let mut m = sample();
        assert!(matches!(m.view(2, 0, 2, 1), Err(Error::OutOfBounds { .. })));
        // Empty windows at the far corner are fine
        let v = m.view(3, 3, 0, 0).unwrap();
        assert!(v.to_packed().unwrap().is_empty());
        assert!(matches!(m.get(3, 0), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn test_transpose_and_gemm() {
        let m = sample();
        let t = m.transpose().unwrap();
        assert_eq!(t.get(0, 2).unwrap(), 3.0);

        // m * m^T diagonal entries are the squared row norms
        let mut c = LocalMatrix::new(3, 3);
        c.gemm(Orientation::Normal, Orientation::Transpose, 1.0, &m, &m, 0.0)
            .unwrap();
        assert_eq!(c.get(0, 0).unwrap(), 1.0 + 16.0 + 49.0);
        assert_eq!(c.get(2, 2).unwrap(), 9.0 + 36.0 + 81.0);
    }

    #[test]
    fn test_gemm_into_view_reads_same_buffer() {
        // Inputs and output share one buffer; inputs are copied first
        let mut m = sample();
        let a = m.locked_view(0, 0, 1, 1).unwrap();
        let mut out = m.view(2, 2, 1, 1).unwrap();
        out.gemm(Orientation::Normal, Orientation::Normal, 2.0, &a, &a, 1.0)
            .unwrap();
        assert_eq!(m.get(2, 2).unwrap(), 9.0 + 2.0);
    }

    #[test]
    fn test_trsm_in_place() {
        // L = [2 0; 1 1], solve L x = [4; 5]
        let l = LocalMatrix::from_vec(vec![2.0, 1.0, 0.0, 1.0], 2, 2).unwrap();
        let mut x = LocalMatrix::from_vec(vec![4.0, 5.0], 2, 1).unwrap();
        x.trsm(
            Side::Left,
            UpperOrLower::Lower,
            Orientation::Normal,
            UnitOrNonUnit::NonUnit,
            1.0,
            &l,
        )
        .unwrap();
        assert_eq!(x.to_packed().unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_axpy_shape_mismatch() {
        let mut y = LocalMatrix::<f64>::new(2, 2);
        let x = LocalMatrix::new(2, 1);
        assert!(matches!(y.axpy(1.0, &x), Err(Error::Logic { .. })));
    }
}
