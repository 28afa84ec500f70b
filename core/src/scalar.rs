use gridmat_kernels::{KernelElem, KernelReal};

/// Element type of a distributed matrix.
///
/// Same numeric bounds as the local kernels, plus `'static` so values can
/// travel between processes as type-erased messages.
pub trait Scalar: KernelElem + 'static {}

impl<T> Scalar for T where T: KernelElem + 'static {}

/// Real floating-point scalars, required by norms and solvers.
pub trait RealScalar: Scalar + KernelReal {}

impl<T> RealScalar for T where T: Scalar + KernelReal {}
