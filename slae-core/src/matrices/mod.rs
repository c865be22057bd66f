//! Sparse matrix layouts understood by the solver engine.
//!
//! Each layout comes in two forms: a host-side container (plain `Vec`
//! storage, validation, reference multiply routines used by tests) and a
//! device-side counterpart holding GPU buffers and dispatching the layout's
//! compute kernels. Solvers only ever see the device side, through
//! [`SolverMatrix`] and, where a triangular split exists, [`TriangularSplit`].

mod diag;
mod msr;
mod sym_diag;

pub use diag::{DiagMatrix, DiagMatrixGpu};
pub use msr::{MsrMatrix, MsrMatrixGpu};
pub use sym_diag::{SymDiagMatrix, SymDiagMatrixGpu};

use crate::error::SlaeError;
use crate::vector::GpuVector;
use std::fmt::Debug;

/// Device-resident square sparse matrix usable by any solver. Operations
/// enqueue GPU work and return without host synchronization.
pub trait SolverMatrix: Debug {
    /// Matrix dimension (number of rows / columns).
    fn size(&self) -> usize;

    /// The main diagonal as a device vector. Solvers read it to build Jacobi
    /// preconditioners; they never write through it.
    fn di(&self) -> &GpuVector;

    /// `res = A * vec`.
    fn mul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError>;

    /// Returns the triangular-split view of this matrix when the layout
    /// supports one. Solvers that need triangular operations query this
    /// before allocating anything, so an unsupported layout fails fast
    /// instead of mid-iteration.
    fn halves(&self) -> Option<&dyn TriangularSplit> {
        None
    }
}

/// Triangular operations over the `A = L + D + U` split of a matrix.
/// The lower factor is `L + D`, the upper factor used by the forward
/// multiply is the strict `U`; both solves divide by the main diagonal.
pub trait TriangularSplit: SolverMatrix {
    /// `res = (L + D) * vec`.
    fn lmul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError>;

    /// `res = U * vec` (strict upper triangle, no diagonal).
    fn umul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError>;

    /// Solves `(L + D) x = f` in place: `x` holds `f` on entry and the
    /// solution on return.
    fn inv_lmul(&self, x: &mut GpuVector) -> Result<(), SlaeError>;

    /// Solves `(D + U) x = f` in place.
    fn inv_umul(&self, x: &mut GpuVector) -> Result<(), SlaeError>;
}

pub(crate) fn check_vec_size(
    matrix_size: usize,
    vec: &GpuVector,
    op: &str,
) -> Result<(), SlaeError> {
    if vec.size() != matrix_size {
        return Err(SlaeError::InvalidDimensions(format!(
            "{}: vector size {} does not match matrix size {}",
            op,
            vec.size(),
            matrix_size
        )));
    }
    Ok(())
}
