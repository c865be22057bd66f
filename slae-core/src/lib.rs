//! # SLAE Solver Core Library
//!
//! GPU-resident data structures and compute primitives for iterative linear
//! solvers: device vectors, BLAS operations (dot/scale/axpy), and the sparse
//! matrix layouts (banded-diagonal, MSR, symmetric-diagonal) the solver
//! engine in `slae-solvers` operates against.

// Declare modules
pub mod device;
pub mod error;
pub mod matrices;
pub mod vector;

mod blas;
mod context;
mod kernel;

/// Build-wide real scalar type. Single precision by default; the `f64`
/// feature switches every buffer and shader in the system to double
/// precision (never a per-call choice).
#[cfg(not(feature = "f64"))]
pub type Real = f32;
#[cfg(feature = "f64")]
pub type Real = f64;

// Re-export public types
pub use blas::DotScratch;
pub use device::GpuDevice; // Export the main entry point
pub use error::SlaeError;
pub use matrices::{
    DiagMatrix, DiagMatrixGpu, MsrMatrix, MsrMatrixGpu, SolverMatrix, SymDiagMatrix,
    SymDiagMatrixGpu, TriangularSplit,
};
pub use vector::GpuVector;
