//! `slae-solvers`: preconditioned Krylov-subspace solvers for sparse linear
//! systems `Ax = b`, running their iteration kernels on the GPU through
//! `slae-core`.
//!
//! Three algorithms are provided: BiCGSTAB for general systems, a
//! Jacobi-preconditioned conjugate gradient for symmetric positive-definite
//! systems, and an Eisenstat-accelerated conjugate gradient for layouts that
//! expose a triangular split.

pub mod algorithms;

pub use algorithms::{BiCgStab, CancelToken, Cgm, CgmEisenstat, IterativeSolver, SolveStats};

// Re-export the core types callers need to assemble a system.
pub use slae_core::{
    DiagMatrix, DiagMatrixGpu, DotScratch, GpuDevice, GpuVector, MsrMatrix, MsrMatrixGpu, Real,
    SlaeError, SolverMatrix, SymDiagMatrix, SymDiagMatrixGpu, TriangularSplit,
};
