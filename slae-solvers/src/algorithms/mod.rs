use slae_core::{GpuDevice, Real, SlaeError, SolverMatrix};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

mod bicgstab;
mod cgm;
mod cgm_eisenstat;

pub use bicgstab::BiCgStab;
pub use cgm::Cgm;
pub use cgm_eisenstat::CgmEisenstat;

/// Outcome of a solve: the squared Euclidean norm of the true residual
/// `b - Ax` (recomputed from scratch after the iteration loop, never the
/// recurrence residual) and the number of iterations performed.
///
/// Reaching the iteration cap is not an error; callers inspect `residual`
/// to judge the answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    pub residual: Real,
    pub iterations: usize,
}

/// Cooperative cancellation handle. Cloning shares the flag; solvers check
/// it once per iteration and wind down normally when it is raised, returning
/// the stats accumulated so far.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// --- Algorithm Trait Definition ---
/// An iterative solver for `Ax = b` with reusable working storage.
///
/// The working vectors survive across calls: `allocate_temps` is idempotent
/// for a given dimension, and `solve` calls it implicitly, so a solver
/// instance can run a sequence of same-sized systems without reallocating
/// GPU memory.
pub trait IterativeSolver {
    /// Creates a solver with an iteration cap and a convergence threshold.
    /// The threshold applies to squared residual norms; its exact reading
    /// (absolute or relative) is algorithm-specific.
    fn new(max_iter: usize, eps: Real) -> Self
    where
        Self: Sized;

    /// Installs a cancellation token checked once per iteration.
    fn set_cancel_token(&mut self, token: CancelToken);

    /// Ensures the working vectors exist for dimension `n`. A no-op when the
    /// previous call used the same dimension.
    fn allocate_temps(&mut self, device: &GpuDevice, n: usize);

    /// Solves `Ax = b`. `x` carries the initial guess in and the solution
    /// out.
    fn solve(
        &mut self,
        device: &GpuDevice,
        matrix: &dyn SolverMatrix,
        b: &[Real],
        x: &mut [Real],
    ) -> impl std::future::Future<Output = Result<SolveStats, SlaeError>>;
}

/// Shared input validation: the matrix must match both vectors.
pub(crate) fn validate_inputs(
    matrix: &dyn SolverMatrix,
    b: &[Real],
    x: &[Real],
) -> Result<(), SlaeError> {
    let n = matrix.size();
    if b.len() != n {
        return Err(SlaeError::InvalidDimensions(format!(
            "RHS vector length ({}) must match matrix size ({})",
            b.len(),
            n
        )));
    }
    if x.len() != n {
        return Err(SlaeError::InvalidDimensions(format!(
            "Solution vector length ({}) must match matrix size ({})",
            x.len(),
            n
        )));
    }
    Ok(())
}
