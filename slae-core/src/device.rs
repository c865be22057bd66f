use crate::blas::{self, DotScratch, DOT_GROUPS};
use crate::context::GpuContext;
use crate::error::SlaeError;
use crate::matrices::{
    DiagMatrix, DiagMatrixGpu, MsrMatrix, MsrMatrixGpu, SymDiagMatrix, SymDiagMatrixGpu,
};
use crate::vector::GpuVector;
use crate::Real;
use std::mem;
use std::sync::Arc;

/// Usage flags for every solver-owned vector: bindable as a storage buffer,
/// writable from the host, and readable back.
const VECTOR_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_DST)
    .union(wgpu::BufferUsages::COPY_SRC);

/// Entry point for GPU-accelerated linear algebra. Owns the device context
/// (adapter, queue, kernel cache) and hands out vectors, matrices and scratch
/// buffers tied to it. Create one per logical device; independent instances
/// are fully isolated.
#[derive(Debug)]
pub struct GpuDevice {
    pub(crate) context: Arc<GpuContext>,
}

impl GpuDevice {
    /// Initializes the GPU device asynchronously. Fails with
    /// [`SlaeError::WgpuInitError`] when no suitable adapter is present.
    pub async fn new() -> Result<Self, SlaeError> {
        let context = Arc::new(GpuContext::new().await?);
        Ok(Self { context })
    }

    // --- Resource creation ---

    /// Creates a device vector initialized from a host slice.
    pub fn create_vector(&self, label: &str, data: &[Real]) -> GpuVector {
        let buffer = self.context.create_gpu_buffer_with_data(
            label,
            bytemuck::cast_slice(data),
            VECTOR_USAGE,
        );
        GpuVector::new_internal(
            buffer,
            data.len(),
            VECTOR_USAGE,
            label.to_string(),
            Arc::clone(&self.context),
        )
    }

    /// Creates an uninitialized device vector of `size` elements.
    pub fn create_empty_vector(&self, label: &str, size: usize) -> GpuVector {
        let size_bytes = (size * mem::size_of::<Real>()) as u64;
        let buffer = self
            .context
            .create_empty_buffer(label, size_bytes, VECTOR_USAGE, false);
        GpuVector::new_internal(
            buffer,
            size,
            VECTOR_USAGE,
            label.to_string(),
            Arc::clone(&self.context),
        )
    }

    /// Allocates scratch storage for the two-phase dot reduction. Each solver
    /// instance owns one; sharing a scratch between concurrently running
    /// solves would corrupt both reductions.
    pub fn create_dot_scratch(&self) -> DotScratch {
        DotScratch {
            partials: self.create_empty_vector("dot partials", DOT_GROUPS as usize),
            result: self.create_empty_vector("dot result", 1),
        }
    }

    /// Uploads a banded-diagonal matrix to the device.
    pub fn create_diag_matrix(&self, matrix: &DiagMatrix) -> Result<DiagMatrixGpu, SlaeError> {
        DiagMatrixGpu::from_host(self, matrix)
    }

    /// Uploads an MSR matrix to the device.
    pub fn create_msr_matrix(&self, matrix: &MsrMatrix) -> Result<MsrMatrixGpu, SlaeError> {
        MsrMatrixGpu::from_host(self, matrix)
    }

    /// Uploads a symmetric banded matrix to the device.
    pub fn create_sym_diag_matrix(
        &self,
        matrix: &SymDiagMatrix,
    ) -> Result<SymDiagMatrixGpu, SlaeError> {
        SymDiagMatrixGpu::from_host(self, matrix)
    }

    // --- Vector primitives ---

    fn check_same_size(a: &GpuVector, b: &GpuVector, op: &str) -> Result<(), SlaeError> {
        if a.size() != b.size() {
            return Err(SlaeError::InvalidDimensions(format!(
                "{}: vector sizes mismatch ({} != {})",
                op,
                a.size(),
                b.size()
            )));
        }
        Ok(())
    }

    /// `y += alpha * x`. Enqueues the work and returns without waiting.
    pub fn axpy(&self, alpha: Real, x: &GpuVector, y: &mut GpuVector) -> Result<(), SlaeError> {
        Self::check_same_size(x, y, "axpy")?;
        blas::internal_axpy(&self.context, alpha, x, y)
    }

    /// `y *= alpha`.
    pub fn scale(&self, alpha: Real, y: &mut GpuVector) -> Result<(), SlaeError> {
        blas::internal_scale(&self.context, alpha, y)
    }

    /// `y[i] = 1 / sqrt(y[i])`, in place.
    pub fn rsqrt_in_place(&self, y: &mut GpuVector) -> Result<(), SlaeError> {
        blas::internal_rsqrt(&self.context, y)
    }

    /// `y[i] *= x[i]`, in place.
    pub fn mul_in_place(&self, y: &mut GpuVector, x: &GpuVector) -> Result<(), SlaeError> {
        Self::check_same_size(x, y, "mul_in_place")?;
        blas::internal_mul_in_place(&self.context, y, x)
    }

    /// Fused search-direction update `p = r + beta * (p - omega * nu)`.
    pub fn p_update(
        &self,
        p: &mut GpuVector,
        r: &GpuVector,
        nu: &GpuVector,
        omega: Real,
        beta: Real,
    ) -> Result<(), SlaeError> {
        Self::check_same_size(r, p, "p_update")?;
        Self::check_same_size(nu, p, "p_update")?;
        blas::internal_p_update(&self.context, p, r, nu, omega, beta)
    }

    /// Computes `x . y` on the device and reads the scalar back to the host.
    /// The only vector primitive that synchronizes with the GPU.
    pub async fn dot(
        &self,
        x: &GpuVector,
        y: &GpuVector,
        scratch: &DotScratch,
    ) -> Result<Real, SlaeError> {
        Self::check_same_size(x, y, "dot")?;
        blas::internal_dot(&self.context, x, y, scratch).await
    }

    // --- Instrumentation ---

    /// Returns `(bytes_to_gpu, bytes_from_gpu)` transferred since the last
    /// reset.
    pub fn get_transfer_stats(&self) -> (u64, u64) {
        self.context.get_transfer_stats()
    }

    /// Resets the transfer counters to zero.
    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats();
    }
}
