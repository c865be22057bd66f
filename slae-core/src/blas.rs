//! Internal implementations of the vector primitives (BLAS level-1) used by
//! the solver engine: axpy, scale, two-phase dot reduction, reciprocal
//! square root and element-wise multiply. The public surface lives on
//! [`GpuDevice`](crate::GpuDevice).

use crate::{context::GpuContext, error::SlaeError, vector::GpuVector, Real};
use bytemuck::{Pod, Zeroable};

/// Workgroup size for element-wise kernels.
pub(crate) const WORKGROUP_SIZE: u32 = 256;
/// Number of parallel groups in dot-product pass 1, and therefore the number
/// of partial sums pass 2 reduces. Must match the shaders.
pub(crate) const DOT_GROUPS: u32 = 64;

/// Scratch storage for the two-phase dot reduction: 64 partial sums plus the
/// final 1-element result. Passed explicitly to every `dot` call so that
/// concurrent solves never share mutable state; each solver owns one.
#[derive(Debug)]
pub struct DotScratch {
    pub(crate) partials: GpuVector,
    pub(crate) result: GpuVector,
}

// --- Uniform parameter structs (must match the WGSL declarations) ---

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ScalarParams {
    alpha: Real,
    size: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SizeParams {
    size: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PUpdateParams {
    omega: Real,
    beta: Real,
    size: u32,
    _pad: u32,
}

pub(crate) fn elementwise_groups(n: usize) -> u32 {
    (n as u32 + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE
}

fn scalar_params_buffer(
    context: &GpuContext,
    label: &str,
    alpha: Real,
    size: usize,
) -> wgpu::Buffer {
    let params = ScalarParams {
        alpha,
        size: size as u32,
        _pad: 0,
    };
    context.create_gpu_buffer_with_data(
        label,
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    )
}

/// `y += alpha * x`. Dispatch only; no host synchronization.
pub(crate) fn internal_axpy(
    context: &GpuContext,
    alpha: Real,
    x: &GpuVector,
    y: &mut GpuVector,
) -> Result<(), SlaeError> {
    let params = scalar_params_buffer(context, "axpy params", alpha, y.size());
    let kernel = context.kernel("blas_axpy", include_str!("shaders/axpy.wgsl"), "main");
    kernel.dispatch(
        context,
        &[
            params.as_entire_binding(),
            x.as_entire_binding(),
            y.as_entire_binding(),
        ],
        elementwise_groups(y.size()),
    );
    Ok(())
}

/// `y *= alpha`.
pub(crate) fn internal_scale(
    context: &GpuContext,
    alpha: Real,
    y: &mut GpuVector,
) -> Result<(), SlaeError> {
    let params = scalar_params_buffer(context, "scale params", alpha, y.size());
    let kernel = context.kernel("blas_scale", include_str!("shaders/scale.wgsl"), "main");
    kernel.dispatch(
        context,
        &[params.as_entire_binding(), y.as_entire_binding()],
        elementwise_groups(y.size()),
    );
    Ok(())
}

/// `y[i] = 1 / sqrt(y[i])`, in place. Used to build the Jacobi
/// preconditioner from a matrix diagonal.
pub(crate) fn internal_rsqrt(context: &GpuContext, y: &mut GpuVector) -> Result<(), SlaeError> {
    let params = SizeParams {
        size: y.size() as u32,
        _pad: [0; 3],
    };
    let params_buffer = context.create_gpu_buffer_with_data(
        "rsqrt params",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    );
    let kernel = context.kernel("blas_rsqrt", include_str!("shaders/rsqrt.wgsl"), "main");
    kernel.dispatch(
        context,
        &[params_buffer.as_entire_binding(), y.as_entire_binding()],
        elementwise_groups(y.size()),
    );
    Ok(())
}

/// `y[i] *= x[i]`, in place (element-wise product).
pub(crate) fn internal_mul_in_place(
    context: &GpuContext,
    y: &mut GpuVector,
    x: &GpuVector,
) -> Result<(), SlaeError> {
    let params = SizeParams {
        size: y.size() as u32,
        _pad: [0; 3],
    };
    let params_buffer = context.create_gpu_buffer_with_data(
        "vecmul params",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    );
    let kernel = context.kernel("blas_vecmul", include_str!("shaders/vecmul.wgsl"), "main");
    kernel.dispatch(
        context,
        &[
            params_buffer.as_entire_binding(),
            y.as_entire_binding(),
            x.as_entire_binding(),
        ],
        elementwise_groups(y.size()),
    );
    Ok(())
}

/// Fused BiCGSTAB search-direction update `p = r + beta * (p - omega * nu)`,
/// a single dispatch replacing the axpy/scale/axpy sequence.
pub(crate) fn internal_p_update(
    context: &GpuContext,
    p: &mut GpuVector,
    r: &GpuVector,
    nu: &GpuVector,
    omega: Real,
    beta: Real,
) -> Result<(), SlaeError> {
    let params = PUpdateParams {
        omega,
        beta,
        size: p.size() as u32,
        _pad: 0,
    };
    let params_buffer = context.create_gpu_buffer_with_data(
        "p_update params",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    );
    let kernel = context.kernel("bicgstab_p_update", include_str!("shaders/p_update.wgsl"), "main");
    kernel.dispatch(
        context,
        &[
            params_buffer.as_entire_binding(),
            p.as_entire_binding(),
            r.as_entire_binding(),
            nu.as_entire_binding(),
        ],
        elementwise_groups(p.size()),
    );
    Ok(())
}

/// Two-phase dot-product reduction: pass 1 spreads the element products over
/// [`DOT_GROUPS`] workgroups, each reducing into one slot of
/// `scratch.partials`; pass 2 collapses the partials into `scratch.result`,
/// which is read back to the host.
pub(crate) async fn internal_dot(
    context: &GpuContext,
    x: &GpuVector,
    y: &GpuVector,
    scratch: &DotScratch,
) -> Result<Real, SlaeError> {
    let params = SizeParams {
        size: x.size() as u32,
        _pad: [0; 3],
    };
    let params_buffer = context.create_gpu_buffer_with_data(
        "dot params",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    );

    let pass1 = context.kernel("dot_pass1", include_str!("shaders/dot_pass1.wgsl"), "main");
    let pass2 = context.kernel("dot_pass2", include_str!("shaders/dot_pass2.wgsl"), "main");

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("dot encoder"),
        });
    pass1.encode(
        context,
        &mut encoder,
        &[
            params_buffer.as_entire_binding(),
            x.as_entire_binding(),
            y.as_entire_binding(),
            scratch.partials.as_entire_binding(),
        ],
        DOT_GROUPS,
    );
    pass2.encode(
        context,
        &mut encoder,
        &[
            scratch.partials.as_entire_binding(),
            scratch.result.as_entire_binding(),
        ],
        1,
    );
    context.queue.submit(std::iter::once(encoder.finish()));

    let result_vec = context
        .read_buffer_to_cpu::<Real>(scratch.result.inner(), 1)
        .await?;
    result_vec.first().copied().ok_or_else(|| {
        SlaeError::Internal("Dot product readback returned empty vector".to_string())
    })
}
