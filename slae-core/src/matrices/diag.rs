//! Banded-diagonal layout: nine diagonals around the main one, positioned by
//! a `gap` parameter. Band values are indexed by row, so the entry of band
//! `ld1` in row `i` is `A[i][i - (gap + 1)]`; positions that fall outside the
//! matrix are kept in storage but treated as zero.

use crate::context::GpuContext;
use crate::device::GpuDevice;
use crate::error::SlaeError;
use crate::matrices::{check_vec_size, SolverMatrix, TriangularSplit};
use crate::vector::GpuVector;
use crate::{blas, Real};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DiagParams {
    size: u32,
    gap: u32,
    _pad: [u32; 2],
}

/// Host-side banded matrix with nine diagonals. Bands are full-length `Vec`s
/// indexed by row; `gap` positions the outer three band pairs at offsets
/// `gap + 1 .. gap + 3` from the main diagonal, the inner pair sits at
/// offset 1.
#[derive(Debug, Clone)]
pub struct DiagMatrix {
    pub size: usize,
    pub gap: usize,
    pub ld3: Vec<Real>,
    pub ld2: Vec<Real>,
    pub ld1: Vec<Real>,
    pub ld0: Vec<Real>,
    pub di: Vec<Real>,
    pub rd0: Vec<Real>,
    pub rd1: Vec<Real>,
    pub rd2: Vec<Real>,
    pub rd3: Vec<Real>,
}

impl DiagMatrix {
    /// Creates an all-zero banded matrix of dimension `size`.
    pub fn zeros(size: usize, gap: usize) -> Self {
        Self {
            size,
            gap,
            ld3: vec![0.0; size],
            ld2: vec![0.0; size],
            ld1: vec![0.0; size],
            ld0: vec![0.0; size],
            di: vec![0.0; size],
            rd0: vec![0.0; size],
            rd1: vec![0.0; size],
            rd2: vec![0.0; size],
            rd3: vec![0.0; size],
        }
    }

    /// Band offsets from the main diagonal, innermost first.
    pub fn offsets(&self) -> [usize; 4] {
        [1, self.gap + 1, self.gap + 2, self.gap + 3]
    }

    /// Checks that every band has exactly `size` entries.
    pub fn validate(&self) -> Result<(), SlaeError> {
        let bands: [(&str, &Vec<Real>); 9] = [
            ("ld3", &self.ld3),
            ("ld2", &self.ld2),
            ("ld1", &self.ld1),
            ("ld0", &self.ld0),
            ("di", &self.di),
            ("rd0", &self.rd0),
            ("rd1", &self.rd1),
            ("rd2", &self.rd2),
            ("rd3", &self.rd3),
        ];
        for (name, band) in bands {
            if band.len() != self.size {
                return Err(SlaeError::InvalidDimensions(format!(
                    "Band '{}' has {} entries, expected {}",
                    name,
                    band.len(),
                    self.size
                )));
            }
        }
        Ok(())
    }

    fn lower_bands(&self) -> [(&[Real], usize); 4] {
        let [o0, o1, o2, o3] = self.offsets();
        [
            (&self.ld0, o0),
            (&self.ld1, o1),
            (&self.ld2, o2),
            (&self.ld3, o3),
        ]
    }

    fn upper_bands(&self) -> [(&[Real], usize); 4] {
        let [o0, o1, o2, o3] = self.offsets();
        [
            (&self.rd0, o0),
            (&self.rd1, o1),
            (&self.rd2, o2),
            (&self.rd3, o3),
        ]
    }

    /// Reference `A * v` on the host. Used to cross-check the GPU kernels.
    pub fn mul_vec(&self, v: &[Real]) -> Vec<Real> {
        let n = self.size;
        let mut res = vec![0.0; n];
        for (i, r) in res.iter_mut().enumerate() {
            let mut sum = self.di[i] * v[i];
            for (band, off) in self.lower_bands() {
                if i >= off {
                    sum += band[i] * v[i - off];
                }
            }
            for (band, off) in self.upper_bands() {
                if i + off < n {
                    sum += band[i] * v[i + off];
                }
            }
            *r = sum;
        }
        res
    }

    /// Reference `(L + D) * v` on the host.
    pub fn l_mul_vec(&self, v: &[Real]) -> Vec<Real> {
        let n = self.size;
        let mut res = vec![0.0; n];
        for (i, r) in res.iter_mut().enumerate() {
            let mut sum = self.di[i] * v[i];
            for (band, off) in self.lower_bands() {
                if i >= off {
                    sum += band[i] * v[i - off];
                }
            }
            *r = sum;
        }
        res
    }

    /// Reference strict `U * v` on the host.
    pub fn u_mul_vec(&self, v: &[Real]) -> Vec<Real> {
        let n = self.size;
        let mut res = vec![0.0; n];
        for (i, r) in res.iter_mut().enumerate() {
            let mut sum = 0.0;
            for (band, off) in self.upper_bands() {
                if i + off < n {
                    sum += band[i] * v[i + off];
                }
            }
            *r = sum;
        }
        res
    }
}

/// Device-side banded matrix. Implements the full triangular split: the
/// forward/backward substitutions run as a single 4-lane workgroup walking
/// the rows in order.
#[derive(Debug)]
pub struct DiagMatrixGpu {
    size: usize,
    ld3: GpuVector,
    ld2: GpuVector,
    ld1: GpuVector,
    ld0: GpuVector,
    di: GpuVector,
    rd0: GpuVector,
    rd1: GpuVector,
    rd2: GpuVector,
    rd3: GpuVector,
    params: wgpu::Buffer,
    context: Arc<GpuContext>,
}

impl DiagMatrixGpu {
    pub(crate) fn from_host(device: &GpuDevice, matrix: &DiagMatrix) -> Result<Self, SlaeError> {
        matrix.validate()?;
        let params = DiagParams {
            size: matrix.size as u32,
            gap: matrix.gap as u32,
            _pad: [0; 2],
        };
        let params_buffer = device.context.create_gpu_buffer_with_data(
            "diag matrix params",
            bytemuck::bytes_of(&params),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
        Ok(Self {
            size: matrix.size,
            ld3: device.create_vector("diag band ld3", &matrix.ld3),
            ld2: device.create_vector("diag band ld2", &matrix.ld2),
            ld1: device.create_vector("diag band ld1", &matrix.ld1),
            ld0: device.create_vector("diag band ld0", &matrix.ld0),
            di: device.create_vector("diag band di", &matrix.di),
            rd0: device.create_vector("diag band rd0", &matrix.rd0),
            rd1: device.create_vector("diag band rd1", &matrix.rd1),
            rd2: device.create_vector("diag band rd2", &matrix.rd2),
            rd3: device.create_vector("diag band rd3", &matrix.rd3),
            params: params_buffer,
            context: Arc::clone(&device.context),
        })
    }
}

impl SolverMatrix for DiagMatrixGpu {
    fn size(&self) -> usize {
        self.size
    }

    fn di(&self) -> &GpuVector {
        &self.di
    }

    fn mul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, vec, "diag mul")?;
        check_vec_size(self.size, res, "diag mul")?;
        let kernel = self
            .context
            .kernel("diag_mul", include_str!("../shaders/diag_mul.wgsl"), "main");
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.ld3.as_entire_binding(),
                self.ld2.as_entire_binding(),
                self.ld1.as_entire_binding(),
                self.ld0.as_entire_binding(),
                self.di.as_entire_binding(),
                self.rd0.as_entire_binding(),
                self.rd1.as_entire_binding(),
                self.rd2.as_entire_binding(),
                self.rd3.as_entire_binding(),
                vec.as_entire_binding(),
                res.as_entire_binding(),
            ],
            blas::elementwise_groups(self.size),
        );
        Ok(())
    }

    fn halves(&self) -> Option<&dyn TriangularSplit> {
        Some(self)
    }
}

impl TriangularSplit for DiagMatrixGpu {
    fn lmul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, vec, "diag lmul")?;
        check_vec_size(self.size, res, "diag lmul")?;
        let kernel = self.context.kernel(
            "diag_lmul",
            include_str!("../shaders/diag_lmul.wgsl"),
            "main",
        );
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.ld3.as_entire_binding(),
                self.ld2.as_entire_binding(),
                self.ld1.as_entire_binding(),
                self.ld0.as_entire_binding(),
                self.di.as_entire_binding(),
                vec.as_entire_binding(),
                res.as_entire_binding(),
            ],
            blas::elementwise_groups(self.size),
        );
        Ok(())
    }

    fn umul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, vec, "diag umul")?;
        check_vec_size(self.size, res, "diag umul")?;
        let kernel = self.context.kernel(
            "diag_umul",
            include_str!("../shaders/diag_umul.wgsl"),
            "main",
        );
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.rd3.as_entire_binding(),
                self.rd2.as_entire_binding(),
                self.rd1.as_entire_binding(),
                self.rd0.as_entire_binding(),
                vec.as_entire_binding(),
                res.as_entire_binding(),
            ],
            blas::elementwise_groups(self.size),
        );
        Ok(())
    }

    fn inv_lmul(&self, x: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, x, "diag inv_lmul")?;
        let kernel = self.context.kernel(
            "diag_inv_lmul",
            include_str!("../shaders/diag_inv_lmul.wgsl"),
            "main",
        );
        // Sequential recurrence: exactly one workgroup.
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.ld3.as_entire_binding(),
                self.ld2.as_entire_binding(),
                self.ld1.as_entire_binding(),
                self.ld0.as_entire_binding(),
                self.di.as_entire_binding(),
                x.as_entire_binding(),
            ],
            1,
        );
        Ok(())
    }

    fn inv_umul(&self, x: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, x, "diag inv_umul")?;
        let kernel = self.context.kernel(
            "diag_inv_umul",
            include_str!("../shaders/diag_inv_umul.wgsl"),
            "main",
        );
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.rd3.as_entire_binding(),
                self.rd2.as_entire_binding(),
                self.rd1.as_entire_binding(),
                self.rd0.as_entire_binding(),
                self.di.as_entire_binding(),
                x.as_entire_binding(),
            ],
            1,
        );
        Ok(())
    }
}
