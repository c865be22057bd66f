//! Symmetric banded layout: only the four lower bands and the main diagonal
//! are stored. Band `k` at row `i` holds `A[i][i - off_k]`; the mirrored
//! upper entry is read from row `i + off_k` of the same band. Supports the
//! full multiply only.

use crate::context::GpuContext;
use crate::device::GpuDevice;
use crate::error::SlaeError;
use crate::matrices::{check_vec_size, SolverMatrix};
use crate::vector::GpuVector;
use crate::{blas, Real};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SymDiagParams {
    size: u32,
    gap: u32,
    _pad: [u32; 2],
}

/// Host-side symmetric banded matrix: lower bands at offsets `1`, `gap + 1`,
/// `gap + 2`, `gap + 3` plus the main diagonal.
#[derive(Debug, Clone)]
pub struct SymDiagMatrix {
    pub size: usize,
    pub gap: usize,
    pub d3: Vec<Real>,
    pub d2: Vec<Real>,
    pub d1: Vec<Real>,
    pub d0: Vec<Real>,
    pub di: Vec<Real>,
}

impl SymDiagMatrix {
    pub fn zeros(size: usize, gap: usize) -> Self {
        Self {
            size,
            gap,
            d3: vec![0.0; size],
            d2: vec![0.0; size],
            d1: vec![0.0; size],
            d0: vec![0.0; size],
            di: vec![0.0; size],
        }
    }

    pub fn offsets(&self) -> [usize; 4] {
        [1, self.gap + 1, self.gap + 2, self.gap + 3]
    }

    pub fn validate(&self) -> Result<(), SlaeError> {
        let bands: [(&str, &Vec<Real>); 5] = [
            ("d3", &self.d3),
            ("d2", &self.d2),
            ("d1", &self.d1),
            ("d0", &self.d0),
            ("di", &self.di),
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

    /// Reference `A * v` on the host, folding both triangles from the stored
    /// lower bands.
    pub fn mul_vec(&self, v: &[Real]) -> Vec<Real> {
        let n = self.size;
        let [o0, o1, o2, o3] = self.offsets();
        let bands: [(&[Real], usize); 4] = [
            (&self.d0, o0),
            (&self.d1, o1),
            (&self.d2, o2),
            (&self.d3, o3),
        ];
        let mut res = vec![0.0; n];
        for (i, r) in res.iter_mut().enumerate() {
            let mut sum = self.di[i] * v[i];
            for (band, off) in bands {
                if i >= off {
                    sum += band[i] * v[i - off];
                }
                if i + off < n {
                    sum += band[i + off] * v[i + off];
                }
            }
            *r = sum;
        }
        res
    }
}

/// Device-side symmetric banded matrix. No triangular split: `halves()`
/// stays `None`, so Eisenstat-style solvers reject this layout up front.
#[derive(Debug)]
pub struct SymDiagMatrixGpu {
    size: usize,
    d3: GpuVector,
    d2: GpuVector,
    d1: GpuVector,
    d0: GpuVector,
    di: GpuVector,
    params: wgpu::Buffer,
    context: Arc<GpuContext>,
}

impl SymDiagMatrixGpu {
    pub(crate) fn from_host(
        device: &GpuDevice,
        matrix: &SymDiagMatrix,
    ) -> Result<Self, SlaeError> {
        matrix.validate()?;
        let params = SymDiagParams {
            size: matrix.size as u32,
            gap: matrix.gap as u32,
            _pad: [0; 2],
        };
        let params_buffer = device.context.create_gpu_buffer_with_data(
            "sym diag matrix params",
            bytemuck::bytes_of(&params),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
        Ok(Self {
            size: matrix.size,
            d3: device.create_vector("sym band d3", &matrix.d3),
            d2: device.create_vector("sym band d2", &matrix.d2),
            d1: device.create_vector("sym band d1", &matrix.d1),
            d0: device.create_vector("sym band d0", &matrix.d0),
            di: device.create_vector("sym band di", &matrix.di),
            params: params_buffer,
            context: Arc::clone(&device.context),
        })
    }
}

impl SolverMatrix for SymDiagMatrixGpu {
    fn size(&self) -> usize {
        self.size
    }

    fn di(&self) -> &GpuVector {
        &self.di
    }

    fn mul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, vec, "sym diag mul")?;
        check_vec_size(self.size, res, "sym diag mul")?;
        let kernel = self.context.kernel(
            "sym_diag_mul",
            include_str!("../shaders/sym_diag_mul.wgsl"),
            "main",
        );
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.d3.as_entire_binding(),
                self.d2.as_entire_binding(),
                self.d1.as_entire_binding(),
                self.d0.as_entire_binding(),
                self.di.as_entire_binding(),
                vec.as_entire_binding(),
                res.as_entire_binding(),
            ],
            blas::elementwise_groups(self.size),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_vec_is_symmetric() {
        let n = 10;
        let mut m = SymDiagMatrix::zeros(n, 2);
        for i in 0..n {
            m.di[i] = 5.0;
        }
        for i in 1..n {
            m.d0[i] = -1.0;
        }
        for i in 3..n {
            m.d1[i] = 0.5;
        }
        // x^T (A y) == y^T (A x) for a symmetric A.
        let x: Vec<Real> = (0..n).map(|i| (i as Real + 1.0).recip()).collect();
        let y: Vec<Real> = (0..n).map(|i| (i as Real) * 0.3 - 1.0).collect();
        let ay = m.mul_vec(&y);
        let ax = m.mul_vec(&x);
        let left: Real = x.iter().zip(&ay).map(|(a, b)| a * b).sum();
        let right: Real = y.iter().zip(&ax).map(|(a, b)| a * b).sum();
        assert!((left - right).abs() < 1e-4);
    }

    #[test]
    fn mul_vec_matches_manual_expansion() {
        let mut m = SymDiagMatrix::zeros(3, 5);
        m.di.copy_from_slice(&[2.0, 3.0, 4.0]);
        m.d0.copy_from_slice(&[0.0, -1.0, -2.0]);
        // A = [ 2 -1  0 ]
        //     [-1  3 -2 ]
        //     [ 0 -2  4 ]
        let v = vec![1.0, 1.0, 1.0];
        assert_eq!(m.mul_vec(&v), vec![1.0, 0.0, 2.0]);
    }

    #[test]
    fn validate_rejects_short_band() {
        let mut m = SymDiagMatrix::zeros(6, 1);
        m.d2.truncate(3);
        assert!(matches!(
            m.validate(),
            Err(SlaeError::InvalidDimensions(_))
        ));
    }
}
