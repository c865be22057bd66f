//! Modified sparse row (MSR) layout: the main diagonal stored densely in
//! `di`, off-diagonal entries of row `i` packed into `elems[ia[i]..ia[i+1]]`
//! with their column indices in `ja`.

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
struct MsrParams {
    size: u32,
    _pad: [u32; 3],
}

/// Host-side MSR matrix. Row pointers and column indices use `u32` so the
/// index buffers upload to the device unchanged.
#[derive(Debug, Clone)]
pub struct MsrMatrix {
    size: usize,
    di: Vec<Real>,
    elems: Vec<Real>,
    ia: Vec<u32>,
    ja: Vec<u32>,
}

impl MsrMatrix {
    /// Builds an MSR matrix from raw arrays, validating the structure:
    /// `ia` must be a non-decreasing pointer array of `size + 1` entries
    /// starting at zero, `ja` and `elems` must agree with its last entry,
    /// and every column index must be off-diagonal and in range.
    pub fn from_parts(
        di: Vec<Real>,
        elems: Vec<Real>,
        ia: Vec<u32>,
        ja: Vec<u32>,
    ) -> Result<Self, SlaeError> {
        let size = di.len();
        if ia.len() != size + 1 {
            return Err(SlaeError::InvalidDimensions(format!(
                "Row pointer array has {} entries, expected {}",
                ia.len(),
                size + 1
            )));
        }
        if ia[0] != 0 {
            return Err(SlaeError::InvalidDimensions(
                "Row pointer array must start at 0".to_string(),
            ));
        }
        if ia.windows(2).any(|w| w[0] > w[1]) {
            return Err(SlaeError::InvalidDimensions(
                "Row pointer array must be non-decreasing".to_string(),
            ));
        }
        let nnz = ia[size] as usize;
        if elems.len() != nnz || ja.len() != nnz {
            return Err(SlaeError::InvalidDimensions(format!(
                "Element/index array lengths ({}, {}) do not match row pointers ({})",
                elems.len(),
                ja.len(),
                nnz
            )));
        }
        for i in 0..size {
            for k in ia[i] as usize..ia[i + 1] as usize {
                let j = ja[k] as usize;
                if j >= size {
                    return Err(SlaeError::InvalidDimensions(format!(
                        "Column index {} out of range in row {}",
                        j, i
                    )));
                }
                if j == i {
                    return Err(SlaeError::InvalidDimensions(format!(
                        "Diagonal entry stored off-diagonally in row {}",
                        i
                    )));
                }
            }
        }
        Ok(Self {
            size,
            di,
            elems,
            ia,
            ja,
        })
    }

    /// Builds an MSR matrix from a dense row-major square matrix, dropping
    /// zero off-diagonal entries.
    pub fn from_dense(dense: &[Vec<Real>]) -> Result<Self, SlaeError> {
        let size = dense.len();
        let mut di = vec![0.0; size];
        let mut elems = Vec::new();
        let mut ia = Vec::with_capacity(size + 1);
        let mut ja = Vec::new();
        ia.push(0);
        for (i, row) in dense.iter().enumerate() {
            if row.len() != size {
                return Err(SlaeError::InvalidDimensions(format!(
                    "Dense row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    size
                )));
            }
            di[i] = row[i];
            for (j, &value) in row.iter().enumerate() {
                if j != i && value != 0.0 {
                    elems.push(value);
                    ja.push(j as u32);
                }
            }
            ia.push(elems.len() as u32);
        }
        Ok(Self {
            size,
            di,
            elems,
            ia,
            ja,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn di(&self) -> &[Real] {
        &self.di
    }

    /// Returns `A[i][j]`, zero when the entry is not stored.
    pub fn get(&self, i: usize, j: usize) -> Real {
        if i == j {
            return self.di[i];
        }
        for k in self.ia[i] as usize..self.ia[i + 1] as usize {
            if self.ja[k] as usize == j {
                return self.elems[k];
            }
        }
        0.0
    }

    /// Reference `A * v` on the host.
    pub fn mul_vec(&self, v: &[Real]) -> Vec<Real> {
        let mut res = vec![0.0; self.size];
        for (i, r) in res.iter_mut().enumerate() {
            let mut sum = self.di[i] * v[i];
            for k in self.ia[i] as usize..self.ia[i + 1] as usize {
                sum += self.elems[k] * v[self.ja[k] as usize];
            }
            *r = sum;
        }
        res
    }

    /// Reference `(L + D) * v` on the host.
    pub fn l_mul_vec(&self, v: &[Real]) -> Vec<Real> {
        let mut res = vec![0.0; self.size];
        for (i, r) in res.iter_mut().enumerate() {
            let mut sum = self.di[i] * v[i];
            for k in self.ia[i] as usize..self.ia[i + 1] as usize {
                if (self.ja[k] as usize) < i {
                    sum += self.elems[k] * v[self.ja[k] as usize];
                }
            }
            *r = sum;
        }
        res
    }

    /// Reference strict `U * v` on the host.
    pub fn u_mul_vec(&self, v: &[Real]) -> Vec<Real> {
        let mut res = vec![0.0; self.size];
        for (i, r) in res.iter_mut().enumerate() {
            let mut sum = 0.0;
            for k in self.ia[i] as usize..self.ia[i + 1] as usize {
                if (self.ja[k] as usize) > i {
                    sum += self.elems[k] * v[self.ja[k] as usize];
                }
            }
            *r = sum;
        }
        res
    }
}

/// Device-side MSR matrix. Index buffers are `u32` storage buffers; the
/// triangular solves run as a single 128-lane workgroup striding each row's
/// nonzeros.
#[derive(Debug)]
pub struct MsrMatrixGpu {
    size: usize,
    di: GpuVector,
    elems: GpuVector,
    ia: wgpu::Buffer,
    ja: wgpu::Buffer,
    params: wgpu::Buffer,
    context: Arc<GpuContext>,
}

impl MsrMatrixGpu {
    pub(crate) fn from_host(device: &GpuDevice, matrix: &MsrMatrix) -> Result<Self, SlaeError> {
        let params = MsrParams {
            size: matrix.size as u32,
            _pad: [0; 3],
        };
        let params_buffer = device.context.create_gpu_buffer_with_data(
            "msr matrix params",
            bytemuck::bytes_of(&params),
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
        let ia = device.context.create_gpu_buffer_with_data(
            "msr row pointers",
            bytemuck::cast_slice(&matrix.ia),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let ja = device.context.create_gpu_buffer_with_data(
            "msr column indices",
            bytemuck::cast_slice(&matrix.ja),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        Ok(Self {
            size: matrix.size,
            di: device.create_vector("msr diagonal", &matrix.di),
            elems: device.create_vector("msr elements", &matrix.elems),
            ia,
            ja,
            params: params_buffer,
            context: Arc::clone(&device.context),
        })
    }
}

impl SolverMatrix for MsrMatrixGpu {
    fn size(&self) -> usize {
        self.size
    }

    fn di(&self) -> &GpuVector {
        &self.di
    }

    fn mul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, vec, "msr mul")?;
        check_vec_size(self.size, res, "msr mul")?;
        let kernel = self
            .context
            .kernel("msr_mul", include_str!("../shaders/msr_mul.wgsl"), "main");
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.di.as_entire_binding(),
                self.elems.as_entire_binding(),
                self.ia.as_entire_binding(),
                self.ja.as_entire_binding(),
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

impl TriangularSplit for MsrMatrixGpu {
    fn lmul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, vec, "msr lmul")?;
        check_vec_size(self.size, res, "msr lmul")?;
        let kernel = self
            .context
            .kernel("msr_lmul", include_str!("../shaders/msr_lmul.wgsl"), "main");
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.di.as_entire_binding(),
                self.elems.as_entire_binding(),
                self.ia.as_entire_binding(),
                self.ja.as_entire_binding(),
                vec.as_entire_binding(),
                res.as_entire_binding(),
            ],
            blas::elementwise_groups(self.size),
        );
        Ok(())
    }

    fn umul(&self, vec: &GpuVector, res: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, vec, "msr umul")?;
        check_vec_size(self.size, res, "msr umul")?;
        let kernel = self
            .context
            .kernel("msr_umul", include_str!("../shaders/msr_umul.wgsl"), "main");
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.elems.as_entire_binding(),
                self.ia.as_entire_binding(),
                self.ja.as_entire_binding(),
                vec.as_entire_binding(),
                res.as_entire_binding(),
            ],
            blas::elementwise_groups(self.size),
        );
        Ok(())
    }

    fn inv_lmul(&self, x: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, x, "msr inv_lmul")?;
        let kernel = self.context.kernel(
            "msr_inv_lmul",
            include_str!("../shaders/msr_inv_lmul.wgsl"),
            "main",
        );
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.di.as_entire_binding(),
                self.elems.as_entire_binding(),
                self.ia.as_entire_binding(),
                self.ja.as_entire_binding(),
                x.as_entire_binding(),
            ],
            1,
        );
        Ok(())
    }

    fn inv_umul(&self, x: &mut GpuVector) -> Result<(), SlaeError> {
        check_vec_size(self.size, x, "msr inv_umul")?;
        let kernel = self.context.kernel(
            "msr_inv_umul",
            include_str!("../shaders/msr_inv_umul.wgsl"),
            "main",
        );
        kernel.dispatch(
            &self.context,
            &[
                self.params.as_entire_binding(),
                self.di.as_entire_binding(),
                self.elems.as_entire_binding(),
                self.ia.as_entire_binding(),
                self.ja.as_entire_binding(),
                x.as_entire_binding(),
            ],
            1,
        );
        Ok(())
    }
}
