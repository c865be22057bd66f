//! Jacobi-preconditioned conjugate gradient for symmetric positive-definite
//! systems.

use crate::algorithms::{validate_inputs, CancelToken, IterativeSolver, SolveStats};
use slae_core::{DotScratch, GpuDevice, GpuVector, Real, SlaeError, SolverMatrix};

struct Temps {
    r: GpuVector,
    di_inv: GpuVector,
    mr: GpuVector,
    az: GpuVector,
    z: GpuVector,
}

/// Conjugate gradient with Jacobi preconditioning. Converges when the
/// squared residual norm drops below `eps` relative to the squared norm of
/// the right-hand side.
pub struct Cgm {
    max_iter: usize,
    eps: Real,
    cancel: Option<CancelToken>,
    size: usize,
    temps: Option<Temps>,
    scratch: Option<DotScratch>,
}

impl IterativeSolver for Cgm {
    fn new(max_iter: usize, eps: Real) -> Self {
        Self {
            max_iter,
            eps,
            cancel: None,
            size: 0,
            temps: None,
            scratch: None,
        }
    }

    fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = Some(token);
    }

    fn allocate_temps(&mut self, device: &GpuDevice, n: usize) {
        if self.scratch.is_none() {
            self.scratch = Some(device.create_dot_scratch());
        }
        if n != self.size || self.temps.is_none() {
            log::debug!("CGM: allocating working vectors for n = {}", n);
            self.size = n;
            self.temps = Some(Temps {
                r: device.create_empty_vector("cgm r", n),
                di_inv: device.create_empty_vector("cgm di_inv", n),
                mr: device.create_empty_vector("cgm mr", n),
                az: device.create_empty_vector("cgm az", n),
                z: device.create_empty_vector("cgm z", n),
            });
        }
    }

    async fn solve(
        &mut self,
        device: &GpuDevice,
        matrix: &dyn SolverMatrix,
        b: &[Real],
        x: &mut [Real],
    ) -> Result<SolveStats, SlaeError> {
        validate_inputs(matrix, b, x)?;
        self.allocate_temps(device, x.len());
        let (Some(tmp), Some(scratch)) = (self.temps.as_mut(), self.scratch.as_ref()) else {
            return Err(SlaeError::Internal(
                "CGM working vectors missing after allocation".to_string(),
            ));
        };

        let mut x_gpu = device.create_vector("cgm x", x);
        let b_gpu = device.create_vector("cgm b", b);

        // Preconditioner: di_inv = D^(-1/2), applied twice for M^-1 = D^-1.
        tmp.di_inv.clone_from(matrix.di())?;
        device.rsqrt_in_place(&mut tmp.di_inv)?;

        // r = b - A x.
        matrix.mul(&x_gpu, &mut tmp.z)?;
        tmp.r.clone_from(&b_gpu)?;
        device.axpy(-1.0, &tmp.z, &mut tmp.r)?;

        // z = mr = M^-1 r.
        tmp.mr.clone_from(&tmp.r)?;
        device.mul_in_place(&mut tmp.mr, &tmp.di_inv)?;
        device.mul_in_place(&mut tmp.mr, &tmp.di_inv)?;
        tmp.z.clone_from(&tmp.mr)?;

        let mut mrr = device.dot(&tmp.mr, &tmp.r, scratch).await?;
        let bb = device.dot(&b_gpu, &b_gpu, scratch).await?;

        let mut iter = 0;
        while iter < self.max_iter {
            if self
                .cancel
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
            {
                log::info!("CGM cancelled after {} iterations", iter);
                break;
            }

            matrix.mul(&tmp.z, &mut tmp.az)?;
            let azz = device.dot(&tmp.az, &tmp.z, scratch).await?;
            let alpha = mrr / azz;

            device.axpy(alpha, &tmp.z, &mut x_gpu)?;
            device.axpy(-alpha, &tmp.az, &mut tmp.r)?;

            // mr = M^-1 r.
            tmp.mr.clone_from(&tmp.r)?;
            device.mul_in_place(&mut tmp.mr, &tmp.di_inv)?;
            device.mul_in_place(&mut tmp.mr, &tmp.di_inv)?;
            let mrr1 = device.dot(&tmp.mr, &tmp.r, scratch).await?;
            let beta = mrr1 / mrr;

            // z = mr + beta z.
            device.scale(beta, &mut tmp.z)?;
            device.axpy(1.0, &tmp.mr, &mut tmp.z)?;

            mrr = mrr1;
            iter += 1;

            let rr = device.dot(&tmp.r, &tmp.r, scratch).await?;
            if rr / bb < self.eps {
                break;
            }
        }

        // True residual of the returned solution.
        matrix.mul(&x_gpu, &mut tmp.z)?;
        tmp.r.clone_from(&b_gpu)?;
        device.axpy(-1.0, &tmp.z, &mut tmp.r)?;
        let residual = device.dot(&tmp.r, &tmp.r, scratch).await?;

        let solution = x_gpu.read_contents().await?;
        x.copy_from_slice(&solution);

        log::info!(
            "CGM finished: {} iterations, squared residual {:e}",
            iter,
            residual
        );
        Ok(SolveStats {
            residual,
            iterations: iter,
        })
    }
}
