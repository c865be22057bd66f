//! Eisenstat-accelerated conjugate gradient. Works on the symmetrically
//! preconditioned system implied by the `A = L + D + U` split, so each
//! iteration costs two triangular solves instead of a full matrix multiply.
//! Requires a layout that exposes [`TriangularSplit`].

use crate::algorithms::{validate_inputs, CancelToken, IterativeSolver, SolveStats};
use slae_core::{DotScratch, GpuDevice, GpuVector, Real, SlaeError, SolverMatrix};

struct Temps {
    r_hat: GpuVector,
    r_stroke: GpuVector,
    p: GpuVector,
    t: GpuVector,
    ap: GpuVector,
    z: GpuVector,
}

/// Conjugate gradient with the Eisenstat trick. The stopping rule compares
/// the squared preconditioned residual against `eps / 1e7` relative to the
/// right-hand side, compensating for the residual being measured in the
/// transformed system.
pub struct CgmEisenstat {
    max_iter: usize,
    eps: Real,
    cancel: Option<CancelToken>,
    size: usize,
    temps: Option<Temps>,
    scratch: Option<DotScratch>,
}

impl IterativeSolver for CgmEisenstat {
    fn new(max_iter: usize, eps: Real) -> Self {
        Self {
            max_iter,
            eps: eps / 1e7,
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
            log::debug!("CGM-Eisenstat: allocating working vectors for n = {}", n);
            self.size = n;
            self.temps = Some(Temps {
                r_hat: device.create_empty_vector("eisenstat r_hat", n),
                r_stroke: device.create_empty_vector("eisenstat r_stroke", n),
                p: device.create_empty_vector("eisenstat p", n),
                t: device.create_empty_vector("eisenstat t", n),
                ap: device.create_empty_vector("eisenstat ap", n),
                z: device.create_empty_vector("eisenstat z", n),
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
        // Checked before any allocation so unsupported layouts fail fast.
        let halves = matrix.halves().ok_or_else(|| {
            SlaeError::UnsupportedOperation(
                "CGM-Eisenstat requires a matrix layout with a triangular split".to_string(),
            )
        })?;
        self.allocate_temps(device, x.len());
        let (Some(tmp), Some(scratch)) = (self.temps.as_mut(), self.scratch.as_ref()) else {
            return Err(SlaeError::Internal(
                "CGM-Eisenstat working vectors missing after allocation".to_string(),
            ));
        };

        let mut x_gpu = device.create_vector("eisenstat x", x);
        let b_gpu = device.create_vector("eisenstat b", b);

        // r_hat = (L + D)^-1 (b - A x).
        matrix.mul(&x_gpu, &mut tmp.r_stroke)?;
        tmp.r_hat.clone_from(&b_gpu)?;
        device.axpy(-1.0, &tmp.r_stroke, &mut tmp.r_hat)?;
        halves.inv_lmul(&mut tmp.r_hat)?;

        // r' = D r_hat, p = r'.
        tmp.r_stroke.clone_from(&tmp.r_hat)?;
        device.mul_in_place(&mut tmp.r_stroke, matrix.di())?;
        tmp.p.clone_from(&tmp.r_stroke)?;

        let mut rr0 = device.dot(&tmp.r_hat, &tmp.r_stroke, scratch).await?;
        let bb = device.dot(&b_gpu, &b_gpu, scratch).await?;

        let mut iter = 0;
        while iter < self.max_iter {
            if self
                .cancel
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
            {
                log::info!("CGM-Eisenstat cancelled after {} iterations", iter);
                break;
            }
            iter += 1;

            // t = (D + U)^-1 p.
            tmp.t.clone_from(&tmp.p)?;
            halves.inv_umul(&mut tmp.t)?;

            // Ap = t + (L + D)^-1 (p - D t): the preconditioned matrix
            // applied to p without ever forming A.
            tmp.ap.clone_from(&tmp.t)?;
            device.mul_in_place(&mut tmp.ap, matrix.di())?;
            device.scale(-1.0, &mut tmp.ap)?;
            device.axpy(1.0, &tmp.p, &mut tmp.ap)?;
            halves.inv_lmul(&mut tmp.ap)?;
            device.axpy(1.0, &tmp.t, &mut tmp.ap)?;

            let pap = device.dot(&tmp.p, &tmp.ap, scratch).await?;
            let alpha = rr0 / pap;

            // The untransformed search direction is t, so x advances along it.
            device.axpy(alpha, &tmp.t, &mut x_gpu)?;
            device.axpy(-alpha, &tmp.ap, &mut tmp.r_hat)?;

            // r' = D r_hat.
            tmp.r_stroke.clone_from(&tmp.r_hat)?;
            device.mul_in_place(&mut tmp.r_stroke, matrix.di())?;

            let rr1 = device.dot(&tmp.r_hat, &tmp.r_stroke, scratch).await?;
            let beta = rr1 / rr0;

            // p = r' + beta p.
            device.scale(beta, &mut tmp.p)?;
            device.axpy(1.0, &tmp.r_stroke, &mut tmp.p)?;

            rr0 = rr1;

            let rr = device.dot(&tmp.r_hat, &tmp.r_hat, scratch).await?;
            if rr / bb < self.eps {
                break;
            }
        }

        // True residual of the returned solution, in the original system.
        matrix.mul(&x_gpu, &mut tmp.z)?;
        tmp.r_hat.clone_from(&b_gpu)?;
        device.axpy(-1.0, &tmp.z, &mut tmp.r_hat)?;
        let residual = device.dot(&tmp.r_hat, &tmp.r_hat, scratch).await?;

        let solution = x_gpu.read_contents().await?;
        x.copy_from_slice(&solution);

        log::info!(
            "CGM-Eisenstat finished: {} iterations, squared residual {:e}",
            iter,
            residual
        );
        Ok(SolveStats {
            residual,
            iterations: iter,
        })
    }
}
