//! Preconditioned biconjugate gradient stabilized (BiCGSTAB) for general
//! square systems. The Jacobi preconditioner is kept as `D^(-1/2)` and
//! applied twice per preconditioned vector, so symmetric systems see a
//! symmetric split.

use crate::algorithms::{validate_inputs, CancelToken, IterativeSolver, SolveStats};
use slae_core::{DotScratch, GpuDevice, GpuVector, Real, SlaeError, SolverMatrix};

struct Temps {
    r: GpuVector,
    r_hat: GpuVector,
    p: GpuVector,
    nu: GpuVector,
    h: GpuVector,
    s: GpuVector,
    t: GpuVector,
    di_inv: GpuVector,
    y: GpuVector,
    z: GpuVector,
    ks: GpuVector,
    kt: GpuVector,
}

/// BiCGSTAB with Jacobi preconditioning. The convergence threshold is an
/// absolute bound on the squared residual norm, checked twice per iteration
/// (on the half-step residual `s` and on the full residual `r`).
pub struct BiCgStab {
    max_iter: usize,
    eps: Real,
    cancel: Option<CancelToken>,
    size: usize,
    temps: Option<Temps>,
    scratch: Option<DotScratch>,
}

impl IterativeSolver for BiCgStab {
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
            log::debug!("BiCGSTAB: allocating working vectors for n = {}", n);
            self.size = n;
            self.temps = Some(Temps {
                r: device.create_empty_vector("bicgstab r", n),
                r_hat: device.create_empty_vector("bicgstab r_hat", n),
                p: device.create_empty_vector("bicgstab p", n),
                nu: device.create_empty_vector("bicgstab nu", n),
                h: device.create_empty_vector("bicgstab h", n),
                s: device.create_empty_vector("bicgstab s", n),
                t: device.create_empty_vector("bicgstab t", n),
                di_inv: device.create_empty_vector("bicgstab di_inv", n),
                y: device.create_empty_vector("bicgstab y", n),
                z: device.create_empty_vector("bicgstab z", n),
                ks: device.create_empty_vector("bicgstab ks", n),
                kt: device.create_empty_vector("bicgstab kt", n),
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
                "BiCGSTAB working vectors missing after allocation".to_string(),
            ));
        };

        let mut x_gpu = device.create_vector("bicgstab x", x);
        let b_gpu = device.create_vector("bicgstab b", b);

        // Preconditioner: di_inv = D^(-1/2).
        tmp.di_inv.clone_from(matrix.di())?;
        device.rsqrt_in_place(&mut tmp.di_inv)?;

        // r = b - A x, r_hat = r, p = r.
        matrix.mul(&x_gpu, &mut tmp.t)?;
        tmp.r.clone_from(&b_gpu)?;
        device.axpy(-1.0, &tmp.t, &mut tmp.r)?;
        tmp.r_hat.clone_from(&tmp.r)?;
        let mut pp = device.dot(&tmp.r, &tmp.r, scratch).await?;
        tmp.p.clone_from(&tmp.r)?;

        let mut iter = 0;
        while iter < self.max_iter {
            if self
                .cancel
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
            {
                log::info!("BiCGSTAB cancelled after {} iterations", iter);
                break;
            }
            iter += 1;

            // y = M^-1 p.
            tmp.y.clone_from(&tmp.p)?;
            device.mul_in_place(&mut tmp.y, &tmp.di_inv)?;
            device.mul_in_place(&mut tmp.y, &tmp.di_inv)?;
            // nu = A y.
            matrix.mul(&tmp.y, &mut tmp.nu)?;

            let rnu = device.dot(&tmp.r_hat, &tmp.nu, scratch).await?;
            let alpha = pp / rnu;

            // h = x + alpha y.
            tmp.h.clone_from(&x_gpu)?;
            device.axpy(alpha, &tmp.y, &mut tmp.h)?;

            // s = r - alpha nu.
            tmp.s.clone_from(&tmp.r)?;
            device.axpy(-alpha, &tmp.nu, &mut tmp.s)?;

            let ss = device.dot(&tmp.s, &tmp.s, scratch).await?;
            if ss < self.eps {
                // h is the answer.
                x_gpu.clone_from(&tmp.h)?;
                break;
            }

            // z = M^-1 s, keeping the half-preconditioned ks for the
            // omega dot products.
            tmp.ks.clone_from(&tmp.s)?;
            device.mul_in_place(&mut tmp.ks, &tmp.di_inv)?;
            tmp.z.clone_from(&tmp.ks)?;
            device.mul_in_place(&mut tmp.z, &tmp.di_inv)?;

            // t = A z, kt = D^(-1/2) t.
            matrix.mul(&tmp.z, &mut tmp.t)?;
            tmp.kt.clone_from(&tmp.t)?;
            device.mul_in_place(&mut tmp.kt, &tmp.di_inv)?;

            let ts = device.dot(&tmp.ks, &tmp.kt, scratch).await?;
            let tt = device.dot(&tmp.kt, &tmp.kt, scratch).await?;
            let omega = ts / tt;

            // x = h + omega z.
            x_gpu.clone_from(&tmp.h)?;
            device.axpy(omega, &tmp.z, &mut x_gpu)?;

            // r = s - omega t.
            tmp.r.clone_from(&tmp.s)?;
            device.axpy(-omega, &tmp.t, &mut tmp.r)?;

            let rr = device.dot(&tmp.r, &tmp.r, scratch).await?;
            if rr < self.eps {
                break;
            }

            let pp1 = device.dot(&tmp.r, &tmp.r_hat, scratch).await?;
            let beta = (pp1 / pp) * (alpha / omega);

            // p = r + beta (p - omega nu), fused in one kernel.
            device.p_update(&mut tmp.p, &tmp.r, &tmp.nu, omega, beta)?;

            pp = pp1;
        }

        // True residual of the returned solution.
        matrix.mul(&x_gpu, &mut tmp.t)?;
        tmp.r.clone_from(&b_gpu)?;
        device.axpy(-1.0, &tmp.t, &mut tmp.r)?;
        let residual = device.dot(&tmp.r, &tmp.r, scratch).await?;

        let solution = x_gpu.read_contents().await?;
        x.copy_from_slice(&solution);

        log::info!(
            "BiCGSTAB finished: {} iterations, squared residual {:e}",
            iter,
            residual
        );
        Ok(SolveStats {
            residual,
            iterations: iter,
        })
    }
}
