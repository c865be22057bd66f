use pollster::block_on;
use slae_core::{
    DiagMatrix, GpuDevice, MsrMatrix, Real, SlaeError, SolverMatrix, SymDiagMatrix,
    TriangularSplit,
};

/// Acquires a GPU device, or `None` when the host has no usable adapter so
/// the test can skip instead of failing.
async fn gpu() -> Option<GpuDevice> {
    match GpuDevice::new().await {
        Ok(device) => Some(device),
        Err(e) => {
            eprintln!("skipping GPU test: {}", e);
            None
        }
    }
}

fn assert_approx_eq_vec(actual: &[Real], expected: &[Real], tolerance: Real) {
    assert_eq!(actual.len(), expected.len(), "Vector lengths differ");
    for i in 0..actual.len() {
        let diff = (actual[i] - expected[i]).abs();
        assert!(
            diff <= tolerance,
            "Mismatch at index {}: expected {}, got {}, diff {}",
            i,
            expected[i],
            actual[i],
            diff
        );
    }
}

fn sample_vec(n: usize, phase: Real) -> Vec<Real> {
    (0..n).map(|i| (i as Real * 0.37 + phase).sin()).collect()
}

fn banded_sample(n: usize, gap: usize) -> DiagMatrix {
    let mut m = DiagMatrix::zeros(n, gap);
    for i in 0..n {
        m.di[i] = 10.0 + (i % 3) as Real;
        if i >= 1 {
            m.ld0[i] = -1.0;
        }
        if i >= gap + 1 {
            m.ld1[i] = 0.5;
        }
        if i >= gap + 2 {
            m.ld2[i] = -0.25;
        }
        if i >= gap + 3 {
            m.ld3[i] = 0.125;
        }
        if i + 1 < n {
            m.rd0[i] = -1.5;
        }
        if i + gap + 1 < n {
            m.rd1[i] = 0.75;
        }
        if i + gap + 2 < n {
            m.rd2[i] = -0.375;
        }
        if i + gap + 3 < n {
            m.rd3[i] = 0.1875;
        }
    }
    m
}

#[test]
fn axpy_and_scale_match_host() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let n = 777; // not a multiple of the workgroup size
        let x_data = sample_vec(n, 0.0);
        let y_data = sample_vec(n, 1.0);

        let x = device.create_vector("x", &x_data);
        let mut y = device.create_vector("y", &y_data);

        device.axpy(2.5, &x, &mut y)?;
        device.scale(-0.5, &mut y)?;

        let expected: Vec<Real> = x_data
            .iter()
            .zip(&y_data)
            .map(|(xi, yi)| -0.5 * (yi + 2.5 * xi))
            .collect();
        assert_approx_eq_vec(&y.read_contents().await?, &expected, 1e-5);
        Ok(())
    })
}

#[test]
fn axpy_zero_and_scale_one_are_identity() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let n = 256;
        let x_data = sample_vec(n, 0.3);
        let y_data = sample_vec(n, 0.9);
        let x = device.create_vector("x", &x_data);
        let mut y = device.create_vector("y", &y_data);

        device.axpy(0.0, &x, &mut y)?;
        device.scale(1.0, &mut y)?;

        assert_approx_eq_vec(&y.read_contents().await?, &y_data, 0.0);
        Ok(())
    })
}

#[test]
fn dot_matches_host_reduction() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        // Larger than one grid-stride pass of the reduction.
        let n = 64 * 64 * 3 + 17;
        let x_data = sample_vec(n, 0.0);
        let y_data = sample_vec(n, 2.0);
        let x = device.create_vector("x", &x_data);
        let y = device.create_vector("y", &y_data);
        let scratch = device.create_dot_scratch();

        let gpu_dot = device.dot(&x, &y, &scratch).await?;
        let host_dot: Real = x_data.iter().zip(&y_data).map(|(a, b)| a * b).sum();

        assert!(
            (gpu_dot - host_dot).abs() <= 1e-2 * host_dot.abs().max(1.0),
            "dot mismatch: gpu {} host {}",
            gpu_dot,
            host_dot
        );

        // Symmetry.
        let gpu_dot_rev = device.dot(&y, &x, &scratch).await?;
        assert!((gpu_dot - gpu_dot_rev).abs() <= 1e-4 * gpu_dot.abs().max(1.0));
        Ok(())
    })
}

#[test]
fn rsqrt_and_vecmul_build_jacobi_factors() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let n = 300;
        let di_data: Vec<Real> = (0..n).map(|i| 4.0 + (i % 5) as Real).collect();
        let mut di_inv = device.create_vector("di_inv", &di_data);
        device.rsqrt_in_place(&mut di_inv)?;

        // Applying D^(-1/2) twice to the diagonal itself gives ones.
        let mut y = device.create_vector("y", &di_data);
        device.mul_in_place(&mut y, &di_inv)?;
        device.mul_in_place(&mut y, &di_inv)?;
        assert_approx_eq_vec(&y.read_contents().await?, &vec![1.0; n], 1e-5);
        Ok(())
    })
}

#[test]
fn p_update_matches_unfused_sequence() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let n = 513;
        let p_data = sample_vec(n, 0.1);
        let r_data = sample_vec(n, 0.2);
        let nu_data = sample_vec(n, 0.3);
        let (omega, beta) = (0.8, 1.3);

        let mut p = device.create_vector("p", &p_data);
        let r = device.create_vector("r", &r_data);
        let nu = device.create_vector("nu", &nu_data);
        device.p_update(&mut p, &r, &nu, omega, beta)?;

        let expected: Vec<Real> = (0..n)
            .map(|i| r_data[i] + beta * (p_data[i] - omega * nu_data[i]))
            .collect();
        assert_approx_eq_vec(&p.read_contents().await?, &expected, 1e-5);
        Ok(())
    })
}

#[test]
fn diag_matrix_mul_matches_host() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (400, 7);
        let m = banded_sample(n, gap);
        let v_data = sample_vec(n, 0.5);

        let gpu_m = device.create_diag_matrix(&m)?;
        let v = device.create_vector("v", &v_data);
        let mut res = device.create_empty_vector("res", n);
        gpu_m.mul(&v, &mut res)?;

        assert_approx_eq_vec(&res.read_contents().await?, &m.mul_vec(&v_data), 1e-4);
        Ok(())
    })
}

#[test]
fn diag_matrix_triangular_ops_match_host() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (200, 4);
        let m = banded_sample(n, gap);
        let v_data = sample_vec(n, 1.5);

        let gpu_m = device.create_diag_matrix(&m)?;
        let halves = gpu_m.halves().expect("banded layout has a split");
        let v = device.create_vector("v", &v_data);
        let mut res = device.create_empty_vector("res", n);

        halves.lmul(&v, &mut res)?;
        assert_approx_eq_vec(&res.read_contents().await?, &m.l_mul_vec(&v_data), 1e-4);

        halves.umul(&v, &mut res)?;
        assert_approx_eq_vec(&res.read_contents().await?, &m.u_mul_vec(&v_data), 1e-4);
        Ok(())
    })
}

#[test]
fn diag_matrix_substitutions_invert_the_factors() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (150, 3);
        let m = banded_sample(n, gap);
        let y0 = sample_vec(n, 0.7);
        let gpu_m = device.create_diag_matrix(&m)?;
        let halves = gpu_m.halves().expect("banded layout has a split");

        // Forward: f = (L + D) y0, solve back to y0.
        let f = m.l_mul_vec(&y0);
        let mut x = device.create_vector("f", &f);
        halves.inv_lmul(&mut x)?;
        assert_approx_eq_vec(&x.read_contents().await?, &y0, 1e-3);

        // Backward: f = (D + U) y0 = U y0 + D y0.
        let f: Vec<Real> = m
            .u_mul_vec(&y0)
            .iter()
            .zip(m.di.iter().zip(&y0))
            .map(|(u, (d, y))| u + d * y)
            .collect();
        let mut x = device.create_vector("f", &f);
        halves.inv_umul(&mut x)?;
        assert_approx_eq_vec(&x.read_contents().await?, &y0, 1e-3);
        Ok(())
    })
}

#[test]
fn msr_matrix_ops_match_host() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (120, 5);
        // Build the MSR matrix from the banded reference so the host
        // routines cross-check each other.
        let banded = banded_sample(n, gap);
        let dense: Vec<Vec<Real>> = (0..n)
            .map(|i| {
                let mut e = vec![0.0; n];
                e[i] = 1.0;
                banded.mul_vec(&e)
            })
            .collect();
        // mul_vec of a unit vector gives a column; transpose to rows.
        let dense_rows: Vec<Vec<Real>> = (0..n).map(|i| (0..n).map(|j| dense[j][i]).collect()).collect();
        let m = MsrMatrix::from_dense(&dense_rows)?;
        let v_data = sample_vec(n, 0.25);

        let gpu_m = device.create_msr_matrix(&m)?;
        let v = device.create_vector("v", &v_data);
        let mut res = device.create_empty_vector("res", n);

        gpu_m.mul(&v, &mut res)?;
        assert_approx_eq_vec(&res.read_contents().await?, &m.mul_vec(&v_data), 1e-3);

        let halves = gpu_m.halves().expect("MSR layout has a split");
        halves.lmul(&v, &mut res)?;
        assert_approx_eq_vec(&res.read_contents().await?, &m.l_mul_vec(&v_data), 1e-3);

        halves.umul(&v, &mut res)?;
        assert_approx_eq_vec(&res.read_contents().await?, &m.u_mul_vec(&v_data), 1e-3);

        // Substitutions invert the factors.
        let y0 = sample_vec(n, 0.6);
        let f = m.l_mul_vec(&y0);
        let mut x = device.create_vector("f", &f);
        halves.inv_lmul(&mut x)?;
        assert_approx_eq_vec(&x.read_contents().await?, &y0, 1e-3);

        let f: Vec<Real> = m
            .u_mul_vec(&y0)
            .iter()
            .zip(m.di().iter().zip(&y0))
            .map(|(u, (d, y))| u + d * y)
            .collect();
        let mut x = device.create_vector("f", &f);
        halves.inv_umul(&mut x)?;
        assert_approx_eq_vec(&x.read_contents().await?, &y0, 1e-3);
        Ok(())
    })
}

#[test]
fn sym_diag_matrix_mul_matches_host_and_has_no_split() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (180, 6);
        let mut m = SymDiagMatrix::zeros(n, gap);
        for i in 0..n {
            m.di[i] = 8.0;
            if i >= 1 {
                m.d0[i] = -1.0;
            }
            if i >= gap + 1 {
                m.d1[i] = 0.5;
            }
            if i >= gap + 2 {
                m.d2[i] = -0.25;
            }
            if i >= gap + 3 {
                m.d3[i] = 0.125;
            }
        }
        let v_data = sample_vec(n, 0.45);

        let gpu_m = device.create_sym_diag_matrix(&m)?;
        let v = device.create_vector("v", &v_data);
        let mut res = device.create_empty_vector("res", n);
        gpu_m.mul(&v, &mut res)?;

        assert_approx_eq_vec(&res.read_contents().await?, &m.mul_vec(&v_data), 1e-4);
        assert!(gpu_m.halves().is_none());
        Ok(())
    })
}

#[test]
fn transfer_stats_count_uploads_and_readbacks() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        device.reset_transfer_stats();
        let data = sample_vec(64, 0.0);
        let v = device.create_vector("v", &data);
        let _ = v.read_contents().await?;

        let (up, down) = device.get_transfer_stats();
        let bytes = (64 * std::mem::size_of::<Real>()) as u64;
        assert!(up >= bytes);
        assert!(down >= bytes);

        device.reset_transfer_stats();
        assert_eq!(device.get_transfer_stats(), (0, 0));
        Ok(())
    })
}
