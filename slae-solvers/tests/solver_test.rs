use pollster::block_on;
use slae_solvers::{
    BiCgStab, CancelToken, Cgm, CgmEisenstat, DiagMatrix, GpuDevice, IterativeSolver, MsrMatrix,
    Real, SlaeError, SymDiagMatrix,
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
            "Verification failed at index {}: expected {}, got {}, diff {}",
            i,
            expected[i],
            actual[i],
            diff
        );
    }
}

/// Symmetric positive-definite banded system: strong diagonal, symmetric
/// band pairs at offsets 1 and gap+1.
fn spd_banded(n: usize, gap: usize) -> DiagMatrix {
    let mut m = DiagMatrix::zeros(n, gap);
    for i in 0..n {
        m.di[i] = 6.0;
        if i >= 1 {
            m.ld0[i] = -1.0;
        }
        if i + 1 < n {
            m.rd0[i] = -1.0;
        }
        if i >= gap + 1 {
            m.ld1[i] = -0.5;
        }
        if i + gap + 1 < n {
            m.rd1[i] = -0.5;
        }
    }
    m
}

fn known_solution(n: usize) -> Vec<Real> {
    (0..n).map(|i| (i as Real * 0.21).cos()).collect()
}

#[test]
fn bicgstab_solves_banded_system() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (64, 4);
        let m = spd_banded(n, gap);
        let x_true = known_solution(n);
        let b = m.mul_vec(&x_true);

        let gpu_m = device.create_diag_matrix(&m)?;
        let mut solver = BiCgStab::new(1000, 1e-10);
        let mut x = vec![0.0; n];
        let stats = solver.solve(&device, &gpu_m, &b, &mut x).await?;

        assert!(stats.iterations > 0);
        assert!(
            stats.residual < 1e-6,
            "squared residual too large: {}",
            stats.residual
        );
        assert_approx_eq_vec(&x, &x_true, 1e-3);
        Ok(())
    })
}

#[test]
fn cgm_solves_banded_system() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (64, 4);
        let m = spd_banded(n, gap);
        let x_true = known_solution(n);
        let b = m.mul_vec(&x_true);

        let gpu_m = device.create_diag_matrix(&m)?;
        let mut solver = Cgm::new(1000, 1e-8);
        let mut x = vec![0.0; n];
        let stats = solver.solve(&device, &gpu_m, &b, &mut x).await?;

        assert!(stats.iterations > 0);
        assert!(
            stats.residual < 1e-4,
            "squared residual too large: {}",
            stats.residual
        );
        assert_approx_eq_vec(&x, &x_true, 1e-2);
        Ok(())
    })
}

#[test]
fn eisenstat_solves_banded_system() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (64, 4);
        let m = spd_banded(n, gap);
        let x_true = known_solution(n);
        let b = m.mul_vec(&x_true);

        let gpu_m = device.create_diag_matrix(&m)?;
        // The threshold is divided by 1e7 internally.
        let mut solver = CgmEisenstat::new(1000, 10.0);
        let mut x = vec![0.0; n];
        let stats = solver.solve(&device, &gpu_m, &b, &mut x).await?;

        assert!(stats.iterations > 0);
        assert!(
            stats.residual < 1e-4,
            "squared residual too large: {}",
            stats.residual
        );
        assert_approx_eq_vec(&x, &x_true, 1e-2);
        Ok(())
    })
}

#[test]
fn all_solvers_handle_identity_system() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let n = 40;
        let mut m = DiagMatrix::zeros(n, 3);
        m.di.iter_mut().for_each(|d| *d = 1.0);
        let gpu_m = device.create_diag_matrix(&m)?;
        let b = known_solution(n);

        let mut x = vec![0.0; n];
        let stats = BiCgStab::new(100, 1e-10)
            .solve(&device, &gpu_m, &b, &mut x)
            .await?;
        assert!(stats.iterations <= 2);
        assert_approx_eq_vec(&x, &b, 1e-4);

        let mut x = vec![0.0; n];
        Cgm::new(100, 1e-8).solve(&device, &gpu_m, &b, &mut x).await?;
        assert_approx_eq_vec(&x, &b, 1e-4);

        let mut x = vec![0.0; n];
        CgmEisenstat::new(100, 10.0)
            .solve(&device, &gpu_m, &b, &mut x)
            .await?;
        assert_approx_eq_vec(&x, &b, 1e-4);
        Ok(())
    })
}

#[test]
fn bicgstab_solves_msr_system() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        // Diagonally dominant random sparse system, fixed seed.
        let n = 80;
        fastrand::seed(42);
        let mut dense = vec![vec![0.0 as Real; n]; n];
        for (i, row) in dense.iter_mut().enumerate() {
            row[i] = 10.0 + fastrand::f32() as Real;
            for _ in 0..4 {
                let j = fastrand::usize(..n);
                if j != i {
                    row[j] = fastrand::f32() as Real - 0.5;
                }
            }
        }
        let m = MsrMatrix::from_dense(&dense)?;
        let x_true = known_solution(n);
        let b = m.mul_vec(&x_true);

        let gpu_m = device.create_msr_matrix(&m)?;
        let mut solver = BiCgStab::new(1000, 1e-10);
        let mut x = vec![0.0; n];
        let stats = solver.solve(&device, &gpu_m, &b, &mut x).await?;

        assert!(
            stats.residual < 1e-6,
            "squared residual too large: {}",
            stats.residual
        );
        assert_approx_eq_vec(&x, &x_true, 1e-3);
        Ok(())
    })
}

#[test]
fn eisenstat_rejects_layout_without_split() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let n = 16;
        let mut m = SymDiagMatrix::zeros(n, 2);
        m.di.iter_mut().for_each(|d| *d = 4.0);
        let gpu_m = device.create_sym_diag_matrix(&m)?;

        let mut solver = CgmEisenstat::new(100, 1.0);
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let err = solver.solve(&device, &gpu_m, &b, &mut x).await;
        assert!(matches!(err, Err(SlaeError::UnsupportedOperation(_))));
        Ok(())
    })
}

#[test]
fn cgm_solves_sym_diag_system() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (48, 3);
        let mut m = SymDiagMatrix::zeros(n, gap);
        for i in 0..n {
            m.di[i] = 6.0;
            if i >= 1 {
                m.d0[i] = -1.0;
            }
            if i >= gap + 1 {
                m.d1[i] = -0.5;
            }
        }
        let x_true = known_solution(n);
        let b = m.mul_vec(&x_true);

        let gpu_m = device.create_sym_diag_matrix(&m)?;
        let mut solver = Cgm::new(1000, 1e-8);
        let mut x = vec![0.0; n];
        let stats = solver.solve(&device, &gpu_m, &b, &mut x).await?;

        assert!(
            stats.residual < 1e-4,
            "squared residual too large: {}",
            stats.residual
        );
        assert_approx_eq_vec(&x, &x_true, 1e-2);
        Ok(())
    })
}

#[test]
fn solver_reuses_temps_across_solves() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (32, 2);
        let m = spd_banded(n, gap);
        let gpu_m = device.create_diag_matrix(&m)?;
        let mut solver = BiCgStab::new(1000, 1e-10);

        // allocate_temps twice with the same n must be harmless.
        solver.allocate_temps(&device, n);
        solver.allocate_temps(&device, n);

        for phase in [0.0 as Real, 1.0] {
            let x_true: Vec<Real> = (0..n).map(|i| (i as Real * 0.21 + phase).cos()).collect();
            let b = m.mul_vec(&x_true);
            let mut x = vec![0.0; n];
            let stats = solver.solve(&device, &gpu_m, &b, &mut x).await?;
            assert!(stats.residual < 1e-6);
            assert_approx_eq_vec(&x, &x_true, 1e-3);
        }
        Ok(())
    })
}

#[test]
fn iteration_cap_is_not_an_error() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (32, 2);
        let m = spd_banded(n, gap);
        let gpu_m = device.create_diag_matrix(&m)?;
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];

        // An unreachable threshold: the solver runs out of iterations and
        // still reports stats instead of failing.
        let mut solver = Cgm::new(3, 0.0);
        let stats = solver.solve(&device, &gpu_m, &b, &mut x).await?;
        assert_eq!(stats.iterations, 3);
        Ok(())
    })
}

#[test]
fn cancelled_solve_returns_immediately() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (32, 2);
        let m = spd_banded(n, gap);
        let gpu_m = device.create_diag_matrix(&m)?;
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];

        let token = CancelToken::new();
        token.cancel();
        let mut solver = BiCgStab::new(1000, 1e-10);
        solver.set_cancel_token(token);
        let stats = solver.solve(&device, &gpu_m, &b, &mut x).await?;

        assert_eq!(stats.iterations, 0);
        // No iteration ran, so the residual is b - A*0 = b.
        let bb: Real = b.iter().map(|v| v * v).sum();
        assert!((stats.residual - bb).abs() < 1e-3 * bb);
        Ok(())
    })
}

#[test]
fn solvers_agree_on_the_same_system() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let (n, gap) = (50, 5);
        let m = spd_banded(n, gap);
        let x_true = known_solution(n);
        let b = m.mul_vec(&x_true);
        let gpu_m = device.create_diag_matrix(&m)?;

        let mut x_bicgstab = vec![0.0; n];
        BiCgStab::new(1000, 1e-10)
            .solve(&device, &gpu_m, &b, &mut x_bicgstab)
            .await?;

        let mut x_cgm = vec![0.0; n];
        Cgm::new(1000, 1e-8)
            .solve(&device, &gpu_m, &b, &mut x_cgm)
            .await?;

        let mut x_eis = vec![0.0; n];
        CgmEisenstat::new(1000, 10.0)
            .solve(&device, &gpu_m, &b, &mut x_eis)
            .await?;

        assert_approx_eq_vec(&x_cgm, &x_bicgstab, 1e-2);
        assert_approx_eq_vec(&x_eis, &x_bicgstab, 1e-2);
        Ok(())
    })
}

#[test]
fn solve_rejects_mismatched_dimensions() -> Result<(), SlaeError> {
    block_on(async {
        let Some(device) = gpu().await else {
            return Ok(());
        };
        let m = spd_banded(16, 2);
        let gpu_m = device.create_diag_matrix(&m)?;
        let b = vec![1.0; 15]; // wrong length
        let mut x = vec![0.0; 16];
        let err = BiCgStab::new(10, 1e-8)
            .solve(&device, &gpu_m, &b, &mut x)
            .await;
        assert!(matches!(err, Err(SlaeError::InvalidDimensions(_))));
        Ok(())
    })
}
