use slae_solvers::{
    BiCgStab, Cgm, CgmEisenstat, DiagMatrix, DiagMatrixGpu, GpuDevice, IterativeSolver, Real,
};
use std::time::Instant;

/// Builds a symmetric banded matrix A of size n x n.
/// Diagonals:
/// - Main: 6.0
/// - Adjacent (+1, -1): -1.0
/// - Outer (+(gap+1), -(gap+1)): -0.5
fn create_banded_matrix(n: usize, gap: usize) -> DiagMatrix {
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

/// Creates a vector b of size n with b[i] = sin(i / n).
fn create_sin_vector(n: usize) -> Vec<Real> {
    (0..n).map(|i| (i as Real / n as Real).sin()).collect()
}

async fn run_solver(
    name: &str,
    solver: &mut impl IterativeSolver,
    device: &GpuDevice,
    matrix: &DiagMatrixGpu,
    b: &[Real],
) {
    let mut x = vec![0.0; b.len()];
    let start = Instant::now();
    match solver.solve(device, matrix, b, &mut x).await {
        Ok(stats) => {
            log::info!(
                "{}: solved in {:?}, {} iterations, squared residual {:e}",
                name,
                start.elapsed(),
                stats.iterations,
                stats.residual
            );
            log::info!("{}: x[0..4] = {:?}", name, &x[..4.min(x.len())]);
        }
        Err(e) => log::error!("{}: solve failed: {}", name, e),
    }
}

fn main() {
    // Initialize logging based on RUST_LOG environment variable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .init();

    pollster::block_on(async {
        let n = 500;
        let gap = 10;
        log::info!("Setting up {}x{} banded matrix A and sin vector b...", n, n);
        let matrix = create_banded_matrix(n, gap);
        let b = create_sin_vector(n);

        let device = match GpuDevice::new().await {
            Ok(device) => device,
            Err(e) => {
                log::error!("Failed to initialize GPU device: {}", e);
                return;
            }
        };

        let gpu_matrix = match device.create_diag_matrix(&matrix) {
            Ok(m) => m,
            Err(e) => {
                log::error!("Failed to upload matrix: {}", e);
                return;
            }
        };

        run_solver(
            "BiCGSTAB",
            &mut BiCgStab::new(1000, 1e-10),
            &device,
            &gpu_matrix,
            &b,
        )
        .await;
        run_solver("CGM", &mut Cgm::new(1000, 1e-8), &device, &gpu_matrix, &b).await;
        run_solver(
            "CGM-Eisenstat",
            &mut CgmEisenstat::new(1000, 10.0),
            &device,
            &gpu_matrix,
            &b,
        )
        .await;

        let (up, down) = device.get_transfer_stats();
        log::info!("Transferred {} bytes to GPU, {} bytes back", up, down);
    });
}
