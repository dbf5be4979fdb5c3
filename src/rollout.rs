//! Rollout matrices: the stacked-trajectory form of the system dynamics.
//!
//! Over a horizon of N steps the future states are an affine function of the
//! stacked input sequence U = [u_0; ...; u_{N-1}] and the initial state:
//!
//! ```text
//! X = A_mpc U + B_mpc x0        X = [x_1; ...; x_N]
//! Y = C_mpc X
//! ```
//!
//! A_mpc is block lower-triangular with block (i, j) = A^(i-j) B for j <= i,
//! B_mpc has row-block i = A^(i+1), and C_mpc is C repeated along the
//! diagonal. Powers of A are computed once and reused across row-blocks, so
//! construction costs O(N) matrix multiplications and O(N²) block inserts —
//! paid a single time per controller.

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::error::MpcError;
use crate::sparse::{csc_to_dense, insert_block, insert_dense_block, MatrixPowers};
use crate::system::LinearSystem;

/// Stacked rollout matrices for a fixed system and horizon.
///
/// Immutable for the lifetime of a controller: the system matrices are fixed,
/// so the rollout never changes after construction.
#[derive(Clone, Debug)]
pub struct RolloutMatrices {
    /// Input-to-state map (N·n_x × N·n_u), block lower-triangular.
    pub a_mpc: CscMatrix<f64>,
    /// Initial-state-to-state map (N·n_x × n_x).
    pub b_mpc: CscMatrix<f64>,
    /// Block-diagonal output map (N·n_y × N·n_x).
    pub c_mpc: CscMatrix<f64>,

    // Dense forms feeding the cost products and the per-step update caches.
    pub(crate) a_mpc_dense: DMatrix<f64>,
    pub(crate) b_mpc_dense: DMatrix<f64>,
    /// C_mpc · A_mpc, built block-wise.
    pub(crate) c_a: DMatrix<f64>,
    /// C_mpc · B_mpc, built block-wise.
    pub(crate) c_b: DMatrix<f64>,

    pub(crate) horizon: usize,
    pub(crate) n_x: usize,
    pub(crate) n_u: usize,
    pub(crate) n_y: usize,
}

impl RolloutMatrices {
    /// Build the rollout for `system` over `horizon` steps.
    pub fn build(system: &LinearSystem, horizon: usize) -> Result<Self, MpcError> {
        if horizon == 0 {
            return Err(MpcError::Formulation("prediction horizon must be at least 1"));
        }
        let (n_x, n_u, n_y) = (system.n_x(), system.n_u(), system.n_y());

        let a = csc_to_dense(system.a());
        let b = csc_to_dense(system.b());
        let c = csc_to_dense(system.c());

        // A^0..A^N once; A^d·B and C·A^d·B once per distinct diagonal d.
        let powers = MatrixPowers::new(&a, horizon);
        let ab: Vec<DMatrix<f64>> = (0..horizon).map(|d| powers.get(d) * &b).collect();
        let c_ab: Vec<DMatrix<f64>> = ab.iter().map(|blk| &c * blk).collect();

        let mut a_coo = CooMatrix::new(horizon * n_x, horizon * n_u);
        let mut b_coo = CooMatrix::new(horizon * n_x, n_x);
        let mut c_coo = CooMatrix::new(horizon * n_y, horizon * n_x);

        let mut a_dense = DMatrix::zeros(horizon * n_x, horizon * n_u);
        let mut b_dense = DMatrix::zeros(horizon * n_x, n_x);
        let mut c_a = DMatrix::zeros(horizon * n_y, horizon * n_u);
        let mut c_b = DMatrix::zeros(horizon * n_y, n_x);

        for i in 0..horizon {
            for j in 0..=i {
                let blk = &ab[i - j];
                insert_dense_block(&mut a_coo, blk, i * n_x, j * n_u)?;
                a_dense.view_mut((i * n_x, j * n_u), (n_x, n_u)).copy_from(blk);
                c_a.view_mut((i * n_y, j * n_u), (n_y, n_u))
                    .copy_from(&c_ab[i - j]);
            }

            let pw = powers.get(i + 1);
            insert_dense_block(&mut b_coo, pw, i * n_x, 0)?;
            b_dense.view_mut((i * n_x, 0), (n_x, n_x)).copy_from(pw);
            c_b.view_mut((i * n_y, 0), (n_y, n_x)).copy_from(&(&c * pw));

            insert_block(&mut c_coo, system.c(), i * n_y, i * n_x)?;
        }

        Ok(Self {
            a_mpc: CscMatrix::from(&a_coo),
            b_mpc: CscMatrix::from(&b_coo),
            c_mpc: CscMatrix::from(&c_coo),
            a_mpc_dense: a_dense,
            b_mpc_dense: b_dense,
            c_a,
            c_b,
            horizon,
            n_x,
            n_u,
            n_y,
        })
    }

    /// Prediction horizon N.
    pub fn horizon(&self) -> usize {
        self.horizon
    }
}
