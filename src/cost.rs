//! Quadratic cost and constraint assembly for the five formulation variants.
//!
//! Each variant condenses the tracking problem onto the stacked input
//! sequence U using the rollout maps C_A = C_mpc·A_mpc and C_B = C_mpc·B_mpc:
//!
//! ```text
//! scalar weights:  J = Q‖C_A U + C_B x0 − Y_d‖² + R‖U‖²
//! matrix weights:  J = W_y‖C_A U + C_B x0 − Y_d‖² + ‖W_u U‖² + ‖W_x X‖²
//! ```
//!
//! so the Hessian and constraint structure are fixed for the controller's
//! lifetime and only the gradient (plus, for state bounds, the trailing
//! inequality RHS slice) depends on the per-step (Y_d, x0). The products
//! needed for that refresh are cached at assembly time and never rebuilt.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::error::MpcError;
use crate::qp::QpProblem;
use crate::rollout::RolloutMatrices;
use crate::sparse::{block_diagonal, csc_to_dense, identity, insert_block, scaled};

/// Tracking/effort weighting: a scalar pair or per-step matrix blocks.
#[derive(Clone, Debug)]
pub enum WeightSpec {
    /// Q‖Y − Y_d‖² + R‖U‖².
    Scalar { q: f64, r: f64 },
    /// W_y‖Y − Y_d‖² + ‖W_u U‖² + ‖W_x X‖², with w_u (n_u×n_u) and
    /// w_x (n_x×n_x) promoted to block-diagonal form across the horizon.
    Matrix {
        w_y: f64,
        w_u: CscMatrix<f64>,
        w_x: CscMatrix<f64>,
    },
}

/// Per-step box bounds on inputs and, optionally, states.
///
/// Vectors are per-step (length n_u / n_x) and are tiled across the horizon
/// during assembly. Supplying bounds selects a bound-constrained variant;
/// supplying the state pair selects the state-bounded one.
#[derive(Clone, Debug)]
pub struct BoundSpec {
    pub u_lower: DVector<f64>,
    pub u_upper: DVector<f64>,
    pub x_lower: Option<DVector<f64>>,
    pub x_upper: Option<DVector<f64>>,
}

impl BoundSpec {
    /// Input box bounds only.
    pub fn input(u_lower: DVector<f64>, u_upper: DVector<f64>) -> Self {
        Self {
            u_lower,
            u_upper,
            x_lower: None,
            x_upper: None,
        }
    }

    /// Input and state box bounds.
    pub fn input_and_state(
        u_lower: DVector<f64>,
        u_upper: DVector<f64>,
        x_lower: DVector<f64>,
        x_upper: DVector<f64>,
    ) -> Self {
        Self {
            u_lower,
            u_upper,
            x_lower: Some(x_lower),
            x_upper: Some(x_upper),
        }
    }
}

/// The closed set of formulation strategies.
///
/// Selected once, structurally, from which constructor arguments were
/// supplied; never changes for the life of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Formulation {
    UnconstrainedScalar,
    UnconstrainedMatrix,
    InputBoundedScalar,
    InputBoundedMatrix,
    InputAndStateBoundedMatrix,
}

impl Formulation {
    /// Whether per-step updates must refresh the inequality RHS in addition
    /// to the gradient.
    pub fn updates_inequality_rhs(self) -> bool {
        matches!(self, Self::InputAndStateBoundedMatrix)
    }
}

/// Decide the variant from the supplied arguments.
pub(crate) fn select(
    weights: &WeightSpec,
    bounds: Option<&BoundSpec>,
) -> Result<Formulation, MpcError> {
    let Some(b) = bounds else {
        return Ok(match weights {
            WeightSpec::Scalar { .. } => Formulation::UnconstrainedScalar,
            WeightSpec::Matrix { .. } => Formulation::UnconstrainedMatrix,
        });
    };
    if b.x_lower.is_some() != b.x_upper.is_some() {
        return Err(MpcError::Formulation(
            "state bounds require both lower and upper vectors",
        ));
    }
    let has_state = b.x_lower.is_some();
    match (weights, has_state) {
        (WeightSpec::Scalar { .. }, false) => Ok(Formulation::InputBoundedScalar),
        (WeightSpec::Matrix { .. }, false) => Ok(Formulation::InputBoundedMatrix),
        (WeightSpec::Matrix { .. }, true) => Ok(Formulation::InputAndStateBoundedMatrix),
        (WeightSpec::Scalar { .. }, true) => Err(MpcError::Formulation(
            "state bounds require matrix weights",
        )),
    }
}

pub(crate) fn validate_weights(
    weights: &WeightSpec,
    n_u: usize,
    n_x: usize,
) -> Result<(), MpcError> {
    if let WeightSpec::Matrix { w_u, w_x, .. } = weights {
        if w_u.nrows() != n_u || w_u.ncols() != n_u {
            return Err(MpcError::dims("w_u", (n_u, n_u), (w_u.nrows(), w_u.ncols())));
        }
        if w_x.nrows() != n_x || w_x.ncols() != n_x {
            return Err(MpcError::dims("w_x", (n_x, n_x), (w_x.nrows(), w_x.ncols())));
        }
    }
    Ok(())
}

pub(crate) fn validate_bounds(bounds: &BoundSpec, n_u: usize, n_x: usize) -> Result<(), MpcError> {
    if bounds.u_lower.len() != n_u {
        return Err(MpcError::dims("u_lower", (n_u, 1), (bounds.u_lower.len(), 1)));
    }
    if bounds.u_upper.len() != n_u {
        return Err(MpcError::dims("u_upper", (n_u, 1), (bounds.u_upper.len(), 1)));
    }
    if let Some(x_lower) = &bounds.x_lower {
        if x_lower.len() != n_x {
            return Err(MpcError::dims("x_lower", (n_x, 1), (x_lower.len(), 1)));
        }
    }
    if let Some(x_upper) = &bounds.x_upper {
        if x_upper.len() != n_x {
            return Err(MpcError::dims("x_upper", (n_x, 1), (x_upper.len(), 1)));
        }
    }
    Ok(())
}

/// Tiled state-bound data for the per-step inequality RHS refresh.
#[derive(Clone, Debug)]
struct StateBoundData {
    b_mpc: DMatrix<f64>,
    x_lower: DVector<f64>,
    x_upper: DVector<f64>,
}

/// Products cached at assembly time so the per-step gradient (and state-bound
/// RHS) never rebuilds C_A, C_B, or W_x·A_mpc.
#[derive(Clone, Debug)]
pub(crate) struct UpdateCache {
    /// s·C_Aᵀ with s = Q (scalar) or W_y (matrix).
    s_ca_t: DMatrix<f64>,
    /// s·C_Aᵀ·C_B.
    s_ca_t_cb: DMatrix<f64>,
    /// W_x·A_mpc (matrix-weight variants only).
    wx_a: Option<DMatrix<f64>>,
    /// W_x·B_mpc (matrix-weight variants only).
    wx_b: Option<DMatrix<f64>>,
    state: Option<StateBoundData>,
}

impl UpdateCache {
    /// Gradient for a new (Y_d, x0), from cached products only.
    pub(crate) fn gradient(&self, y_d: &DVector<f64>, x0: &DVector<f64>) -> DVector<f64> {
        let mut g = &self.s_ca_t_cb * x0 - &self.s_ca_t * y_d;
        if let (Some(wx_a), Some(wx_b)) = (&self.wx_a, &self.wx_b) {
            g += wx_a.transpose() * (wx_b * x0);
        }
        2.0 * g
    }

    /// Trailing inequality RHS slice for a new x0: the state rows'
    /// `b_ieq` block `[B_mpc x0 − X_ub; X_lb − B_mpc x0]`.
    ///
    /// `None` for every variant except the state-bounded one.
    pub(crate) fn state_bound_rhs(&self, x0: &DVector<f64>) -> Option<DVector<f64>> {
        let state = self.state.as_ref()?;
        let bx = &state.b_mpc * x0;
        let rows = bx.len();
        let mut rhs = DVector::zeros(2 * rows);
        rhs.rows_mut(0, rows).copy_from(&(&bx - &state.x_upper));
        rhs.rows_mut(rows, rows).copy_from(&(&state.x_lower - &bx));
        Some(rhs)
    }
}

/// Build the QP for the selected variant together with its update cache.
///
/// The structure (Hessian, constraint matrix) is final; the returned
/// gradient and inequality RHS already reflect the initial (Y_d, x0).
pub(crate) fn assemble(
    rollout: &RolloutMatrices,
    weights: &WeightSpec,
    bounds: Option<&BoundSpec>,
    formulation: Formulation,
    y_d: &DVector<f64>,
    x0: &DVector<f64>,
) -> Result<(QpProblem, UpdateCache), MpcError> {
    let horizon = rollout.horizon;
    let n = horizon * rollout.n_u;
    let ca = &rollout.c_a;

    let (hessian, s_ca_t, wx_a, wx_b) = match weights {
        WeightSpec::Scalar { q, r } => {
            let hessian = 2.0 * (*q * (ca.transpose() * ca) + *r * DMatrix::identity(n, n));
            (hessian, *q * ca.transpose(), None, None)
        }
        WeightSpec::Matrix { w_y, w_u, w_x } => {
            validate_weights(weights, rollout.n_u, rollout.n_x)?;
            let w_u_full = csc_to_dense(&block_diagonal(w_u, horizon)?);
            let w_x_full = csc_to_dense(&block_diagonal(w_x, horizon)?);
            let wx_a = &w_x_full * &rollout.a_mpc_dense;
            let wx_b = &w_x_full * &rollout.b_mpc_dense;
            let hessian = 2.0
                * (*w_y * (ca.transpose() * ca)
                    + w_u_full.transpose() * &w_u_full
                    + wx_a.transpose() * &wx_a);
            (hessian, *w_y * ca.transpose(), Some(wx_a), Some(wx_b))
        }
    };
    let s_ca_t_cb = &s_ca_t * &rollout.c_b;

    let state = if formulation.updates_inequality_rhs() {
        let b = bounds.ok_or(MpcError::Formulation(
            "state-bounded formulation without bounds",
        ))?;
        let (Some(x_lower), Some(x_upper)) = (&b.x_lower, &b.x_upper) else {
            return Err(MpcError::Formulation(
                "state bounds require both lower and upper vectors",
            ));
        };
        Some(StateBoundData {
            b_mpc: rollout.b_mpc_dense.clone(),
            x_lower: tile(x_lower, horizon),
            x_upper: tile(x_upper, horizon),
        })
    } else {
        None
    };

    let cache = UpdateCache {
        s_ca_t,
        s_ca_t_cb,
        wx_a,
        wx_b,
        state,
    };
    let gradient = cache.gradient(y_d, x0);

    let problem = match formulation {
        Formulation::UnconstrainedScalar | Formulation::UnconstrainedMatrix => {
            QpProblem::unconstrained(hessian, gradient)
        }
        Formulation::InputBoundedScalar | Formulation::InputBoundedMatrix => {
            let b = bounds.ok_or(MpcError::Formulation(
                "bound-constrained formulation without bounds",
            ))?;
            validate_bounds(b, rollout.n_u, rollout.n_x)?;
            let (a_ieq, b_ieq) = input_rows(b, horizon, n)?;
            QpProblem::with_inequalities(hessian, gradient, a_ieq, b_ieq)
        }
        Formulation::InputAndStateBoundedMatrix => {
            let b = bounds.ok_or(MpcError::Formulation(
                "bound-constrained formulation without bounds",
            ))?;
            validate_bounds(b, rollout.n_u, rollout.n_x)?;
            let (input_a, input_b) = input_rows(b, horizon, n)?;

            // State bounds are projected onto U through X = A_mpc U + B_mpc x0:
            // rows [A_mpc; −A_mpc], RHS refreshed from x0 on every step.
            let state_rows = 2 * horizon * rollout.n_x;
            let m = input_b.len() + state_rows;
            let mut coo = CooMatrix::new(m, n);
            insert_block(&mut coo, &input_a, 0, 0)?;
            insert_block(&mut coo, &rollout.a_mpc, input_b.len(), 0)?;
            insert_block(
                &mut coo,
                &scaled(&rollout.a_mpc, -1.0),
                input_b.len() + horizon * rollout.n_x,
                0,
            )?;
            let a_ieq = CscMatrix::from(&coo);

            let state_rhs = cache.state_bound_rhs(x0).ok_or(MpcError::Formulation(
                "state-bounded formulation without state bounds",
            ))?;
            let mut b_ieq = DVector::zeros(m);
            b_ieq.rows_mut(0, input_b.len()).copy_from(&input_b);
            b_ieq
                .rows_mut(input_b.len(), state_rows)
                .copy_from(&state_rhs);

            QpProblem::with_inequalities(hessian, gradient, a_ieq, b_ieq)
        }
    };

    Ok((problem, cache))
}

/// Input box rows `[I; −I]·U + [−U_ub; U_lb] ≤ 0`, stacked via the block
/// inserter.
fn input_rows(
    bounds: &BoundSpec,
    horizon: usize,
    n: usize,
) -> Result<(CscMatrix<f64>, DVector<f64>), MpcError> {
    let eye = identity(n);
    let mut coo = CooMatrix::new(2 * n, n);
    insert_block(&mut coo, &eye, 0, 0)?;
    insert_block(&mut coo, &scaled(&eye, -1.0), n, 0)?;

    let u_ub = tile(&bounds.u_upper, horizon);
    let u_lb = tile(&bounds.u_lower, horizon);
    let mut b_ieq = DVector::zeros(2 * n);
    b_ieq.rows_mut(0, n).copy_from(&(-u_ub));
    b_ieq.rows_mut(n, n).copy_from(&u_lb);

    Ok((CscMatrix::from(&coo), b_ieq))
}

/// Repeat a per-step vector across the horizon.
fn tile(v: &DVector<f64>, n: usize) -> DVector<f64> {
    let len = v.len();
    DVector::from_fn(len * n, |i, _| v[i % len])
}
