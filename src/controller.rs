//! The MPC controller: owns the formulation, the caches and the solver
//! session, and drives them across control steps.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized --initialize_solver()--> Initialized --update_solver()--> Ready
//! ```
//!
//! `initialize_solver` pays the one-time structural cost (rollout matrices,
//! Hessian, constraint stacking, session construction). Every later step
//! refreshes only the parts of the QP that depend on the new (Y_d, x0) — the
//! gradient, plus the state-bound RHS slice for the fifth variant — through
//! the adapter's partial-update paths. `solve` never changes controller
//! state and may be repeated.
//!
//! A controller instance is single-threaded: all cached matrices and the
//! solver session are mutated in place, so callers must serialize access
//! (one controller per control loop).

use std::time::{Duration, Instant};

use log::{debug, warn};
use nalgebra::DVector;

use crate::cost::{self, BoundSpec, Formulation, UpdateCache, WeightSpec};
use crate::error::MpcError;
use crate::qp::QpProblem;
use crate::rollout::RolloutMatrices;
use crate::solver::{QpSolverAdapter, SolveStatus, SolverConfig};
use crate::system::LinearSystem;

/// Result of one solve: the stacked input sequence plus the solver outcome.
///
/// The solution vector is populated even on non-converged outcomes (best
/// iterate for iteration/time limits); check [`MpcSolution::is_feasible`]
/// before applying it.
#[derive(Clone, Debug)]
pub struct MpcSolution {
    /// Stacked optimal input sequence U = [u_0; ...; u_{N-1}].
    pub u: DVector<f64>,
    /// Solver termination status.
    pub status: SolveStatus,
    /// Wall-clock time spent in the solver.
    pub solve_time: Duration,
}

impl MpcSolution {
    /// False only when the QP was reported primal-infeasible.
    pub fn is_feasible(&self) -> bool {
        self.status.is_feasible()
    }
}

/// Linear reference-tracking MPC controller.
#[derive(Debug)]
pub struct MpcController {
    system: LinearSystem,
    horizon: usize,
    y_d: DVector<f64>,
    x0: DVector<f64>,
    weights: WeightSpec,
    bounds: Option<BoundSpec>,
    config: SolverConfig,
    formulation: Formulation,

    rollout: Option<RolloutMatrices>,
    cache: Option<UpdateCache>,
    problem: Option<QpProblem>,
    adapter: Option<QpSolverAdapter>,
}

impl MpcController {
    /// Construct a controller; the formulation variant is chosen implicitly
    /// from which optional arguments are supplied and never changes.
    ///
    /// All shape validation happens here, before any solver exists: horizon,
    /// reference and initial-state lengths, weight-block shapes, bound
    /// vector lengths.
    pub fn new(
        system: LinearSystem,
        horizon: usize,
        y_d: DVector<f64>,
        x0: DVector<f64>,
        weights: WeightSpec,
        bounds: Option<BoundSpec>,
        config: SolverConfig,
    ) -> Result<Self, MpcError> {
        if horizon == 0 {
            return Err(MpcError::Formulation("prediction horizon must be at least 1"));
        }
        if y_d.len() != horizon * system.n_y() {
            return Err(MpcError::dims(
                "Y_d",
                (horizon * system.n_y(), 1),
                (y_d.len(), 1),
            ));
        }
        if x0.len() != system.n_x() {
            return Err(MpcError::dims("x0", (system.n_x(), 1), (x0.len(), 1)));
        }
        cost::validate_weights(&weights, system.n_u(), system.n_x())?;
        if let Some(b) = &bounds {
            cost::validate_bounds(b, system.n_u(), system.n_x())?;
        }
        let formulation = cost::select(&weights, bounds.as_ref())?;

        Ok(Self {
            system,
            horizon,
            y_d,
            x0,
            weights,
            bounds,
            config,
            formulation,
            rollout: None,
            cache: None,
            problem: None,
            adapter: None,
        })
    }

    /// The structurally-selected formulation variant.
    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    /// Prediction horizon N.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// The underlying system model.
    pub fn system(&self) -> &LinearSystem {
        &self.system
    }

    /// Replace the reference trajectory; takes effect at the next
    /// `initialize_solver`/`update_solver` call.
    pub fn set_reference(&mut self, y_d: DVector<f64>) -> Result<(), MpcError> {
        if y_d.len() != self.horizon * self.system.n_y() {
            return Err(MpcError::dims(
                "Y_d",
                (self.horizon * self.system.n_y(), 1),
                (y_d.len(), 1),
            ));
        }
        self.y_d = y_d;
        Ok(())
    }

    /// Build the rollout matrices (once), assemble the variant's QP and
    /// start the solver session.
    pub fn initialize_solver(&mut self) -> Result<(), MpcError> {
        let rollout = RolloutMatrices::build(&self.system, self.horizon)?;
        let (problem, cache) = cost::assemble(
            &rollout,
            &self.weights,
            self.bounds.as_ref(),
            self.formulation,
            &self.y_d,
            &self.x0,
        )?;
        let adapter = QpSolverAdapter::initialize(&problem, self.config)?;
        debug!(
            "mpc initialized: {:?}, horizon {}, {} decision variables, {} inequality rows",
            self.formulation,
            self.horizon,
            problem.n(),
            problem.b_ieq.len()
        );

        self.rollout = Some(rollout);
        self.cache = Some(cache);
        self.problem = Some(problem);
        self.adapter = Some(adapter);
        Ok(())
    }

    /// Refresh the QP for a new reference and initial state.
    ///
    /// Derives the gradient (and, for the state-bounded variant, the
    /// trailing inequality RHS) from the cached products and pushes it
    /// through the adapter's partial-update path. The Hessian and the
    /// structural constraint matrix are untouched.
    pub fn update_solver(&mut self, y_d: &DVector<f64>, x0: &DVector<f64>) -> Result<(), MpcError> {
        if y_d.len() != self.horizon * self.system.n_y() {
            return Err(MpcError::dims(
                "Y_d",
                (self.horizon * self.system.n_y(), 1),
                (y_d.len(), 1),
            ));
        }
        if x0.len() != self.system.n_x() {
            return Err(MpcError::dims("x0", (self.system.n_x(), 1), (x0.len(), 1)));
        }

        let cache = self.cache.as_ref().ok_or(MpcError::NotInitialized)?;
        let gradient = cache.gradient(y_d, x0);
        let rhs_tail = cache.state_bound_rhs(x0);

        let problem = self.problem.as_mut().ok_or(MpcError::NotInitialized)?;
        let adapter = self.adapter.as_mut().ok_or(MpcError::NotInitialized)?;

        problem.gradient.copy_from(&gradient);
        match &rhs_tail {
            Some(tail) => {
                let m = problem.b_ieq.len();
                problem.b_ieq.rows_mut(m - tail.len(), tail.len()).copy_from(tail);
                adapter.update_gradient_and_bounds(&gradient, tail)?;
            }
            None => adapter.update_gradient(&gradient)?,
        }

        self.y_d.copy_from(y_d);
        self.x0.copy_from(x0);
        debug!("mpc updated for new reference/state");
        Ok(())
    }

    /// Solve the QP for the current (Y_d, x0).
    ///
    /// Blocking, bounded by the configured time limit. Infeasibility and
    /// limit expiry are reported through the returned status, never as
    /// errors.
    pub fn solve(&mut self) -> Result<MpcSolution, MpcError> {
        let adapter = self.adapter.as_mut().ok_or(MpcError::NotInitialized)?;
        let start = Instant::now();
        let (u, status) = adapter.solve();
        let solve_time = start.elapsed();

        if !status.is_feasible() {
            warn!("qp reported primal infeasible after {solve_time:?}");
        } else {
            debug!("qp solved: {status:?} in {solve_time:?}");
        }
        Ok(MpcSolution {
            u,
            status,
            solve_time,
        })
    }

    /// Predicted state trajectory X = A_mpc·U + B_mpc·x0 for a stacked
    /// input sequence.
    pub fn calculate_x(&self, u: &DVector<f64>) -> Result<DVector<f64>, MpcError> {
        let rollout = self.rollout.as_ref().ok_or(MpcError::NotInitialized)?;
        self.check_u_len(u)?;
        Ok(&rollout.a_mpc_dense * u + &rollout.b_mpc_dense * &self.x0)
    }

    /// Predicted output trajectory Y = C_mpc·X, via the cached output maps.
    pub fn calculate_y(&self, u: &DVector<f64>) -> Result<DVector<f64>, MpcError> {
        let rollout = self.rollout.as_ref().ok_or(MpcError::NotInitialized)?;
        self.check_u_len(u)?;
        Ok(&rollout.c_a * u + &rollout.c_b * &self.x0)
    }

    /// De-interleave a stacked input sequence into n_u per-channel
    /// sequences of length N, preserving horizon order.
    pub fn extract_u(&self, u: &DVector<f64>) -> Result<Vec<Vec<f64>>, MpcError> {
        self.check_u_len(u)?;
        Ok(de_interleave(u, self.system.n_u(), self.horizon))
    }

    /// Predicted states as n_x per-channel sequences of length N.
    pub fn extract_x(&self, u: &DVector<f64>) -> Result<Vec<Vec<f64>>, MpcError> {
        let x = self.calculate_x(u)?;
        Ok(de_interleave(&x, self.system.n_x(), self.horizon))
    }

    /// Predicted outputs as n_y per-channel sequences of length N.
    pub fn extract_y(&self, u: &DVector<f64>) -> Result<Vec<Vec<f64>>, MpcError> {
        let y = self.calculate_y(u)?;
        Ok(de_interleave(&y, self.system.n_y(), self.horizon))
    }

    fn check_u_len(&self, u: &DVector<f64>) -> Result<(), MpcError> {
        let expected = self.horizon * self.system.n_u();
        if u.len() != expected {
            return Err(MpcError::dims("U", (expected, 1), (u.len(), 1)));
        }
        Ok(())
    }
}

/// Split a stacked per-step vector into one sequence per channel.
fn de_interleave(v: &DVector<f64>, channels: usize, steps: usize) -> Vec<Vec<f64>> {
    (0..channels)
        .map(|ch| (0..steps).map(|k| v[k * channels + ch]).collect())
        .collect()
}
