//! QP solver adapter: one persistent Clarabel session per controller.
//!
//! The session is loaded once with the problem structure (Hessian in
//! upper-triangular CSC form, stacked constraint matrix [A_eq; A_ieq], cone
//! layout `[ZeroCone(m_eq), NonnegativeCone(m_ieq)]`, RHS `[−b_eq; −b_ieq]`).
//! The two partial-update paths replace only the gradient — or the gradient
//! plus the trailing inequality-RHS slice — and re-initialize the session
//! against the cached structure; the Hessian and constraint matrix are never
//! converted or loaded again.
//!
//! Infeasibility is an outcome, not an error: `solve` always returns the
//! primal vector together with a [`SolveStatus`], and callers check
//! [`SolveStatus::is_feasible`] before trusting the result.

use clarabel::algebra::CscMatrix as SolverCsc;
use clarabel::solver::SupportedConeT::{NonnegativeConeT, ZeroConeT};
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;

use crate::error::MpcError;
use crate::qp::QpProblem;
use crate::sparse::ZERO_EPS;

/// Solver session configuration. The tolerance and iteration defaults are
/// fixed for the library; only the time limit and verbosity are expected to
/// vary between deployments.
#[derive(Clone, Copy, Debug)]
pub struct SolverConfig {
    /// Absolute convergence tolerance.
    pub eps_abs: f64,
    /// Relative convergence tolerance.
    pub eps_rel: f64,
    /// Iteration cap.
    pub max_iter: u32,
    /// Wall-clock budget per solve in seconds; `None` leaves it unbounded.
    pub time_limit: Option<f64>,
    /// Print solver progress.
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            eps_abs: 1e-6,
            eps_rel: 1e-6,
            max_iter: 10_000,
            time_limit: None,
            verbose: false,
        }
    }
}

impl SolverConfig {
    /// Default configuration with a wall-clock budget, in seconds.
    pub fn with_time_limit(seconds: f64) -> Self {
        Self {
            time_limit: Some(seconds),
            ..Self::default()
        }
    }
}

/// Outcome of one solve call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Solved,
    AlmostSolved,
    /// Iteration cap reached; the returned vector is the best iterate.
    MaxIterations,
    /// Time limit expired; the returned vector is the best iterate. A normal
    /// termination, not an error.
    TimeLimit,
    PrimalInfeasible,
    DualInfeasible,
    NumericalError,
}

impl SolveStatus {
    /// False only when the problem was reported primal-infeasible.
    ///
    /// Meaningful immediately after the `solve` call that produced it.
    pub fn is_feasible(self) -> bool {
        !matches!(self, Self::PrimalInfeasible)
    }
}

fn map_status(status: SolverStatus) -> SolveStatus {
    match status {
        SolverStatus::Solved => SolveStatus::Solved,
        SolverStatus::AlmostSolved => SolveStatus::AlmostSolved,
        SolverStatus::MaxIterations => SolveStatus::MaxIterations,
        SolverStatus::MaxTime => SolveStatus::TimeLimit,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            SolveStatus::PrimalInfeasible
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
            SolveStatus::DualInfeasible
        }
        _ => SolveStatus::NumericalError,
    }
}

/// One persistent solver session plus the cached problem structure.
pub struct QpSolverAdapter {
    // NOTE: `solver` (DefaultSolver) is not `Debug`; see the manual impl below.
    p_csc: SolverCsc<f64>,
    a_csc: SolverCsc<f64>,
    cones: Vec<SupportedConeT<f64>>,
    q: Vec<f64>,
    b: Vec<f64>,
    n: usize,
    m_ieq: usize,
    config: SolverConfig,
    solver: DefaultSolver<f64>,
}

impl std::fmt::Debug for QpSolverAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QpSolverAdapter")
            .field("p_csc", &self.p_csc)
            .field("a_csc", &self.a_csc)
            .field("cones", &self.cones)
            .field("q", &self.q)
            .field("b", &self.b)
            .field("n", &self.n)
            .field("m_ieq", &self.m_ieq)
            .field("config", &self.config)
            .field("solver", &"<DefaultSolver>")
            .finish()
    }
}

impl QpSolverAdapter {
    /// Convert and load the full problem, then start the session.
    ///
    /// Fails with [`MpcError::DimensionMismatch`] if the problem blocks are
    /// inconsistent, or [`MpcError::Solver`] if the backend rejects the data.
    pub fn initialize(problem: &QpProblem, config: SolverConfig) -> Result<Self, MpcError> {
        problem.validate()?;
        let n = problem.n();
        let m_eq = problem.b_eq.len();
        let m_ieq = problem.b_ieq.len();

        let p_csc = dmatrix_to_csc_upper_tri(&problem.hessian);
        let a_csc = stack_constraints(&problem.a_eq, &problem.a_ieq, n);

        let mut cones = Vec::new();
        if m_eq > 0 {
            cones.push(ZeroConeT(m_eq));
        }
        if m_ieq > 0 {
            cones.push(NonnegativeConeT(m_ieq));
        }

        let q: Vec<f64> = problem.gradient.iter().copied().collect();
        let mut b = Vec::with_capacity(m_eq + m_ieq);
        b.extend(problem.b_eq.iter().map(|v| -v));
        b.extend(problem.b_ieq.iter().map(|v| -v));

        let solver = build_session(&p_csc, &q, &a_csc, &b, &cones, &config)?;
        debug!(
            "solver session initialized: n={n}, m_eq={m_eq}, m_ieq={m_ieq}, nnz(P)={}, nnz(A)={}",
            p_csc.nzval.len(),
            a_csc.nzval.len()
        );

        Ok(Self {
            p_csc,
            a_csc,
            cones,
            q,
            b,
            n,
            m_ieq,
            config,
            solver,
        })
    }

    /// Replace the gradient and re-initialize the session; the loaded
    /// Hessian/constraint structure is reused as-is.
    pub fn update_gradient(&mut self, gradient: &DVector<f64>) -> Result<(), MpcError> {
        if gradient.len() != self.n {
            return Err(MpcError::dims("gradient", (self.n, 1), (gradient.len(), 1)));
        }
        self.q.clear();
        self.q.extend(gradient.iter().copied());
        self.reinitialize()
    }

    /// As [`Self::update_gradient`], additionally overwriting the trailing
    /// slice of the inequality RHS (given in `A_ieq U + b_ieq <= 0`
    /// convention). Used by the state-bounded formulation, whose state rows'
    /// RHS depends on x0.
    pub fn update_gradient_and_bounds(
        &mut self,
        gradient: &DVector<f64>,
        b_ieq_tail: &DVector<f64>,
    ) -> Result<(), MpcError> {
        if gradient.len() != self.n {
            return Err(MpcError::dims("gradient", (self.n, 1), (gradient.len(), 1)));
        }
        if b_ieq_tail.len() > self.m_ieq {
            return Err(MpcError::dims(
                "b_ieq tail",
                (self.m_ieq, 1),
                (b_ieq_tail.len(), 1),
            ));
        }
        self.q.clear();
        self.q.extend(gradient.iter().copied());

        let start = self.b.len() - b_ieq_tail.len();
        for (slot, v) in self.b[start..].iter_mut().zip(b_ieq_tail.iter()) {
            *slot = -v;
        }
        self.reinitialize()
    }

    /// Run the solver up to the configured limits. Blocking; always returns
    /// the primal vector together with the termination status.
    pub fn solve(&mut self) -> (DVector<f64>, SolveStatus) {
        self.solver.solve();
        let status = map_status(self.solver.solution.status.clone());
        let u = DVector::from_column_slice(&self.solver.solution.x);
        (u, status)
    }

    fn reinitialize(&mut self) -> Result<(), MpcError> {
        self.solver = build_session(
            &self.p_csc,
            &self.q,
            &self.a_csc,
            &self.b,
            &self.cones,
            &self.config,
        )?;
        Ok(())
    }
}

fn build_session(
    p: &SolverCsc<f64>,
    q: &[f64],
    a: &SolverCsc<f64>,
    b: &[f64],
    cones: &[SupportedConeT<f64>],
    config: &SolverConfig,
) -> Result<DefaultSolver<f64>, MpcError> {
    let mut builder = DefaultSettingsBuilder::default();
    builder
        .verbose(config.verbose)
        .max_iter(config.max_iter)
        .tol_gap_abs(config.eps_abs)
        .tol_gap_rel(config.eps_rel)
        .tol_feas(config.eps_abs);
    if let Some(limit) = config.time_limit {
        builder.time_limit(limit);
    }
    let settings = builder.build().expect("valid solver settings");

    Ok(DefaultSolver::new(p, q, a, b, cones, settings))
}

/// Convert a symmetric dense Hessian to upper-triangular CSC.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> SolverCsc<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows - 1) {
            let v = m[(i, j)];
            if v.abs() > ZERO_EPS {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    SolverCsc::new(nrows, ncols, colptr, rowval, nzval)
}

/// Stack [A_eq; A_ieq] into one solver CSC matrix.
fn stack_constraints(
    a_eq: &CscMatrix<f64>,
    a_ieq: &CscMatrix<f64>,
    n: usize,
) -> SolverCsc<f64> {
    let m_eq = a_eq.nrows();
    let m = m_eq + a_ieq.nrows();

    // (col, row, value), row offset applied to the inequality block.
    let mut trips: Vec<(usize, usize, f64)> = Vec::with_capacity(a_eq.nnz() + a_ieq.nnz());
    for (i, j, v) in a_eq.triplet_iter() {
        trips.push((j, i, *v));
    }
    for (i, j, v) in a_ieq.triplet_iter() {
        trips.push((j, m_eq + i, *v));
    }
    trips.sort_by_key(|t| (t.0, t.1));

    let mut colptr = vec![0usize; n + 1];
    let mut rowval = Vec::with_capacity(trips.len());
    let mut nzval = Vec::with_capacity(trips.len());
    for &(j, i, v) in &trips {
        colptr[j + 1] += 1;
        rowval.push(i);
        nzval.push(v);
    }
    for j in 0..n {
        colptr[j + 1] += colptr[j];
    }

    SolverCsc::new(m, n, colptr, rowval, nzval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::{csc_from_dense, csc_to_dense};
    use approx::assert_relative_eq;

    fn identity_hessian_problem(gradient: &[f64]) -> QpProblem {
        let n = gradient.len();
        QpProblem::unconstrained(
            DMatrix::identity(n, n),
            DVector::from_column_slice(gradient),
        )
    }

    #[test]
    fn unconstrained_quadratic_has_closed_form_solution() {
        // min 1/2 uᵀu + gᵀu  =>  u* = -g
        let problem = identity_hessian_problem(&[1.0, -2.0]);
        let mut adapter = QpSolverAdapter::initialize(&problem, SolverConfig::default()).unwrap();

        let (u, status) = adapter.solve();
        assert_eq!(status, SolveStatus::Solved);
        assert!(status.is_feasible());
        assert_relative_eq!(u[0], -1.0, epsilon = 1e-4);
        assert_relative_eq!(u[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn box_constraints_clip_the_minimizer() {
        // min 1/2 uᵀu + gᵀu  s.t. -1 <= u <= 1, with g = [-3, 0.5].
        // Unclipped u* = [3, -0.5]; the box clips the first channel.
        let mut problem = identity_hessian_problem(&[-3.0, 0.5]);
        let rows = DMatrix::from_row_slice(
            4,
            2,
            &[
                1.0, 0.0, //
                0.0, 1.0, //
                -1.0, 0.0, //
                0.0, -1.0,
            ],
        );
        problem.a_ieq = csc_from_dense(&rows);
        problem.b_ieq = DVector::from_column_slice(&[-1.0, -1.0, -1.0, -1.0]);

        let mut adapter = QpSolverAdapter::initialize(&problem, SolverConfig::default()).unwrap();
        let (u, status) = adapter.solve();
        assert!(status.is_feasible());
        assert_relative_eq!(u[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(u[1], -0.5, epsilon = 1e-4);
    }

    #[test]
    fn gradient_update_moves_the_solution() {
        let problem = identity_hessian_problem(&[1.0, 1.0]);
        let mut adapter = QpSolverAdapter::initialize(&problem, SolverConfig::default()).unwrap();
        let (u, _) = adapter.solve();
        assert_relative_eq!(u[0], -1.0, epsilon = 1e-4);

        adapter
            .update_gradient(&DVector::from_column_slice(&[-4.0, 2.0]))
            .unwrap();
        let (u, status) = adapter.solve();
        assert_eq!(status, SolveStatus::Solved);
        assert_relative_eq!(u[0], 4.0, epsilon = 1e-4);
        assert_relative_eq!(u[1], -2.0, epsilon = 1e-4);
    }

    #[test]
    fn gradient_length_mismatch_is_rejected() {
        let problem = identity_hessian_problem(&[1.0, 1.0]);
        let mut adapter = QpSolverAdapter::initialize(&problem, SolverConfig::default()).unwrap();
        let err = adapter
            .update_gradient(&DVector::zeros(3))
            .unwrap_err();
        assert!(matches!(err, MpcError::DimensionMismatch { .. }));
    }

    #[test]
    fn contradictory_constraints_report_infeasible_without_panicking() {
        // u <= -1 and u >= 1 simultaneously.
        let mut problem = identity_hessian_problem(&[0.0]);
        problem.a_ieq = csc_from_dense(&DMatrix::from_row_slice(2, 1, &[1.0, -1.0]));
        problem.b_ieq = DVector::from_column_slice(&[1.0, 1.0]);

        let mut adapter = QpSolverAdapter::initialize(&problem, SolverConfig::default()).unwrap();
        let (_, status) = adapter.solve();
        assert_eq!(status, SolveStatus::PrimalInfeasible);
        assert!(!status.is_feasible());
    }

    #[test]
    fn bound_update_shifts_the_active_constraint() {
        // min 1/2 u² - 4u  s.t. u <= b, starting at b = 1.
        let mut problem = identity_hessian_problem(&[-4.0]);
        problem.a_ieq = csc_from_dense(&DMatrix::from_row_slice(1, 1, &[1.0]));
        problem.b_ieq = DVector::from_column_slice(&[-1.0]);

        let mut adapter = QpSolverAdapter::initialize(&problem, SolverConfig::default()).unwrap();
        let (u, _) = adapter.solve();
        assert_relative_eq!(u[0], 1.0, epsilon = 1e-4);

        // Move the bound to u <= 2 through the tail-update path.
        adapter
            .update_gradient_and_bounds(
                &DVector::from_column_slice(&[-4.0]),
                &DVector::from_column_slice(&[-2.0]),
            )
            .unwrap();
        let (u, status) = adapter.solve();
        assert!(status.is_feasible());
        assert_relative_eq!(u[0], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn stacked_constraints_preserve_row_order() {
        let a_eq = csc_from_dense(&DMatrix::from_row_slice(1, 2, &[1.0, 2.0]));
        let a_ieq = csc_from_dense(&DMatrix::from_row_slice(2, 2, &[0.0, 3.0, 4.0, 0.0]));
        let stacked = stack_constraints(&a_eq, &a_ieq, 2);

        assert_eq!(stacked.m, 3);
        assert_eq!(stacked.n, 2);
        // Column 0 holds rows {0: 1.0, 2: 4.0}; column 1 rows {0: 2.0, 1: 3.0}.
        assert_eq!(stacked.colptr, vec![0, 2, 4]);
        assert_eq!(stacked.rowval, vec![0, 2, 0, 1]);
        assert_relative_eq!(stacked.nzval[1], 4.0);
        assert_relative_eq!(stacked.nzval[3], 3.0);
    }

    #[test]
    fn upper_tri_conversion_keeps_upper_triangle_only() {
        let h = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 2.0]);
        let csc = dmatrix_to_csc_upper_tri(&h);
        assert_eq!(csc.nzval.len(), 3);
        assert_eq!(csc.rowval, vec![0, 0, 1]);

        // Round-trip sanity on the dense helper used throughout the tests.
        let dense = csc_to_dense(&csc_from_dense(&h));
        assert_relative_eq!(dense, h, epsilon = 1e-14);
    }
}
