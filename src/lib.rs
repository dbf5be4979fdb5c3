//! Linear reference-tracking MPC as a condensed convex QP.
//!
//! Formulates the finite-horizon MPC problem for a fixed discrete-time
//! linear system
//!
//! ```text
//! x(k+1) = A x(k) + B u(k)
//! y(k)   = C x(k)
//! ```
//!
//! as a QP over the stacked input sequence U and drives a persistent
//! interior-point session across successive control steps:
//!
//! ```text
//! min  1/2 Uᵀ H U + gᵀ U    s.t.  A_ieq U + b_ieq <= 0
//!  U
//! ```
//!
//! The stacked dynamics X = A_mpc U + B_mpc x0, Y = C_mpc X are built once;
//! five cost/constraint variants are supported (scalar or matrix tracking
//! weights × unconstrained / input-bounded / input-and-state-bounded),
//! selected structurally from the constructor arguments. On every control
//! step only the gradient — and, for the state-bounded variant, the trailing
//! inequality-RHS slice — is recomputed from cached products, so the
//! per-step cost stays far below the one-time O(horizon²) construction.
//!
//! # Architecture
//!
//! 1. [`LinearSystem`] — validated sparse state-space model
//! 2. [`RolloutMatrices`] — stacked-trajectory maps, built once
//! 3. cost assembly — Hessian, constraint stacking, update caches
//! 4. [`QpSolverAdapter`] — one persistent Clarabel session
//! 5. [`MpcController`] — the per-step update/solve loop
//!
//! Infeasibility is a first-class outcome: `solve` returns a solution
//! vector plus a [`SolveStatus`], and callers check
//! [`MpcSolution::is_feasible`] before applying the inputs.

pub mod controller;
pub mod cost;
pub mod error;
pub mod qp;
pub mod rollout;
pub mod solver;
pub mod sparse;
pub mod system;

pub use controller::{MpcController, MpcSolution};
pub use cost::{BoundSpec, Formulation, WeightSpec};
pub use error::MpcError;
pub use qp::QpProblem;
pub use rollout::RolloutMatrices;
pub use solver::{QpSolverAdapter, SolveStatus, SolverConfig};
pub use system::LinearSystem;
