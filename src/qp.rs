//! QP problem container in the formulation's sign convention:
//!
//! ```text
//! min  1/2 Uᵀ H U + gᵀ U
//!  U
//! s.t. A_eq  U + b_eq  = 0
//!      A_ieq U + b_ieq <= 0
//! ```
//!
//! The structure (Hessian and constraint matrices) is built once at solver
//! initialization; the gradient — and, for the state-bounded variant, the
//! trailing slice of `b_ieq` — is mutated in place on every control step.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::error::MpcError;

/// A convex QP over the stacked input sequence.
#[derive(Clone, Debug)]
pub struct QpProblem {
    /// Cost Hessian (PSD, N·n_u × N·n_u).
    pub hessian: DMatrix<f64>,
    /// Cost linear term.
    pub gradient: DVector<f64>,
    /// Equality constraint matrix (empty for the condensed formulations).
    pub a_eq: CscMatrix<f64>,
    /// Equality constraint offset.
    pub b_eq: DVector<f64>,
    /// Inequality constraint matrix.
    pub a_ieq: CscMatrix<f64>,
    /// Inequality constraint offset.
    pub b_ieq: DVector<f64>,
}

impl QpProblem {
    /// A problem with no constraint rows at all.
    pub fn unconstrained(hessian: DMatrix<f64>, gradient: DVector<f64>) -> Self {
        let n = gradient.len();
        Self {
            hessian,
            gradient,
            a_eq: empty_rows(n),
            b_eq: DVector::zeros(0),
            a_ieq: empty_rows(n),
            b_ieq: DVector::zeros(0),
        }
    }

    /// A problem with inequality rows only (no equality block).
    pub fn with_inequalities(
        hessian: DMatrix<f64>,
        gradient: DVector<f64>,
        a_ieq: CscMatrix<f64>,
        b_ieq: DVector<f64>,
    ) -> Self {
        let n = gradient.len();
        Self {
            hessian,
            gradient,
            a_eq: empty_rows(n),
            b_eq: DVector::zeros(0),
            a_ieq,
            b_ieq,
        }
    }

    /// Number of decision variables.
    pub fn n(&self) -> usize {
        self.gradient.len()
    }

    /// Consistency check across all blocks; run once before the solver
    /// session is created.
    pub fn validate(&self) -> Result<(), MpcError> {
        let n = self.n();
        if self.hessian.nrows() != n || self.hessian.ncols() != n {
            return Err(MpcError::dims(
                "Hessian",
                (n, n),
                (self.hessian.nrows(), self.hessian.ncols()),
            ));
        }
        if self.a_eq.ncols() != n || self.a_eq.nrows() != self.b_eq.len() {
            return Err(MpcError::dims(
                "A_eq",
                (self.b_eq.len(), n),
                (self.a_eq.nrows(), self.a_eq.ncols()),
            ));
        }
        if self.a_ieq.ncols() != n || self.a_ieq.nrows() != self.b_ieq.len() {
            return Err(MpcError::dims(
                "A_ieq",
                (self.b_ieq.len(), n),
                (self.a_ieq.nrows(), self.a_ieq.ncols()),
            ));
        }
        Ok(())
    }
}

/// Sparse 0×n matrix: the structural stand-in for an absent constraint block.
fn empty_rows(n: usize) -> CscMatrix<f64> {
    CscMatrix::from(&CooMatrix::new(0, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconstrained_problem_validates() {
        let p = QpProblem::unconstrained(DMatrix::identity(3, 3), DVector::zeros(3));
        assert_eq!(p.n(), 3);
        assert!(p.validate().is_ok());
        assert_eq!(p.a_eq.nrows(), 0);
        assert_eq!(p.a_ieq.nrows(), 0);
    }

    #[test]
    fn hessian_shape_mismatch_is_caught() {
        let mut p = QpProblem::unconstrained(DMatrix::identity(3, 3), DVector::zeros(3));
        p.hessian = DMatrix::identity(2, 2);
        assert!(matches!(
            p.validate().unwrap_err(),
            MpcError::DimensionMismatch { what: "Hessian", .. }
        ));
    }

    #[test]
    fn constraint_rhs_length_mismatch_is_caught() {
        let mut p = QpProblem::unconstrained(DMatrix::identity(3, 3), DVector::zeros(3));
        p.b_ieq = DVector::zeros(2);
        assert!(matches!(
            p.validate().unwrap_err(),
            MpcError::DimensionMismatch { what: "A_ieq", .. }
        ));
    }
}
