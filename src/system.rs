//! Discrete-time linear state-space model.
//!
//! ```text
//! x(k+1) = A x(k) + B u(k)
//! y(k)   = C x(k) + D u(k)
//! ```
//!
//! The model is immutable after construction and shape-validated exactly
//! once; every later stage of the pipeline may rely on consistent
//! dimensions.

use nalgebra::DMatrix;
use nalgebra_sparse::CscMatrix;

use crate::error::MpcError;
use crate::sparse::csc_from_dense;

/// Immutable discrete-time state-space model (A, B, C, D).
#[derive(Clone, Debug)]
pub struct LinearSystem {
    a: CscMatrix<f64>,
    b: CscMatrix<f64>,
    c: CscMatrix<f64>,
    d: CscMatrix<f64>,
    n_x: usize,
    n_u: usize,
    n_y: usize,
}

impl LinearSystem {
    /// Validate and construct a model from sparse matrices.
    ///
    /// Required shapes: A (n_x×n_x), B (n_x×n_u), C (n_y×n_x), D (n_y×n_u).
    /// The first offending matrix is reported with its expected and actual
    /// shape.
    pub fn new(
        a: CscMatrix<f64>,
        b: CscMatrix<f64>,
        c: CscMatrix<f64>,
        d: CscMatrix<f64>,
    ) -> Result<Self, MpcError> {
        if a.nrows() != a.ncols() {
            return Err(MpcError::dims(
                "A",
                (a.nrows(), a.nrows()),
                (a.nrows(), a.ncols()),
            ));
        }
        let n_x = a.nrows();
        if b.nrows() != n_x {
            return Err(MpcError::dims("B", (n_x, b.ncols()), (b.nrows(), b.ncols())));
        }
        let n_u = b.ncols();
        if c.ncols() != n_x {
            return Err(MpcError::dims("C", (c.nrows(), n_x), (c.nrows(), c.ncols())));
        }
        let n_y = c.nrows();
        if d.nrows() != n_y || d.ncols() != n_u {
            return Err(MpcError::dims("D", (n_y, n_u), (d.nrows(), d.ncols())));
        }
        Ok(Self {
            a,
            b,
            c,
            d,
            n_x,
            n_u,
            n_y,
        })
    }

    /// Construct from dense matrices, compressing structural zeros away.
    pub fn from_dense(
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
        c: &DMatrix<f64>,
        d: &DMatrix<f64>,
    ) -> Result<Self, MpcError> {
        Self::new(
            csc_from_dense(a),
            csc_from_dense(b),
            csc_from_dense(c),
            csc_from_dense(d),
        )
    }

    /// State dimension n_x.
    pub fn n_x(&self) -> usize {
        self.n_x
    }

    /// Input dimension n_u.
    pub fn n_u(&self) -> usize {
        self.n_u
    }

    /// Output dimension n_y.
    pub fn n_y(&self) -> usize {
        self.n_y
    }

    /// State transition matrix A.
    pub fn a(&self) -> &CscMatrix<f64> {
        &self.a
    }

    /// Input matrix B.
    pub fn b(&self) -> &CscMatrix<f64> {
        &self.b
    }

    /// Output matrix C.
    pub fn c(&self) -> &CscMatrix<f64> {
        &self.c
    }

    /// Feedthrough matrix D. Validated for shape consistency; the output
    /// prediction uses y = C x, matching the tracking formulation.
    pub fn d(&self) -> &CscMatrix<f64> {
        &self.d
    }
}
