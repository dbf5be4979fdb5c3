use thiserror::Error;

/// Errors produced while formulating or driving the MPC problem.
///
/// QP infeasibility is deliberately NOT represented here: the solver reports
/// it through [`crate::SolveStatus`], and callers are expected to check
/// feasibility on every solution.
#[derive(Debug, Clone, Error)]
pub enum MpcError {
    #[error("Dimension mismatch for {what}: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    DimensionMismatch {
        what: &'static str,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error(
        "Block of {block_rows}x{block_cols} does not fit into {target_rows}x{target_cols} target at offset ({row}, {col})"
    )]
    BlockOverflow {
        target_rows: usize,
        target_cols: usize,
        block_rows: usize,
        block_cols: usize,
        row: usize,
        col: usize,
    },

    #[error("Unsupported formulation: {0}")]
    Formulation(&'static str),

    #[error("Solver not initialized: call initialize_solver() first")]
    NotInitialized,

    #[error("QP solver setup failed: {0}")]
    Solver(String),
}

impl MpcError {
    /// Shorthand used by the eager shape checks.
    pub(crate) fn dims(
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        Self::DimensionMismatch {
            what,
            expected_rows: expected.0,
            expected_cols: expected.1,
            rows: actual.0,
            cols: actual.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_display() {
        let err = MpcError::dims("B", (4, 2), (3, 2));
        assert_eq!(
            err.to_string(),
            "Dimension mismatch for B: expected 4x2, got 3x2"
        );
    }

    #[test]
    fn block_overflow_display_reports_both_shapes() {
        let err = MpcError::BlockOverflow {
            target_rows: 10,
            target_cols: 10,
            block_rows: 4,
            block_cols: 4,
            row: 8,
            col: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("4x4"));
        assert!(msg.contains("10x10"));
        assert!(msg.contains("(8, 0)"));
    }

    #[test]
    fn not_initialized_display() {
        assert_eq!(
            MpcError::NotInitialized.to_string(),
            "Solver not initialized: call initialize_solver() first"
        );
    }
}
