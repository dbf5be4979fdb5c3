//! Sparse assembly utilities for the stacked MPC matrices.
//!
//! The rollout and constraint matrices are built by writing sub-blocks into a
//! [`CooMatrix`] accumulator at block offsets, then compressing to CSC once.
//! Entries below [`ZERO_EPS`] are skipped so structurally-zero entries never
//! enter the sparse pattern.

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::error::MpcError;

/// Magnitude below which an entry is treated as a structural zero.
pub(crate) const ZERO_EPS: f64 = 1e-15;

/// Write every nonzero of `block` into `target` at the given offset.
///
/// Fails with [`MpcError::BlockOverflow`] if the block does not fit within
/// the target's remaining rows/columns. Pure: no entry outside the block's
/// footprint is touched.
pub fn insert_block(
    target: &mut CooMatrix<f64>,
    block: &CscMatrix<f64>,
    row_offset: usize,
    col_offset: usize,
) -> Result<(), MpcError> {
    check_fit(
        (target.nrows(), target.ncols()),
        (block.nrows(), block.ncols()),
        row_offset,
        col_offset,
    )?;
    for (i, j, v) in block.triplet_iter() {
        if v.abs() > ZERO_EPS {
            target.push(row_offset + i, col_offset + j, *v);
        }
    }
    Ok(())
}

/// Dense-block flavor of [`insert_block`]: scans the block and inserts only
/// its nonzeros.
pub fn insert_dense_block(
    target: &mut CooMatrix<f64>,
    block: &DMatrix<f64>,
    row_offset: usize,
    col_offset: usize,
) -> Result<(), MpcError> {
    check_fit(
        (target.nrows(), target.ncols()),
        (block.nrows(), block.ncols()),
        row_offset,
        col_offset,
    )?;
    for j in 0..block.ncols() {
        for i in 0..block.nrows() {
            let v = block[(i, j)];
            if v.abs() > ZERO_EPS {
                target.push(row_offset + i, col_offset + j, v);
            }
        }
    }
    Ok(())
}

fn check_fit(
    target: (usize, usize),
    block: (usize, usize),
    row_offset: usize,
    col_offset: usize,
) -> Result<(), MpcError> {
    if row_offset + block.0 > target.0 || col_offset + block.1 > target.1 {
        return Err(MpcError::BlockOverflow {
            target_rows: target.0,
            target_cols: target.1,
            block_rows: block.0,
            block_cols: block.1,
            row: row_offset,
            col: col_offset,
        });
    }
    Ok(())
}

/// Sparse n×n identity.
pub fn identity(n: usize) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 1.0);
    }
    CscMatrix::from(&coo)
}

/// Scale every stored entry of a sparse matrix.
pub fn scaled(m: &CscMatrix<f64>, factor: f64) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(m.nrows(), m.ncols());
    for (i, j, v) in m.triplet_iter() {
        coo.push(i, j, v * factor);
    }
    CscMatrix::from(&coo)
}

/// Repeat `block` along the diagonal `copies` times.
///
/// Promotes a per-step weight block to its horizon-wide block-diagonal form.
pub fn block_diagonal(block: &CscMatrix<f64>, copies: usize) -> Result<CscMatrix<f64>, MpcError> {
    let mut coo = CooMatrix::new(block.nrows() * copies, block.ncols() * copies);
    for k in 0..copies {
        insert_block(&mut coo, block, k * block.nrows(), k * block.ncols())?;
    }
    Ok(CscMatrix::from(&coo))
}

/// Compress a dense matrix, dropping entries below [`ZERO_EPS`].
pub fn csc_from_dense(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(m.nrows(), m.ncols());
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            let v = m[(i, j)];
            if v.abs() > ZERO_EPS {
                coo.push(i, j, v);
            }
        }
    }
    CscMatrix::from(&coo)
}

/// Expand a sparse matrix to dense form.
pub fn csc_to_dense(m: &CscMatrix<f64>) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(m.nrows(), m.ncols());
    for (i, j, v) in m.triplet_iter() {
        dense[(i, j)] = *v;
    }
    dense
}

/// Cached powers A^0..A^max of a square matrix.
///
/// Each power is one multiplication on top of the previous one, so building
/// the table costs `max` multiplications total; every row-block of the
/// rollout then reuses the table instead of recomputing powers.
pub(crate) struct MatrixPowers {
    powers: Vec<DMatrix<f64>>,
}

impl MatrixPowers {
    pub(crate) fn new(a: &DMatrix<f64>, max: usize) -> Self {
        let n = a.nrows();
        let mut powers = Vec::with_capacity(max + 1);
        powers.push(DMatrix::identity(n, n));
        for k in 1..=max {
            let next = &powers[k - 1] * a;
            powers.push(next);
        }
        Self { powers }
    }

    pub(crate) fn get(&self, k: usize) -> &DMatrix<f64> {
        &self.powers[k]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn insert_block_places_entries_at_offset() {
        let block = csc_from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
        let mut target = CooMatrix::new(5, 5);
        insert_block(&mut target, &block, 2, 3).unwrap();

        let dense = csc_to_dense(&CscMatrix::from(&target));
        assert_relative_eq!(dense[(2, 3)], 1.0);
        assert_relative_eq!(dense[(2, 4)], 2.0);
        assert_relative_eq!(dense[(3, 3)], 3.0);
        assert_relative_eq!(dense[(3, 4)], 4.0);
        // Nothing outside the block footprint.
        assert_relative_eq!(dense[(0, 0)], 0.0);
        assert_relative_eq!(dense[(4, 4)], 0.0);
    }

    #[test]
    fn insert_block_rejects_overflow() {
        let block = identity(4);
        let mut target = CooMatrix::new(10, 10);
        let err = insert_block(&mut target, &block, 8, 0).unwrap_err();
        assert!(matches!(
            err,
            MpcError::BlockOverflow {
                target_rows: 10,
                block_rows: 4,
                row: 8,
                ..
            }
        ));
        // Column overflow as well.
        assert!(insert_block(&mut target, &block, 0, 7).is_err());
        // A fitting insert still succeeds.
        assert!(insert_block(&mut target, &block, 6, 6).is_ok());
    }

    #[test]
    fn insert_dense_block_skips_zeros() {
        let block = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]);
        let mut target = CooMatrix::new(2, 2);
        insert_dense_block(&mut target, &block, 0, 0).unwrap();
        assert_eq!(target.nnz(), 2);
    }

    #[test]
    fn block_diagonal_repeats_along_diagonal() {
        let block = csc_from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
        let promoted = block_diagonal(&block, 3).unwrap();
        assert_eq!(promoted.nrows(), 6);
        assert_eq!(promoted.ncols(), 6);

        let dense = csc_to_dense(&promoted);
        for k in 0..3 {
            assert_relative_eq!(dense[(2 * k, 2 * k)], 1.0);
            assert_relative_eq!(dense[(2 * k + 1, 2 * k + 1)], 4.0);
        }
        // Off-diagonal block positions stay empty.
        assert_relative_eq!(dense[(0, 2)], 0.0);
        assert_relative_eq!(dense[(4, 0)], 0.0);
    }

    #[test]
    fn matrix_powers_match_repeated_multiplication() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
        let powers = MatrixPowers::new(&a, 4);

        assert_relative_eq!(powers.get(0), &DMatrix::identity(2, 2), epsilon = 1e-14);
        assert_relative_eq!(powers.get(1), &a, epsilon = 1e-14);

        let a3 = &a * &(&a * &a);
        assert_relative_eq!(powers.get(3), &a3, epsilon = 1e-14);
    }

    #[test]
    fn dense_roundtrip_preserves_values() {
        let m = DMatrix::from_row_slice(3, 2, &[0.0, 1.5, -2.0, 0.0, 0.0, 3.25]);
        let back = csc_to_dense(&csc_from_dense(&m));
        assert_relative_eq!(back, m, epsilon = 1e-14);
    }

    #[test]
    fn scaled_multiplies_every_entry() {
        let m = csc_from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -2.0]));
        let s = csc_to_dense(&scaled(&m, -3.0));
        assert_relative_eq!(s[(0, 0)], -3.0);
        assert_relative_eq!(s[(1, 1)], 6.0);
    }
}
