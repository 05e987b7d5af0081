//! Stacking linear factors into one sparse least-squares system.

use crate::core::{CoreError, CoreResult, Key};
use crate::linear::jacobian_factor::JacobianFactor;
use faer::{
    Col, Mat,
    sparse::{Pair, SparseColMat, SymbolicSparseColMat},
};
use std::collections::BTreeMap;
use tracing::debug;

/// Whitened system `J x ≈ r` assembled from a set of linear factors.
#[derive(Debug, Clone)]
pub struct SparseLinearSystem {
    /// Stacked block Jacobian, one row block per factor.
    pub jacobian: SparseColMat<usize, f64>,
    /// Stacked right-hand side as an `n × 1` matrix.
    pub rhs: Mat<f64>,
    /// First column of each key.
    pub column_offsets: BTreeMap<Key, usize>,
}

/// Column layout of `ordering`, taking each key's width from the factors.
fn column_layout(
    factors: &[JacobianFactor],
    ordering: &[Key],
) -> CoreResult<(BTreeMap<Key, usize>, usize)> {
    let mut dims = BTreeMap::new();
    for factor in factors {
        for (key, dim) in factor.keys().iter().zip(factor.dims()) {
            match dims.insert(*key, dim) {
                Some(previous) if previous != dim => {
                    return Err(CoreError::DimensionMismatch(format!(
                        "key {key} appears with widths {previous} and {dim}"
                    ))
                    .log());
                }
                _ => {}
            }
        }
    }

    let mut offsets = BTreeMap::new();
    let mut total = 0;
    for key in ordering {
        let dim = *dims.get(key).ok_or_else(|| {
            CoreError::InvalidArgument(format!("ordering key {key} is not used by any factor"))
                .log()
        })?;
        if offsets.insert(*key, total).is_some() {
            return Err(
                CoreError::InvalidArgument(format!("ordering lists key {key} twice")).log(),
            );
        }
        total += dim;
    }
    if let Some(key) = dims.keys().find(|key| !offsets.contains_key(*key)) {
        return Err(CoreError::KeyNotFound(format!("key {key} missing from ordering")).log());
    }
    Ok((offsets, total))
}

/// Stack whitened linear factors into a sparse Jacobian and dense right-hand side.
///
/// Columns follow `ordering`, which must list every key of every factor exactly
/// once. Rows follow the order of `factors`.
pub fn assemble_sparse_system(
    factors: &[JacobianFactor],
    ordering: &[Key],
) -> CoreResult<SparseLinearSystem> {
    let (column_offsets, total_cols) = column_layout(factors, ordering)?;
    let total_rows: usize = factors.iter().map(|f| f.rows()).sum();

    let mut indices = Vec::<Pair<usize, usize>>::new();
    let mut values = Vec::<f64>::new();
    let mut rhs = Col::<f64>::zeros(total_rows);
    let mut rhs_mut = rhs.as_mut();

    let mut row_start = 0;
    for factor in factors {
        let (a, b) = factor.jacobian()?;
        let mut col_in_factor = 0;
        for (key, dim) in factor.keys().iter().zip(factor.dims()) {
            let col_start = column_offsets[key];
            for row in 0..factor.rows() {
                for col in 0..dim {
                    indices.push(Pair::new(row_start + row, col_start + col));
                    values.push(a[(row, col_in_factor + col)]);
                }
            }
            col_in_factor += dim;
        }
        for row in 0..factor.rows() {
            rhs_mut[row_start + row] = b[row];
        }
        row_start += factor.rows();
    }

    debug!(
        "assembled sparse system: {} x {} with {} entries from {} factors",
        total_rows,
        total_cols,
        values.len(),
        factors.len()
    );

    let (pattern, order) =
        SymbolicSparseColMat::try_new_from_indices(total_rows, total_cols, &indices).map_err(
            |e| {
                CoreError::SymbolicStructure(
                    "Failed to build symbolic sparse matrix structure".to_string(),
                )
                .log_with_source(e)
            },
        )?;
    let jacobian =
        SparseColMat::new_from_argsort(pattern, &order, values.as_slice()).map_err(|e| {
            CoreError::SymbolicStructure(
                "Failed to create sparse Jacobian from argsort".to_string(),
            )
            .log_with_source(e)
        })?;

    Ok(SparseLinearSystem {
        jacobian,
        rhs: rhs.as_ref().as_mat().to_owned(),
        column_offsets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::noise_model::NoiseModel;
    use nalgebra::{DMatrix, DVector};
    use std::sync::Arc;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn x(i: u64) -> Key {
        Key::symbol('x', i)
    }

    #[test]
    fn test_assemble_two_factors() -> TestResult {
        let prior = JacobianFactor::from_terms(
            vec![(x(0), DMatrix::identity(2, 2))],
            DVector::from_vec(vec![1.0, 2.0]),
            None,
        )?;
        let odometry = JacobianFactor::from_terms(
            vec![
                (x(0), -DMatrix::identity(2, 2)),
                (x(1), DMatrix::identity(2, 2)),
            ],
            DVector::from_vec(vec![3.0, 4.0]),
            None,
        )?;

        let system = assemble_sparse_system(&[prior, odometry], &[x(1), x(0)])?;
        assert_eq!(system.jacobian.nrows(), 4);
        assert_eq!(system.jacobian.ncols(), 4);
        assert_eq!(system.column_offsets[&x(1)], 0);
        assert_eq!(system.column_offsets[&x(0)], 2);
        assert!((system.rhs[(3, 0)] - 4.0).abs() < 1e-12);

        let mut entries = 0;
        for triplet in system.jacobian.triplet_iter() {
            entries += 1;
            let expected = match (triplet.row, triplet.col) {
                (0, 2) | (1, 3) | (2, 0) | (3, 1) => 1.0,
                (2, 2) | (3, 3) => -1.0,
                _ => 0.0,
            };
            assert!((triplet.val - expected).abs() < 1e-12);
        }
        assert_eq!(entries, 12);
        Ok(())
    }

    #[test]
    fn test_assemble_whitens_rows() -> TestResult {
        let factor = JacobianFactor::from_terms(
            vec![(x(0), DMatrix::identity(1, 1))],
            DVector::from_vec(vec![1.0]),
            Some(Arc::new(NoiseModel::isotropic(1, 0.1)?)),
        )?;
        let system = assemble_sparse_system(&[factor], &[x(0)])?;
        assert!((system.rhs[(0, 0)] - 10.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_ordering_must_cover_keys() -> TestResult {
        let factor = JacobianFactor::from_terms(
            vec![(x(0), DMatrix::identity(1, 1)), (x(1), DMatrix::identity(1, 1))],
            DVector::zeros(1),
            None,
        )?;
        let missing = assemble_sparse_system(std::slice::from_ref(&factor), &[x(0)]);
        assert!(matches!(missing, Err(CoreError::KeyNotFound(_))));
        let foreign = assemble_sparse_system(&[factor], &[x(0), x(1), x(2)]);
        assert!(matches!(foreign, Err(CoreError::InvalidArgument(_))));
        Ok(())
    }
}
