//! Linear factor `‖A x - b‖²` over a set of keys.

use crate::core::{CoreError, CoreResult, Key, VectorValues};
use crate::linear::block_matrix::VerticalBlockMatrix;
use crate::linear::jacobian_map::JacobianMap;
use crate::linear::noise_model::NoiseModel;
use nalgebra::{DMatrix, DMatrixView, DVector};
use std::fmt;
use std::iter;
use std::sync::Arc;

/// Gaussian linear factor with block Jacobian `A = [A₁ … Aₙ]` and right-hand
/// side `b`, both stored in one [`VerticalBlockMatrix`].
///
/// Keys are sorted ascending and unique; block `i` belongs to `keys[i]` and the
/// trailing single-column block holds `b`. The optional model is applied by
/// [`JacobianFactor::jacobian`] and [`JacobianFactor::error`]; factors produced
/// by linearization are already whitened and carry either no model or the unit
/// form of a constrained one.
#[derive(Debug, Clone)]
pub struct JacobianFactor {
    keys: Vec<Key>,
    ab: VerticalBlockMatrix,
    model: Option<Arc<NoiseModel>>,
}

fn check_keys(keys: &[Key]) -> CoreResult<()> {
    if keys.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CoreError::InvalidArgument(
            "JacobianFactor: keys must be sorted ascending and unique".to_string(),
        )
        .log());
    }
    Ok(())
}

fn check_model(model: &Option<Arc<NoiseModel>>, rows: usize) -> CoreResult<()> {
    match model {
        Some(model) if model.dim() != rows => Err(CoreError::DimensionMismatch(format!(
            "JacobianFactor: noise model dimension {} does not match {rows} rows",
            model.dim()
        ))
        .log()),
        _ => Ok(()),
    }
}

impl JacobianFactor {
    /// Zero factor over `keys` with block widths `dims` and `rows` rows.
    pub fn new(
        keys: Vec<Key>,
        dims: &[usize],
        rows: usize,
        model: Option<Arc<NoiseModel>>,
    ) -> CoreResult<Self> {
        if keys.len() != dims.len() {
            return Err(CoreError::DimensionMismatch(format!(
                "JacobianFactor: {} keys but {} dimensions",
                keys.len(),
                dims.len()
            ))
            .log());
        }
        check_keys(&keys)?;
        check_model(&model, rows)?;
        let ab = VerticalBlockMatrix::new(dims.iter().copied().chain(iter::once(1)), rows);
        Ok(JacobianFactor { keys, ab, model })
    }

    /// Factor from `(key, A_key)` terms in any order and right-hand side `b`.
    pub fn from_terms(
        mut terms: Vec<(Key, DMatrix<f64>)>,
        b: DVector<f64>,
        model: Option<Arc<NoiseModel>>,
    ) -> CoreResult<Self> {
        terms.sort_by_key(|(key, _)| *key);
        if let Some((key, block)) = terms.iter().find(|(_, a)| a.nrows() != b.len()) {
            return Err(CoreError::DimensionMismatch(format!(
                "JacobianFactor: block for key {key} has {} rows, b has {}",
                block.nrows(),
                b.len()
            ))
            .log());
        }
        let keys: Vec<Key> = terms.iter().map(|(key, _)| *key).collect();
        let dims: Vec<usize> = terms.iter().map(|(_, a)| a.ncols()).collect();

        let mut factor = Self::new(keys, &dims, b.len(), model)?;
        for (position, (_, block)) in terms.iter().enumerate() {
            factor.ab.block_mut(position).copy_from(block);
        }
        factor.set_b(&b)?;
        Ok(factor)
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn rows(&self) -> usize {
        self.ab.rows()
    }

    /// Total width of `A`.
    pub fn cols(&self) -> usize {
        self.ab.cols() - 1
    }

    /// Block widths of `A`, one per key.
    pub fn dims(&self) -> Vec<usize> {
        (0..self.keys.len()).map(|i| self.ab.block_dim(i)).collect()
    }

    pub fn model(&self) -> Option<&Arc<NoiseModel>> {
        self.model.as_ref()
    }

    pub fn is_constrained(&self) -> bool {
        self.model.as_ref().is_some_and(|m| m.is_constrained())
    }

    /// Block of `A` belonging to `key`.
    pub fn get_a(&self, key: Key) -> Option<DMatrixView<'_, f64>> {
        let position = self.keys.binary_search(&key).ok()?;
        Some(self.ab.block(position))
    }

    pub fn get_b(&self) -> DVector<f64> {
        self.ab.full().column(self.ab.cols() - 1).into_owned()
    }

    pub fn set_b(&mut self, b: &DVector<f64>) -> CoreResult<()> {
        if b.len() != self.rows() {
            return Err(CoreError::DimensionMismatch(format!(
                "JacobianFactor::set_b: {} entries for {} rows",
                b.len(),
                self.rows()
            ))
            .log());
        }
        let last = self.ab.cols() - 1;
        self.ab.full_mut().column_mut(last).copy_from(b);
        Ok(())
    }

    pub fn matrix_object(&self) -> &VerticalBlockMatrix {
        &self.ab
    }

    pub fn matrix_object_mut(&mut self) -> &mut VerticalBlockMatrix {
        &mut self.ab
    }

    /// Write target over the `A` blocks, for reverse-mode accumulation.
    pub fn jacobian_map(&mut self) -> CoreResult<JacobianMap<'_>> {
        JacobianMap::new(&self.keys, &mut self.ab)
    }

    /// Whiten `[A | b]` in place with `model`.
    pub fn whiten_in_place(&mut self, model: &NoiseModel) -> CoreResult<()> {
        model.whiten_system(self.ab.full_mut())
    }

    /// `(A, b)` exactly as stored.
    pub fn jacobian_unweighted(&self) -> (DMatrix<f64>, DVector<f64>) {
        (self.ab.range(0, self.keys.len()).into_owned(), self.get_b())
    }

    /// `(A, b)` whitened by the stored model, if any.
    pub fn jacobian(&self) -> CoreResult<(DMatrix<f64>, DVector<f64>)> {
        match &self.model {
            Some(model) => {
                let mut augmented = self.ab.full().clone();
                model.whiten_system(&mut augmented)?;
                let cols = augmented.ncols();
                Ok((
                    augmented.columns(0, cols - 1).into_owned(),
                    augmented.column(cols - 1).into_owned(),
                ))
            }
            None => Ok(self.jacobian_unweighted()),
        }
    }

    /// `A x - b` for the increment `x`; every key of the factor must be present.
    pub fn error_vector(&self, x: &VectorValues) -> CoreResult<DVector<f64>> {
        let mut result = -self.get_b();
        for (position, key) in self.keys.iter().enumerate() {
            let xi = x.get(*key).ok_or_else(|| {
                CoreError::KeyNotFound(format!("JacobianFactor::error: no increment for {key}"))
                    .log()
            })?;
            let block = self.ab.block(position);
            if xi.len() != block.ncols() {
                return Err(CoreError::DimensionMismatch(format!(
                    "JacobianFactor::error: increment for {key} has {} entries, expected {}",
                    xi.len(),
                    block.ncols()
                ))
                .log());
            }
            result += block * xi;
        }
        Ok(result)
    }

    /// `½ ‖A x - b‖²`, whitened by the stored model.
    pub fn error(&self, x: &VectorValues) -> CoreResult<f64> {
        let e = self.error_vector(x)?;
        let squared = match &self.model {
            Some(model) => model.squared_mahalanobis(&e)?,
            None => e.norm_squared(),
        };
        Ok(0.5 * squared)
    }

    pub fn equals(&self, other: &JacobianFactor, tol: f64) -> bool {
        let models_equal = match (&self.model, &other.model) {
            (None, None) => true,
            (Some(a), Some(b)) => a.equals(b, tol),
            _ => false,
        };
        self.keys == other.keys
            && self.ab.dims() == other.ab.dims()
            && self.rows() == other.rows()
            && (self.ab.full() - other.ab.full()).amax() <= tol
            && models_equal
    }
}

impl fmt::Display for JacobianFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JacobianFactor on")?;
        for key in &self.keys {
            write!(f, " {key}")?;
        }
        writeln!(f, " ({} rows)", self.rows())?;
        for (position, key) in self.keys.iter().enumerate() {
            write!(f, "  A[{key}] = {}", self.ab.block(position))?;
        }
        write!(f, "  b = {}", self.get_b().transpose())?;
        match &self.model {
            Some(model) => write!(f, "  model: {model}"),
            None => write!(f, "  no noise model"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn x(i: u64) -> Key {
        Key::symbol('x', i)
    }

    #[test]
    fn test_from_terms_sorts_keys() -> TestResult {
        let a1 = DMatrix::from_element(2, 1, 1.0);
        let a0 = DMatrix::identity(2, 2);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let factor =
            JacobianFactor::from_terms(vec![(x(1), a1.clone()), (x(0), a0)], b.clone(), None)?;

        assert_eq!(factor.keys(), &[x(0), x(1)]);
        assert_eq!(factor.dims(), vec![2, 1]);
        assert_eq!(factor.cols(), 3);
        assert!(factor.get_a(x(1)).is_some_and(|a| (a - &a1).norm() < 1e-12));
        assert!(factor.get_a(x(7)).is_none());
        assert!((factor.get_b() - b).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_error_vector() -> TestResult {
        let factor = JacobianFactor::from_terms(
            vec![(x(0), DMatrix::identity(2, 2) * 2.0)],
            DVector::from_vec(vec![1.0, 1.0]),
            None,
        )?;
        let mut delta = VectorValues::new();
        delta.insert(x(0), DVector::from_vec(vec![1.0, 0.5]));
        let e = factor.error_vector(&delta)?;
        assert!((e - DVector::from_vec(vec![1.0, 0.0])).norm() < 1e-12);
        assert!((factor.error(&delta)? - 0.5).abs() < 1e-12);

        assert!(matches!(
            factor.error_vector(&VectorValues::new()),
            Err(CoreError::KeyNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_jacobian_applies_model() -> TestResult {
        let model = Arc::new(NoiseModel::isotropic(2, 0.5)?);
        let factor = JacobianFactor::from_terms(
            vec![(x(0), DMatrix::identity(2, 2))],
            DVector::from_vec(vec![1.0, -1.0]),
            Some(model),
        )?;
        let (a, b) = factor.jacobian()?;
        let (a_raw, b_raw) = factor.jacobian_unweighted();
        assert!((a - a_raw * 2.0).norm() < 1e-12);
        assert!((b - b_raw * 2.0).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_rejects_inconsistent_input() {
        assert!(JacobianFactor::new(vec![x(1), x(0)], &[1, 1], 1, None).is_err());
        assert!(JacobianFactor::new(vec![x(0)], &[1, 2], 1, None).is_err());
        assert!(
            JacobianFactor::new(vec![x(0)], &[1], 2, Some(Arc::new(NoiseModel::unit(3)))).is_err()
        );
        assert!(JacobianFactor::from_terms(
            vec![(x(0), DMatrix::identity(3, 3))],
            DVector::zeros(2),
            None
        )
        .is_err());
    }

    #[test]
    fn test_equals() -> TestResult {
        let make = |v: f64| {
            JacobianFactor::from_terms(
                vec![(x(0), DMatrix::from_element(1, 1, v))],
                DVector::from_element(1, 0.0),
                None,
            )
        };
        assert!(make(1.0)?.equals(&make(1.0 + 1e-12)?, 1e-9));
        assert!(!make(1.0)?.equals(&make(2.0)?, 1e-9));
        Ok(())
    }
}
