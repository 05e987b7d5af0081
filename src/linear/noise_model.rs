//! Noise models: whitening of residuals and linear systems.
//!
//! Whitening maps a residual with covariance `Σ` to one with unit covariance,
//! `r ↦ R r` with `RᵀR = Σ⁻¹`. Every model here knows how to whiten a vector,
//! a matrix and a full augmented system `[A | b]` in place.
//!
//! | Model         | whitening of row `i`                      |
//! |---------------|-------------------------------------------|
//! | `Gaussian`    | `R · r` (full square-root information)    |
//! | `Diagonal`    | `rᵢ / σᵢ`                                 |
//! | `Isotropic`   | `rᵢ / σ`                                  |
//! | `Unit`        | `rᵢ`                                      |
//! | `Constrained` | `rᵢ / σᵢ`, or `rᵢ` unchanged when `σᵢ = 0` |
//! | `Robust`      | base whitening, then loss reweighting     |
//!
//! Constrained rows (`σᵢ = 0`) are hard constraints; they cannot be weighted by
//! an infinite factor, so whitening leaves them untouched and the solver layer
//! is responsible for enforcing them.

use crate::core::corrector::Corrector;
use crate::core::loss_functions::LossFunction;
use crate::core::{CoreError, CoreResult};
use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NoiseModel {
    /// Full covariance, stored as an upper-triangular square-root information matrix.
    Gaussian { sqrt_information: DMatrix<f64> },
    /// Independent per-row standard deviations.
    Diagonal { sigmas: DVector<f64> },
    /// Same standard deviation on every row.
    Isotropic { dim: usize, sigma: f64 },
    /// Unit covariance, whitening is the identity.
    Unit { dim: usize },
    /// Diagonal model where `σᵢ = 0` marks a hard constraint.
    Constrained { sigmas: DVector<f64> },
    /// Gaussian base model combined with a robust loss.
    #[serde(skip)]
    Robust {
        base: Box<NoiseModel>,
        loss: Arc<dyn LossFunction>,
    },
}

fn check_sigmas(sigmas: &DVector<f64>, allow_zero: bool) -> CoreResult<()> {
    let valid = |s: f64| s.is_finite() && (s > 0.0 || (allow_zero && s == 0.0));
    if let Some(bad) = sigmas.iter().find(|s| !valid(**s)) {
        return Err(CoreError::InvalidInput(format!(
            "noise model sigma must be {}, got {bad}",
            if allow_zero { "non-negative" } else { "positive" }
        ))
        .log());
    }
    Ok(())
}

impl NoiseModel {
    /// Gaussian model from a square-root information matrix `R` (`RᵀR = Σ⁻¹`).
    pub fn gaussian(sqrt_information: DMatrix<f64>) -> CoreResult<Self> {
        if !sqrt_information.is_square() {
            return Err(CoreError::DimensionMismatch(format!(
                "square-root information must be square, got {:?}",
                sqrt_information.shape()
            ))
            .log());
        }
        Ok(NoiseModel::Gaussian { sqrt_information })
    }

    /// Gaussian model from a covariance matrix.
    pub fn from_covariance(covariance: &DMatrix<f64>) -> CoreResult<Self> {
        let information = covariance.clone().try_inverse().ok_or_else(|| {
            CoreError::InvalidInput("covariance matrix is singular".to_string()).log()
        })?;
        let cholesky = Cholesky::new(information).ok_or_else(|| {
            CoreError::InvalidInput("covariance matrix is not positive definite".to_string())
                .log()
        })?;
        Self::gaussian(cholesky.l().transpose())
    }

    pub fn diagonal(sigmas: DVector<f64>) -> CoreResult<Self> {
        check_sigmas(&sigmas, false)?;
        Ok(NoiseModel::Diagonal { sigmas })
    }

    pub fn isotropic(dim: usize, sigma: f64) -> CoreResult<Self> {
        check_sigmas(&DVector::from_element(1, sigma), false)?;
        Ok(NoiseModel::Isotropic { dim, sigma })
    }

    pub fn unit(dim: usize) -> Self {
        NoiseModel::Unit { dim }
    }

    pub fn constrained(sigmas: DVector<f64>) -> CoreResult<Self> {
        check_sigmas(&sigmas, true)?;
        Ok(NoiseModel::Constrained { sigmas })
    }

    /// All rows hard-constrained.
    pub fn all_constrained(dim: usize) -> Self {
        NoiseModel::Constrained {
            sigmas: DVector::zeros(dim),
        }
    }

    pub fn robust(base: NoiseModel, loss: Arc<dyn LossFunction>) -> CoreResult<Self> {
        if matches!(base, NoiseModel::Robust { .. }) {
            return Err(
                CoreError::InvalidArgument("robust noise models cannot be nested".into()).log(),
            );
        }
        Ok(NoiseModel::Robust {
            base: Box::new(base),
            loss,
        })
    }

    pub fn dim(&self) -> usize {
        match self {
            NoiseModel::Gaussian { sqrt_information } => sqrt_information.nrows(),
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => sigmas.len(),
            NoiseModel::Isotropic { dim, .. } | NoiseModel::Unit { dim } => *dim,
            NoiseModel::Robust { base, .. } => base.dim(),
        }
    }

    pub fn is_constrained(&self) -> bool {
        match self {
            NoiseModel::Constrained { .. } => true,
            NoiseModel::Robust { base, .. } => base.is_constrained(),
            _ => false,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, NoiseModel::Unit { .. })
    }

    /// Unweighted counterpart of this model.
    ///
    /// For a constrained model the hard-constraint rows stay constrained and
    /// every other sigma becomes 1; any other model maps to `Unit`.
    pub fn to_unit(&self) -> NoiseModel {
        match self {
            NoiseModel::Constrained { sigmas } => NoiseModel::Constrained {
                sigmas: sigmas.map(|s| if s == 0.0 { 0.0 } else { 1.0 }),
            },
            NoiseModel::Robust { base, .. } if base.is_constrained() => base.to_unit(),
            other => NoiseModel::Unit { dim: other.dim() },
        }
    }

    /// Per-row standard deviations.
    pub fn sigmas(&self) -> DVector<f64> {
        match self {
            NoiseModel::Gaussian { sqrt_information } => {
                let n = sqrt_information.nrows();
                match sqrt_information.clone().try_inverse() {
                    Some(r_inv) => (&r_inv * r_inv.transpose()).diagonal().map(f64::sqrt),
                    None => DVector::from_element(n, f64::INFINITY),
                }
            }
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => {
                sigmas.clone()
            }
            NoiseModel::Isotropic { dim, sigma } => DVector::from_element(*dim, *sigma),
            NoiseModel::Unit { dim } => DVector::from_element(*dim, 1.0),
            NoiseModel::Robust { base, .. } => base.sigmas(),
        }
    }

    /// Row scale factors for the diagonal models, `None` for `Gaussian`.
    fn row_scales(&self) -> Option<DVector<f64>> {
        match self {
            NoiseModel::Gaussian { .. } => None,
            NoiseModel::Diagonal { sigmas } => Some(sigmas.map(|s| 1.0 / s)),
            NoiseModel::Constrained { sigmas } => {
                Some(sigmas.map(|s| if s == 0.0 { 1.0 } else { 1.0 / s }))
            }
            NoiseModel::Isotropic { dim, sigma } => Some(DVector::from_element(*dim, 1.0 / sigma)),
            NoiseModel::Unit { dim } => Some(DVector::from_element(*dim, 1.0)),
            NoiseModel::Robust { base, .. } => base.row_scales(),
        }
    }

    fn check_rows(&self, rows: usize, what: &str) -> CoreResult<()> {
        if rows != self.dim() {
            return Err(CoreError::DimensionMismatch(format!(
                "{what} has {rows} rows, noise model has dimension {}",
                self.dim()
            ))
            .log());
        }
        Ok(())
    }

    /// Whitened residual. Robust reweighting is not applied here.
    pub fn whiten(&self, v: &DVector<f64>) -> CoreResult<DVector<f64>> {
        self.check_rows(v.len(), "vector")?;
        Ok(match self.gaussian_base() {
            Some(r) => r * v,
            None => match self.row_scales() {
                Some(scales) => v.component_mul(&scales),
                None => v.clone(),
            },
        })
    }

    /// Row-whitened matrix. Robust reweighting is not applied here.
    pub fn whiten_matrix(&self, m: &DMatrix<f64>) -> CoreResult<DMatrix<f64>> {
        self.check_rows(m.nrows(), "matrix")?;
        let mut result = m.clone();
        self.whiten_rows(&mut result);
        Ok(result)
    }

    /// Whiten an augmented system `[A | b]` in place.
    ///
    /// For a robust model the base whitening is applied first, then the
    /// [`Corrector`] built from the whitened `b` rescales every column.
    pub fn whiten_system(&self, augmented: &mut DMatrix<f64>) -> CoreResult<()> {
        self.check_rows(augmented.nrows(), "augmented system")?;
        self.whiten_rows(augmented);
        if let NoiseModel::Robust { loss, .. } = self {
            let cols = augmented.ncols();
            if cols > 0 {
                let sq_norm = augmented.column(cols - 1).norm_squared();
                Corrector::new(&**loss, sq_norm).correct_system(augmented);
            }
        }
        Ok(())
    }

    fn gaussian_base(&self) -> Option<&DMatrix<f64>> {
        match self {
            NoiseModel::Gaussian { sqrt_information } => Some(sqrt_information),
            NoiseModel::Robust { base, .. } => base.gaussian_base(),
            _ => None,
        }
    }

    fn whiten_rows(&self, m: &mut DMatrix<f64>) {
        if let Some(r) = self.gaussian_base() {
            *m = r * &*m;
        } else if let Some(scales) = self.row_scales() {
            for (mut row, scale) in m.row_iter_mut().zip(scales.iter()) {
                row *= *scale;
            }
        }
    }

    /// `‖whiten(v)‖²`
    pub fn squared_mahalanobis(&self, v: &DVector<f64>) -> CoreResult<f64> {
        Ok(self.whiten(v)?.norm_squared())
    }

    /// Cost contributed by a squared whitened norm: `½ s`, or `½ ρ(s)` when robust.
    pub fn loss(&self, squared_norm: f64) -> f64 {
        match self {
            NoiseModel::Robust { loss, .. } => 0.5 * loss.evaluate(squared_norm)[0],
            _ => 0.5 * squared_norm,
        }
    }

    pub fn equals(&self, other: &NoiseModel, tol: f64) -> bool {
        let close = |a: &DMatrix<f64>, b: &DMatrix<f64>| {
            a.shape() == b.shape() && (a - b).amax() <= tol
        };
        match (self, other) {
            (
                NoiseModel::Gaussian { sqrt_information: a },
                NoiseModel::Gaussian { sqrt_information: b },
            ) => close(a, b),
            (NoiseModel::Diagonal { sigmas: a }, NoiseModel::Diagonal { sigmas: b })
            | (NoiseModel::Constrained { sigmas: a }, NoiseModel::Constrained { sigmas: b }) => {
                a.len() == b.len() && (a - b).amax() <= tol
            }
            (
                NoiseModel::Isotropic { dim: da, sigma: sa },
                NoiseModel::Isotropic { dim: db, sigma: sb },
            ) => da == db && (sa - sb).abs() <= tol,
            (NoiseModel::Unit { dim: a }, NoiseModel::Unit { dim: b }) => a == b,
            (
                NoiseModel::Robust { base: ba, loss: la },
                NoiseModel::Robust { base: bb, loss: lb },
            ) => ba.equals(bb, tol) && format!("{la:?}") == format!("{lb:?}"),
            _ => false,
        }
    }
}

/// Pick the model a linear factor stores: constrained models are replaced by
/// their unit form, everything else is dropped because the system is already
/// whitened.
pub(crate) fn linear_factor_model(model: &NoiseModel) -> Option<Arc<NoiseModel>> {
    if model.is_constrained() {
        debug!("constrained noise model replaced by its unit form in the linear factor");
        Some(Arc::new(model.to_unit()))
    } else {
        None
    }
}

impl fmt::Display for NoiseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |v: &DVector<f64>| {
            v.iter()
                .map(|s| format!("{s:.4}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            NoiseModel::Gaussian { sqrt_information } => {
                write!(f, "Gaussian (dim {})", sqrt_information.nrows())
            }
            NoiseModel::Diagonal { sigmas } => write!(f, "Diagonal sigmas [{}]", list(sigmas)),
            NoiseModel::Isotropic { dim, sigma } => {
                write!(f, "Isotropic (dim {dim}, sigma {sigma:.4})")
            }
            NoiseModel::Unit { dim } => write!(f, "Unit (dim {dim})"),
            NoiseModel::Constrained { sigmas } => {
                write!(f, "Constrained sigmas [{}]", list(sigmas))
            }
            NoiseModel::Robust { base, loss } => write!(f, "Robust {loss:?} over {base}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loss_functions::HuberLoss;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_isotropic_whitening() -> TestResult {
        let model = NoiseModel::isotropic(3, 0.5)?;
        let v = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!((model.whiten(&v)? - v * 2.0).norm() < 1e-12);
        assert!((model.sigmas() - DVector::from_element(3, 0.5)).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_gaussian_from_covariance_matches_diagonal() -> TestResult {
        let cov = DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 0.25]));
        let gaussian = NoiseModel::from_covariance(&cov)?;
        let diagonal = NoiseModel::diagonal(DVector::from_vec(vec![2.0, 0.5]))?;

        let v = DVector::from_vec(vec![1.0, -1.0]);
        assert!((gaussian.whiten(&v)? - diagonal.whiten(&v)?).norm() < 1e-12);
        assert!((gaussian.sigmas() - diagonal.sigmas()).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_whiten_system_keeps_shape() -> TestResult {
        let model = NoiseModel::diagonal(DVector::from_vec(vec![0.1, 10.0]))?;
        let mut augmented = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        model.whiten_system(&mut augmented)?;
        assert_eq!(augmented.shape(), (2, 3));
        assert!((augmented[(0, 2)] - 30.0).abs() < 1e-12);
        assert!((augmented[(1, 0)] - 0.4).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_constrained_rows_unscaled() -> TestResult {
        let model = NoiseModel::constrained(DVector::from_vec(vec![0.0, 0.5]))?;
        assert!(model.is_constrained());
        let v = DVector::from_vec(vec![3.0, 3.0]);
        let w = model.whiten(&v)?;
        assert!((w[0] - 3.0).abs() < 1e-12);
        assert!((w[1] - 6.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_constrained_unit_form_whitening_is_noop() -> TestResult {
        let model = NoiseModel::constrained(DVector::from_vec(vec![0.0, 0.5, 2.0]))?;
        let unit = model.to_unit();
        assert!(unit.is_constrained());
        assert!((unit.sigmas() - DVector::from_vec(vec![0.0, 1.0, 1.0])).norm() < 1e-12);

        let original = DMatrix::from_fn(3, 4, |i, j| (i * 4 + j) as f64 - 5.0);
        let mut augmented = original.clone();
        unit.whiten_system(&mut augmented)?;
        assert!((augmented - original).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_unit_form_of_plain_models() -> TestResult {
        assert!(NoiseModel::isotropic(2, 3.0)?.to_unit().is_unit());
        assert_eq!(NoiseModel::unit(4).to_unit().dim(), 4);
        Ok(())
    }

    #[test]
    fn test_robust_downweights_outlier() -> TestResult {
        let loss = Arc::new(HuberLoss::new(1.0)?);
        let model = NoiseModel::robust(NoiseModel::unit(2), loss)?;

        let mut augmented = DMatrix::from_row_slice(2, 2, &[1.0, 10.0, 1.0, 10.0]);
        model.whiten_system(&mut augmented)?;
        assert!(augmented.column(1).norm() < DVector::from_element(2, 10.0).norm());

        assert!((model.loss(0.5) - 0.25).abs() < 1e-12);
        assert!(model.loss(100.0) < 50.0);
        Ok(())
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(
            NoiseModel::diagonal(DVector::from_vec(vec![1.0, 0.0])),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            NoiseModel::isotropic(2, -1.0),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            NoiseModel::gaussian(DMatrix::zeros(2, 3)),
            Err(CoreError::DimensionMismatch(_))
        ));
        assert!(NoiseModel::from_covariance(&DMatrix::zeros(2, 2)).is_err());
    }

    #[test]
    fn test_dimension_check() -> TestResult {
        let model = NoiseModel::unit(3);
        let result = model.whiten(&DVector::zeros(2));
        assert!(matches!(result, Err(CoreError::DimensionMismatch(_))));
        Ok(())
    }

    #[test]
    fn test_equals_and_display() -> TestResult {
        let a = NoiseModel::isotropic(2, 0.1)?;
        let b = NoiseModel::isotropic(2, 0.1 + 1e-12)?;
        assert!(a.equals(&b, 1e-9));
        assert!(!a.equals(&NoiseModel::unit(2), 1e-9));
        assert_eq!(NoiseModel::unit(3).to_string(), "Unit (dim 3)");
        Ok(())
    }
}
