//! Corrector for robust losses (Ceres Solver algorithm).
//!
//! Given a whitened residual `r`, its Jacobian `J` and a loss `ρ(s)` with
//! `s = ||r||²`, the corrector rescales both so that an ordinary Gauss-Newton
//! step on the corrected system matches the robust objective to second order:
//!
//! ```text
//! √ρ₁ = √ρ'(s)
//! α   = 1 - √(1 + 2 s ρ''(s) / ρ'(s))
//! r̃   = √ρ₁ / (1 - α) · r
//! J̃   = √ρ₁ · (J - (α / s) · r rᵀ J)
//! ```
//!
//! When `s = 0` or `ρ''(s) ≤ 0` the curvature term is dropped and both are
//! simply scaled by `√ρ₁`.
//!
//! Reference: <https://github.com/ceres-solver/ceres-solver/blob/master/internal/ceres/corrector.cc>

use crate::core::loss_functions::LossFunction;
use nalgebra::{DMatrix, DVector};

/// Precomputed scaling factors for one residual.
#[derive(Debug, Clone)]
pub struct Corrector {
    sqrt_rho1: f64,
    residual_scaling: f64,
    alpha_sq_norm: f64,
}

impl Corrector {
    /// Evaluate `loss_function` at the squared norm `sq_norm`.
    pub fn new(loss_function: &dyn LossFunction, sq_norm: f64) -> Self {
        let [_, rho_1, rho_2] = loss_function.evaluate(sq_norm);
        let sqrt_rho1 = rho_1.sqrt();

        if sq_norm == 0.0 || rho_2 <= 0.0 {
            return Self {
                sqrt_rho1,
                residual_scaling: sqrt_rho1,
                alpha_sq_norm: 0.0,
            };
        }

        // Root of 0.5·α² - α - (ρ''/ρ')·s = 0
        let d = 1.0 + 2.0 * sq_norm * rho_2 / rho_1;
        let alpha = 1.0 - d.sqrt();

        Self {
            sqrt_rho1,
            residual_scaling: sqrt_rho1 / (1.0 - alpha),
            alpha_sq_norm: alpha / sq_norm,
        }
    }

    pub fn sqrt_rho1(&self) -> f64 {
        self.sqrt_rho1
    }

    /// `J ← √ρ₁ · (J - α² r rᵀ J)`
    pub fn correct_jacobian(&self, residual: &DVector<f64>, jacobian: &mut DMatrix<f64>) {
        if self.alpha_sq_norm != 0.0 {
            let rt_j = residual.transpose() * &*jacobian;
            *jacobian -= (residual * rt_j) * self.alpha_sq_norm;
        }
        *jacobian *= self.sqrt_rho1;
    }

    /// `r ← residual_scaling · r`
    pub fn correct_residuals(&self, residual: &mut DVector<f64>) {
        *residual *= self.residual_scaling;
    }

    /// Correct an augmented system `[A | b]` in place, `b` being the last column.
    pub fn correct_system(&self, augmented: &mut DMatrix<f64>) {
        let cols = augmented.ncols();
        if cols == 0 {
            return;
        }
        let mut b = augmented.column(cols - 1).clone_owned();
        let mut a = augmented.columns(0, cols - 1).clone_owned();
        self.correct_jacobian(&b, &mut a);
        self.correct_residuals(&mut b);
        augmented.columns_mut(0, cols - 1).copy_from(&a);
        augmented.column_mut(cols - 1).copy_from(&b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loss_functions::{CauchyLoss, HuberLoss, L2Loss};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_corrector_l2_is_identity() {
        let residual = DVector::from_vec(vec![3.0, -4.0]);
        let corrector = Corrector::new(&L2Loss, residual.norm_squared());
        let mut jacobian = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let original = jacobian.clone();
        corrector.correct_jacobian(&residual, &mut jacobian);
        assert!((jacobian - original).norm() < 1e-12);
    }

    #[test]
    fn test_corrector_huber_inlier() -> TestResult {
        let loss = HuberLoss::new(1.0)?;
        let residual = DVector::from_vec(vec![0.1, 0.2, 0.1]);
        let corrector = Corrector::new(&loss, residual.norm_squared());

        assert!((corrector.sqrt_rho1() - 1.0).abs() < 1e-10);
        let mut corrected = residual.clone();
        corrector.correct_residuals(&mut corrected);
        assert!((corrected - residual).norm() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_corrector_huber_outlier_downweights() -> TestResult {
        let loss = HuberLoss::new(1.0)?;
        let residual = DVector::from_vec(vec![5.0, 5.0, 5.0]);
        let corrector = Corrector::new(&loss, residual.norm_squared());

        assert!(corrector.sqrt_rho1() > 0.0 && corrector.sqrt_rho1() < 1.0);
        let mut corrected = residual.clone();
        corrector.correct_residuals(&mut corrected);
        assert!(corrected.norm() < residual.norm());
        Ok(())
    }

    #[test]
    fn test_correct_system_matches_separate_calls() -> TestResult {
        let loss = CauchyLoss::new(1.0)?;
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![2.0, 3.0]);
        let corrector = Corrector::new(&loss, b.norm_squared());

        let mut augmented = DMatrix::zeros(2, 4);
        augmented.columns_mut(0, 3).copy_from(&a);
        augmented.column_mut(3).copy_from(&b);
        corrector.correct_system(&mut augmented);

        let mut expected_a = a.clone();
        let mut expected_b = b.clone();
        corrector.correct_jacobian(&b, &mut expected_a);
        corrector.correct_residuals(&mut expected_b);

        assert!((augmented.columns(0, 3) - expected_a).norm() < 1e-12);
        assert!((augmented.column(3) - expected_b).norm() < 1e-12);
        Ok(())
    }
}
