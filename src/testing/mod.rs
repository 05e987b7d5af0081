//! Jacobian conformance checking for nonlinear factors.
//!
//! The checker compares the analytic linearization of a factor against a
//! linear factor built purely from central differences of its unwhitened
//! error. Both are increments around the same linearization point, so their
//! right-hand sides must vanish once expressed as a linear system:
//!
//! ```text
//! A_numerical ≈ A_analytic       (element-wise, within tolerance)
//! b_numerical ≈ 0,  b_analytic ≈ 0
//! ```
//!
//! The `b ≈ 0` check only holds at values where the factor's prediction
//! matches its measurement, so test points should be built with
//! `measured = predict(values)`.
//!
//! # Example
//!
//! ```
//! use expression_factor::assert_factor_jacobians;
//! use expression_factor::core::{Key, Values};
//! use expression_factor::expression::{Expression, ops};
//! use expression_factor::factors::ExpressionFactor;
//! use expression_factor::linear::NoiseModel;
//! use nalgebra::Vector2;
//! use std::sync::Arc;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let (a, b) = (Key::symbol('x', 0), Key::symbol('x', 1));
//! let factor = ExpressionFactor::new(
//!     Arc::new(NoiseModel::isotropic(2, 0.1)?),
//!     Vector2::new(1.0, -1.0),
//!     ops::difference(&Expression::leaf(b), &Expression::leaf(a)),
//! )?;
//!
//! let mut values = Values::new();
//! values.insert(a, Vector2::new(0.5, 0.5))?;
//! values.insert(b, Vector2::new(1.5, -0.5))?;
//! assert_factor_jacobians!(&factor, &values, 1e-5, 1e-6);
//! # Ok(())
//! # }
//! ```

use crate::core::{CoreError, CoreResult, Values, VectorValues};
use crate::factors::NonlinearFactor;
use crate::linear::JacobianFactor;
use nalgebra::DMatrix;
use thiserror::Error;

/// Why a factor failed the Jacobian conformance check.
#[derive(Debug, Clone, Error)]
pub enum ConformanceFailure {
    /// Evaluating or linearizing the factor failed outright
    #[error("factor evaluation failed: {0}")]
    Evaluation(#[from] CoreError),

    /// The factor is inactive at the test point
    #[error("factor is inactive at the given values, nothing to compare")]
    Inactive,

    /// The two Jacobians have different shapes
    #[error("Jacobian shapes differ: numerical {numerical:?}, analytic {analytic:?}")]
    Shape {
        numerical: (usize, usize),
        analytic: (usize, usize),
    },

    /// Jacobians or residual columns disagree beyond the tolerance
    #[error(
        "Jacobian mismatch (tolerance {tolerance:e}): max |A_num - A_analytic| = {max_difference:e} \
         at ({row}, {col}), numerical {numerical:.9}, analytic {analytic:.9}; \
         |b_num| = {numerical_b_norm:e}, |b_analytic| = {analytic_b_norm:e}"
    )]
    Mismatch {
        tolerance: f64,
        max_difference: f64,
        row: usize,
        col: usize,
        numerical: f64,
        analytic: f64,
        numerical_b_norm: f64,
        analytic_b_norm: f64,
    },
}

/// Linear factor from central differences of the unwhitened error.
///
/// Each coordinate of each key is perturbed by `±step` through
/// [`Values::retract`]; the result carries no noise model and `b = -e(values)`.
pub fn compute_numerical_derivative_jacobian_factor(
    factor: &dyn NonlinearFactor,
    values: &Values,
    step: f64,
) -> CoreResult<JacobianFactor> {
    let error = factor.unwhitened_error(values, None)?;
    let rows = error.len();
    let mut dx = values.zero_vectors();

    let mut terms = Vec::with_capacity(factor.keys().len());
    for &key in factor.keys() {
        let dim = values.dim(key)?;
        let mut jacobian = DMatrix::zeros(rows, dim);
        for col in 0..dim {
            let perturb = |dx: &mut VectorValues, amount: f64| -> CoreResult<()> {
                let entry = dx.get_mut(key).ok_or_else(|| {
                    CoreError::KeyNotFound(format!("no tangent vector for key {key}")).log()
                })?;
                entry[col] = amount;
                Ok(())
            };

            perturb(&mut dx, step)?;
            let plus = factor.unwhitened_error(&values.retract(&dx)?, None)?;
            perturb(&mut dx, -step)?;
            let minus = factor.unwhitened_error(&values.retract(&dx)?, None)?;
            perturb(&mut dx, 0.0)?;

            jacobian
                .column_mut(col)
                .copy_from(&((plus - minus) / (2.0 * step)));
        }
        terms.push((key, jacobian));
    }

    JacobianFactor::from_terms(terms, -error, None)
}

/// Compare the analytic linearization of `factor` at `values` with central
/// differences taken with `step`.
///
/// The numerical factor is whitened by the factor's own noise model so both
/// systems are compared in the same units.
pub fn test_factor_jacobians(
    factor: &dyn NonlinearFactor,
    values: &Values,
    step: f64,
    tolerance: f64,
) -> Result<(), ConformanceFailure> {
    let mut numerical = compute_numerical_derivative_jacobian_factor(factor, values, step)?;
    numerical.whiten_in_place(factor.noise_model())?;
    let analytic = factor
        .linearize(values)?
        .ok_or(ConformanceFailure::Inactive)?;

    let (a_numerical, b_numerical) = numerical.jacobian_unweighted();
    let (a_analytic, b_analytic) = analytic.jacobian_unweighted();
    if a_numerical.shape() != a_analytic.shape() {
        return Err(ConformanceFailure::Shape {
            numerical: a_numerical.shape(),
            analytic: a_analytic.shape(),
        });
    }

    let difference = &a_numerical - &a_analytic;
    let (row, col, max_difference) = if difference.is_empty() {
        (0, 0, 0.0)
    } else {
        let (row, col) = difference.iamax_full();
        (row, col, difference[(row, col)].abs())
    };
    let b_tolerance_ok = b_numerical.amax() <= tolerance && b_analytic.amax() <= tolerance;

    if max_difference > tolerance || !b_tolerance_ok {
        return Err(ConformanceFailure::Mismatch {
            tolerance,
            max_difference,
            row,
            col,
            numerical: a_numerical.get((row, col)).copied().unwrap_or(0.0),
            analytic: a_analytic.get((row, col)).copied().unwrap_or(0.0),
            numerical_b_norm: b_numerical.norm(),
            analytic_b_norm: b_analytic.norm(),
        });
    }
    Ok(())
}

/// Assert that a factor's analytic Jacobians match central differences.
///
/// Panics with the [`ConformanceFailure`] report on mismatch.
///
/// ```ignore
/// assert_factor_jacobians!(&factor, &values, 1e-5, 1e-6);
/// ```
#[macro_export]
macro_rules! assert_factor_jacobians {
    ($factor:expr, $values:expr, $step:expr, $tolerance:expr) => {
        if let Err(failure) =
            $crate::testing::test_factor_jacobians($factor, $values, $step, $tolerance)
        {
            panic!("Jacobian conformance check failed: {}", failure);
        }
    };
}
