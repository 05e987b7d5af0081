//! Nonlinear factors and their linearization.
//!
//! A nonlinear factor ties a prediction computed from some variables to a
//! measurement, weighted by a noise model:
//!
//! ```text
//! error(x) = local(measured, h(x))          (unwhitened, tangent space)
//! cost(x)  = ½ ‖whiten(error(x))‖²          (or ½ ρ(·) for robust models)
//! ```
//!
//! Linearizing at `x` yields a [`JacobianFactor`] with `A = ∂h/∂x` and
//! `b = -error(x)`, both whitened by the factor's noise model, so that
//! `A δ ≈ b` is the Gauss-Newton system for the increment `δ`.
//!
//! # Factor Types
//!
//! - [`ExpressionFactor`]: prediction given by an [`Expression`](crate::expression::Expression),
//!   Jacobians by reverse-mode accumulation straight into the linear factor
//! - [`ExpressionFactor2`]: two-variable convenience wrapper with a direct
//!   `evaluate_error(a1, a2, H1, H2)` entry point

use crate::core::{CoreResult, Key, Values};
use crate::linear::JacobianFactor;
use crate::linear::NoiseModel;
use crate::linear::noise_model::linear_factor_model;
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

pub mod expression_factor;
pub mod expression_factor2;

pub use expression_factor::{ExpressionFactor, ExpressionFactorArchive, ExpressionHook};
pub use expression_factor2::ExpressionFactor2;

/// Factor-specific error types
#[derive(Debug, Clone, Error)]
pub enum FactorError {
    /// Rejected construction argument (missing or mismatched noise model, repeated key)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The factor type cannot rebuild its expression, so it cannot be restored
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl FactorError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// let model = noise_model
    ///     .ok_or_else(|| FactorError::InvalidArgument("no noise model".to_string()).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error for debugging context
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for factor operations
pub type FactorResult<T> = Result<T, FactorError>;

/// Nonlinear factor with a Gaussian (possibly robust) noise model.
///
/// Implementors provide the unwhitened error and its Jacobians; whitening,
/// cost evaluation and a generic linearization come from the default methods.
///
/// # Thread Safety
///
/// Factors must be `Send + Sync` so that collections can be linearized in
/// parallel (see [`linearize_all`]).
pub trait NonlinearFactor: Send + Sync + fmt::Display {
    /// Variable keys, sorted ascending.
    fn keys(&self) -> &[Key];

    /// Residual dimension.
    fn dim(&self) -> usize;

    fn noise_model(&self) -> &Arc<NoiseModel>;

    /// Error before whitening.
    ///
    /// When `jacobians` is given it is filled with one `dim × dim(key)` matrix
    /// per key, in the order of [`NonlinearFactor::keys`].
    fn unwhitened_error(
        &self,
        values: &Values,
        jacobians: Option<&mut Vec<DMatrix<f64>>>,
    ) -> CoreResult<DVector<f64>>;

    fn whitened_error(&self, values: &Values) -> CoreResult<DVector<f64>> {
        self.noise_model().whiten(&self.unwhitened_error(values, None)?)
    }

    /// Cost `½ ‖whitened error‖²`, robust-aware; zero when inactive.
    fn error(&self, values: &Values) -> CoreResult<f64> {
        if !self.active(values) {
            return Ok(0.0);
        }
        let model = self.noise_model();
        let squared = model.squared_mahalanobis(&self.unwhitened_error(values, None)?)?;
        Ok(model.loss(squared))
    }

    /// Whether the factor contributes at `values`.
    fn active(&self, _values: &Values) -> bool {
        true
    }

    /// Whitened linear factor at `values`, `None` when inactive.
    fn linearize(&self, values: &Values) -> CoreResult<Option<JacobianFactor>> {
        if !self.active(values) {
            debug!("skipping linearization of inactive factor");
            return Ok(None);
        }
        let mut jacobians = Vec::with_capacity(self.keys().len());
        let error = self.unwhitened_error(values, Some(&mut jacobians))?;
        let terms = self.keys().iter().copied().zip(jacobians).collect();
        let mut factor =
            JacobianFactor::from_terms(terms, -error, linear_factor_model(self.noise_model()))?;
        factor.whiten_in_place(self.noise_model())?;
        Ok(Some(factor))
    }

    /// Deep copy; shared sub-objects (noise model, expression) stay shared.
    fn clone_box(&self) -> Box<dyn NonlinearFactor>;

    fn as_any(&self) -> &dyn Any;

    fn equals(&self, other: &dyn NonlinearFactor, tol: f64) -> bool;
}

impl Clone for Box<dyn NonlinearFactor> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Linearize every active factor at `values`, preserving order.
///
/// Factors are linearized in parallel when the `parallel` feature is enabled.
pub fn linearize_all(
    factors: &[Box<dyn NonlinearFactor>],
    values: &Values,
) -> CoreResult<Vec<JacobianFactor>> {
    #[cfg(feature = "parallel")]
    let linearized: CoreResult<Vec<Option<JacobianFactor>>> = factors
        .par_iter()
        .map(|factor| factor.linearize(values))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let linearized: CoreResult<Vec<Option<JacobianFactor>>> = factors
        .iter()
        .map(|factor| factor.linearize(values))
        .collect();

    let linearized: Vec<JacobianFactor> = linearized?.into_iter().flatten().collect();
    debug!(
        "linearized {} of {} factors",
        linearized.len(),
        factors.len()
    );
    Ok(linearized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Expression, ops};
    use crate::linear::assemble_sparse_system;
    use nalgebra::Vector2;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn x(i: u64) -> Key {
        Key::symbol('x', i)
    }

    /// Hand-written factor relying on the default linearization.
    struct OffsetFactor {
        keys: Vec<Key>,
        model: Arc<NoiseModel>,
        offset: f64,
    }

    impl fmt::Display for OffsetFactor {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "OffsetFactor({})", self.offset)
        }
    }

    impl NonlinearFactor for OffsetFactor {
        fn keys(&self) -> &[Key] {
            &self.keys
        }

        fn dim(&self) -> usize {
            1
        }

        fn noise_model(&self) -> &Arc<NoiseModel> {
            &self.model
        }

        fn unwhitened_error(
            &self,
            values: &Values,
            jacobians: Option<&mut Vec<DMatrix<f64>>>,
        ) -> CoreResult<DVector<f64>> {
            let v = *values.at::<f64>(self.keys[0])?;
            if let Some(jacobians) = jacobians {
                jacobians.clear();
                jacobians.push(DMatrix::from_element(1, 1, 2.0 * v));
            }
            Ok(DVector::from_element(1, v * v - self.offset))
        }

        fn clone_box(&self) -> Box<dyn NonlinearFactor> {
            Box::new(OffsetFactor {
                keys: self.keys.clone(),
                model: Arc::clone(&self.model),
                offset: self.offset,
            })
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn equals(&self, other: &dyn NonlinearFactor, tol: f64) -> bool {
            other
                .as_any()
                .downcast_ref::<OffsetFactor>()
                .is_some_and(|o| (o.offset - self.offset).abs() <= tol)
        }
    }

    #[test]
    fn test_default_linearize() -> TestResult {
        let factor = OffsetFactor {
            keys: vec![x(0)],
            model: Arc::new(NoiseModel::isotropic(1, 0.5)?),
            offset: 1.0,
        };
        let mut values = Values::new();
        values.insert(x(0), 3.0)?;

        let linear = factor.linearize(&values)?.ok_or("factor should be active")?;
        let (a, b) = linear.jacobian_unweighted();
        assert!((a[(0, 0)] - 12.0).abs() < 1e-12);
        assert!((b[0] + 16.0).abs() < 1e-12);
        assert!(linear.model().is_none());

        assert!((factor.error(&values)? - 0.5 * 64.0 * 4.0).abs() < 1e-9);
        assert!((factor.whitened_error(&values)?[0] - 16.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_linearize_all_and_assemble() -> TestResult {
        let model = Arc::new(NoiseModel::unit(2));
        let prior = ExpressionFactor::new(
            model.clone(),
            Vector2::new(0.0, 0.0),
            Expression::<Vector2<f64>>::leaf(x(0)),
        )?;
        let odometry = ExpressionFactor::new(
            model.clone(),
            Vector2::new(1.0, 0.0),
            ops::difference(&Expression::leaf(x(1)), &Expression::leaf(x(0))),
        )?;
        let inactive = ExpressionFactor::new(
            model,
            Vector2::new(5.0, 5.0),
            Expression::<Vector2<f64>>::leaf(x(1)),
        )?
        .with_activity(|_| false);

        let factors: Vec<Box<dyn NonlinearFactor>> =
            vec![Box::new(prior), Box::new(odometry), Box::new(inactive)];
        let cloned = factors.clone();
        assert!(cloned[1].equals(factors[1].as_ref(), 1e-12));

        let mut values = Values::new();
        values.insert(x(0), Vector2::new(0.1, 0.0))?;
        values.insert(x(1), Vector2::new(0.9, 0.2))?;

        let linear = linearize_all(&factors, &values)?;
        assert_eq!(linear.len(), 2);

        let system = assemble_sparse_system(&linear, &[x(0), x(1)])?;
        assert_eq!(system.jacobian.nrows(), 4);
        assert_eq!(system.jacobian.ncols(), 4);
        // odometry predicts (0.8, 0.2) against (1, 0), so b = (0.2, -0.2)
        assert!((system.rhs[(2, 0)] - 0.2).abs() < 1e-12);
        assert!((system.rhs[(3, 0)] + 0.2).abs() < 1e-12);
        Ok(())
    }
}
