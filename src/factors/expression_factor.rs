//! Factor whose prediction is an [`Expression`].
//!
//! The factor stores a measurement `z` of type `T`, a noise model and an
//! expression `h(x)` producing a `T`. Its unwhitened error is
//!
//! ```text
//! e(x) = local(z, h(x)) = h(x) ⊖ z
//! ```
//!
//! Linearization lets the expression write its Jacobian blocks straight into
//! the block matrix of the resulting [`JacobianFactor`] by reverse-mode
//! accumulation, so no per-key Jacobian is ever allocated.
//!
//! # Example
//!
//! ```
//! use expression_factor::core::{Key, Values};
//! use expression_factor::expression::Expression;
//! use expression_factor::factors::{ExpressionFactor, NonlinearFactor};
//! use expression_factor::linear::NoiseModel;
//! use nalgebra::Vector3;
//! use std::sync::Arc;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let x = Key::symbol('x', 0);
//! let factor = ExpressionFactor::new(
//!     Arc::new(NoiseModel::isotropic(3, 1.0)?),
//!     Vector3::new(1.0, 2.0, 3.0),
//!     Expression::<Vector3<f64>>::leaf(x),
//! )?;
//!
//! let mut values = Values::new();
//! values.insert(x, Vector3::zeros())?;
//! let error = factor.unwhitened_error(&values, None)?;
//! assert!((error[2] + 3.0).abs() < 1e-12);
//! # Ok(())
//! # }
//! ```

use crate::core::{CoreError, CoreResult, Key, Values};
use crate::expression::Expression;
use crate::factors::{FactorError, FactorResult, NonlinearFactor};
use crate::linear::JacobianFactor;
use crate::linear::NoiseModel;
use crate::linear::noise_model::linear_factor_model;
use crate::manifold::Manifold;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Predicate deciding whether a factor contributes at given values.
pub type ActivityFn = Arc<dyn Fn(&Values) -> bool + Send + Sync>;

/// Nonlinear factor `local(measured, expression(x))` with a noise model.
pub struct ExpressionFactor<T: Manifold> {
    noise_model: Arc<NoiseModel>,
    measured: T,
    expression: Expression<T>,
    keys: Vec<Key>,
    dims: Vec<usize>,
    activity: Option<ActivityFn>,
}

impl<T: Manifold> Clone for ExpressionFactor<T> {
    fn clone(&self) -> Self {
        ExpressionFactor {
            noise_model: Arc::clone(&self.noise_model),
            measured: self.measured.clone(),
            expression: self.expression.clone(),
            keys: self.keys.clone(),
            dims: self.dims.clone(),
            activity: self.activity.clone(),
        }
    }
}

impl<T: Manifold> fmt::Debug for ExpressionFactor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionFactor")
            .field("keys", &self.keys)
            .field("dims", &self.dims)
            .field("noise_model", &self.noise_model)
            .field("measured", &self.measured)
            .finish_non_exhaustive()
    }
}

impl<T: Manifold> ExpressionFactor<T> {
    /// Create a factor, rejecting a missing noise model or one whose
    /// dimension differs from the tangent dimension of `measured`.
    pub fn new(
        noise_model: impl Into<Option<Arc<NoiseModel>>>,
        measured: T,
        expression: Expression<T>,
    ) -> FactorResult<Self> {
        let noise_model = Self::check_noise_model(noise_model.into(), &measured)?;
        let (keys, dims) = expression.keys_and_dims();
        Ok(ExpressionFactor {
            noise_model,
            measured,
            expression,
            keys,
            dims,
            activity: None,
        })
    }

    fn check_noise_model(
        noise_model: Option<Arc<NoiseModel>>,
        measured: &T,
    ) -> FactorResult<Arc<NoiseModel>> {
        let noise_model = noise_model.ok_or_else(|| {
            FactorError::InvalidArgument("ExpressionFactor: no NoiseModel.".to_string()).log()
        })?;
        let dim = Manifold::dim(measured);
        if noise_model.dim() != dim {
            return Err(FactorError::InvalidArgument(format!(
                "ExpressionFactor was created with a NoiseModel of incorrect dimension \
                 (noise model {}, measurement {dim}).",
                noise_model.dim()
            ))
            .log());
        }
        Ok(noise_model)
    }

    /// Restrict the factor to values where `predicate` holds.
    pub fn with_activity<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Values) -> bool + Send + Sync + 'static,
    {
        self.activity = Some(Arc::new(predicate));
        self
    }

    pub fn measured(&self) -> &T {
        &self.measured
    }

    pub fn expression(&self) -> &Expression<T> {
        &self.expression
    }

    /// Tangent dimensions of the keys, in key order.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Serializable state of the factor; the expression itself is not stored.
    pub fn to_archive(&self) -> ExpressionFactorArchive<T> {
        ExpressionFactorArchive {
            keys: self.keys.clone(),
            noise_model: (*self.noise_model).clone(),
            measured: self.measured.clone(),
        }
    }

    /// Rebuild a factor from its archive, asking `hook` for the expression.
    ///
    /// The cached keys and dimensions are recomputed from the rebuilt
    /// expression, not taken from the archive.
    pub fn restore(
        archive: ExpressionFactorArchive<T>,
        hook: &impl ExpressionHook<T>,
    ) -> FactorResult<Self> {
        let expression = hook.expression(&archive.keys)?;
        Self::new(Arc::new(archive.noise_model), archive.measured, expression)
    }
}

impl<T: Manifold> fmt::Display for ExpressionFactor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        writeln!(f, "ExpressionFactor({})", keys.join(", "))?;
        writeln!(f, "  noise model: {}", self.noise_model)?;
        write!(f, "  measured: {}", self.measured)
    }
}

impl<T: Manifold> NonlinearFactor for ExpressionFactor<T> {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        self.noise_model.dim()
    }

    fn noise_model(&self) -> &Arc<NoiseModel> {
        &self.noise_model
    }

    fn unwhitened_error(
        &self,
        values: &Values,
        jacobians: Option<&mut Vec<DMatrix<f64>>>,
    ) -> CoreResult<DVector<f64>> {
        let value = match jacobians {
            Some(jacobians) => {
                self.expression
                    .value_and_derivatives(values, &self.keys, &self.dims, jacobians)?
            }
            None => self.expression.value(values)?,
        };
        if Manifold::dim(&value) != Manifold::dim(&self.measured) {
            return Err(CoreError::DimensionMismatch(format!(
                "expression value has dimension {}, measurement has dimension {}",
                Manifold::dim(&value),
                Manifold::dim(&self.measured)
            ))
            .log());
        }
        Ok(self.measured.local(&value))
    }

    fn active(&self, values: &Values) -> bool {
        self.activity.as_ref().is_none_or(|predicate| predicate(values))
    }

    fn linearize(&self, values: &Values) -> CoreResult<Option<JacobianFactor>> {
        if !self.active(values) {
            debug!("skipping linearization of inactive factor on {:?}", self.keys);
            return Ok(None);
        }

        let mut factor = JacobianFactor::new(
            self.keys.clone(),
            &self.dims,
            Manifold::dim(&self.measured),
            linear_factor_model(&self.noise_model),
        )?;
        factor.matrix_object_mut().set_zero();

        let value = {
            let mut map = factor.jacobian_map()?;
            self.expression.value_and_jacobian_map(values, &mut map)?
        };
        factor.set_b(&-self.measured.local(&value))?;

        // Constrained rows stay unscaled here; the stored unit model marks them.
        factor.whiten_in_place(&self.noise_model)?;
        Ok(Some(factor))
    }

    fn clone_box(&self) -> Box<dyn NonlinearFactor> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn NonlinearFactor, tol: f64) -> bool {
        other
            .as_any()
            .downcast_ref::<ExpressionFactor<T>>()
            .is_some_and(|other| {
                self.keys == other.keys
                    && self.dims == other.dims
                    && self.noise_model.equals(&other.noise_model, tol)
                    && self.measured.equals(&other.measured, tol)
            })
    }
}

/// Serializable part of an [`ExpressionFactor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionFactorArchive<T> {
    pub keys: Vec<Key>,
    pub noise_model: NoiseModel,
    pub measured: T,
}

/// Rebuilds the expression of a factor from its archived keys.
///
/// Factor families that can be reloaded from an archive override
/// [`ExpressionHook::expression`]; the default refuses.
pub trait ExpressionHook<T> {
    fn expression(&self, _keys: &[Key]) -> FactorResult<Expression<T>> {
        Err(FactorError::UnsupportedOperation(
            "ExpressionFactor: expression() hook not provided, cannot deserialize".to_string(),
        )
        .log())
    }
}
