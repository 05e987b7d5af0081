//! Two-variable expression factor with a direct evaluation entry point.
//!
//! [`ExpressionFactor2`] wraps an [`ExpressionFactor`] whose expression is
//! produced by a builder from two leaf expressions. Besides the generic
//! [`NonlinearFactor`] interface it offers [`ExpressionFactor2::evaluate_error`],
//! which takes the two variable values directly instead of a [`Values`]
//! container.

use crate::core::{CoreResult, Key, Values};
use crate::expression::Expression;
use crate::factors::expression_factor::{ExpressionFactor, ExpressionFactorArchive, ExpressionHook};
use crate::factors::{FactorError, FactorResult, NonlinearFactor};
use crate::linear::{JacobianFactor, NoiseModel};
use crate::manifold::Manifold;
use nalgebra::{DMatrix, DVector};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Maps the leaf expressions of both variables to the prediction.
pub type ExpressionBuilder<T, A1, A2> =
    Arc<dyn Fn(&Expression<A1>, &Expression<A2>) -> Expression<T> + Send + Sync>;

pub struct ExpressionFactor2<T: Manifold, A1: Manifold, A2: Manifold> {
    inner: ExpressionFactor<T>,
    key1: Key,
    key2: Key,
    builder: ExpressionBuilder<T, A1, A2>,
}

impl<T: Manifold, A1: Manifold, A2: Manifold> Clone for ExpressionFactor2<T, A1, A2> {
    fn clone(&self) -> Self {
        ExpressionFactor2 {
            inner: self.inner.clone(),
            key1: self.key1,
            key2: self.key2,
            builder: Arc::clone(&self.builder),
        }
    }
}

impl<T: Manifold, A1: Manifold, A2: Manifold> ExpressionFactor2<T, A1, A2> {
    /// Create the factor over `key1` (type `A1`) and `key2` (type `A2`).
    ///
    /// The two keys must differ.
    pub fn new<B>(
        key1: Key,
        key2: Key,
        noise_model: impl Into<Option<Arc<NoiseModel>>>,
        measured: T,
        builder: B,
    ) -> FactorResult<Self>
    where
        B: Fn(&Expression<A1>, &Expression<A2>) -> Expression<T> + Send + Sync + 'static,
    {
        Self::with_builder(key1, key2, noise_model.into(), measured, Arc::new(builder))
    }

    fn with_builder(
        key1: Key,
        key2: Key,
        noise_model: Option<Arc<NoiseModel>>,
        measured: T,
        builder: ExpressionBuilder<T, A1, A2>,
    ) -> FactorResult<Self> {
        if key1 == key2 {
            return Err(FactorError::InvalidArgument(format!(
                "ExpressionFactor2: both variables use key {key1}"
            ))
            .log());
        }
        let expression = builder(&Expression::leaf(key1), &Expression::leaf(key2));
        let inner = ExpressionFactor::new(noise_model, measured, expression)?;
        Ok(ExpressionFactor2 {
            inner,
            key1,
            key2,
            builder,
        })
    }

    pub fn key1(&self) -> Key {
        self.key1
    }

    pub fn key2(&self) -> Key {
        self.key2
    }

    pub fn measured(&self) -> &T {
        self.inner.measured()
    }

    pub fn expression(&self) -> &Expression<T> {
        self.inner.expression()
    }

    /// The underlying general expression factor.
    pub fn as_expression_factor(&self) -> &ExpressionFactor<T> {
        &self.inner
    }

    /// Error at `(a1, a2)` with optional Jacobians with respect to each.
    ///
    /// A requested Jacobian for a variable the prediction does not depend on
    /// is a zero `dim × dim(a)` block.
    pub fn evaluate_error(
        &self,
        a1: &A1,
        a2: &A2,
        h1: Option<&mut DMatrix<f64>>,
        h2: Option<&mut DMatrix<f64>>,
    ) -> CoreResult<DVector<f64>> {
        let mut values = Values::new();
        values.insert(self.key1, a1.clone())?;
        values.insert(self.key2, a2.clone())?;

        if h1.is_none() && h2.is_none() {
            return self.inner.unwhitened_error(&values, None);
        }

        let mut jacobians = Vec::with_capacity(2);
        let error = self.inner.unwhitened_error(&values, Some(&mut jacobians))?;
        let keys = self.inner.keys();
        let split = |key: Key, cols: usize, out: &mut DMatrix<f64>| {
            *out = match keys.binary_search(&key) {
                Ok(position) => jacobians[position].clone(),
                Err(_) => DMatrix::zeros(error.len(), cols),
            };
        };
        if let Some(h1) = h1 {
            split(self.key1, Manifold::dim(a1), h1);
        }
        if let Some(h2) = h2 {
            split(self.key2, Manifold::dim(a2), h2);
        }
        Ok(error)
    }

    /// Archive storing `[key1, key2]` in construction order.
    pub fn to_archive(&self) -> ExpressionFactorArchive<T> {
        ExpressionFactorArchive {
            keys: vec![self.key1, self.key2],
            noise_model: (**self.inner.noise_model()).clone(),
            measured: self.inner.measured().clone(),
        }
    }

    /// Rebuild from an archive written by [`ExpressionFactor2::to_archive`].
    pub fn from_archive<B>(archive: ExpressionFactorArchive<T>, builder: B) -> FactorResult<Self>
    where
        B: Fn(&Expression<A1>, &Expression<A2>) -> Expression<T> + Send + Sync + 'static,
    {
        match archive.keys.as_slice() {
            [key1, key2] => Self::with_builder(
                *key1,
                *key2,
                Some(Arc::new(archive.noise_model)),
                archive.measured,
                Arc::new(builder),
            ),
            keys => Err(FactorError::InvalidArgument(format!(
                "ExpressionFactor2: archive has {} keys, expected 2",
                keys.len()
            ))
            .log()),
        }
    }
}

impl<T: Manifold, A1: Manifold, A2: Manifold> ExpressionHook<T> for ExpressionFactor2<T, A1, A2> {
    fn expression(&self, keys: &[Key]) -> FactorResult<Expression<T>> {
        match keys {
            [key1, key2] => Ok((self.builder)(
                &Expression::leaf(*key1),
                &Expression::leaf(*key2),
            )),
            _ => Err(FactorError::InvalidArgument(format!(
                "ExpressionFactor2: expected 2 keys, got {}",
                keys.len()
            ))
            .log()),
        }
    }
}

impl<T: Manifold, A1: Manifold, A2: Manifold> fmt::Display for ExpressionFactor2<T, A1, A2> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExpressionFactor2 on ({}, {}): {}", self.key1, self.key2, self.inner)
    }
}

impl<T: Manifold, A1: Manifold, A2: Manifold> NonlinearFactor for ExpressionFactor2<T, A1, A2> {
    fn keys(&self) -> &[Key] {
        self.inner.keys()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn noise_model(&self) -> &Arc<NoiseModel> {
        self.inner.noise_model()
    }

    fn unwhitened_error(
        &self,
        values: &Values,
        jacobians: Option<&mut Vec<DMatrix<f64>>>,
    ) -> CoreResult<DVector<f64>> {
        self.inner.unwhitened_error(values, jacobians)
    }

    fn active(&self, values: &Values) -> bool {
        self.inner.active(values)
    }

    fn linearize(&self, values: &Values) -> CoreResult<Option<JacobianFactor>> {
        self.inner.linearize(values)
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
            .downcast_ref::<ExpressionFactor2<T, A1, A2>>()
            .is_some_and(|other| {
                self.key1 == other.key1
                    && self.key2 == other.key2
                    && self.inner.equals(&other.inner, tol)
            })
    }
}
