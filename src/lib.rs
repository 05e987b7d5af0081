//! # Expression Factor
//!
//! Expression-based nonlinear factors for factor-graph least squares, with
//! Jacobians computed by reverse-mode accumulation straight into the block
//! matrix of the linearized factor, and a finite-difference oracle to check them.
//!
//! ## Features
//!
//! - **Expressions**: immutable, shareable computation graphs over manifold-valued
//!   variables, evaluated value-only or with reverse-mode Jacobians
//! - **Expression factors**: `local(measured, h(x))` residuals, linearized into
//!   whitened [`JacobianFactor`]s, with constrained and robust noise models
//! - **Numerical derivatives**: central-difference gradients, Jacobians and
//!   Hessians on manifolds
//! - **Conformance checking**: analytic versus numerical linearization of any
//!   [`NonlinearFactor`], with the [`assert_factor_jacobians!`] test macro
//! - **Sparse assembly**: stacking linear factors into a `faer` sparse system
//!
//! ## Example
//!
//! ```
//! use expression_factor::core::{Key, Values};
//! use expression_factor::expression::{Expression, ops};
//! use expression_factor::factors::{ExpressionFactor, NonlinearFactor};
//! use expression_factor::linear::NoiseModel;
//! use expression_factor::manifold::SE2;
//! use std::sync::Arc;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//!
//! let (x0, x1) = (Key::symbol('x', 0), Key::symbol('x', 1));
//! let odometry = ExpressionFactor::new(
//!     Arc::new(NoiseModel::isotropic(3, 0.1)?),
//!     SE2::from_xy_angle(1.0, 0.0, 0.0),
//!     ops::between(&Expression::<SE2>::leaf(x0), &Expression::leaf(x1)),
//! )?;
//!
//! let mut values = Values::new();
//! values.insert(x0, SE2::identity())?;
//! values.insert(x1, SE2::from_xy_angle(0.9, 0.1, 0.05))?;
//!
//! let linear = odometry.linearize(&values)?.ok_or("factor is active")?;
//! assert_eq!(linear.keys(), &[x0, x1]);
//! assert_eq!(linear.rows(), 3);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod expression;
pub mod factors;
pub mod linear;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod numerical;
pub mod testing;

pub use crate::core::{Key, Values, VectorValues};
pub use error::{ExpressionFactorError, ExpressionFactorResult};
pub use expression::Expression;
pub use factors::{
    ExpressionFactor, ExpressionFactor2, ExpressionHook, NonlinearFactor, linearize_all,
};
pub use linear::{JacobianFactor, NoiseModel, assemble_sparse_system};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use manifold::Manifold;
