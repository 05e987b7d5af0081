//! Manifold contract for variables and measurements.
//!
//! Every value that can be optimized or measured lives on a manifold with a
//! local tangent space. The engine only needs four things from such a type:
//!
//! - its tangent dimension,
//! - `local(a, b)`: the tangent vector `b ⊖ a` expressed at `a`,
//! - `retract(a, δ)`: the perturbed value `a ⊕ δ`,
//! - approximate equality and printing (`Display`).
//!
//! Lie group types (`SO2`, `SE2`, `SO3`) use the right-perturbation convention
//! of the [manif](https://github.com/artivis/manif) library:
//!
//! ```text
//! a ⊕ δ = a ∘ Exp(δ)
//! b ⊖ a = Log(a⁻¹ ∘ b)
//! ```
//!
//! Every analytic Jacobian exposed by these types is taken with respect to that
//! same perturbation, so it agrees with central differences computed through
//! [`Manifold::retract`] and [`Manifold::local`].
//!
//! | Type              | DIMENSION | chart                     |
//! |-------------------|-----------|---------------------------|
//! | `f64`             | 1         | `b - a`                   |
//! | `SVector<f64, N>` | N         | `b - a`                   |
//! | `DVector<f64>`    | 0 (dyn)   | `b - a`                   |
//! | `SO2`             | 1         | `Log(a⁻¹ b)`              |
//! | `SE2`             | 3         | `Log(a⁻¹ b)`, (x, y, θ)   |
//! | `SO3`             | 3         | `Log(a⁻¹ b)`, axis-angle  |

use nalgebra::{DVector, SVector};
use std::{
    error, fmt,
    fmt::{Debug, Display, Formatter},
};

pub mod se2;
pub mod so2;
pub mod so3;

pub use se2::SE2;
pub use so2::SO2;
pub use so3::SO3;

/// Errors that can occur when building manifold elements.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifoldError {
    /// Invalid tangent vector dimension
    InvalidTangentDimension { expected: usize, actual: usize },
    /// Dimension validation failed during conversion
    DimensionMismatch { expected: usize, actual: usize },
    /// NaN or Inf detected in manifold element
    InvalidNumber,
    /// Normalization failed for manifold element
    NormalizationFailed(String),
}

impl Display for ManifoldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ManifoldError::InvalidTangentDimension { expected, actual } => {
                write!(
                    f,
                    "Invalid tangent dimension: expected {expected}, got {actual}"
                )
            }
            ManifoldError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {expected}, got {actual}")
            }
            ManifoldError::InvalidNumber => {
                write!(f, "Invalid number: NaN or Inf detected")
            }
            ManifoldError::NormalizationFailed(msg) => {
                write!(f, "Normalization failed: {msg}")
            }
        }
    }
}

impl error::Error for ManifoldError {}

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Capability set every variable and measurement type must provide.
///
/// `DIMENSION` is the statically known tangent dimension. A value of `0` marks
/// a type whose dimension is only known at runtime (e.g. `DVector<f64>`); such
/// types report their real size through [`Manifold::dim`].
///
/// # Example
///
/// ```
/// use expression_factor::manifold::{Manifold, SE2};
/// use nalgebra::DVector;
///
/// let a = SE2::from_xy_angle(1.0, 2.0, 0.3);
/// let delta = DVector::from_vec(vec![0.1, -0.2, 0.05]);
/// let b = a.retract(&delta);
/// assert!((a.local(&b) - delta).norm() < 1e-12);
/// ```
pub trait Manifold: Clone + Debug + Display + Send + Sync + 'static {
    /// Tangent dimension, `0` when only known at runtime.
    const DIMENSION: usize;

    /// Tangent dimension of this particular value.
    fn dim(&self) -> usize {
        Self::DIMENSION
    }

    /// Tangent-space difference `other ⊖ self`, expressed at `self`.
    fn local(&self, other: &Self) -> DVector<f64>;

    /// Perturbed value `self ⊕ delta`.
    ///
    /// `delta` must have exactly [`Manifold::dim`] entries.
    fn retract(&self, delta: &DVector<f64>) -> Self;

    /// Approximate equality with absolute tolerance `tol`.
    fn equals(&self, other: &Self, tol: f64) -> bool;
}

impl Manifold for f64 {
    const DIMENSION: usize = 1;

    fn local(&self, other: &Self) -> DVector<f64> {
        DVector::from_element(1, other - self)
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        self + delta[0]
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        (self - other).abs() <= tol
    }
}

impl<const N: usize> Manifold for SVector<f64, N> {
    const DIMENSION: usize = N;

    fn local(&self, other: &Self) -> DVector<f64> {
        DVector::from_column_slice((other - self).as_slice())
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        self + SVector::<f64, N>::from_column_slice(delta.as_slice())
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        (self - other).amax() <= tol
    }
}

impl Manifold for DVector<f64> {
    const DIMENSION: usize = 0;

    fn dim(&self) -> usize {
        self.len()
    }

    fn local(&self, other: &Self) -> DVector<f64> {
        other - self
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        self + delta
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.len() == other.len() && (self - other).amax() <= tol
    }
}
