//! SO(2) - rotations in the plane.
//!
//! Elements are stored as nalgebra's `UnitComplex<f64>`; the tangent space is a
//! single angle in radians.

use crate::manifold::Manifold;
use nalgebra::{DVector, Matrix1, Matrix2, Matrix2x1, UnitComplex, Vector2};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// SO(2) group element representing rotations in 2D.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SO2 {
    complex: UnitComplex<f64>,
}

impl Display for SO2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SO2(angle: {:.4})", self.complex.angle())
    }
}

impl SO2 {
    /// Degrees of freedom - dimension of the tangent space
    pub const DOF: usize = 1;

    /// Identity rotation.
    pub fn identity() -> Self {
        SO2 {
            complex: UnitComplex::identity(),
        }
    }

    /// Create a new SO(2) element from a unit complex number.
    pub fn new(complex: UnitComplex<f64>) -> Self {
        SO2 { complex }
    }

    /// Create SO(2) from an angle in radians.
    pub fn from_angle(angle: f64) -> Self {
        SO2::new(UnitComplex::from_angle(angle))
    }

    pub fn complex(&self) -> UnitComplex<f64> {
        self.complex
    }

    /// Rotation angle in `(-π, π]`.
    pub fn angle(&self) -> f64 {
        self.complex.angle()
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.complex.to_rotation_matrix().into_inner()
    }

    /// Inverse rotation, `J = -1`.
    pub fn inverse(&self, jacobian: Option<&mut Matrix1<f64>>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -Matrix1::identity();
        }
        SO2::new(self.complex.inverse())
    }

    /// Composition `self ∘ other`. SO(2) is commutative so both Jacobians are identity.
    pub fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Matrix1<f64>>,
        jacobian_other: Option<&mut Matrix1<f64>>,
    ) -> Self {
        if let Some(jac) = jacobian_self {
            *jac = Matrix1::identity();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix1::identity();
        }
        SO2::new(self.complex * other.complex)
    }

    /// Relative rotation `self⁻¹ ∘ other`.
    pub fn between(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Matrix1<f64>>,
        jacobian_other: Option<&mut Matrix1<f64>>,
    ) -> Self {
        if let Some(jac) = jacobian_self {
            *jac = -Matrix1::identity();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix1::identity();
        }
        SO2::new(self.complex.inverse() * other.complex)
    }

    /// Rotate a point, `p' = R p`.
    ///
    /// With `R ⊕ θ = R Exp(θ)` the Jacobians are `R [-py, px]ᵀ` and `R`.
    pub fn rotate(
        &self,
        point: &Vector2<f64>,
        jacobian_self: Option<&mut Matrix2x1<f64>>,
        jacobian_point: Option<&mut Matrix2<f64>>,
    ) -> Vector2<f64> {
        let r = self.rotation_matrix();
        if let Some(jac) = jacobian_self {
            *jac = r * Vector2::new(-point.y, point.x);
        }
        if let Some(jac) = jacobian_point {
            *jac = r;
        }
        r * point
    }
}

impl Manifold for SO2 {
    const DIMENSION: usize = 1;

    fn local(&self, other: &Self) -> DVector<f64> {
        DVector::from_element(1, (self.complex.inverse() * other.complex).angle())
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        SO2::new(self.complex * UnitComplex::from_angle(delta[0]))
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        (self.complex.inverse() * other.complex).angle().abs() <= tol
    }
}
