//! SE(2) - rigid motions in the plane.
//!
//! An element is a translation `t ∈ R²` and a rotation `R ∈ SO(2)`. Tangent
//! vectors are ordered `(x, y, θ)`. The exponential map follows the closed form
//!
//! ```text
//! Exp(v, θ) = ( V(θ) v , Exp(θ) )      V(θ) = [ a  -b ]   a = sin θ / θ
//!                                             [ b   a ]   b = (1 - cos θ) / θ
//! ```
//!
//! with Taylor expansions of `a` and `b` near `θ = 0`.

use crate::manifold::{Manifold, ManifoldError, ManifoldResult, SO2};
use nalgebra::{DVector, Matrix2, Matrix2x3, Matrix3, UnitComplex, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// SE(2) group element representing rigid body transformations in 2D.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SE2 {
    translation: Vector2<f64>,
    rotation: UnitComplex<f64>,
}

impl Display for SE2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(x: {:.4}, y: {:.4}, theta: {:.4})",
            self.translation.x,
            self.translation.y,
            self.rotation.angle()
        )
    }
}

impl TryFrom<&DVector<f64>> for SE2 {
    type Error = ManifoldError;

    /// Build from `[x, y, theta]`.
    fn try_from(data: &DVector<f64>) -> ManifoldResult<Self> {
        if data.len() != 3 {
            return Err(ManifoldError::DimensionMismatch {
                expected: 3,
                actual: data.len(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ManifoldError::InvalidNumber);
        }
        Ok(SE2::from_xy_angle(data[0], data[1], data[2]))
    }
}

/// Coefficients `(a, b)` of the SE(2) `V(θ)` matrix.
fn v_coefficients(theta: f64) -> (f64, f64) {
    let theta_sq = theta * theta;
    if theta_sq < f64::EPSILON {
        (1.0 - theta_sq / 6.0, 0.5 * theta - theta * theta_sq / 24.0)
    } else {
        (theta.sin() / theta, (1.0 - theta.cos()) / theta)
    }
}

impl SE2 {
    /// Degrees of freedom - dimension of the tangent space
    pub const DOF: usize = 3;

    pub fn identity() -> Self {
        SE2 {
            translation: Vector2::zeros(),
            rotation: UnitComplex::identity(),
        }
    }

    pub fn new(translation: Vector2<f64>, rotation: UnitComplex<f64>) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    /// Create SE(2) from a position and heading angle in radians.
    pub fn from_xy_angle(x: f64, y: f64, theta: f64) -> Self {
        SE2::new(Vector2::new(x, y), UnitComplex::from_angle(theta))
    }

    pub fn from_translation_so2(translation: Vector2<f64>, rotation: SO2) -> Self {
        SE2::new(translation, rotation.complex())
    }

    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    pub fn rotation_so2(&self) -> SO2 {
        SO2::new(self.rotation)
    }

    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    /// Exponential map of a tangent vector `(x, y, θ)`.
    pub fn exp(tangent: &Vector3<f64>) -> Self {
        let theta = tangent.z;
        let (a, b) = v_coefficients(theta);
        let translation = Vector2::new(
            a * tangent.x - b * tangent.y,
            b * tangent.x + a * tangent.y,
        );
        SE2::new(translation, UnitComplex::from_angle(theta))
    }

    /// Logarithmic map to a tangent vector `(x, y, θ)`.
    pub fn log(&self) -> Vector3<f64> {
        let theta = self.angle();
        let (a, b) = v_coefficients(theta);
        let den = 1.0 / (a * a + b * b);
        let a_scaled = a * den;
        let b_scaled = b * den;
        Vector3::new(
            a_scaled * self.x() + b_scaled * self.y(),
            -b_scaled * self.x() + a_scaled * self.y(),
            theta,
        )
    }

    /// Adjoint matrix `[R, (y, -x)ᵀ; 0, 0, 1]`.
    pub fn adjoint(&self) -> Matrix3<f64> {
        let mut adjoint_matrix = Matrix3::identity();
        adjoint_matrix
            .fixed_view_mut::<2, 2>(0, 0)
            .copy_from(&self.rotation_matrix());
        adjoint_matrix[(0, 2)] = self.y();
        adjoint_matrix[(1, 2)] = -self.x();
        adjoint_matrix
    }

    /// Inverse `[Rᵀ, -Rᵀ t]`, with `J = -Adj(self)`.
    pub fn inverse(&self, jacobian: Option<&mut Matrix3<f64>>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.adjoint();
        }
        let rot_inv = self.rotation.inverse();
        SE2::new(-(rot_inv * self.translation), rot_inv)
    }

    /// Composition `self ∘ other`, with `J_self = Adj(other⁻¹)` and `J_other = I`.
    pub fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Matrix3<f64>>,
        jacobian_other: Option<&mut Matrix3<f64>>,
    ) -> Self {
        if let Some(jac) = jacobian_self {
            *jac = other.inverse(None).adjoint();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix3::identity();
        }
        SE2::new(
            self.rotation * other.translation + self.translation,
            self.rotation * other.rotation,
        )
    }

    /// Relative motion `self⁻¹ ∘ other`.
    ///
    /// `J_self = -Adj(other⁻¹ ∘ self)` and `J_other = I`.
    pub fn between(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Matrix3<f64>>,
        jacobian_other: Option<&mut Matrix3<f64>>,
    ) -> Self {
        let result = self.inverse(None).compose(other, None, None);
        if let Some(jac) = jacobian_self {
            *jac = -result.inverse(None).adjoint();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix3::identity();
        }
        result
    }

    /// Map a point from the local frame into the world frame, `R p + t`.
    pub fn transform_from(
        &self,
        point: &Vector2<f64>,
        jacobian_self: Option<&mut Matrix2x3<f64>>,
        jacobian_point: Option<&mut Matrix2<f64>>,
    ) -> Vector2<f64> {
        let r = self.rotation_matrix();
        if let Some(jac) = jacobian_self {
            jac.fixed_view_mut::<2, 2>(0, 0).copy_from(&r);
            jac.fixed_view_mut::<2, 1>(0, 2)
                .copy_from(&(r * Vector2::new(-point.y, point.x)));
        }
        if let Some(jac) = jacobian_point {
            *jac = r;
        }
        r * point + self.translation
    }
}

impl Manifold for SE2 {
    const DIMENSION: usize = 3;

    fn local(&self, other: &Self) -> DVector<f64> {
        let log = self.inverse(None).compose(other, None, None).log();
        DVector::from_column_slice(log.as_slice())
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        let tangent = Vector3::new(delta[0], delta[1], delta[2]);
        self.compose(&SE2::exp(&tangent), None, None)
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        (self.translation - other.translation).amax() <= tol
            && (self.rotation.inverse() * other.rotation).angle().abs() <= tol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_se2_exp_log() {
        let tangent = Vector3::new(0.4, -1.2, 0.9);
        let pose = SE2::exp(&tangent);
        assert!((pose.log() - tangent).norm() < 1e-12);

        let small = Vector3::new(1e-3, 2e-3, 1e-9);
        assert!((SE2::exp(&small).log() - small).norm() < 1e-12);
    }

    #[test]
    fn test_se2_compose_inverse() {
        let pose = SE2::from_xy_angle(1.0, 2.0, PI / 3.0);
        let identity = pose.compose(&pose.inverse(None), None, None);
        assert!(identity.equals(&SE2::identity(), 1e-12));
    }

    #[test]
    fn test_se2_between() {
        let a = SE2::from_xy_angle(1.0, 0.0, PI / 2.0);
        let b = SE2::from_xy_angle(1.0, 1.0, PI / 2.0);
        let rel = a.between(&b, None, None);
        assert!(rel.equals(&SE2::from_xy_angle(1.0, 0.0, 0.0), 1e-12));
    }

    #[test]
    fn test_se2_transform_from() {
        let pose = SE2::from_xy_angle(1.0, 2.0, PI / 2.0);
        let p = pose.transform_from(&Vector2::new(1.0, 0.0), None, None);
        assert!((p - Vector2::new(1.0, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn test_se2_retract_local() {
        let pose = SE2::from_xy_angle(-0.5, 3.0, 2.5);
        let delta = DVector::from_vec(vec![0.2, -0.1, 0.3]);
        let moved = pose.retract(&delta);
        assert!((pose.local(&moved) - delta).norm() < 1e-12);
    }

    #[test]
    fn test_se2_try_from_rejects_wrong_size() {
        let data = DVector::from_vec(vec![1.0, 2.0]);
        let result = SE2::try_from(&data);
        assert_eq!(
            result,
            Err(ManifoldError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }
}
