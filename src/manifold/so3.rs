//! SO(3) - rotations in 3D space.
//!
//! Stored as a unit quaternion. Tangent vectors are axis-angle vectors
//! `θ = angle · axis`.

use crate::manifold::{Manifold, ManifoldError, ManifoldResult};
use nalgebra::{DVector, Matrix3, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// SO(3) group element representing rotations in 3D.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SO3 {
    quaternion: UnitQuaternion<f64>,
}

impl Display for SO3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

/// Skew-symmetric matrix `[v]ₓ`.
fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

impl SO3 {
    /// Degrees of freedom - dimension of the tangent space
    pub const DOF: usize = 3;

    pub fn identity() -> Self {
        SO3 {
            quaternion: UnitQuaternion::identity(),
        }
    }

    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Create from raw quaternion coefficients, normalizing them.
    pub fn from_quaternion_coeffs(x: f64, y: f64, z: f64, w: f64) -> ManifoldResult<Self> {
        if ![x, y, z, w].iter().all(|v| v.is_finite()) {
            return Err(ManifoldError::InvalidNumber);
        }
        let q = Quaternion::new(w, x, y, z);
        UnitQuaternion::try_new(q, f64::EPSILON)
            .map(SO3::new)
            .ok_or_else(|| {
                ManifoldError::NormalizationFailed("quaternion has zero norm".to_string())
            })
    }

    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Exponential map of an axis-angle vector.
    pub fn exp(tangent: &Vector3<f64>) -> Self {
        let quaternion = if tangent.norm_squared() > f64::EPSILON {
            UnitQuaternion::from_scaled_axis(*tangent)
        } else {
            UnitQuaternion::from_quaternion(Quaternion::new(
                1.0,
                tangent.x / 2.0,
                tangent.y / 2.0,
                tangent.z / 2.0,
            ))
        };
        SO3 { quaternion }
    }

    /// Logarithmic map to an axis-angle vector with angle in `[0, π]`.
    pub fn log(&self) -> Vector3<f64> {
        let q = self.quaternion.quaternion();
        let sin_angle_squared = q.i * q.i + q.j * q.j + q.k * q.k;

        let log_coeff = if sin_angle_squared > f64::EPSILON {
            let sin_angle = sin_angle_squared.sqrt();
            let cos_angle = q.w;
            // q and -q are the same rotation; pick the representative with w >= 0
            let two_angle = 2.0
                * if cos_angle < 0.0 {
                    f64::atan2(-sin_angle, -cos_angle)
                } else {
                    f64::atan2(sin_angle, cos_angle)
                };
            two_angle / sin_angle
        } else {
            2.0 / q.w
        };

        Vector3::new(q.i * log_coeff, q.j * log_coeff, q.k * log_coeff)
    }

    /// Inverse rotation, `J = -R`.
    pub fn inverse(&self, jacobian: Option<&mut Matrix3<f64>>) -> Self {
        if let Some(jac) = jacobian {
            *jac = -self.rotation_matrix();
        }
        SO3::new(self.quaternion.inverse())
    }

    /// Composition `self ∘ other`, with `J_self = R_otherᵀ` and `J_other = I`.
    pub fn compose(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Matrix3<f64>>,
        jacobian_other: Option<&mut Matrix3<f64>>,
    ) -> Self {
        if let Some(jac) = jacobian_self {
            *jac = other.rotation_matrix().transpose();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix3::identity();
        }
        SO3::new(self.quaternion * other.quaternion)
    }

    /// Relative rotation `self⁻¹ ∘ other`, with `J_self = -R_resultᵀ` and `J_other = I`.
    pub fn between(
        &self,
        other: &Self,
        jacobian_self: Option<&mut Matrix3<f64>>,
        jacobian_other: Option<&mut Matrix3<f64>>,
    ) -> Self {
        let result = SO3::new(self.quaternion.inverse() * other.quaternion);
        if let Some(jac) = jacobian_self {
            *jac = -result.rotation_matrix().transpose();
        }
        if let Some(jac) = jacobian_other {
            *jac = Matrix3::identity();
        }
        result
    }

    /// Rotate a point, `p' = R p`, with `J_self = -R [p]ₓ` and `J_point = R`.
    pub fn rotate(
        &self,
        point: &Vector3<f64>,
        jacobian_self: Option<&mut Matrix3<f64>>,
        jacobian_point: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let r = self.rotation_matrix();
        if let Some(jac) = jacobian_self {
            *jac = -r * skew(point);
        }
        if let Some(jac) = jacobian_point {
            *jac = r;
        }
        r * point
    }
}

impl Manifold for SO3 {
    const DIMENSION: usize = 3;

    fn local(&self, other: &Self) -> DVector<f64> {
        let log = SO3::new(self.quaternion.inverse() * other.quaternion).log();
        DVector::from_column_slice(log.as_slice())
    }

    fn retract(&self, delta: &DVector<f64>) -> Self {
        let tangent = Vector3::new(delta[0], delta[1], delta[2]);
        SO3::new(self.quaternion * SO3::exp(&tangent).quaternion)
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.local(other).amax() <= tol
    }
}
