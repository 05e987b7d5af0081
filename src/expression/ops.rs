//! Stock expression operations with analytic Jacobians.
//!
//! Vector arithmetic works on fixed-size `SVector<f64, N>`; group operations
//! work on any [`LieGroup`] (`SO2`, `SE2`, `SO3`). Jacobians follow the
//! right-perturbation convention of [`crate::manifold`].

use crate::expression::Expression;
use crate::manifold::{Manifold, SE2, SO2, SO3};
use nalgebra::{
    DMatrix, Matrix1, Matrix2, Matrix2x1, Matrix2x3, Matrix3, SMatrix, SVector, Vector2, Vector3,
};

/// Copy a fixed-size Jacobian into a requested dynamic output.
fn store<const R: usize, const C: usize>(
    out: Option<&mut DMatrix<f64>>,
    jacobian: &SMatrix<f64, R, C>,
) {
    if let Some(out) = out {
        *out = DMatrix::from_column_slice(R, C, jacobian.as_slice());
    }
}

fn scaled_identity(out: Option<&mut DMatrix<f64>>, n: usize, scale: f64) {
    if let Some(out) = out {
        *out = DMatrix::identity(n, n) * scale;
    }
}

/// Group operations with Jacobians, as needed by expression nodes.
pub trait LieGroup: Manifold {
    fn compose_with(
        &self,
        other: &Self,
        h_self: Option<&mut DMatrix<f64>>,
        h_other: Option<&mut DMatrix<f64>>,
    ) -> Self;

    fn between_with(
        &self,
        other: &Self,
        h_self: Option<&mut DMatrix<f64>>,
        h_other: Option<&mut DMatrix<f64>>,
    ) -> Self;

    fn inverse_with(&self, h: Option<&mut DMatrix<f64>>) -> Self;
}

macro_rules! impl_lie_group {
    ($group:ty, $jacobian:ty) => {
        impl LieGroup for $group {
            fn compose_with(
                &self,
                other: &Self,
                h_self: Option<&mut DMatrix<f64>>,
                h_other: Option<&mut DMatrix<f64>>,
            ) -> Self {
                let (mut j_self, mut j_other) = (<$jacobian>::zeros(), <$jacobian>::zeros());
                let result = self.compose(
                    other,
                    h_self.is_some().then_some(&mut j_self),
                    h_other.is_some().then_some(&mut j_other),
                );
                store(h_self, &j_self);
                store(h_other, &j_other);
                result
            }

            fn between_with(
                &self,
                other: &Self,
                h_self: Option<&mut DMatrix<f64>>,
                h_other: Option<&mut DMatrix<f64>>,
            ) -> Self {
                let (mut j_self, mut j_other) = (<$jacobian>::zeros(), <$jacobian>::zeros());
                let result = self.between(
                    other,
                    h_self.is_some().then_some(&mut j_self),
                    h_other.is_some().then_some(&mut j_other),
                );
                store(h_self, &j_self);
                store(h_other, &j_other);
                result
            }

            fn inverse_with(&self, h: Option<&mut DMatrix<f64>>) -> Self {
                let mut j = <$jacobian>::zeros();
                let result = self.inverse(h.is_some().then_some(&mut j));
                store(h, &j);
                result
            }
        }
    };
}

impl_lie_group!(SO2, Matrix1<f64>);
impl_lie_group!(SE2, Matrix3<f64>);
impl_lie_group!(SO3, Matrix3<f64>);

/// Rotations acting on points.
pub trait Rotation: Manifold {
    type Point: Manifold;

    fn rotate_with(
        &self,
        point: &Self::Point,
        h_self: Option<&mut DMatrix<f64>>,
        h_point: Option<&mut DMatrix<f64>>,
    ) -> Self::Point;
}

impl Rotation for SO2 {
    type Point = Vector2<f64>;

    fn rotate_with(
        &self,
        point: &Vector2<f64>,
        h_self: Option<&mut DMatrix<f64>>,
        h_point: Option<&mut DMatrix<f64>>,
    ) -> Vector2<f64> {
        let (mut j_self, mut j_point) = (Matrix2x1::zeros(), Matrix2::zeros());
        let result = self.rotate(
            point,
            h_self.is_some().then_some(&mut j_self),
            h_point.is_some().then_some(&mut j_point),
        );
        store(h_self, &j_self);
        store(h_point, &j_point);
        result
    }
}

impl Rotation for SO3 {
    type Point = Vector3<f64>;

    fn rotate_with(
        &self,
        point: &Vector3<f64>,
        h_self: Option<&mut DMatrix<f64>>,
        h_point: Option<&mut DMatrix<f64>>,
    ) -> Vector3<f64> {
        let (mut j_self, mut j_point) = (Matrix3::zeros(), Matrix3::zeros());
        let result = self.rotate(
            point,
            h_self.is_some().then_some(&mut j_self),
            h_point.is_some().then_some(&mut j_point),
        );
        store(h_self, &j_self);
        store(h_point, &j_point);
        result
    }
}

/// `a + b`
pub fn sum<const N: usize>(
    a: &Expression<SVector<f64, N>>,
    b: &Expression<SVector<f64, N>>,
) -> Expression<SVector<f64, N>> {
    Expression::binary(
        |a: &SVector<f64, N>, b: &SVector<f64, N>, ha, hb| {
            scaled_identity(ha, N, 1.0);
            scaled_identity(hb, N, 1.0);
            a + b
        },
        a,
        b,
    )
}

/// `a - b`
pub fn difference<const N: usize>(
    a: &Expression<SVector<f64, N>>,
    b: &Expression<SVector<f64, N>>,
) -> Expression<SVector<f64, N>> {
    Expression::binary(
        |a: &SVector<f64, N>, b: &SVector<f64, N>, ha, hb| {
            scaled_identity(ha, N, 1.0);
            scaled_identity(hb, N, -1.0);
            a - b
        },
        a,
        b,
    )
}

/// `s · a`
pub fn scale<const N: usize>(
    a: &Expression<SVector<f64, N>>,
    s: f64,
) -> Expression<SVector<f64, N>> {
    Expression::unary(
        move |a: &SVector<f64, N>, h| {
            scaled_identity(h, N, s);
            a * s
        },
        a,
    )
}

/// `aᵀ b`
pub fn dot<const N: usize>(
    a: &Expression<SVector<f64, N>>,
    b: &Expression<SVector<f64, N>>,
) -> Expression<f64> {
    Expression::binary(
        |a: &SVector<f64, N>, b: &SVector<f64, N>, ha, hb| {
            store(ha, &b.transpose());
            store(hb, &a.transpose());
            a.dot(b)
        },
        a,
        b,
    )
}

/// `‖a‖²`
pub fn norm_squared<const N: usize>(a: &Expression<SVector<f64, N>>) -> Expression<f64> {
    Expression::unary(
        |a: &SVector<f64, N>, h| {
            store(h, &(a.transpose() * 2.0));
            a.norm_squared()
        },
        a,
    )
}

/// `a ∘ b`
pub fn compose<G: LieGroup>(a: &Expression<G>, b: &Expression<G>) -> Expression<G> {
    Expression::binary(|a: &G, b: &G, ha, hb| a.compose_with(b, ha, hb), a, b)
}

/// `a⁻¹ ∘ b`
pub fn between<G: LieGroup>(a: &Expression<G>, b: &Expression<G>) -> Expression<G> {
    Expression::binary(|a: &G, b: &G, ha, hb| a.between_with(b, ha, hb), a, b)
}

/// `a⁻¹`
pub fn inverse<G: LieGroup>(a: &Expression<G>) -> Expression<G> {
    Expression::unary(|a: &G, h| a.inverse_with(h), a)
}

/// Point in the pose frame mapped into the world frame, `R p + t`.
pub fn transform_from(
    pose: &Expression<SE2>,
    point: &Expression<Vector2<f64>>,
) -> Expression<Vector2<f64>> {
    Expression::binary(
        |pose: &SE2, point: &Vector2<f64>, h_pose, h_point| {
            let (mut j_pose, mut j_point) = (Matrix2x3::zeros(), Matrix2::zeros());
            let result = pose.transform_from(
                point,
                h_pose.is_some().then_some(&mut j_pose),
                h_point.is_some().then_some(&mut j_point),
            );
            store(h_pose, &j_pose);
            store(h_point, &j_point);
            result
        },
        pose,
        point,
    )
}

/// `R p`
pub fn rotate<R: Rotation>(
    rotation: &Expression<R>,
    point: &Expression<R::Point>,
) -> Expression<R::Point> {
    Expression::binary(
        |r: &R, p: &R::Point, hr, hp| r.rotate_with(p, hr, hp),
        rotation,
        point,
    )
}
