//! Finite-difference oracle.
//!
//! Central differences on the tangent space: every input is perturbed through
//! [`Manifold::retract`] by `±δ` along one tangent axis at a time, and outputs
//! are compared in the local coordinates of the unperturbed output,
//!
//! ```text
//! column j = (local(f(x), f(x ⊕ δeⱼ)) - local(f(x), f(x ⊕ -δeⱼ))) / 2δ
//! ```
//!
//! so the result is accurate to `O(δ²)`. Every function takes an optional step
//! that defaults to [`DEFAULT_STEP`]; no adaptive step selection is done.
//!
//! Naming follows the argument count and the argument differentiated:
//! `numerical_derivative32` is the Jacobian of a three-argument function with
//! respect to its second argument, `numerical_hessian212` the mixed second
//! derivative of a two-argument scalar function (gradient in argument 1,
//! differentiated in argument 2).
//!
//! Inputs must have a statically known, positive tangent dimension; this is
//! checked at compile time. Outputs may be dynamically sized.
//!
//! # Example
//!
//! ```
//! use expression_factor::numerical::numerical_gradient;
//! use nalgebra::Vector3;
//!
//! let x = Vector3::new(1.0, 2.0, 3.0);
//! let g = numerical_gradient(|v: &Vector3<f64>| v.norm_squared(), &x, None);
//! assert!((g - x * 2.0).norm() < 1e-8);
//! ```

use crate::manifold::Manifold;
use nalgebra::{DMatrix, DVector};

/// Default central-difference step.
pub const DEFAULT_STEP: f64 = 1e-5;

/// Gradient of a scalar function of one manifold argument.
pub fn numerical_gradient<X, F>(h: F, x: &X, delta: Option<f64>) -> DVector<f64>
where
    X: Manifold,
    F: Fn(&X) -> f64,
{
    const { assert!(X::DIMENSION > 0, "input must have a fixed, positive dimension") };
    let delta = delta.unwrap_or(DEFAULT_STEP);
    let factor = 1.0 / (2.0 * delta);
    let n = X::DIMENSION;

    let mut d = DVector::zeros(n);
    let mut g = DVector::zeros(n);
    for j in 0..n {
        d[j] = delta;
        let hx_plus = h(&x.retract(&d));
        d[j] = -delta;
        let hx_minus = h(&x.retract(&d));
        d[j] = 0.0;
        g[j] = (hx_plus - hx_minus) * factor;
    }
    g
}

/// Jacobian `m × n` of `h` at `x`, `m` being the tangent size of `h(x)`.
pub fn numerical_derivative11<Y, X, F>(h: F, x: &X, delta: Option<f64>) -> DMatrix<f64>
where
    Y: Manifold,
    X: Manifold,
    F: Fn(&X) -> Y,
{
    const { assert!(X::DIMENSION > 0, "input must have a fixed, positive dimension") };
    let delta = delta.unwrap_or(DEFAULT_STEP);
    let factor = 1.0 / (2.0 * delta);
    let n = X::DIMENSION;

    let hx = h(x);
    let m = hx.local(&hx).len();

    let mut dx = DVector::zeros(n);
    let mut jacobian = DMatrix::zeros(m, n);
    for j in 0..n {
        dx[j] = delta;
        let dy1 = hx.local(&h(&x.retract(&dx)));
        dx[j] = -delta;
        let dy2 = hx.local(&h(&x.retract(&dx)));
        dx[j] = 0.0;
        jacobian.set_column(j, &((dy1 - dy2) * factor));
    }
    jacobian
}

/// Jacobian of a binary function with respect to its first argument.
pub fn numerical_derivative21<Y, X1, X2, F>(
    h: F,
    x1: &X1,
    x2: &X2,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> Y,
{
    numerical_derivative11(|a: &X1| h(a, x2), x1, delta)
}

/// Jacobian of a binary function with respect to its second argument.
pub fn numerical_derivative22<Y, X1, X2, F>(
    h: F,
    x1: &X1,
    x2: &X2,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> Y,
{
    numerical_derivative11(|a: &X2| h(x1, a), x2, delta)
}

/// Jacobian of a ternary function with respect to its first argument.
pub fn numerical_derivative31<Y, X1, X2, X3, F>(
    h: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> Y,
{
    numerical_derivative11(|a: &X1| h(a, x2, x3), x1, delta)
}

/// Jacobian of a ternary function with respect to its second argument.
pub fn numerical_derivative32<Y, X1, X2, X3, F>(
    h: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> Y,
{
    numerical_derivative11(|a: &X2| h(x1, a, x3), x2, delta)
}

/// Jacobian of a ternary function with respect to its third argument.
pub fn numerical_derivative33<Y, X1, X2, X3, F>(
    h: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    Y: Manifold,
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> Y,
{
    numerical_derivative11(|a: &X3| h(x1, x2, a), x3, delta)
}

/// Hessian of a scalar function: the Jacobian of its numerical gradient.
pub fn numerical_hessian<X, F>(f: F, x: &X, delta: Option<f64>) -> DMatrix<f64>
where
    X: Manifold,
    F: Fn(&X) -> f64,
{
    numerical_derivative11(|a: &X| numerical_gradient(&f, a, delta), x, delta)
}

/// `∂²f/∂x1²` of a binary scalar function.
pub fn numerical_hessian211<X1, X2, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> f64,
{
    numerical_hessian(|a: &X1| f(a, x2), x1, delta)
}

/// `∂²f/∂x2²` of a binary scalar function.
pub fn numerical_hessian222<X1, X2, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> f64,
{
    numerical_hessian(|a: &X2| f(x1, a), x2, delta)
}

/// Mixed derivative `n1 × n2`: the gradient in `x1`, differentiated in `x2`.
pub fn numerical_hessian212<X1, X2, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> f64,
{
    let gradient_in_x1 = |b: &X2| numerical_gradient(|a: &X1| f(a, b), x1, delta);
    numerical_derivative11(gradient_in_x1, x2, delta)
}

/// Mixed derivative `n2 × n1`: the gradient in `x2`, differentiated in `x1`.
pub fn numerical_hessian221<X1, X2, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    F: Fn(&X1, &X2) -> f64,
{
    let gradient_in_x2 = |a: &X1| numerical_gradient(|b: &X2| f(a, b), x2, delta);
    numerical_derivative11(gradient_in_x2, x1, delta)
}

/// `∂²f/∂x1²` of a ternary scalar function.
pub fn numerical_hessian311<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian(|a: &X1| f(a, x2, x3), x1, delta)
}

/// `∂²f/∂x2²` of a ternary scalar function.
pub fn numerical_hessian322<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian(|a: &X2| f(x1, a, x3), x2, delta)
}

/// `∂²f/∂x3²` of a ternary scalar function.
pub fn numerical_hessian333<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian(|a: &X3| f(x1, x2, a), x3, delta)
}

/// Mixed derivative in `x1` and `x2` of a ternary scalar function, `x3` fixed.
pub fn numerical_hessian312<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian212(|a: &X1, b: &X2| f(a, b, x3), x1, x2, delta)
}

/// Mixed derivative in `x1` and `x3` of a ternary scalar function, `x2` fixed.
pub fn numerical_hessian313<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian212(|a: &X1, c: &X3| f(a, x2, c), x1, x3, delta)
}

/// Mixed derivative in `x2` and `x3` of a ternary scalar function, `x1` fixed.
pub fn numerical_hessian323<X1, X2, X3, F>(
    f: F,
    x1: &X1,
    x2: &X2,
    x3: &X3,
    delta: Option<f64>,
) -> DMatrix<f64>
where
    X1: Manifold,
    X2: Manifold,
    X3: Manifold,
    F: Fn(&X1, &X2, &X3) -> f64,
{
    numerical_hessian212(|b: &X2, c: &X3| f(x1, b, c), x2, x3, delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{SE2, SO2};
    use nalgebra::{Matrix2, Matrix2x3, Matrix3, Vector2, Vector3};

    #[test]
    fn test_gradient_of_squared_norm() {
        let x = Vector3::new(1.0, -2.0, 0.5);
        for delta in [1e-4, 1e-5, 1e-6] {
            let g = numerical_gradient(|v: &Vector3<f64>| v.dot(v), &x, Some(delta));
            assert!((g - x * 2.0).amax() < 1e-7, "delta = {delta}");
        }
    }

    #[test]
    fn test_gradient_error_is_second_order() {
        let x = Vector3::new(0.5, 1.0, 1.5);
        let f = |v: &Vector3<f64>| v.iter().map(|vi: &f64| vi.exp()).sum::<f64>();
        let exact = DVector::from_iterator(3, x.iter().map(|v: &f64| v.exp()));

        let coarse = (numerical_gradient(f, &x, Some(1e-2)) - &exact).amax();
        let fine = (numerical_gradient(f, &x, Some(1e-3)) - &exact).amax();
        assert!(coarse > 0.0);
        assert!(coarse / fine > 50.0, "ratio = {}", coarse / fine);
    }

    #[test]
    fn test_gradient_on_rotation() {
        let r = SO2::from_angle(0.3);
        let g = numerical_gradient(|a: &SO2| a.angle().sin(), &r, None);
        assert_eq!(g.len(), 1);
        assert!((g[0] - 0.3_f64.cos()).abs() < 1e-9);
    }

    #[test]
    fn test_derivative_of_linear_map() {
        let a = Matrix2x3::new(1.0, 2.0, 3.0, -1.0, 0.0, 4.0);
        let x = Vector3::new(0.1, 0.2, 0.3);
        let jacobian = numerical_derivative11(|v: &Vector3<f64>| a * v, &x, None);
        assert_eq!(jacobian.shape(), (2, 3));
        assert!((jacobian - a).amax() < 1e-9);
    }

    #[test]
    fn test_derivative_dynamic_output() {
        let x = Vector2::new(2.0, 3.0);
        let h = |v: &Vector2<f64>| DVector::from_vec(vec![v.x * v.y, v.x, v.y, 1.0]);
        let jacobian = numerical_derivative11(h, &x, None);
        let expected = DMatrix::from_row_slice(4, 2, &[3.0, 2.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!((jacobian - expected).amax() < 1e-8);
    }

    #[test]
    fn test_partial_derivatives() {
        let h2 = |a: &Vector2<f64>, b: &f64| a * *b;
        let a = Vector2::new(1.0, 2.0);
        let b = 3.0;
        let d21 = numerical_derivative21(h2, &a, &b, None);
        let d22 = numerical_derivative22(h2, &a, &b, None);
        assert!((d21 - Matrix2::identity() * 3.0).amax() < 1e-8);
        assert!((d22 - Vector2::new(1.0, 2.0)).amax() < 1e-8);

        let h3 = |a: &f64, b: &f64, c: &f64| a * b + c;
        let d31 = numerical_derivative31(h3, &2.0, &5.0, &7.0, None);
        let d32 = numerical_derivative32(h3, &2.0, &5.0, &7.0, None);
        let d33 = numerical_derivative33(h3, &2.0, &5.0, &7.0, None);
        assert!((d31[(0, 0)] - 5.0).abs() < 1e-8);
        assert!((d32[(0, 0)] - 2.0).abs() < 1e-8);
        assert!((d33[(0, 0)] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_derivative_on_lie_group() {
        let p = SE2::from_xy_angle(1.0, 2.0, 0.5);
        let jacobian = numerical_derivative11(|a: &SE2| a.inverse(None), &p, None);
        assert!((jacobian + p.adjoint()).amax() < 1e-8);
    }

    #[test]
    fn test_hessian_of_quadratic_form() {
        let a = Matrix3::new(2.0, 1.0, 0.0, 1.0, 3.0, -1.0, 0.0, -1.0, 4.0);
        let x = Vector3::new(0.3, -0.2, 1.0);
        let quadratic = |v: &Vector3<f64>| (v.transpose() * a * v)[0];
        let hessian = numerical_hessian(quadratic, &x, Some(1e-3));
        assert!((hessian - (a + a.transpose())).amax() < 1e-6);
    }

    #[test]
    fn test_mixed_hessians() {
        let b = Matrix2x3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        let f = |x1: &Vector2<f64>, x2: &Vector3<f64>| {
            (x1.transpose() * b * x2)[0] + x1.norm_squared()
        };
        let x1 = Vector2::new(0.5, -1.0);
        let x2 = Vector3::new(1.0, 0.0, 2.0);
        let delta = Some(1e-3);

        let h212 = numerical_hessian212(f, &x1, &x2, delta);
        assert_eq!(h212.shape(), (2, 3));
        assert!((h212 - b).amax() < 1e-6);

        let h221 = numerical_hessian221(f, &x1, &x2, delta);
        assert_eq!(h221.shape(), (3, 2));
        assert!((h221 - b.transpose()).amax() < 1e-6);

        let h211 = numerical_hessian211(f, &x1, &x2, delta);
        assert!((h211 - Matrix2::identity() * 2.0).amax() < 1e-6);
        assert!(numerical_hessian222(f, &x1, &x2, delta).amax() < 1e-6);
    }

    #[test]
    fn test_ternary_hessians() {
        let f = |a: &f64, b: &f64, c: &f64| a * a * b + b * c + 3.0 * c * c;
        let (a, b, c) = (1.5, -2.0, 0.5);
        let delta = Some(1e-3);

        assert!((numerical_hessian311(f, &a, &b, &c, delta)[(0, 0)] - 2.0 * b).abs() < 1e-6);
        assert!(numerical_hessian322(f, &a, &b, &c, delta)[(0, 0)].abs() < 1e-6);
        assert!((numerical_hessian333(f, &a, &b, &c, delta)[(0, 0)] - 6.0).abs() < 1e-6);
        assert!((numerical_hessian312(f, &a, &b, &c, delta)[(0, 0)] - 2.0 * a).abs() < 1e-6);
        assert!(numerical_hessian313(f, &a, &b, &c, delta)[(0, 0)].abs() < 1e-6);
        assert!((numerical_hessian323(f, &a, &b, &c, delta)[(0, 0)] - 1.0).abs() < 1e-6);
    }
}
