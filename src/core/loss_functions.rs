//! Robust loss functions used by robust noise models.
//!
//! A loss function maps the squared whitened residual `s = ||r||²` to a robust
//! cost `ρ(s)`. The [`Corrector`](crate::core::corrector::Corrector) turns the
//! first two derivatives into a rescaling of the linearized system, so a robust
//! factor can be linearized exactly like a Gaussian one.
//!
//! All losses here satisfy `ρ(0) = 0` and `ρ'(0) = 1`.
//!
//! | Loss                  | ρ(s)                                 |
//! |-----------------------|--------------------------------------|
//! | [`L2Loss`]            | `s`                                  |
//! | [`HuberLoss`]         | `s` if `s ≤ δ²`, else `2δ√s - δ²`      |
//! | [`CauchyLoss`]        | `δ² ln(1 + s/δ²)`                    |
//! | [`TukeyBiweightLoss`] | `c²/3 (1 - (1 - s/c²)³)`, capped at `c²/3` |
//!
//! # Example
//!
//! ```
//! use expression_factor::core::loss_functions::{LossFunction, HuberLoss};
//! # use expression_factor::core::CoreResult;
//! # fn example() -> CoreResult<()> {
//!
//! let huber = HuberLoss::new(1.345)?;
//! let [rho, rho_prime, _] = huber.evaluate(0.5);
//! assert_eq!(rho, 0.5);
//! assert_eq!(rho_prime, 1.0);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::core::{CoreError, CoreResult};
use std::fmt::Debug;

/// Robust cost `ρ(s)` of a squared residual norm.
pub trait LossFunction: Send + Sync + Debug {
    /// Returns `[ρ(s), ρ'(s), ρ''(s)]` at the squared norm `s ≥ 0`.
    fn evaluate(&self, s: f64) -> [f64; 3];
}

fn check_scale(scale: f64) -> CoreResult<f64> {
    if scale <= 0.0 || !scale.is_finite() {
        return Err(
            CoreError::InvalidInput(format!("loss scale must be positive, got {scale}")).log(),
        );
    }
    Ok(scale)
}

/// Plain least squares.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2Loss;

impl L2Loss {
    pub fn new() -> Self {
        L2Loss
    }
}

impl LossFunction for L2Loss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        [s, 1.0, 0.0]
    }
}

/// Huber loss: quadratic for inliers, linear beyond the threshold `δ`.
#[derive(Debug, Clone)]
pub struct HuberLoss {
    scale: f64,
    scale2: f64,
}

impl HuberLoss {
    pub fn new(scale: f64) -> CoreResult<Self> {
        let scale = check_scale(scale)?;
        Ok(HuberLoss {
            scale,
            scale2: scale * scale,
        })
    }
}

impl LossFunction for HuberLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        if s > self.scale2 {
            let r = s.sqrt();
            let rho1 = (self.scale / r).max(f64::MIN_POSITIVE);
            [2.0 * self.scale * r - self.scale2, rho1, -rho1 / (2.0 * s)]
        } else {
            [s, 1.0, 0.0]
        }
    }
}

/// Cauchy (Lorentzian) loss.
#[derive(Debug, Clone)]
pub struct CauchyLoss {
    scale2: f64,
    c: f64,
}

impl CauchyLoss {
    pub fn new(scale: f64) -> CoreResult<Self> {
        let scale = check_scale(scale)?;
        let scale2 = scale * scale;
        Ok(CauchyLoss {
            scale2,
            c: 1.0 / scale2,
        })
    }
}

impl LossFunction for CauchyLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        let sum = 1.0 + s * self.c;
        let inv = 1.0 / sum;
        [
            self.scale2 * sum.ln(),
            inv.max(f64::MIN_POSITIVE),
            -self.c * inv * inv,
        ]
    }
}

/// Tukey biweight: redescending, residuals beyond `c` get zero weight.
#[derive(Debug, Clone)]
pub struct TukeyBiweightLoss {
    scale2: f64,
}

impl TukeyBiweightLoss {
    pub fn new(scale: f64) -> CoreResult<Self> {
        let scale = check_scale(scale)?;
        Ok(TukeyBiweightLoss {
            scale2: scale * scale,
        })
    }
}

impl LossFunction for TukeyBiweightLoss {
    fn evaluate(&self, s: f64) -> [f64; 3] {
        if s > self.scale2 {
            return [self.scale2 / 3.0, 0.0, 0.0];
        }
        let value = 1.0 - s / self.scale2;
        let value_sq = value * value;
        [
            self.scale2 / 3.0 * (1.0 - value_sq * value),
            value_sq,
            -2.0 / self.scale2 * value,
        ]
    }
}
