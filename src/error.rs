//! Top-level error type of the crate.
//!
//! Each module reports failures through its own `thiserror` enum:
//! - [`CoreError`]: values, expressions, linear factors, evaluation and linearization
//! - [`FactorError`]: factor construction and archive restoration
//! - [`ManifoldError`]: building manifold elements from raw data
//!
//! [`ExpressionFactorError`] wraps all of them transparently so that
//! application code can propagate any of them with `?` and still inspect the
//! full source chain.
//!
//! ```text
//! ExpressionFactorError::Factor(
//!     FactorError::InvalidArgument(
//!         "ExpressionFactor was created with a NoiseModel of incorrect dimension ..."
//!     )
//! )
//! ```

use crate::{core::CoreError, factors::FactorError, manifold::ManifoldError};
use std::error::Error as StdError;
use thiserror::Error;

/// Result type for application code mixing several module errors
pub type ExpressionFactorResult<T> = Result<T, ExpressionFactorError>;

/// Any error produced by this crate.
///
/// ```rust,ignore
/// if let Err(e) = run() {
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum ExpressionFactorError {
    /// Evaluation, linearization and container errors
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Factor construction and restoration errors
    #[error(transparent)]
    Factor(#[from] FactorError),

    /// Manifold element construction errors
    #[error(transparent)]
    Manifold(#[from] ManifoldError),
}

impl ExpressionFactorError {
    /// Full error chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Single-line error chain with arrow separators, for log lines.
    ///
    /// ```rust,ignore
    /// error!("Linearization failed: {}", err.chain_compact());
    /// ```
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Key, Values};
    use crate::expression::Expression;
    use crate::factors::{ExpressionFactor, NonlinearFactor};
    use crate::linear::NoiseModel;
    use nalgebra::Vector2;
    use std::sync::Arc;

    fn linearize_missing_key() -> ExpressionFactorResult<()> {
        let factor = ExpressionFactor::new(
            Arc::new(NoiseModel::unit(2)),
            Vector2::new(0.0, 0.0),
            Expression::<Vector2<f64>>::leaf(Key::symbol('x', 9)),
        )?;
        factor.linearize(&Values::new())?;
        Ok(())
    }

    #[test]
    fn test_question_mark_converts_module_errors() {
        match linearize_missing_key() {
            Err(ExpressionFactorError::Core(CoreError::KeyNotFound(message))) => {
                assert!(message.contains("x9"))
            }
            other => panic!("expected KeyNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_factor_error_display() {
        let error = ExpressionFactorError::from(FactorError::InvalidArgument(
            "ExpressionFactor: no NoiseModel.".to_string(),
        ));
        assert!(error.to_string().contains("no NoiseModel"));
        assert!(error.chain().starts_with("Invalid argument"));
    }

    #[test]
    fn test_error_chain_compact() {
        let error = ExpressionFactorError::from(CoreError::DimensionMismatch(
            "block for key x0 has 2 rows, b has 3".to_string(),
        ));
        assert!(error.chain_compact().contains("b has 3"));
    }

    #[test]
    fn test_transparent_manifold_conversion() {
        let error: ExpressionFactorError = ManifoldError::InvalidNumber.into();
        assert!(matches!(error, ExpressionFactorError::Manifold(_)));
    }
}
