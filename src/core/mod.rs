//! Core building blocks shared by the expression, linear and factor layers.
//!
//! - [`Key`]: variable identifiers
//! - [`Values`] / [`VectorValues`]: variable assignments and tangent increments
//! - Loss functions and the corrector used by robust noise models

pub mod corrector;
pub mod key;
pub mod loss_functions;
pub mod values;

pub use key::Key;
pub use values::{Value, Values, VectorValues};

use thiserror::Error;
use tracing::error;

/// Core module error types for values, expressions, linear factors and factors
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Rejected argument (duplicate or unsorted keys, nested robust models)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Dimension mismatch between residual/Jacobian/variables
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Key absent from a values container or Jacobian map
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Stored value has a different type than requested
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Symbolic structure construction failed
    #[error("Symbolic structure error: {0}")]
    SymbolicStructure(String),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the third-party error that caused it
    ///
    /// # Example
    /// ```ignore
    /// SymbolicSparseColMat::try_new_from_indices(rows, cols, &indices)
    ///     .map_err(|e| {
    ///         CoreError::SymbolicStructure("Failed to build sparse pattern".to_string())
    ///             .log_with_source(e)
    ///     })?;
    /// ```
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
