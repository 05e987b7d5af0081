//! Linear layer: block matrices, Jacobian factors and noise models.
//!
//! Linearizing a nonlinear factor produces a [`JacobianFactor`] whose block
//! matrix is filled in place by reverse-mode differentiation through a
//! [`JacobianMap`], then whitened by a [`NoiseModel`]. Collections of linear
//! factors can be stacked into a sparse `faer` system with
//! [`assemble_sparse_system`].

pub mod block_matrix;
pub mod jacobian_factor;
pub mod jacobian_map;
pub mod noise_model;
pub mod sparse;

pub use block_matrix::VerticalBlockMatrix;
pub use jacobian_factor::JacobianFactor;
pub use jacobian_map::JacobianMap;
pub use noise_model::NoiseModel;
pub use sparse::{SparseLinearSystem, assemble_sparse_system};
