//! Key-indexed write target for reverse-mode Jacobian accumulation.

use crate::core::{CoreError, CoreResult, Key};
use crate::linear::block_matrix::VerticalBlockMatrix;
use nalgebra::DMatrix;

/// Binds a sorted key list to the column blocks of a [`VerticalBlockMatrix`].
///
/// Block `i` of the matrix belongs to `keys[i]`. Writes go through
/// [`JacobianMap::add`], which accumulates so that a key reached along several
/// paths of an expression ends up with the sum of all contributions.
#[derive(Debug)]
pub struct JacobianMap<'a> {
    keys: &'a [Key],
    ab: &'a mut VerticalBlockMatrix,
}

impl<'a> JacobianMap<'a> {
    /// `keys` must be sorted ascending and cover the leading blocks of `ab`.
    pub fn new(keys: &'a [Key], ab: &'a mut VerticalBlockMatrix) -> CoreResult<Self> {
        if keys.len() > ab.n_blocks() {
            return Err(CoreError::DimensionMismatch(format!(
                "JacobianMap: {} keys but only {} column blocks",
                keys.len(),
                ab.n_blocks()
            ))
            .log());
        }
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(
                CoreError::InvalidArgument("JacobianMap: keys must be sorted and unique".into())
                    .log(),
            );
        }
        Ok(JacobianMap { keys, ab })
    }

    pub fn keys(&self) -> &[Key] {
        self.keys
    }

    /// Rows of the underlying block matrix.
    pub fn rows(&self) -> usize {
        self.ab.rows()
    }

    /// Block position of `key`, if mapped.
    pub fn position(&self, key: Key) -> Option<usize> {
        self.keys.binary_search(&key).ok()
    }

    /// `block(key) += jacobian`
    pub fn add(&mut self, key: Key, jacobian: &DMatrix<f64>) -> CoreResult<()> {
        let position = self.position(key).ok_or_else(|| {
            CoreError::KeyNotFound(format!("JacobianMap::add: key {key} is not mapped")).log()
        })?;
        let expected = (self.ab.rows(), self.ab.block_dim(position));
        if jacobian.shape() != expected {
            return Err(CoreError::DimensionMismatch(format!(
                "JacobianMap::add: block for key {key} is {:?}, expected {:?}",
                jacobian.shape(),
                expected
            ))
            .log());
        }
        let mut block = self.ab.block_mut(position);
        block += jacobian;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_add_accumulates() -> TestResult {
        let keys = [Key::symbol('x', 0), Key::symbol('x', 1)];
        let mut ab = VerticalBlockMatrix::new([2, 1, 1], 2);
        {
            let mut map = JacobianMap::new(&keys, &mut ab)?;
            map.add(keys[0], &DMatrix::identity(2, 2))?;
            map.add(keys[0], &DMatrix::identity(2, 2))?;
            map.add(keys[1], &DMatrix::from_element(2, 1, 1.5))?;
        }
        assert!((ab.block(0) - DMatrix::identity(2, 2) * 2.0).norm() < 1e-12);
        assert!((ab.block(1) - DMatrix::from_element(2, 1, 1.5)).norm() < 1e-12);
        assert_eq!(ab.block(2).norm(), 0.0);
        Ok(())
    }

    #[test]
    fn test_add_rejects_foreign_key_and_bad_shape() -> TestResult {
        let keys = [Key::symbol('x', 0)];
        let mut ab = VerticalBlockMatrix::new([2, 1], 2);
        let mut map = JacobianMap::new(&keys, &mut ab)?;
        assert!(matches!(
            map.add(Key::symbol('l', 0), &DMatrix::identity(2, 2)),
            Err(CoreError::KeyNotFound(_))
        ));
        assert!(matches!(
            map.add(keys[0], &DMatrix::identity(3, 2)),
            Err(CoreError::DimensionMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_unsorted_keys_rejected() {
        let keys = [Key::symbol('x', 1), Key::symbol('x', 0)];
        let mut ab = VerticalBlockMatrix::new([1, 1, 1], 1);
        assert!(JacobianMap::new(&keys, &mut ab).is_err());
    }
}
