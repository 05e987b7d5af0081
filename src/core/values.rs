//! Containers for variable assignments and tangent-space increments.
//!
//! [`Values`] maps each [`Key`] to a manifold value of any type implementing
//! [`Manifold`]; the concrete type is erased behind the object-safe [`Value`]
//! trait and recovered with [`Values::at`]. [`VectorValues`] maps keys to plain
//! tangent vectors and is what [`Values::retract`] consumes.

use crate::core::{CoreError, CoreResult, Key};
use crate::manifold::Manifold;
use nalgebra::DVector;
use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::fmt;

/// Object-safe view of a manifold value stored in [`Values`].
pub trait Value: Send + Sync + fmt::Debug + fmt::Display {
    fn dim(&self) -> usize;

    fn retract_boxed(&self, delta: &DVector<f64>) -> Box<dyn Value>;

    /// `other ⊖ self`, `None` when `other` holds a different type.
    fn local_boxed(&self, other: &dyn Value) -> Option<DVector<f64>>;

    fn equals_boxed(&self, other: &dyn Value, tol: f64) -> bool;

    fn clone_boxed(&self) -> Box<dyn Value>;

    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Manifold> Value for T {
    fn dim(&self) -> usize {
        Manifold::dim(self)
    }

    fn retract_boxed(&self, delta: &DVector<f64>) -> Box<dyn Value> {
        Box::new(self.retract(delta))
    }

    fn local_boxed(&self, other: &dyn Value) -> Option<DVector<f64>> {
        other
            .as_any()
            .downcast_ref::<T>()
            .map(|other| self.local(other))
    }

    fn equals_boxed(&self, other: &dyn Value, tol: f64) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self.equals(other, tol))
    }

    fn clone_boxed(&self) -> Box<dyn Value> {
        Box::new(self.clone())
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Assignment of manifold values to keys.
///
/// Values have value semantics: [`Values::retract`] returns a new container and
/// leaves the original untouched.
///
/// # Example
///
/// ```
/// use expression_factor::core::{Key, Values, VectorValues};
/// use nalgebra::{DVector, Vector2};
/// # use expression_factor::core::CoreResult;
/// # fn example() -> CoreResult<()> {
///
/// let mut values = Values::new();
/// values.insert(Key::symbol('x', 0), Vector2::new(1.0, 2.0))?;
///
/// let mut delta = values.zero_vectors();
/// delta.insert(Key::symbol('x', 0), DVector::from_vec(vec![0.5, 0.0]));
/// let moved = values.retract(&delta)?;
///
/// assert_eq!(*moved.at::<Vector2<f64>>(Key::symbol('x', 0))?, Vector2::new(1.5, 2.0));
/// assert_eq!(*values.at::<Vector2<f64>>(Key::symbol('x', 0))?, Vector2::new(1.0, 2.0));
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct Values {
    values: BTreeMap<Key, Box<dyn Value>>,
}

impl Clone for Values {
    fn clone(&self) -> Self {
        Values {
            values: self
                .values
                .iter()
                .map(|(key, value)| (*key, value.clone_boxed()))
                .collect(),
        }
    }
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new variable. Fails with `InvalidArgument` if `key` is taken.
    pub fn insert<T: Manifold>(&mut self, key: Key, value: T) -> CoreResult<()> {
        if self.values.contains_key(&key) {
            return Err(CoreError::InvalidArgument(format!(
                "Values::insert: key {key} already exists"
            ))
            .log());
        }
        self.values.insert(key, Box::new(value));
        Ok(())
    }

    /// Replace an existing variable. The new value must have the same type.
    pub fn update<T: Manifold>(&mut self, key: Key, value: T) -> CoreResult<()> {
        let slot = self.values.get_mut(&key).ok_or_else(|| {
            CoreError::KeyNotFound(format!("Values::update: key {key} does not exist")).log()
        })?;
        if slot.as_any().downcast_ref::<T>().is_none() {
            return Err(CoreError::TypeMismatch(format!(
                "Values::update: key {key} holds {}, not {}",
                slot.type_name(),
                type_name::<T>()
            ))
            .log());
        }
        *slot = Box::new(value);
        Ok(())
    }

    pub fn insert_or_assign<T: Manifold>(&mut self, key: Key, value: T) {
        self.values.insert(key, Box::new(value));
    }

    /// Typed access to a stored value.
    pub fn at<T: Manifold>(&self, key: Key) -> CoreResult<&T> {
        let value = self.values.get(&key).ok_or_else(|| {
            CoreError::KeyNotFound(format!("Values::at: key {key} does not exist"))
        })?;
        value.as_any().downcast_ref::<T>().ok_or_else(|| {
            CoreError::TypeMismatch(format!(
                "Values::at: key {key} holds {}, requested {}",
                value.type_name(),
                type_name::<T>()
            ))
        })
    }

    pub fn exists(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    pub fn keys(&self) -> Vec<Key> {
        self.values.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Tangent dimension of the variable at `key`.
    pub fn dim(&self, key: Key) -> CoreResult<usize> {
        self.values
            .get(&key)
            .map(|value| value.dim())
            .ok_or_else(|| CoreError::KeyNotFound(format!("Values::dim: key {key} does not exist")))
    }

    /// Sum of all tangent dimensions.
    pub fn total_dim(&self) -> usize {
        self.values.values().map(|value| value.dim()).sum()
    }

    /// A zero increment for every variable.
    pub fn zero_vectors(&self) -> VectorValues {
        VectorValues::zero(self.values.iter().map(|(key, value)| (*key, value.dim())))
    }

    /// Apply `delta` to every variable with a non-zero increment.
    ///
    /// Keys missing from `delta` are copied unchanged. A key in `delta` that is
    /// not in `self` is `KeyNotFound`; an increment of the wrong size is
    /// `DimensionMismatch`.
    pub fn retract(&self, delta: &VectorValues) -> CoreResult<Values> {
        if let Some(key) = delta.keys().into_iter().find(|key| !self.exists(*key)) {
            return Err(CoreError::KeyNotFound(format!(
                "Values::retract: increment for unknown key {key}"
            ))
            .log());
        }

        let mut result = BTreeMap::new();
        for (key, value) in &self.values {
            let retracted = match delta.get(*key) {
                Some(d) if d.len() != value.dim() => {
                    return Err(CoreError::DimensionMismatch(format!(
                        "Values::retract: key {key} has dimension {}, increment has {}",
                        value.dim(),
                        d.len()
                    ))
                    .log());
                }
                Some(d) if d.iter().any(|v| *v != 0.0) => value.retract_boxed(d),
                _ => value.clone_boxed(),
            };
            result.insert(*key, retracted);
        }
        Ok(Values { values: result })
    }

    /// Tangent-space difference `other ⊖ self` for every key of `self`.
    pub fn local(&self, other: &Values) -> CoreResult<VectorValues> {
        let mut result = VectorValues::new();
        for (key, value) in &self.values {
            let other_value = other.values.get(key).ok_or_else(|| {
                CoreError::KeyNotFound(format!("Values::local: key {key} missing in other"))
            })?;
            let d = value.local_boxed(&**other_value).ok_or_else(|| {
                CoreError::TypeMismatch(format!(
                    "Values::local: key {key} holds {} and {}",
                    value.type_name(),
                    other_value.type_name()
                ))
            })?;
            result.insert(*key, d);
        }
        Ok(result)
    }

    pub fn equals(&self, other: &Values, tol: f64) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().all(|(key, value)| {
                other
                    .values
                    .get(key)
                    .is_some_and(|o| value.equals_boxed(&**o, tol))
            })
    }
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Values with {} values:", self.values.len())?;
        for (key, value) in &self.values {
            writeln!(f, "  {key}: {value}")?;
        }
        Ok(())
    }
}

/// Tangent-space increments keyed by variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    vectors: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero vectors with the given per-key dimensions.
    pub fn zero(dims: impl IntoIterator<Item = (Key, usize)>) -> Self {
        VectorValues {
            vectors: dims
                .into_iter()
                .map(|(key, dim)| (key, DVector::zeros(dim)))
                .collect(),
        }
    }

    /// Insert or replace the increment for `key`, returning the previous one.
    pub fn insert(&mut self, key: Key, vector: DVector<f64>) -> Option<DVector<f64>> {
        self.vectors.insert(key, vector)
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.vectors.get(&key)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut DVector<f64>> {
        self.vectors.get_mut(&key)
    }

    pub fn dim(&self, key: Key) -> Option<usize> {
        self.vectors.get(&key).map(|v| v.len())
    }

    pub fn keys(&self) -> Vec<Key> {
        self.vectors.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &DVector<f64>)> {
        self.vectors.iter()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn total_dim(&self) -> usize {
        self.vectors.values().map(|v| v.len()).sum()
    }

    /// Euclidean norm of all increments stacked.
    pub fn norm(&self) -> f64 {
        self.vectors
            .values()
            .map(|v| v.norm_squared())
            .sum::<f64>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::SE2;
    use nalgebra::{Vector2, Vector3};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn x(i: u64) -> Key {
        Key::symbol('x', i)
    }

    #[test]
    fn test_insert_and_typed_access() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), Vector3::new(1.0, 2.0, 3.0))?;
        values.insert(x(1), SE2::from_xy_angle(0.0, 1.0, 0.5))?;

        assert_eq!(*values.at::<Vector3<f64>>(x(0))?, Vector3::new(1.0, 2.0, 3.0));
        assert!((values.at::<SE2>(x(1))?.angle() - 0.5).abs() < 1e-12);
        assert_eq!(values.total_dim(), 6);
        assert_eq!(values.keys(), vec![x(0), x(1)]);
        Ok(())
    }

    #[test]
    fn test_duplicate_insert_rejected() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), 1.0)?;
        let result = values.insert(x(0), 2.0);
        assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_wrong_type_and_missing_key() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), 1.0)?;
        assert!(matches!(
            values.at::<Vector2<f64>>(x(0)),
            Err(CoreError::TypeMismatch(_))
        ));
        assert!(matches!(values.at::<f64>(x(5)), Err(CoreError::KeyNotFound(_))));
        assert!(matches!(values.update(x(0), 3.0), Ok(())));
        assert!((values.at::<f64>(x(0))? - 3.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_retract_leaves_original_untouched() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), Vector2::new(1.0, 1.0))?;
        values.insert(x(1), 5.0)?;

        let mut delta = VectorValues::new();
        delta.insert(x(0), DVector::from_vec(vec![0.5, -0.5]));
        let moved = values.retract(&delta)?;

        assert_eq!(*moved.at::<Vector2<f64>>(x(0))?, Vector2::new(1.5, 0.5));
        assert!((moved.at::<f64>(x(1))? - 5.0).abs() < 1e-12);
        assert_eq!(*values.at::<Vector2<f64>>(x(0))?, Vector2::new(1.0, 1.0));

        let back = values.local(&moved)?;
        assert_eq!(back.get(x(0)), Some(&DVector::from_vec(vec![0.5, -0.5])));
        Ok(())
    }

    #[test]
    fn test_retract_rejects_bad_increment() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), Vector2::new(1.0, 1.0))?;

        let mut wrong_size = VectorValues::new();
        wrong_size.insert(x(0), DVector::from_vec(vec![1.0]));
        assert!(matches!(
            values.retract(&wrong_size),
            Err(CoreError::DimensionMismatch(_))
        ));

        let mut unknown = VectorValues::new();
        unknown.insert(x(9), DVector::from_vec(vec![1.0]));
        assert!(matches!(
            values.retract(&unknown),
            Err(CoreError::KeyNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_zero_vectors() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), SE2::identity())?;
        values.insert(x(1), DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]))?;
        let zeros = values.zero_vectors();
        assert_eq!(zeros.dim(x(0)), Some(3));
        assert_eq!(zeros.dim(x(1)), Some(4));
        assert_eq!(zeros.norm(), 0.0);
        Ok(())
    }
}
