//! Expression graphs with reverse-mode Jacobian accumulation.
//!
//! An [`Expression<T>`] is an immutable computation graph that predicts a value
//! of manifold type `T` from the variables in a [`Values`] container. It can
//!
//! - evaluate the prediction alone ([`Expression::value`]), with no derivative
//!   bookkeeping at all,
//! - evaluate the prediction and write the Jacobian of its local coordinates
//!   with respect to every variable straight into a [`JacobianMap`]
//!   ([`Expression::value_and_jacobian_map`]),
//! - return those Jacobians as separate matrices
//!   ([`Expression::value_and_derivatives`]).
//!
//! Evaluation with derivatives is a forward pass that records the local
//! Jacobian of every function node in a [`Trace`], followed by a backward pass
//! that seeds the root with `I` and pushes `seed · H` down to the leaves. A key
//! reached along several paths receives the sum of all contributions.
//!
//! # Example
//!
//! ```
//! use expression_factor::core::{Key, Values};
//! use expression_factor::expression::{Expression, ops};
//! use nalgebra::Vector2;
//! # use expression_factor::core::CoreResult;
//! # fn example() -> CoreResult<()> {
//!
//! let (a, b) = (Key::symbol('x', 0), Key::symbol('x', 1));
//! let prediction = ops::difference(&Expression::leaf(b), &Expression::<Vector2<f64>>::leaf(a));
//!
//! let mut values = Values::new();
//! values.insert(a, Vector2::new(1.0, 1.0))?;
//! values.insert(b, Vector2::new(3.0, 0.0))?;
//!
//! let mut jacobians = Vec::new();
//! let (keys, dims) = prediction.keys_and_dims();
//! let predicted = prediction.value_and_derivatives(&values, &keys, &dims, &mut jacobians)?;
//! assert_eq!(predicted, Vector2::new(2.0, -1.0));
//! assert_eq!(jacobians[0][(0, 0)], -1.0);
//! assert_eq!(jacobians[1][(0, 0)], 1.0);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod ops;

use crate::core::{CoreError, CoreResult, Key, Values};
use crate::linear::{JacobianMap, VerticalBlockMatrix};
use crate::manifold::Manifold;
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Record of the local Jacobians computed during a forward pass.
#[derive(Debug, Clone)]
pub enum Trace {
    /// Subtree with no variables.
    Constant,
    /// Variable leaf.
    Leaf(Key),
    /// Function node: one `(∂result/∂argument, argument trace)` pair for every
    /// argument that depends on a variable.
    Function(Vec<(DMatrix<f64>, Trace)>),
}

impl Trace {
    pub fn is_constant(&self) -> bool {
        matches!(self, Trace::Constant)
    }

    /// Backward pass: accumulate `seed · ∂node/∂key` into `map` for every leaf.
    pub fn reverse_ad(&self, seed: &DMatrix<f64>, map: &mut JacobianMap<'_>) -> CoreResult<()> {
        match self {
            Trace::Constant => Ok(()),
            Trace::Leaf(key) => map.add(*key, seed),
            Trace::Function(arguments) => {
                for (jacobian, argument) in arguments {
                    argument.reverse_ad(&(seed * jacobian), map)?;
                }
                Ok(())
            }
        }
    }
}

/// One node of an expression graph.
///
/// Implement this for operations that do not fit the closure-based
/// [`Expression::unary`] / [`Expression::binary`] / [`Expression::ternary`]
/// constructors and wrap them with [`Expression::from_node`].
pub trait ExpressionNode<T>: Send + Sync + fmt::Debug {
    /// Record every variable key this node depends on with its tangent dimension.
    fn collect_keys(&self, keys: &mut BTreeMap<Key, usize>);

    /// Forward evaluation without derivatives.
    fn value(&self, values: &Values) -> CoreResult<T>;

    /// Forward evaluation that also records local Jacobians.
    fn trace(&self, values: &Values) -> CoreResult<(T, Trace)>;
}

/// Shared, immutable expression producing a value of type `T`.
pub struct Expression<T> {
    root: Arc<dyn ExpressionNode<T>>,
}

impl<T> Clone for Expression<T> {
    fn clone(&self) -> Self {
        Expression {
            root: Arc::clone(&self.root),
        }
    }
}

impl<T> fmt::Debug for Expression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.root)
    }
}

struct ConstantNode<T> {
    value: T,
}

impl<T: Manifold> fmt::Debug for ConstantNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constant({})", self.value)
    }
}

impl<T: Manifold> ExpressionNode<T> for ConstantNode<T> {
    fn collect_keys(&self, _keys: &mut BTreeMap<Key, usize>) {}

    fn value(&self, _values: &Values) -> CoreResult<T> {
        Ok(self.value.clone())
    }

    fn trace(&self, _values: &Values) -> CoreResult<(T, Trace)> {
        Ok((self.value.clone(), Trace::Constant))
    }
}

struct LeafNode<T> {
    key: Key,
    dim: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for LeafNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Leaf({})", self.key)
    }
}

impl<T: Manifold> ExpressionNode<T> for LeafNode<T> {
    fn collect_keys(&self, keys: &mut BTreeMap<Key, usize>) {
        keys.entry(self.key).or_insert(self.dim);
    }

    fn value(&self, values: &Values) -> CoreResult<T> {
        let value = values.at::<T>(self.key)?;
        if Manifold::dim(value) != self.dim {
            return Err(CoreError::DimensionMismatch(format!(
                "leaf {} expects dimension {}, value has {}",
                self.key,
                self.dim,
                Manifold::dim(value)
            ))
            .log());
        }
        Ok(value.clone())
    }

    fn trace(&self, values: &Values) -> CoreResult<(T, Trace)> {
        Ok((self.value(values)?, Trace::Leaf(self.key)))
    }
}

/// Validate a local Jacobian returned by a function node.
fn checked_jacobian(
    jacobian: DMatrix<f64>,
    rows: usize,
    cols: usize,
    argument: usize,
) -> CoreResult<DMatrix<f64>> {
    if jacobian.shape() != (rows, cols) {
        return Err(CoreError::DimensionMismatch(format!(
            "Jacobian w.r.t. argument {argument} is {:?}, expected ({rows}, {cols})",
            jacobian.shape()
        ))
        .log());
    }
    Ok(jacobian)
}

/// Collect the `(H, trace)` pairs of the non-constant arguments.
fn function_trace(arguments: Vec<Option<(DMatrix<f64>, Trace)>>) -> Trace {
    let arguments: Vec<_> = arguments.into_iter().flatten().collect();
    if arguments.is_empty() {
        Trace::Constant
    } else {
        Trace::Function(arguments)
    }
}

type UnaryFn<T, A> = dyn Fn(&A, Option<&mut DMatrix<f64>>) -> T + Send + Sync;
type BinaryFn<T, A1, A2> =
    dyn Fn(&A1, &A2, Option<&mut DMatrix<f64>>, Option<&mut DMatrix<f64>>) -> T + Send + Sync;
type TernaryFn<T, A1, A2, A3> = dyn Fn(
        &A1,
        &A2,
        &A3,
        Option<&mut DMatrix<f64>>,
        Option<&mut DMatrix<f64>>,
        Option<&mut DMatrix<f64>>,
    ) -> T
    + Send
    + Sync;

struct UnaryNode<T, A> {
    function: Box<UnaryFn<T, A>>,
    a: Expression<A>,
}

impl<T, A> fmt::Debug for UnaryNode<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unary({:?})", self.a)
    }
}

impl<T: Manifold, A: Manifold> ExpressionNode<T> for UnaryNode<T, A> {
    fn collect_keys(&self, keys: &mut BTreeMap<Key, usize>) {
        self.a.root.collect_keys(keys);
    }

    fn value(&self, values: &Values) -> CoreResult<T> {
        let a = self.a.root.value(values)?;
        Ok((self.function)(&a, None))
    }

    fn trace(&self, values: &Values) -> CoreResult<(T, Trace)> {
        let (a, trace_a) = self.a.root.trace(values)?;
        let mut h = DMatrix::zeros(0, 0);
        let wants = !trace_a.is_constant();
        let result = (self.function)(&a, wants.then_some(&mut h));

        let rows = Manifold::dim(&result);
        let first = if wants {
            Some((checked_jacobian(h, rows, Manifold::dim(&a), 1)?, trace_a))
        } else {
            None
        };
        Ok((result, function_trace(vec![first])))
    }
}

struct BinaryNode<T, A1, A2> {
    function: Box<BinaryFn<T, A1, A2>>,
    a1: Expression<A1>,
    a2: Expression<A2>,
}

impl<T, A1, A2> fmt::Debug for BinaryNode<T, A1, A2> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binary({:?}, {:?})", self.a1, self.a2)
    }
}

impl<T: Manifold, A1: Manifold, A2: Manifold> ExpressionNode<T> for BinaryNode<T, A1, A2> {
    fn collect_keys(&self, keys: &mut BTreeMap<Key, usize>) {
        self.a1.root.collect_keys(keys);
        self.a2.root.collect_keys(keys);
    }

    fn value(&self, values: &Values) -> CoreResult<T> {
        let a1 = self.a1.root.value(values)?;
        let a2 = self.a2.root.value(values)?;
        Ok((self.function)(&a1, &a2, None, None))
    }

    fn trace(&self, values: &Values) -> CoreResult<(T, Trace)> {
        let (a1, trace1) = self.a1.root.trace(values)?;
        let (a2, trace2) = self.a2.root.trace(values)?;
        let (mut h1, mut h2) = (DMatrix::zeros(0, 0), DMatrix::zeros(0, 0));
        let (wants1, wants2) = (!trace1.is_constant(), !trace2.is_constant());
        let result = (self.function)(
            &a1,
            &a2,
            wants1.then_some(&mut h1),
            wants2.then_some(&mut h2),
        );

        let rows = Manifold::dim(&result);
        let mut arguments = Vec::with_capacity(2);
        if wants1 {
            arguments.push(Some((checked_jacobian(h1, rows, Manifold::dim(&a1), 1)?, trace1)));
        }
        if wants2 {
            arguments.push(Some((checked_jacobian(h2, rows, Manifold::dim(&a2), 2)?, trace2)));
        }
        Ok((result, function_trace(arguments)))
    }
}

struct TernaryNode<T, A1, A2, A3> {
    function: Box<TernaryFn<T, A1, A2, A3>>,
    a1: Expression<A1>,
    a2: Expression<A2>,
    a3: Expression<A3>,
}

impl<T, A1, A2, A3> fmt::Debug for TernaryNode<T, A1, A2, A3> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ternary({:?}, {:?}, {:?})", self.a1, self.a2, self.a3)
    }
}

impl<T: Manifold, A1: Manifold, A2: Manifold, A3: Manifold> ExpressionNode<T>
    for TernaryNode<T, A1, A2, A3>
{
    fn collect_keys(&self, keys: &mut BTreeMap<Key, usize>) {
        self.a1.root.collect_keys(keys);
        self.a2.root.collect_keys(keys);
        self.a3.root.collect_keys(keys);
    }

    fn value(&self, values: &Values) -> CoreResult<T> {
        let a1 = self.a1.root.value(values)?;
        let a2 = self.a2.root.value(values)?;
        let a3 = self.a3.root.value(values)?;
        Ok((self.function)(&a1, &a2, &a3, None, None, None))
    }

    fn trace(&self, values: &Values) -> CoreResult<(T, Trace)> {
        let (a1, trace1) = self.a1.root.trace(values)?;
        let (a2, trace2) = self.a2.root.trace(values)?;
        let (a3, trace3) = self.a3.root.trace(values)?;
        let mut h = [DMatrix::zeros(0, 0), DMatrix::zeros(0, 0), DMatrix::zeros(0, 0)];
        let wants = [
            !trace1.is_constant(),
            !trace2.is_constant(),
            !trace3.is_constant(),
        ];
        let [h1, h2, h3] = &mut h;
        let result = (self.function)(
            &a1,
            &a2,
            &a3,
            wants[0].then_some(h1),
            wants[1].then_some(h2),
            wants[2].then_some(h3),
        );

        let rows = Manifold::dim(&result);
        let dims = [Manifold::dim(&a1), Manifold::dim(&a2), Manifold::dim(&a3)];
        let mut arguments = Vec::with_capacity(3);
        for (i, ((jacobian, trace), wanted)) in h
            .into_iter()
            .zip([trace1, trace2, trace3])
            .zip(wants)
            .enumerate()
        {
            if wanted {
                arguments.push(Some((checked_jacobian(jacobian, rows, dims[i], i + 1)?, trace)));
            }
        }
        Ok((result, function_trace(arguments)))
    }
}

impl<T: Manifold> Expression<T> {
    /// Wrap a custom node.
    pub fn from_node(node: impl ExpressionNode<T> + 'static) -> Self {
        Expression {
            root: Arc::new(node),
        }
    }

    /// Variable leaf for a type with a statically known dimension.
    pub fn leaf(key: Key) -> Self {
        const { assert!(T::DIMENSION > 0, "use leaf_with_dim for dynamically sized types") };
        Self::leaf_with_dim(key, T::DIMENSION)
    }

    /// Variable leaf with an explicit tangent dimension.
    pub fn leaf_with_dim(key: Key, dim: usize) -> Self {
        Self::from_node(LeafNode::<T> {
            key,
            dim,
            _marker: PhantomData,
        })
    }

    pub fn constant(value: T) -> Self {
        Self::from_node(ConstantNode { value })
    }

    /// Function of one expression.
    ///
    /// `function(a, H)` returns the result and, when `H` is requested, stores
    /// `∂result/∂a` (`dim(result) × dim(a)`) in it.
    pub fn unary<A, F>(function: F, a: &Expression<A>) -> Self
    where
        A: Manifold,
        F: Fn(&A, Option<&mut DMatrix<f64>>) -> T + Send + Sync + 'static,
    {
        Self::from_node(UnaryNode {
            function: Box::new(function),
            a: a.clone(),
        })
    }

    /// Function of two expressions, see [`Expression::unary`].
    pub fn binary<A1, A2, F>(function: F, a1: &Expression<A1>, a2: &Expression<A2>) -> Self
    where
        A1: Manifold,
        A2: Manifold,
        F: Fn(&A1, &A2, Option<&mut DMatrix<f64>>, Option<&mut DMatrix<f64>>) -> T
            + Send
            + Sync
            + 'static,
    {
        Self::from_node(BinaryNode {
            function: Box::new(function),
            a1: a1.clone(),
            a2: a2.clone(),
        })
    }

    /// Function of three expressions, see [`Expression::unary`].
    pub fn ternary<A1, A2, A3, F>(
        function: F,
        a1: &Expression<A1>,
        a2: &Expression<A2>,
        a3: &Expression<A3>,
    ) -> Self
    where
        A1: Manifold,
        A2: Manifold,
        A3: Manifold,
        F: Fn(
                &A1,
                &A2,
                &A3,
                Option<&mut DMatrix<f64>>,
                Option<&mut DMatrix<f64>>,
                Option<&mut DMatrix<f64>>,
            ) -> T
            + Send
            + Sync
            + 'static,
    {
        Self::from_node(TernaryNode {
            function: Box::new(function),
            a1: a1.clone(),
            a2: a2.clone(),
            a3: a3.clone(),
        })
    }

    /// Variable keys, sorted and unique.
    pub fn keys(&self) -> Vec<Key> {
        self.keys_and_dims().0
    }

    /// Variable keys, sorted and unique, with their tangent dimensions.
    pub fn keys_and_dims(&self) -> (Vec<Key>, Vec<usize>) {
        let mut map = BTreeMap::new();
        self.root.collect_keys(&mut map);
        map.into_iter().unzip()
    }

    pub fn value(&self, values: &Values) -> CoreResult<T> {
        self.root.value(values)
    }

    /// Forward pass with trace, for composing custom nodes.
    pub fn trace(&self, values: &Values) -> CoreResult<(T, Trace)> {
        self.root.trace(values)
    }

    /// Evaluate and accumulate every Jacobian block into `map`.
    ///
    /// `map` must have `dim(value)` rows and a block for every key of the
    /// expression. Existing block contents are added to, not overwritten.
    pub fn value_and_jacobian_map(
        &self,
        values: &Values,
        map: &mut JacobianMap<'_>,
    ) -> CoreResult<T> {
        let (value, trace) = self.root.trace(values)?;
        let rows = Manifold::dim(&value);
        if map.rows() != rows {
            return Err(CoreError::DimensionMismatch(format!(
                "Jacobian map has {} rows, expression value has dimension {rows}",
                map.rows()
            ))
            .log());
        }
        trace.reverse_ad(&DMatrix::identity(rows, rows), map)?;
        Ok(value)
    }

    /// Evaluate and return one Jacobian per key of `keys` in `jacobians`.
    ///
    /// `keys` must be sorted and unique, and `dims` their tangent dimensions,
    /// typically both from [`Expression::keys_and_dims`].
    pub fn value_and_derivatives(
        &self,
        values: &Values,
        keys: &[Key],
        dims: &[usize],
        jacobians: &mut Vec<DMatrix<f64>>,
    ) -> CoreResult<T> {
        if keys.len() != dims.len() {
            return Err(CoreError::DimensionMismatch(format!(
                "{} keys but {} dimensions",
                keys.len(),
                dims.len()
            ))
            .log());
        }
        let (value, trace) = self.root.trace(values)?;
        let rows = Manifold::dim(&value);
        let mut ab = VerticalBlockMatrix::new(dims.iter().copied(), rows);
        {
            let mut map = JacobianMap::new(keys, &mut ab)?;
            trace.reverse_ad(&DMatrix::identity(rows, rows), &mut map)?;
        }
        jacobians.clear();
        jacobians.extend((0..keys.len()).map(|i| ab.block(i).into_owned()));
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DVector, Vector2, Vector3};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn x(i: u64) -> Key {
        Key::symbol('x', i)
    }

    fn doubled(e: &Expression<Vector2<f64>>) -> Expression<Vector2<f64>> {
        Expression::unary(
            |v: &Vector2<f64>, h| {
                if let Some(h) = h {
                    *h = DMatrix::identity(2, 2) * 2.0;
                }
                v * 2.0
            },
            e,
        )
    }

    #[test]
    fn test_leaf_value_and_keys() -> TestResult {
        let mut values = Values::new();
        values.insert(x(3), Vector3::new(1.0, 2.0, 3.0))?;

        let e = Expression::<Vector3<f64>>::leaf(x(3));
        assert_eq!(e.value(&values)?, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(e.keys_and_dims(), (vec![x(3)], vec![3]));

        let missing = Expression::<Vector3<f64>>::leaf(x(4));
        assert!(matches!(missing.value(&values), Err(CoreError::KeyNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_constant_has_no_keys() -> TestResult {
        let e = Expression::constant(Vector2::new(1.0, 2.0));
        assert!(e.keys().is_empty());
        let mut jacobians = Vec::new();
        let value = e.value_and_derivatives(&Values::new(), &[], &[], &mut jacobians)?;
        assert_eq!(value, Vector2::new(1.0, 2.0));
        assert!(jacobians.is_empty());
        Ok(())
    }

    #[test]
    fn test_chain_rule() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), Vector2::new(1.0, -1.0))?;

        let e = doubled(&doubled(&Expression::leaf(x(0))));
        let (keys, dims) = e.keys_and_dims();
        let mut jacobians = Vec::new();
        let value = e.value_and_derivatives(&values, &keys, &dims, &mut jacobians)?;

        assert_eq!(value, Vector2::new(4.0, -4.0));
        assert!((&jacobians[0] - DMatrix::identity(2, 2) * 4.0).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_repeated_key_accumulates() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), Vector2::new(1.0, 2.0))?;
        let leaf = Expression::<Vector2<f64>>::leaf(x(0));
        let e = ops::sum(&leaf, &doubled(&leaf));

        assert_eq!(e.keys_and_dims(), (vec![x(0)], vec![2]));
        let mut ab = VerticalBlockMatrix::new([2, 1], 2);
        let keys = [x(0)];
        let mut map = JacobianMap::new(&keys, &mut ab)?;
        let value = e.value_and_jacobian_map(&values, &mut map)?;

        assert_eq!(value, Vector2::new(3.0, 6.0));
        assert!((ab.block(0) - DMatrix::identity(2, 2) * 3.0).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_value_path_requests_no_jacobians() -> TestResult {
        static REQUESTED: AtomicUsize = AtomicUsize::new(0);
        let e = Expression::unary(
            |v: &f64, h| {
                if let Some(h) = h {
                    REQUESTED.fetch_add(1, Ordering::SeqCst);
                    *h = DMatrix::from_element(1, 1, 3.0);
                }
                3.0 * v
            },
            &Expression::<f64>::leaf(x(0)),
        );
        let mut values = Values::new();
        values.insert(x(0), 2.0)?;

        assert!((e.value(&values)? - 6.0).abs() < 1e-12);
        assert_eq!(REQUESTED.load(Ordering::SeqCst), 0);

        let mut jacobians = Vec::new();
        e.value_and_derivatives(&values, &[x(0)], &[1], &mut jacobians)?;
        assert_eq!(REQUESTED.load(Ordering::SeqCst), 1);
        assert!((jacobians[0][(0, 0)] - 3.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_constant_argument_skips_jacobian() -> TestResult {
        let e = Expression::binary(
            |a: &f64, b: &f64, h1, h2| {
                assert!(h1.is_none());
                if let Some(h) = h2 {
                    *h = DMatrix::from_element(1, 1, *a);
                }
                a * b
            },
            &Expression::constant(5.0),
            &Expression::leaf(x(1)),
        );
        let mut values = Values::new();
        values.insert(x(1), 2.0)?;
        let mut jacobians = Vec::new();
        let value = e.value_and_derivatives(&values, &[x(1)], &[1], &mut jacobians)?;
        assert!((value - 10.0).abs() < 1e-12);
        assert!((jacobians[0][(0, 0)] - 5.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_ternary_jacobians() -> TestResult {
        let e = Expression::ternary(
            |a: &f64, b: &f64, c: &f64, ha, hb, hc| {
                for (h, v) in [(ha, b * c), (hb, a * c), (hc, a * b)] {
                    if let Some(h) = h {
                        *h = DMatrix::from_element(1, 1, v);
                    }
                }
                a * b * c
            },
            &Expression::leaf(x(0)),
            &Expression::leaf(x(1)),
            &Expression::leaf(x(2)),
        );
        let mut values = Values::new();
        values.insert(x(0), 2.0)?;
        values.insert(x(1), 3.0)?;
        values.insert(x(2), 4.0)?;

        let (keys, dims) = e.keys_and_dims();
        let mut jacobians = Vec::new();
        let value = e.value_and_derivatives(&values, &keys, &dims, &mut jacobians)?;
        assert!((value - 24.0).abs() < 1e-12);
        let expected = [12.0, 8.0, 6.0];
        for (jacobian, expected) in jacobians.iter().zip(expected) {
            assert!((jacobian[(0, 0)] - expected).abs() < 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_bad_local_jacobian_shape() -> TestResult {
        let e = Expression::unary(
            |v: &Vector2<f64>, h| {
                if let Some(h) = h {
                    *h = DMatrix::identity(3, 2);
                }
                *v
            },
            &Expression::leaf(x(0)),
        );
        let mut values = Values::new();
        values.insert(x(0), Vector2::new(0.0, 0.0))?;
        let mut jacobians = Vec::new();
        let result = e.value_and_derivatives(&values, &[x(0)], &[2], &mut jacobians);
        assert!(matches!(result, Err(CoreError::DimensionMismatch(_))));
        Ok(())
    }

    #[test]
    fn test_dynamic_leaf_checks_dimension() -> TestResult {
        let mut values = Values::new();
        values.insert(x(0), DVector::from_vec(vec![1.0, 2.0, 3.0]))?;

        let good = Expression::<DVector<f64>>::leaf_with_dim(x(0), 3);
        assert_eq!(good.value(&values)?.len(), 3);

        let bad = Expression::<DVector<f64>>::leaf_with_dim(x(0), 2);
        assert!(matches!(bad.value(&values), Err(CoreError::DimensionMismatch(_))));
        Ok(())
    }
}
