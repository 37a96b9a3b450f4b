use std::marker::PhantomData;

use itertools::Itertools;
use ndarray::{ArrayD, IxDyn, LinalgScalar};

use crate::error::{Error, Result};

/// Numeric array library a compiled program runs on.
pub trait Backend {
  type Array: Clone;

  fn shape<'a>(&self, array: &'a Self::Array) -> &'a [usize];

  /// Sums `a` and `b` over the paired axes `axes_a[n]`, `axes_b[n]`. The result holds the remaining
  /// axes of `a` followed by the remaining axes of `b`, each in their original order.
  fn contract(
    &self,
    a: &Self::Array,
    b: &Self::Array,
    axes_a: &[usize],
    axes_b: &[usize],
  ) -> Result<Self::Array>;

  /// Result axis `n` is input axis `axes[n]`.
  fn permute(&self, a: &Self::Array, axes: &[usize]) -> Result<Self::Array>;
}

/// `ndarray` backend over dynamic-rank arrays.
#[derive(Debug)]
pub struct NdArray<A = f64>(PhantomData<A>);

impl<A> NdArray<A> {
  pub fn new() -> Self {
    NdArray(PhantomData)
  }
}

impl<A> Default for NdArray<A> {
  fn default() -> Self {
    Self::new()
  }
}

impl<A> Clone for NdArray<A> {
  fn clone(&self) -> Self {
    Self::new()
  }
}

impl<A> Copy for NdArray<A> {}

impl<A: LinalgScalar> Backend for NdArray<A> {
  type Array = ArrayD<A>;

  fn shape<'a>(&self, array: &'a ArrayD<A>) -> &'a [usize] {
    array.shape()
  }

  fn contract(&self, a: &ArrayD<A>, b: &ArrayD<A>, axes_a: &[usize], axes_b: &[usize]) -> Result<ArrayD<A>> {
    tensordot(a, b, axes_a, axes_b)
  }

  fn permute(&self, a: &ArrayD<A>, axes: &[usize]) -> Result<ArrayD<A>> {
    check_axes(axes, a.ndim(), "permutation")?;
    if axes.len() != a.ndim() {
      return Err(Error::InvalidAxes(format!(
        "permutation of {} axes applied to a rank {} array",
        axes.len(),
        a.ndim()
      )));
    }
    Ok(a.view().permuted_axes(IxDyn(axes)).as_standard_layout().into_owned())
  }
}

fn check_axes(axes: &[usize], ndim: usize, what: &str) -> Result<()> {
  if let Some(a) = axes.iter().find(|a| **a >= ndim) {
    return Err(Error::InvalidAxes(format!("{} axis {} out of range for rank {}", what, a, ndim)));
  }
  if let Some(a) = axes.iter().duplicates().next() {
    return Err(Error::InvalidAxes(format!("{} axis {} repeated", what, a)));
  }
  Ok(())
}

/// Generalized contraction of two arrays, tensordot style.
///
/// Both operands are transposed so that the contracted axes sit together (last for `a`, first for
/// `b`), flattened to matrices, multiplied, and the product reshaped back to the free axes.
pub fn tensordot<A: LinalgScalar>(
  a: &ArrayD<A>,
  b: &ArrayD<A>,
  axes_a: &[usize],
  axes_b: &[usize],
) -> Result<ArrayD<A>> {
  if axes_a.len() != axes_b.len() {
    return Err(Error::InvalidAxes(format!(
      "{} axes of the left operand paired with {} of the right",
      axes_a.len(),
      axes_b.len()
    )));
  }
  check_axes(axes_a, a.ndim(), "left")?;
  check_axes(axes_b, b.ndim(), "right")?;
  for (x, y) in axes_a.iter().zip(axes_b) {
    if a.shape()[*x] != b.shape()[*y] {
      return Err(Error::InvalidAxes(format!(
        "left axis {} has extent {}, right axis {} has extent {}",
        x,
        a.shape()[*x],
        y,
        b.shape()[*y]
      )));
    }
  }

  let free_a: Vec<usize> = (0..a.ndim()).filter(|x| !axes_a.contains(x)).collect();
  let free_b: Vec<usize> = (0..b.ndim()).filter(|y| !axes_b.contains(y)).collect();

  let m: usize = free_a.iter().map(|x| a.shape()[*x]).product();
  let n: usize = free_b.iter().map(|y| b.shape()[*y]).product();
  let k: usize = axes_a.iter().map(|x| a.shape()[*x]).product();

  let perm_a: Vec<usize> = free_a.iter().chain(axes_a).copied().collect();
  let perm_b: Vec<usize> = axes_b.iter().chain(&free_b).copied().collect();

  let a_t = a.view().permuted_axes(IxDyn(&perm_a));
  let b_t = b.view().permuted_axes(IxDyn(&perm_b));
  let a_mat = a_t.to_shape((m, k))?;
  let b_mat = b_t.to_shape((k, n))?;
  let c_mat = a_mat.dot(&b_mat);

  let out_shape: Vec<usize> = free_a
    .iter()
    .map(|x| a.shape()[*x])
    .chain(free_b.iter().map(|y| b.shape()[*y]))
    .collect();
  Ok(c_mat.into_shape_with_order(IxDyn(&out_shape))?)
}
