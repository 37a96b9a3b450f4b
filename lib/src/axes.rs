//!
//! Resolution of contraction axes by dimension identity.
//!
//! A contraction of `a` and `b` sums over every dimension the two operands share.
//! Shared dimensions are taken in the order they appear in `a`, which fixes the pairing of
//! `axes_left[n]` with `axes_right[n]`. The surviving axes are `a`'s uncontracted axes followed
//! by `b`'s uncontracted axes, both in their original order, which is the layout tensordot produces.
//!

use itertools::Itertools;

use crate::{
  dim::Dimension,
  error::{Error, Result},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractionAxes {
  pub left: Vec<usize>,
  pub right: Vec<usize>,
  /// Axes of the contracted result.
  pub output: Vec<Dimension>,
}

/// Dimensions of `left` in order, followed by the dimensions of `right` not already present.
pub fn union_dims(left: &[Dimension], right: &[Dimension]) -> Vec<Dimension> {
  left
    .iter()
    .chain(right.iter().filter(|d| !left.contains(d)))
    .cloned()
    .collect()
}

pub fn dim_index(dims: &[Dimension], dim: &Dimension) -> Option<usize> {
  dims.iter().position(|d| d == dim)
}

pub fn resolve(left: &[Dimension], right: &[Dimension]) -> Result<ContractionAxes> {
  let (axes_left, axes_right): (Vec<usize>, Vec<usize>) = left
    .iter()
    .enumerate()
    .filter_map(|(l, dim)| dim_index(right, dim).map(|r| (l, r)))
    .unzip();

  if axes_left.is_empty() {
    return Err(Error::EmptyContraction {
      left: render(left),
      right: render(right),
    });
  }

  let output = left
    .iter()
    .enumerate()
    .filter(|(n, _)| !axes_left.contains(n))
    .chain(right.iter().enumerate().filter(|(n, _)| !axes_right.contains(n)))
    .map(|(_, d)| d.clone())
    .collect();

  Ok(ContractionAxes {
    left: axes_left,
    right: axes_right,
    output,
  })
}

/// For every dimension of `to`, its position in `from`. `None` unless `to` is a permutation of `from`.
pub fn permutation(from: &[Dimension], to: &[Dimension]) -> Option<Vec<usize>> {
  if from.len() != to.len() {
    return None;
  }
  to.iter().map(|d| dim_index(from, d)).collect()
}

pub fn is_identity(axes: &[usize]) -> bool {
  axes.iter().enumerate().all(|(n, a)| n == *a)
}

pub fn render(dims: &[Dimension]) -> String {
  dims.iter().join(", ")
}
