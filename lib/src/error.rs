use petgraph::stable_graph::NodeIndex;
use thiserror::Error;

use crate::dim::Dimension;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("dimension name must not be empty")]
  InvalidDimension,

  #[error("dimension `{0}` appears more than once")]
  DuplicateDimension(Dimension),

  #[error("expected {expected} arguments, got {found}")]
  ArityMismatch { expected: usize, found: usize },

  #[error("operands [{left}] and [{right}] share no dimension to contract over")]
  EmptyContraction { left: String, right: String },

  #[error("node {0:?} is not part of this graph")]
  UnknownNode(NodeIndex),

  #[error("rebinding node {0:?} would make it depend on itself")]
  Cycle(NodeIndex),

  #[error("cannot assign a value with axes [{value}] to a tensor declared over [{target}]")]
  IncompatibleAssignment { target: String, value: String },

  #[error("argument {param} has rank {found}, expected {expected}")]
  RankMismatch {
    param: String,
    expected: usize,
    found: usize,
  },

  #[error("dimension `{dim}` is bound to extent {found}, but was already bound to {expected}")]
  ExtentMismatch {
    dim: Dimension,
    expected: usize,
    found: usize,
  },

  #[error("invalid contraction axes: {0}")]
  InvalidAxes(String),

  #[error("malformed program: {0}")]
  MalformedProgram(String),

  #[error(transparent)]
  Shape(#[from] ndarray::ShapeError),
}
