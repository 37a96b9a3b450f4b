//!
//! Expression graph: dimension-labelled tensors built from loads and contractions.
//!
//! Nodes live in an arena (`Graph`) and are addressed by `NodeIndex`. Operand links are edges
//! from the operand to its consumer, labelled with the operand's position, the same way data
//! edges carry an `input_order` in a computation graph. Nodes are never removed, so an index
//! handed out by a graph stays valid for the graph's lifetime.
//!

use std::{
  cell::RefCell,
  collections::HashMap,
  fmt,
  ops::Mul,
};

use itertools::Itertools;
use petgraph::{
  algo::has_path_connecting,
  stable_graph::{NodeIndex, StableGraph},
  visit::EdgeRef,
  Direction::Incoming,
};
use tracing::{debug, instrument};

use crate::{
  axes,
  dim::Dimension,
  error::{Error, Result},
  program::Program,
  CompileConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operand {
  Left,
  Right,
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operand::Left => f.write_str("left"),
      Operand::Right => f.write_str("right"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  /// External input, bound to a kernel parameter.
  Load,
  /// Product of the `Left` and `Right` operands summed over their shared dimensions.
  Contract,
}

#[derive(Debug, Clone)]
pub struct Node {
  /// Declared axis order. Duplicate free.
  pub dims: Vec<Dimension>,
  pub op: Op,
  /// Set once the node has been the target of `assign`. A rebound node's value is laid out in
  /// its declared `dims` order rather than in the order its contraction produces.
  pub rebound: bool,
}

impl fmt::Display for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let op = match self.op {
      Op::Load => "Load",
      Op::Contract => "Contract",
    };
    write!(f, "{}({})", op, axes::render(&self.dims))
  }
}

/// Arena holding every node of an expression DAG.
#[derive(Debug, Default)]
pub struct Graph {
  pub(crate) graph: RefCell<StableGraph<Node, Operand>>,
}

impl Graph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn node_count(&self) -> usize {
    self.graph.borrow().node_count()
  }

  /// Creates an input tensor over `dims`.
  pub fn load(&self, dims: &[Dimension]) -> Result<Tensor<'_>> {
    if let Some(dup) = dims.iter().duplicates().next() {
      return Err(Error::DuplicateDimension(dup.clone()));
    }
    let id = self.graph.borrow_mut().add_node(Node {
      dims: dims.to_vec(),
      op: Op::Load,
      rebound: false,
    });
    Ok(Tensor { id, graph: self })
  }

  /// Fallible form of `left * right`.
  pub fn contract(&self, left: NodeIndex, right: NodeIndex) -> Result<Tensor<'_>> {
    let dims = axes::union_dims(&self.dims(left)?, &self.dims(right)?);
    let mut g = self.graph.borrow_mut();
    let id = g.add_node(Node {
      dims,
      op: Op::Contract,
      rebound: false,
    });
    g.add_edge(left, id, Operand::Left);
    g.add_edge(right, id, Operand::Right);
    Ok(Tensor { id, graph: self })
  }

  pub fn tensor(&self, id: NodeIndex) -> Result<Tensor<'_>> {
    self.node(id)?;
    Ok(Tensor { id, graph: self })
  }

  pub fn node(&self, id: NodeIndex) -> Result<Node> {
    self
      .graph
      .borrow()
      .node_weight(id)
      .cloned()
      .ok_or(Error::UnknownNode(id))
  }

  pub fn dims(&self, id: NodeIndex) -> Result<Vec<Dimension>> {
    self.node(id).map(|n| n.dims)
  }

  /// `(left, right)` for a contraction, `None` for a load.
  pub fn operands(&self, id: NodeIndex) -> Result<Option<(NodeIndex, NodeIndex)>> {
    let g = self.graph.borrow();
    if g.node_weight(id).is_none() {
      return Err(Error::UnknownNode(id));
    }
    Ok(
      g.edges_directed(id, Incoming)
        .sorted_by_key(|e| *e.weight())
        .map(|e| e.source())
        .collect_tuple(),
    )
  }

  /// The axes of the value `id` evaluates to.
  ///
  /// Loads and rebound nodes produce their declared dims. A contraction built with `*` drops the
  /// dimensions it sums over, so `Load(i, j) * Load(j, k)` is declared over `[i, j, k]` but
  /// evaluates to `[i, k]`.
  pub fn output_dims(&self, id: NodeIndex) -> Result<Vec<Dimension>> {
    let mut memo = HashMap::new();
    self.output_dims_memo(id, &mut memo)
  }

  fn output_dims_memo(
    &self,
    id: NodeIndex,
    memo: &mut HashMap<NodeIndex, Vec<Dimension>>,
  ) -> Result<Vec<Dimension>> {
    if let Some(dims) = memo.get(&id) {
      return Ok(dims.clone());
    }
    let node = self.node(id)?;
    let dims = match (node.op, self.operands(id)?) {
      (Op::Contract, Some((l, r))) if !node.rebound => {
        let left = self.output_dims_memo(l, memo)?;
        let right = self.output_dims_memo(r, memo)?;
        axes::resolve(&left, &right)?.output
      }
      _ => node.dims,
    };
    memo.insert(id, dims.clone());
    Ok(dims)
  }

  /// Rebinds `target` to the op and operands of `source`, keeping the target's declared dims.
  #[instrument(level = "debug", skip(self))]
  pub fn assign(&self, target: NodeIndex, source: NodeIndex) -> Result<()> {
    let target_node = self.node(target)?;
    let source_node = self.node(source)?;

    let value = self.output_dims(source)?;
    if axes::permutation(&value, &target_node.dims).is_none() {
      return Err(Error::IncompatibleAssignment {
        target: axes::render(&target_node.dims),
        value: axes::render(&value),
      });
    }

    let operands = self.operands(source)?;
    let mut g = self.graph.borrow_mut();
    if let Some((l, r)) = operands {
      for operand in [l, r] {
        // the new edge operand -> target closes a cycle iff operand already depends on target
        if operand == target || has_path_connecting(&*g, target, operand, None) {
          return Err(Error::Cycle(target));
        }
      }
    }

    let stale: Vec<_> = g.edges_directed(target, Incoming).map(|e| e.id()).collect();
    for e in stale {
      g.remove_edge(e);
    }
    if let Some((l, r)) = operands {
      g.add_edge(l, target, Operand::Left);
      g.add_edge(r, target, Operand::Right);
    }
    if let Some(node) = g.node_weight_mut(target) {
      node.op = source_node.op;
      node.rebound = true;
    }
    debug!("rebound {:?} to {:?} over [{}]", target, source_node.op, axes::render(&value));
    Ok(())
  }
}

/// Handle to a node of a `Graph`. Cheap to copy.
#[derive(Clone, Copy)]
pub struct Tensor<'g> {
  pub id: NodeIndex,
  graph: &'g Graph,
}

impl<'g> Tensor<'g> {
  pub fn graph(&self) -> &'g Graph {
    self.graph
  }

  pub fn dims(&self) -> Result<Vec<Dimension>> {
    self.graph.dims(self.id)
  }

  pub fn op(&self) -> Result<Op> {
    self.graph.node(self.id).map(|n| n.op)
  }

  pub fn output_dims(&self) -> Result<Vec<Dimension>> {
    self.graph.output_dims(self.id)
  }

  fn check_arity(&self, indices: &[Dimension]) -> Result<()> {
    let expected = self.dims()?.len();
    if indices.len() != expected {
      return Err(Error::ArityMismatch {
        expected,
        found: indices.len(),
      });
    }
    Ok(())
  }

  /// Index notation accessor, `t[i, j]`. Only the number of indices is checked; the indices
  /// themselves are not used and the tensor is returned as is.
  pub fn bind(self, indices: &[Dimension]) -> Result<Self> {
    self.check_arity(indices)?;
    Ok(self)
  }

  /// Index notation assignment, `t[i, k] = source`.
  pub fn assign(&self, indices: &[Dimension], source: Tensor<'_>) -> Result<()> {
    self.check_arity(indices)?;
    if !std::ptr::eq(self.graph, source.graph) {
      return Err(Error::UnknownNode(source.id));
    }
    self.graph.assign(self.id, source.id)
  }

  pub fn compile(&self) -> Result<Program> {
    self.compile_with(&CompileConfig::default())
  }

  pub fn compile_with(&self, config: &CompileConfig) -> Result<Program> {
    crate::compile::compile(self.graph, self.id, config)
  }
}

impl fmt::Debug for Tensor<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.graph.node(self.id) {
      Ok(node) => write!(f, "Tensor({:?}, {})", self.id, node),
      Err(_) => write!(f, "Tensor({:?}, <unknown>)", self.id),
    }
  }
}

impl<'g> Mul for Tensor<'g> {
  type Output = Tensor<'g>;

  fn mul(self, rhs: Tensor<'g>) -> Self::Output {
    assert!(
      std::ptr::eq(self.graph, rhs.graph),
      "Cannot multiply tensors from different graphs"
    );
    match self.graph.contract(self.id, rhs.id) {
      Ok(t) => t,
      Err(e) => panic!("{}", e),
    }
  }
}
