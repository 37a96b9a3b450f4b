//!
//! Lower an expression DAG to a `Program`.
//!
//! Single post-order traversal from the root. Operands are lowered before the node reading them,
//! so parameters are allocated in the order their loads are first reached (left before right)
//! and instructions come out already in evaluation order.
//!

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::NodeIndex;
use tracing::{debug, info, instrument};

use crate::{
  axes,
  dim::Dimension,
  error::{Error, Result},
  expr::{Graph, Op},
  program::{Instr, Param, Program, ValueRef},
  CompileConfig,
};

#[derive(Debug, Clone)]
struct Lowered {
  value: ValueRef,
  dims: Vec<Dimension>,
}

/// State of one compile. Built fresh by `compile` and dropped with it.
#[derive(Debug, Default)]
struct Context {
  instrs: Vec<Instr>,
  params: Vec<Param>,
  name_of: HashMap<NodeIndex, Lowered>,
  counters: HashMap<&'static str, usize>,
  // nodes on the current traversal path
  visiting: HashSet<NodeIndex>,
}

impl Context {
  fn fresh_name(&mut self, kind: &'static str) -> String {
    let n = self.counters.entry(kind).or_insert(0);
    let name = format!("{}{}", kind, n);
    *n += 1;
    name
  }

  fn emit(&mut self, instr: Instr) -> ValueRef {
    debug!("emit {:?}", instr);
    self.instrs.push(instr);
    ValueRef::Instr(self.instrs.len() - 1)
  }
}

#[instrument(level = "debug", skip(graph, config))]
pub fn compile(graph: &Graph, root: NodeIndex, config: &CompileConfig) -> Result<Program> {
  let mut cx = Context::default();
  let out = lower(graph, root, config, &mut cx)?;
  let program = Program {
    params: cx.params,
    instrs: cx.instrs,
    output: out.value,
    output_dims: out.dims,
  };
  info!(
    "compiled {:?} to {} params, {} instructions",
    root,
    program.params.len(),
    program.instrs.len()
  );
  Ok(program)
}

fn lower(graph: &Graph, id: NodeIndex, config: &CompileConfig, cx: &mut Context) -> Result<Lowered> {
  let node = graph.node(id)?;
  // loads are always shared, contractions only when memoizing
  if node.op == Op::Load || config.memoize {
    if let Some(lowered) = cx.name_of.get(&id) {
      return Ok(lowered.clone());
    }
  }
  if !cx.visiting.insert(id) {
    return Err(Error::Cycle(id));
  }

  let lowered = match (node.op, graph.operands(id)?) {
    (Op::Load, _) => {
      let name = cx.fresh_name("load");
      cx.params.push(Param {
        name,
        dims: node.dims.clone(),
        node: id.index(),
      });
      Lowered {
        value: ValueRef::Param(cx.params.len() - 1),
        dims: node.dims.clone(),
      }
    }
    (Op::Contract, Some((l, r))) => {
      let left = lower(graph, l, config, cx)?;
      let right = lower(graph, r, config, cx)?;
      let resolved = axes::resolve(&left.dims, &right.dims)?;
      let name = cx.fresh_name("contract");
      let value = cx.emit(Instr::Contract {
        name,
        left: left.value,
        right: right.value,
        axes_left: resolved.left,
        axes_right: resolved.right,
      });
      let contracted = Lowered {
        value,
        dims: resolved.output,
      };
      if node.rebound {
        lay_out_as(&node.dims, contracted, cx)?
      } else {
        contracted
      }
    }
    (Op::Contract, None) => return Err(Error::UnknownNode(id)),
  };

  cx.visiting.remove(&id);
  cx.name_of.insert(id, lowered.clone());
  Ok(lowered)
}

/// Permutes `value` into the declared axis order `dims`, if it is not already in it.
fn lay_out_as(dims: &[Dimension], value: Lowered, cx: &mut Context) -> Result<Lowered> {
  let perm = axes::permutation(&value.dims, dims).ok_or_else(|| Error::IncompatibleAssignment {
    target: axes::render(dims),
    value: axes::render(&value.dims),
  })?;
  if axes::is_identity(&perm) {
    return Ok(value);
  }
  let name = cx.fresh_name("permute");
  let permuted = cx.emit(Instr::Permute {
    name,
    source: value.value,
    axes: perm,
  });
  Ok(Lowered {
    value: permuted,
    dims: dims.to_vec(),
  })
}

#[cfg(test)]
mod tests {
  use itertools::Itertools;

  use super::*;
  use crate::{dim::dims, utils};

  fn ijkl() -> (Dimension, Dimension, Dimension, Dimension) {
    dims(["i", "j", "k", "l"])
      .unwrap()
      .into_iter()
      .collect_tuple()
      .unwrap()
  }

  #[test]
  fn test_matmul_program() {
    let scope = utils::init_logging_tests();
    let (i, j, k, _) = ijkl();
    let cx = Graph::new();
    let t1 = cx.load(&[i.clone(), j.clone()]).unwrap();
    let t2 = cx.load(&[j.clone(), k.clone()]).unwrap();
    let p = (t1 * t2).compile().unwrap();

    assert_eq!(p.params(), vec!["load0", "load1"]);
    assert_eq!(p.params[0].node, t1.id.index());
    assert_eq!(p.params[1].node, t2.id.index());
    assert_eq!(p.body(), "contract0 = contract(load0, load1, [1], [0])\nreturn contract0");
    assert_eq!(p.output_dims, vec![i, k]);
    p.validate().unwrap();
    drop(scope);
  }

  #[test]
  fn test_chain_program() {
    let (i, j, k, l) = ijkl();
    let cx = Graph::new();
    let a = cx.load(&[i.clone(), j.clone()]).unwrap();
    let b = cx.load(&[j, k.clone()]).unwrap();
    let c = cx.load(&[k, l.clone()]).unwrap();
    let p = ((a * b) * c).compile().unwrap();

    assert_eq!(p.params(), vec!["load0", "load1", "load2"]);
    assert_eq!(
      p.body(),
      "contract0 = contract(load0, load1, [1], [0])\n\
       contract1 = contract(contract0, load2, [1], [0])\n\
       return contract1"
    );
    assert_eq!(p.output_dims, vec![i, l]);
  }

  #[test]
  fn test_right_nested_param_order() {
    let (i, j, k, l) = ijkl();
    let cx = Graph::new();
    let a = cx.load(&[i.clone(), j.clone()]).unwrap();
    let b = cx.load(&[j, k.clone()]).unwrap();
    let c = cx.load(&[k, l]).unwrap();
    // c is reached before a and b
    let p = (c * (a * b)).compile().unwrap();
    let order: Vec<_> = p.params.iter().map(|p| p.node).collect();
    assert_eq!(order, vec![c.id.index(), a.id.index(), b.id.index()]);
    assert_eq!(
      p.body(),
      "contract0 = contract(load1, load2, [1], [0])\n\
       contract1 = contract(load0, contract0, [0], [1])\n\
       return contract1"
    );
  }

  #[test]
  fn test_shared_load_is_one_param() {
    let (i, _, _, _) = ijkl();
    let cx = Graph::new();
    let v = cx.load(&[i]).unwrap();
    let p = (v * v).compile().unwrap();
    assert_eq!(p.params(), vec!["load0"]);
    assert_eq!(p.body(), "contract0 = contract(load0, load0, [0], [0])\nreturn contract0");
    assert!(p.output_dims.is_empty());
  }

  #[test]
  fn test_shared_contraction_memoized() {
    let (i, j, _, _) = ijkl();
    let cx = Graph::new();
    let x = cx.load(&[i.clone(), j.clone()]).unwrap();
    let y = cx.load(&[j.clone()]).unwrap();
    let xy = x * y;
    assert_eq!(xy.output_dims().unwrap(), vec![i.clone()]);
    let root = xy * xy;

    let memo = root.compile().unwrap();
    assert_eq!(memo.instrs.len(), 2);
    assert_eq!(memo.params(), vec!["load0", "load1"]);
    assert_eq!(
      memo.body(),
      "contract0 = contract(load0, load1, [1], [0])\n\
       contract1 = contract(contract0, contract0, [0], [0])\n\
       return contract1"
    );

    let literal = root.compile_with(&CompileConfig { memoize: false }).unwrap();
    assert_eq!(literal.instrs.len(), 3);
    assert_eq!(literal.params(), vec!["load0", "load1"]);
    assert_eq!(
      literal.body(),
      "contract0 = contract(load0, load1, [1], [0])\n\
       contract1 = contract(load0, load1, [1], [0])\n\
       contract2 = contract(contract0, contract1, [0], [0])\n\
       return contract2"
    );
    literal.validate().unwrap();
  }

  #[test]
  fn test_disjoint_operands_fail() {
    let (i, j, k, l) = ijkl();
    let cx = Graph::new();
    let a = cx.load(&[i, j]).unwrap();
    let b = cx.load(&[k, l]).unwrap();
    // building succeeds, lowering does not
    let root = a * b;
    assert!(matches!(root.compile(), Err(Error::EmptyContraction { .. })));
  }

  #[test]
  fn test_contracted_dim_is_gone_downstream() {
    let (i, j, k, l) = ijkl();
    let cx = Graph::new();
    let a = cx.load(&[i.clone(), j.clone()]).unwrap();
    let b = cx.load(&[j.clone(), k]).unwrap();
    let c = cx.load(&[j, l]).unwrap();
    // ab evaluates to [i, k]; its declared j is already summed away
    let root = (a * b) * c;
    assert!(matches!(root.compile(), Err(Error::EmptyContraction { .. })));
  }

  #[test]
  fn test_assigned_target_layout() {
    let (i, j, k, _) = ijkl();
    let cx = Graph::new();
    let t = cx.load(&[i.clone(), j.clone()]).unwrap();
    let t2 = cx.load(&[j.clone(), k.clone()]).unwrap();

    let t3 = cx.load(&[i.clone(), k.clone()]).unwrap();
    t3.assign(&[i.clone(), k.clone()], t * t2).unwrap();
    let p = t3.compile().unwrap();
    assert_eq!(p.body(), "contract0 = contract(load0, load1, [1], [0])\nreturn contract0");
    assert_eq!(p.output_dims, vec![i.clone(), k.clone()]);

    let t4 = cx.load(&[k.clone(), i.clone()]).unwrap();
    t4.assign(&[k.clone(), i.clone()], t * t2).unwrap();
    let p = t4.compile().unwrap();
    assert_eq!(
      p.body(),
      "contract0 = contract(load0, load1, [1], [0])\n\
       permute0 = permute(contract0, [1, 0])\n\
       return permute0"
    );
    assert_eq!(p.output_dims, vec![k, i]);
    p.validate().unwrap();
  }

  #[test]
  fn test_compile_is_deterministic() {
    let (i, j, k, l) = ijkl();
    let cx = Graph::new();
    let a = cx.load(&[i, j.clone()]).unwrap();
    let b = cx.load(&[j, k.clone()]).unwrap();
    let c = cx.load(&[k, l]).unwrap();
    let root = a * (b * c);
    let p1 = root.compile().unwrap();
    let p2 = root.compile().unwrap();
    assert_eq!(p1, p2);
    assert_eq!(p1.params(), p2.params());
  }

  #[test]
  fn test_root_load() {
    let (i, _, _, _) = ijkl();
    let cx = Graph::new();
    let a = cx.load(&[i.clone()]).unwrap();
    let p = a.compile().unwrap();
    assert_eq!(p.params(), vec!["load0"]);
    assert!(p.instrs.is_empty());
    assert_eq!(p.output, ValueRef::Param(0));
    assert_eq!(p.body(), "return load0");
  }

  #[test]
  fn test_unknown_root() {
    let cx = Graph::new();
    let res = compile(&cx, NodeIndex::new(3), &CompileConfig::default());
    assert!(matches!(res, Err(Error::UnknownNode(_))));
  }
}
