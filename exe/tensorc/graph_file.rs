use std::{collections::HashMap, error::Error, path::Path};

use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;
use tensorexpr::{Dimension, Graph, Param, Tensor};

/// YAML description of an expression graph.
///
/// ```yaml
/// tensors:
///   - { name: t,  load: [i, j] }
///   - { name: t2, load: [j, k] }
///   - { name: t3, load: [i, k] }
///   - { name: p,  mul: [t, t2] }
/// assign:
///   - { target: t3, indices: [i, k], source: p }
/// root: t3
/// ```
#[derive(Debug, Deserialize)]
pub struct GraphFile {
  /// In definition order; `mul` may only name tensors defined above it.
  pub tensors: Vec<TensorEntry>,
  #[serde(default)]
  pub assign: Vec<Assignment>,
  pub root: String,
}

#[derive(Debug, Deserialize)]
pub struct TensorEntry {
  pub name: String,
  #[serde(flatten)]
  pub def: TensorDef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorDef {
  Load(Vec<Dimension>),
  Mul(String, String),
}

#[derive(Debug, Deserialize)]
pub struct Assignment {
  pub target: String,
  pub source: String,
  /// Defaults to the target's own dims.
  #[serde(default)]
  pub indices: Option<Vec<Dimension>>,
}

/// One named input array in a `run` inputs file.
#[derive(Debug, Deserialize)]
pub struct Input {
  pub shape: Vec<usize>,
  pub data: Vec<f64>,
}

pub struct Built<'g> {
  pub tensors: HashMap<String, Tensor<'g>>,
  pub root: Tensor<'g>,
}

impl Built<'_> {
  /// Name of the tensor defined at `node`.
  pub fn name_of(&self, node: usize) -> Option<&str> {
    self
      .tensors
      .iter()
      .find(|(_, t)| t.id.index() == node)
      .map(|(name, _)| name.as_str())
  }

  /// Arguments for `params` in call order, taken from `inputs` by tensor name.
  pub fn bind_inputs(
    &self,
    params: &[Param],
    mut inputs: HashMap<String, Input>,
  ) -> Result<Vec<ArrayD<f64>>, Box<dyn Error>> {
    let mut args = Vec::with_capacity(params.len());
    for param in params {
      let name = self
        .name_of(param.node)
        .ok_or_else(|| format!("parameter {} has no tensor name", param.name))?;
      let input = inputs
        .remove(name)
        .ok_or_else(|| format!("no input given for `{}`", name))?;
      args.push(ArrayD::from_shape_vec(IxDyn(&input.shape), input.data)?);
    }
    Ok(args)
  }
}

impl GraphFile {
  pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(text)
  }

  pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(Self::parse(&text)?)
  }

  pub fn build<'g>(&self, graph: &'g Graph) -> Result<Built<'g>, Box<dyn Error>> {
    let mut tensors: HashMap<String, Tensor<'g>> = HashMap::new();
    let lookup = |tensors: &HashMap<String, Tensor<'g>>, name: &str| {
      tensors
        .get(name)
        .copied()
        .ok_or_else(|| format!("unknown tensor `{}`", name))
    };

    for entry in &self.tensors {
      if tensors.contains_key(&entry.name) {
        return Err(format!("tensor `{}` defined twice", entry.name).into());
      }
      let t = match &entry.def {
        TensorDef::Load(dims) => graph.load(dims)?,
        TensorDef::Mul(l, r) => {
          let (l, r) = (lookup(&tensors, l)?, lookup(&tensors, r)?);
          graph.contract(l.id, r.id)?
        }
      };
      tensors.insert(entry.name.clone(), t);
    }

    for a in &self.assign {
      let target = lookup(&tensors, &a.target)?;
      let source = lookup(&tensors, &a.source)?;
      let indices = match &a.indices {
        Some(indices) => indices.clone(),
        None => target.dims()?,
      };
      target.assign(&indices, source)?;
    }

    let root = lookup(&tensors, &self.root)?;
    Ok(Built { tensors, root })
  }
}

#[cfg(test)]
mod tests {
  use tensorexpr::{dims, Op};

  use super::*;

  const INDEX_NOTATION: &str = "
tensors:
  - { name: t,  load: [i, j] }
  - { name: t2, load: [j, k] }
  - { name: t3, load: [i, k] }
  - { name: p,  mul: [t, t2] }
assign:
  - { target: t3, indices: [i, k], source: p }
root: t3
";

  #[test]
  fn test_build_index_notation() {
    let file = GraphFile::parse(INDEX_NOTATION).unwrap();
    let cx = Graph::new();
    let built = file.build(&cx).unwrap();
    assert_eq!(built.root.op().unwrap(), Op::Contract);
    assert_eq!(built.root.dims().unwrap(), dims(["i", "k"]).unwrap());

    let program = built.root.compile().unwrap();
    let names: Vec<_> = program
      .params
      .iter()
      .map(|p| built.name_of(p.node).unwrap())
      .collect();
    assert_eq!(names, vec!["t", "t2"]);
  }

  fn input(shape: &[usize], data: &[f64]) -> Input {
    Input {
      shape: shape.to_vec(),
      data: data.to_vec(),
    }
  }

  #[test]
  fn test_bind_inputs_by_name() {
    let file = GraphFile::parse(INDEX_NOTATION).unwrap();
    let cx = Graph::new();
    let built = file.build(&cx).unwrap();
    let program = built.root.compile().unwrap();

    let inputs: HashMap<String, Input> = serde_json::from_str(
      r#"{
        "t2": { "shape": [2, 1], "data": [3.0, 4.0] },
        "t":  { "shape": [1, 2], "data": [1.0, 2.0] },
        "t3": { "shape": [1, 1], "data": [0.0] }
      }"#,
    )
    .unwrap();
    let args = built.bind_inputs(&program.params, inputs).unwrap();
    assert_eq!(args.len(), 2);
    assert_eq!(args[0].shape(), &[1, 2]);
    assert_eq!(args[1].shape(), &[2, 1]);

    let kernel = tensorexpr::materialize(program, tensorexpr::NdArray::<f64>::new()).unwrap();
    let out = kernel.call(&args).unwrap();
    assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![11.0]);
  }

  #[test]
  fn test_bind_inputs_errors() {
    let file = GraphFile::parse(INDEX_NOTATION).unwrap();
    let cx = Graph::new();
    let built = file.build(&cx).unwrap();
    let program = built.root.compile().unwrap();

    let missing = HashMap::from([("t".to_string(), input(&[1, 2], &[1.0, 2.0]))]);
    let err = built.bind_inputs(&program.params, missing).err().unwrap();
    assert!(err.to_string().contains("`t2`"));

    let bad_shape = HashMap::from([
      ("t".to_string(), input(&[2, 2], &[1.0, 2.0])),
      ("t2".to_string(), input(&[2, 1], &[3.0, 4.0])),
    ]);
    assert!(built.bind_inputs(&program.params, bad_shape).is_err());
  }

  #[test]
  fn test_build_errors() {
    let cx = Graph::new();
    let unknown = GraphFile::parse("tensors:\n  - { name: a, mul: [x, y] }\nroot: a\n").unwrap();
    assert!(unknown.build(&cx).is_err());

    let dup = GraphFile::parse("tensors:\n  - { name: a, load: [i, i] }\nroot: a\n").unwrap();
    let err = dup.build(&cx).err().unwrap();
    assert!(err.to_string().contains("more than once"));

    let twice = GraphFile::parse("tensors:\n  - { name: a, load: [i] }\n  - { name: a, load: [j] }\nroot: a\n").unwrap();
    assert!(twice.build(&cx).is_err());

    assert!(GraphFile::parse("tensors:\n  - { name: a, load: [''] }\nroot: a\n").is_err());
  }
}
