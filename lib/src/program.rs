//!
//! Closed intermediate representation produced by the compiler.
//!
//! A program is a straight-line list of instructions over two kinds of values: parameters
//! (the loads, in call order) and results of earlier instructions. Every reference points
//! backwards, so the list is already in evaluation order.
//!

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
  axes,
  dim::Dimension,
  error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueRef {
  Param(usize),
  Instr(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
  pub name: String,
  pub dims: Vec<Dimension>,
  /// Index of the load node this parameter was allocated for.
  pub node: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Instr {
  Contract {
    name: String,
    left: ValueRef,
    right: ValueRef,
    axes_left: Vec<usize>,
    axes_right: Vec<usize>,
  },
  Permute {
    name: String,
    source: ValueRef,
    axes: Vec<usize>,
  },
}

impl Instr {
  pub fn name(&self) -> &str {
    match self {
      Instr::Contract { name, .. } | Instr::Permute { name, .. } => name,
    }
  }

  pub fn inputs(&self) -> Vec<ValueRef> {
    match self {
      Instr::Contract { left, right, .. } => vec![*left, *right],
      Instr::Permute { source, .. } => vec![*source],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
  pub params: Vec<Param>,
  pub instrs: Vec<Instr>,
  pub output: ValueRef,
  pub output_dims: Vec<Dimension>,
}

impl Program {
  /// Parameter names in call order.
  pub fn params(&self) -> Vec<&str> {
    self.params.iter().map(|p| p.name.as_str()).collect()
  }

  pub fn arity(&self) -> usize {
    self.params.len()
  }

  pub fn value_name(&self, value: ValueRef) -> Option<&str> {
    match value {
      ValueRef::Param(n) => self.params.get(n).map(|p| p.name.as_str()),
      ValueRef::Instr(n) => self.instrs.get(n).map(Instr::name),
    }
  }

  /// Dimensions of the value, in axis order.
  pub fn value_dims(&self, value: ValueRef) -> Result<Vec<Dimension>> {
    match value {
      ValueRef::Param(_) => self.dims_in(&[], value).map(<[Dimension]>::to_vec),
      ValueRef::Instr(n) => {
        if n >= self.instrs.len() {
          return Err(Error::MalformedProgram(format!("no instruction {}", n)));
        }
        let mut table = self.dims_table(n + 1)?;
        Ok(table.swap_remove(n))
      }
    }
  }

  /// Looks `value` up among the parameters and the already computed instruction dims `table`.
  fn dims_in<'a>(&'a self, table: &'a [Vec<Dimension>], value: ValueRef) -> Result<&'a [Dimension]> {
    match value {
      ValueRef::Param(n) => self.params.get(n).map(|p| p.dims.as_slice()),
      ValueRef::Instr(n) => table.get(n).map(Vec::as_slice),
    }
    .ok_or_else(|| Error::MalformedProgram(format!("reads undefined value {:?}", value)))
  }

  /// Result dims of the first `count` instructions, checking each one on the way. References
  /// only point backwards, so one forward pass sees every input before its reader.
  fn dims_table(&self, count: usize) -> Result<Vec<Vec<Dimension>>> {
    let malformed = |msg: String| Err(Error::MalformedProgram(msg));
    let mut table: Vec<Vec<Dimension>> = Vec::with_capacity(count);
    for instr in self.instrs.iter().take(count) {
      let dims: Vec<Dimension> = match instr {
        Instr::Contract {
          left,
          right,
          axes_left,
          axes_right,
          name,
        } => {
          if axes_left.len() != axes_right.len() {
            return malformed(format!("`{}` pairs {} axes with {}", name, axes_left.len(), axes_right.len()));
          }
          let l = self.dims_in(&table, *left)?;
          let r = self.dims_in(&table, *right)?;
          for (a, b) in axes_left.iter().zip(axes_right) {
            match (l.get(*a), r.get(*b)) {
              (Some(da), Some(db)) if da == db => {}
              _ => return malformed(format!("`{}` contracts mismatched axes {} and {}", name, a, b)),
            }
          }
          l.iter()
            .enumerate()
            .filter(|(a, _)| !axes_left.contains(a))
            .chain(r.iter().enumerate().filter(|(a, _)| !axes_right.contains(a)))
            .map(|(_, d)| d.clone())
            .collect()
        }
        Instr::Permute { source, axes, name } => {
          let s = self.dims_in(&table, *source)?;
          if axes.len() != s.len() || !axes.iter().sorted().copied().eq(0..s.len()) {
            return malformed(format!("`{}` is not a permutation of {} axes", name, s.len()));
          }
          axes.iter().map(|a| s[*a].clone()).collect()
        }
      };
      table.push(dims);
    }
    Ok(table)
  }

  /// Checks that every reference points backwards, names are unique, and axis lists are
  /// consistent with the dims they index.
  pub fn validate(&self) -> Result<()> {
    let names = self
      .params()
      .into_iter()
      .chain(self.instrs.iter().map(Instr::name));
    if let Some(dup) = names.duplicates().next() {
      return Err(Error::MalformedProgram(format!("name `{}` defined twice", dup)));
    }

    let table = self.dims_table(self.instrs.len())?;
    if self.dims_in(&table, self.output)? != self.output_dims.as_slice() {
      return Err(Error::MalformedProgram(
        "output dims do not match the returned value".to_string(),
      ));
    }
    Ok(())
  }

  /// The rendered function body, one statement per line.
  pub fn body(&self) -> String {
    let mut lines: Vec<String> = self
      .instrs
      .iter()
      .map(|instr| match instr {
        Instr::Contract {
          name,
          left,
          right,
          axes_left,
          axes_right,
        } => format!(
          "{} = contract({}, {}, [{}], [{}])",
          name,
          self.value_name(*left).unwrap_or("?"),
          self.value_name(*right).unwrap_or("?"),
          axes_left.iter().join(", "),
          axes_right.iter().join(", ")
        ),
        Instr::Permute { name, source, axes } => format!(
          "{} = permute({}, [{}])",
          name,
          self.value_name(*source).unwrap_or("?"),
          axes.iter().join(", ")
        ),
      })
      .collect();
    lines.push(format!("return {}", self.value_name(self.output).unwrap_or("?")));
    lines.join("\n")
  }
}

impl fmt::Display for Program {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "fn({}) -> [{}] {{",
      self.params().join(", "),
      axes::render(&self.output_dims)
    )?;
    for line in self.body().lines() {
      writeln!(f, "  {}", line)?;
    }
    write!(f, "}}")
  }
}
