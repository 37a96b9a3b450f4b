//!
//! Function materialization: bind a compiled `Program` to a backend and call it.
//!

use std::collections::HashMap;

use tracing::{debug, instrument, trace};

use crate::{
  backend::Backend,
  dim::Dimension,
  error::{Error, Result},
  program::{Instr, Program, ValueRef},
};

/// A compiled program bound to a backend. Holds no mutable state: every call starts from its
/// arguments alone, so a kernel can be called repeatedly and from several threads at once.
#[derive(Debug, Clone)]
pub struct Kernel<B> {
  program: Program,
  backend: B,
}

pub fn materialize<B: Backend>(program: Program, backend: B) -> Result<Kernel<B>> {
  program.validate()?;
  Ok(Kernel { program, backend })
}

impl<B: Backend> Kernel<B> {
  pub fn program(&self) -> &Program {
    &self.program
  }

  pub fn arity(&self) -> usize {
    self.program.arity()
  }

  /// Axes of the returned array.
  pub fn output_dims(&self) -> &[Dimension] {
    &self.program.output_dims
  }

  /// Runs the program with `args` bound to its parameters in order.
  #[instrument(level = "debug", skip_all, fields(arity = self.arity()))]
  pub fn call(&self, args: &[B::Array]) -> Result<B::Array> {
    if args.len() != self.arity() {
      return Err(Error::ArityMismatch {
        expected: self.arity(),
        found: args.len(),
      });
    }
    self.check_extents(args)?;

    let mut values: Vec<B::Array> = Vec::with_capacity(self.program.instrs.len());
    for instr in &self.program.instrs {
      let out = match instr {
        Instr::Contract {
          left,
          right,
          axes_left,
          axes_right,
          ..
        } => {
          let l = lookup(args, &values, *left)?;
          let r = lookup(args, &values, *right)?;
          self.backend.contract(l, r, axes_left, axes_right)?
        }
        Instr::Permute { source, axes, .. } => {
          self.backend.permute(lookup(args, &values, *source)?, axes)?
        }
      };
      trace!("{} -> {:?}", instr.name(), self.backend.shape(&out));
      values.push(out);
    }

    let result = lookup(args, &values, self.program.output)?.clone();
    debug!("result shape {:?}", self.backend.shape(&result));
    Ok(result)
  }

  fn check_extents(&self, args: &[B::Array]) -> Result<()> {
    let mut extents: HashMap<&Dimension, usize> = HashMap::new();
    for (param, arg) in self.program.params.iter().zip(args) {
      let shape = self.backend.shape(arg);
      if shape.len() != param.dims.len() {
        return Err(Error::RankMismatch {
          param: param.name.clone(),
          expected: param.dims.len(),
          found: shape.len(),
        });
      }
      for (dim, &extent) in param.dims.iter().zip(shape) {
        let expected = *extents.entry(dim).or_insert(extent);
        if expected != extent {
          return Err(Error::ExtentMismatch {
            dim: dim.clone(),
            expected,
            found: extent,
          });
        }
      }
    }
    Ok(())
  }
}

fn lookup<'a, T>(args: &'a [T], values: &'a [T], v: ValueRef) -> Result<&'a T> {
  match v {
    ValueRef::Param(n) => args.get(n),
    ValueRef::Instr(n) => values.get(n),
  }
  .ok_or_else(|| Error::MalformedProgram(format!("undefined value {:?}", v)))
}
