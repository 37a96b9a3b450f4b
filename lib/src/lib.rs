pub mod axes;
pub mod backend;
pub mod compile;
pub mod dim;
pub mod error;
pub mod expr;
pub mod materialize;
pub mod program;
pub mod utils;

use serde::{Deserialize, Serialize};

pub use backend::{Backend, NdArray};
pub use dim::{dims, Dimension};
pub use error::{Error, Result};
pub use expr::{Graph, Op, Tensor};
pub use materialize::{materialize, Kernel};
pub use program::{Instr, Param, Program, ValueRef};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
  /// Share the lowering of a contraction reached from several parents. When off, each occurrence
  /// is lowered again and emitted as its own instruction; loads are shared either way.
  pub memoize: bool,
}

impl Default for CompileConfig {
  fn default() -> Self {
    Self { memoize: true }
  }
}
