use serde::{de::DeserializeOwned, Serialize};
use std::{error::Error, fs::File, io::Write, path::Path};

#[cfg(not(debug_assertions))]
use human_panic::setup_panic;
use tracing::subscriber::{DefaultGuard, SetGlobalDefaultError};

#[cfg(debug_assertions)]
extern crate better_panic;

use petgraph::dot::Dot;
use tracing_subscriber::EnvFilter;

use crate::expr::Graph;

// [NOTE] tracing
//
// Compilation opens a `compile` span per call and logs one `debug!` event per emitted
// instruction; kernel calls open a `call` span. Set RUST_LOG=tensorexpr=debug to see them.

fn subscriber() -> impl tracing::Subscriber + Send + Sync {
  tracing_subscriber::fmt()
    .compact()
    .with_env_filter(EnvFilter::from_default_env())
    .finish()
}

pub fn install_logger() -> Result<(), SetGlobalDefaultError> {
  tracing::subscriber::set_global_default(subscriber())
}

pub fn init_logging() -> Result<(), SetGlobalDefaultError> {
  // Human Panic. Only enabled when *not* debugging.
  #[cfg(not(debug_assertions))]
  {
    setup_panic!();
  }

  // Better Panic. Only enabled *when* debugging.
  #[cfg(debug_assertions)]
  {
    better_panic::Settings::debug()
      .most_recent_first(false)
      .lineno_suffix(true)
      .verbosity(better_panic::Verbosity::Full)
      .install();
  }

  install_logger()?;

  Ok(())
}

/// Subscriber scoped to the current thread, so every test can install its own.
pub fn init_logging_tests() -> DefaultGuard {
  tracing::subscriber::set_default(
    tracing_subscriber::fmt()
      .compact()
      .with_test_writer()
      .with_env_filter(EnvFilter::from_default_env())
      .finish(),
  )
}

pub fn serialize_to_file<T: Serialize>(path: &Path, obj: &T) -> Result<(), Box<dyn Error>> {
  let buff = serde_json::to_string_pretty(obj)?;
  std::fs::write(path, buff)?;
  Ok(())
}

pub fn deserialize_from_file<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn Error>> {
  let buff = std::fs::read_to_string(path)?;
  Ok(serde_json::from_str(&buff)?)
}

/// Writes the expression DAG in Graphviz dot format.
pub fn save_graphviz(path: &Path, graph: &Graph) -> Result<(), Box<dyn Error>> {
  let g = graph.graph.borrow();
  let dot = Dot::with_config(&*g, &[]);
  let mut file = File::create(path)?;
  write!(file, "{}", dot)?;
  Ok(())
}
