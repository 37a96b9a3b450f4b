mod app_config;
mod graph_file;

use app_config::AppConfig;
use graph_file::{GraphFile, Input};
use tensorexpr::{materialize, utils, Dimension, Graph, NdArray};

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{collections::HashMap, error::Error, path::PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
  /// YAML file with default settings
  #[arg(long, value_name = "PATH", global = true)]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Compile an expression graph and print the program
  Compile {
    /// YAML file describing the expression graph
    #[arg(short, long, value_name = "PATH")]
    graph: PathBuf,
    /// Also write program.json and graph.dot into this directory
    #[arg(short, long, value_name = "DIR")]
    artifacts: Option<PathBuf>,
    #[arg(long)]
    no_memoize: bool,
  },
  /// Compile an expression graph and evaluate it on the given inputs
  Run {
    #[arg(short, long, value_name = "PATH")]
    graph: PathBuf,
    /// JSON object mapping load tensor names to `{shape, data}`
    #[arg(short, long, value_name = "PATH")]
    inputs: PathBuf,
    #[arg(long)]
    no_memoize: bool,
  },
}

#[derive(Debug, Serialize)]
struct Output {
  dims: Vec<Dimension>,
  shape: Vec<usize>,
  data: Vec<f64>,
}

fn settings(config: Option<PathBuf>, flags: AppConfig) -> Result<AppConfig, Box<dyn Error>> {
  let file = match config {
    Some(path) => AppConfig::load(&path)?,
    None => AppConfig::default(),
  };
  Ok(AppConfig::default().merge(file).merge(flags))
}

fn compile_cmd(graph: PathBuf, settings: AppConfig) -> Result<(), Box<dyn Error>> {
  let file = GraphFile::load(&graph)?;
  let cx = Graph::new();
  let built = file.build(&cx)?;
  let program = built.root.compile_with(&settings.compile_config())?;
  println!("{}", program);

  if let Some(dir) = settings.artifacts {
    std::fs::create_dir_all(&dir)?;
    utils::serialize_to_file(&dir.join("program.json"), &program)?;
    utils::save_graphviz(&dir.join("graph.dot"), &cx)?;
    info!("artifacts written to {}", dir.display());
  }
  Ok(())
}

fn run_cmd(graph: PathBuf, inputs: PathBuf, settings: AppConfig) -> Result<(), Box<dyn Error>> {
  let file = GraphFile::load(&graph)?;
  let cx = Graph::new();
  let built = file.build(&cx)?;
  let program = built.root.compile_with(&settings.compile_config())?;

  let inputs: HashMap<String, Input> = utils::deserialize_from_file(&inputs)?;
  let args = built.bind_inputs(&program.params, inputs)?;

  let kernel = materialize(program, NdArray::<f64>::new())?;
  let result = kernel.call(&args)?;
  let output = Output {
    dims: kernel.output_dims().to_vec(),
    shape: result.shape().to_vec(),
    data: result.iter().copied().collect(),
  };
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
  utils::init_logging()?;
  let args = Cli::parse();

  match args.command {
    Command::Compile {
      graph,
      artifacts,
      no_memoize,
    } => {
      let flags = AppConfig {
        memoize: no_memoize.then_some(false),
        artifacts,
      };
      compile_cmd(graph, settings(args.config, flags)?)?;
    }
    Command::Run {
      graph,
      inputs,
      no_memoize,
    } => {
      let flags = AppConfig {
        memoize: no_memoize.then_some(false),
        artifacts: None,
      };
      run_cmd(graph, inputs, settings(args.config, flags)?)?;
    }
  }
  Ok(())
}
