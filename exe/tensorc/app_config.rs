use std::{error::Error, path::Path, path::PathBuf};

use serde::Deserialize;
use tensorexpr::CompileConfig;

/// AppConfig - settings that can come from a config file or the command line.
/// Also defines the config file format (Option fields can be omitted).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
  /// Share lowered contractions between parents
  pub memoize: Option<bool>,
  /// Directory to save the compiled program and the expression graph into
  pub artifacts: Option<PathBuf>,
}

impl AppConfig {
  pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&text)?)
  }

  // merge configs where the second overwrites the first
  pub fn merge(self, other: Self) -> Self {
    Self {
      memoize: other.memoize.or(self.memoize),
      artifacts: other.artifacts.or(self.artifacts),
    }
  }

  pub fn compile_config(&self) -> CompileConfig {
    let default = CompileConfig::default();
    CompileConfig {
      memoize: self.memoize.unwrap_or(default.memoize),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_merge_prefers_later() {
    let file: AppConfig = serde_yaml::from_str("memoize: false\nartifacts: out\n").unwrap();
    let flags = AppConfig {
      memoize: Some(true),
      artifacts: None,
    };
    let merged = AppConfig::default().merge(file).merge(flags);
    assert_eq!(merged.memoize, Some(true));
    assert_eq!(merged.artifacts, Some(PathBuf::from("out")));
    assert!(merged.compile_config().memoize);
  }

  #[test]
  fn test_defaults() {
    let empty: AppConfig = serde_yaml::from_str("{}").unwrap();
    assert_eq!(empty.compile_config(), CompileConfig::default());
    assert!(serde_yaml::from_str::<AppConfig>("memoise: true").is_err());
  }
}
