use std::{convert::TryFrom, fmt};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named axis label. Axes of different tensors are aligned by comparing labels, never by position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dimension {
  name: String,
}

impl Dimension {
  pub fn new(name: impl Into<String>) -> Result<Self> {
    let name = name.into();
    if name.is_empty() {
      return Err(Error::InvalidDimension);
    }
    Ok(Dimension { name })
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl fmt::Display for Dimension {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

impl TryFrom<String> for Dimension {
  type Error = Error;

  fn try_from(name: String) -> Result<Self> {
    Dimension::new(name)
  }
}

impl From<Dimension> for String {
  fn from(dim: Dimension) -> Self {
    dim.name
  }
}

/// Creates one dimension per name, failing on the first empty one.
pub fn dims<I, S>(names: I) -> Result<Vec<Dimension>>
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  names.into_iter().map(Dimension::new).collect()
}
