//! Build platforms.
//!
//! A [`Platform`] is an OS/architecture pair (with an optional CPU variant)
//! in the form backends report for their workers, e.g. `linux/amd64` or
//! `linux/arm/v7`.

pub mod arch;
pub mod detect;
pub mod os;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use detect::{PlatformError, detect};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
  pub os: String,
  pub architecture: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variant: Option<String>,
}

impl Platform {
  pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
    Self {
      os: os.into(),
      architecture: architecture.into(),
      variant: None,
    }
  }

  pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
    self.variant = Some(variant.into());
    self
  }

  /// The platform of the machine running this process.
  pub fn host_default() -> Self {
    let (architecture, variant) = arch::host();
    Self {
      os: os::host().to_string(),
      architecture: architecture.to_string(),
      variant: variant.map(str::to_string),
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.variant {
      Some(variant) => write!(f, "{}/{}/{}", self.os, self.architecture, variant),
      None => write!(f, "{}/{}", self.os, self.architecture),
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid platform '{0}': expected os/arch[/variant]")]
pub struct ParsePlatformError(pub String);

impl FromStr for Platform {
  type Err = ParsePlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts: Vec<&str> = s.split('/').collect();
    match parts.as_slice() {
      [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Platform::new(*os, *arch)),
      [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
        Ok(Platform::new(*os, *arch).with_variant(*variant))
      }
      _ => Err(ParsePlatformError(s.to_string())),
    }
  }
}
