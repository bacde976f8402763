//! Values exchanged with a build backend.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;

use super::BackendError;

/// Opaque backend-issued reference to a filesystem in the build graph.
///
/// An empty id designates no filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FsId(pub String);

impl FsId {
  pub fn new(id: impl Into<String>) -> Self {
    FsId(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for FsId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Handle to a solved result held by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(pub String);

impl fmt::Display for ResultRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A build graph node the backend can reference or solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Definition {
  /// A local directory declared for the build.
  Local { name: String },
  /// A container image.
  Image { reference: String, platform: Platform },
  /// A filesystem previously referenced in this build.
  Filesystem { id: FsId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveRequest {
  pub definition: Definition,
  /// Force evaluation even when the result is not otherwise needed.
  #[serde(default)]
  pub evaluate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveResult {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reference: Option<ResultRef>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub metadata: BTreeMap<String, String>,
}

impl SolveResult {
  /// A result carrying no output.
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn with_ref(reference: ResultRef) -> Self {
    Self {
      reference: Some(reference),
      metadata: BTreeMap::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.reference.is_none() && self.metadata.is_empty()
  }

  pub fn single_ref(&self) -> Result<&ResultRef, BackendError> {
    self.reference.as_ref().ok_or(BackendError::NoSingleRef)
  }
}

/// Where a build's result is exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
  /// Exporter type, e.g. `local`, `tar`, `image`.
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub attrs: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid export '{0}': expected TYPE[:DEST]")]
pub struct ParseExportError(pub String);

impl FromStr for ExportEntry {
  type Err = ParseExportError;

  /// Parses `TYPE[:DEST]`, e.g. `local:./out` or `image:registry/app:latest`.
  ///
  /// For `image` the destination becomes the `name` attribute; otherwise it
  /// is the output directory.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (kind, dest) = match s.split_once(':') {
      Some((kind, dest)) => (kind, Some(dest)),
      None => (s, None),
    };
    if kind.is_empty() || dest.is_some_and(str::is_empty) {
      return Err(ParseExportError(s.to_string()));
    }

    let mut entry = ExportEntry {
      kind: kind.to_string(),
      attrs: BTreeMap::new(),
      output_dir: None,
    };
    match (kind, dest) {
      ("image", Some(name)) => {
        entry.attrs.insert("name".to_string(), name.to_string());
      }
      (_, Some(dir)) => entry.output_dir = Some(PathBuf::from(dir)),
      (_, None) => {}
    }
    Ok(entry)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
  pub id: String,
  #[serde(default)]
  pub labels: BTreeMap<String, String>,
  #[serde(default)]
  pub platforms: Vec<Platform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
  Bind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
  pub dest: String,
  pub reference: ResultRef,
  pub kind: MountKind,
  #[serde(default)]
  pub readonly: bool,
}

impl Mount {
  pub fn bind(dest: impl Into<String>, reference: ResultRef) -> Self {
    Self {
      dest: dest.into(),
      reference,
      kind: MountKind::Bind,
      readonly: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContainerRequest {
  pub mounts: Vec<Mount>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform: Option<Platform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
  pub args: Vec<String>,
  pub cwd: String,
  #[serde(default)]
  pub tty: bool,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub env: Vec<String>,
}
