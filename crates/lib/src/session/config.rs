//! Session configuration.
//!
//! A [`SessionConfig`] is assembled by the caller before a session starts and
//! is not modified afterwards. It can be read from a JSON file:
//!
//! ```json
//! {
//!   "export": { "type": "local", "output_dir": "./out" },
//!   "local_dirs": { "src": "/home/me/project" },
//!   "secrets": { "token": "abc123" },
//!   "dev_server": 8080
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ExportEntry;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read session config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid session config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
  /// Where the build result is exported.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub export: Option<ExportEntry>,

  /// Local directory identifier -> host path.
  #[serde(default)]
  pub local_dirs: BTreeMap<String, PathBuf>,

  /// Secret identifier -> plaintext.
  #[serde(default)]
  pub secrets: BTreeMap<String, String>,

  /// Serve the embedded API on this TCP port for the rest of the session.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dev_server: Option<u16>,
}

impl SessionConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// The dev server port, if one is enabled. Port 0 means disabled.
  pub fn dev_server_port(&self) -> Option<u16> {
    self.dev_server.filter(|port| *port != 0)
  }
}

impl fmt::Debug for SessionConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let secrets: Vec<&str> = self.secrets.keys().map(String::as_str).collect();
    f.debug_struct("SessionConfig")
      .field("export", &self.export)
      .field("local_dirs", &self.local_dirs)
      .field("secrets", &secrets)
      .field("dev_server", &self.dev_server)
      .finish()
  }
}
