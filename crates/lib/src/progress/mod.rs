//! Build progress reporting.
//!
//! The backend emits an ordered stream of [`SolveStatus`] events while a
//! build runs. [`report`] drains that stream into a [`ProgressDisplay`] and,
//! once the stream closes, hands the display every warning seen.

pub mod display;

use std::collections::HashSet;
use std::io;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

pub use display::{ConsoleDisplay, ProgressDisplay};

/// One batch of status updates from the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveStatus {
  #[serde(default)]
  pub vertexes: Vec<Vertex>,
  #[serde(default)]
  pub statuses: Vec<VertexStatus>,
  #[serde(default)]
  pub logs: Vec<VertexLog>,
  #[serde(default)]
  pub warnings: Vec<VertexWarning>,
}

/// A build graph node and its state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
  pub digest: String,
  pub name: String,
  #[serde(default)]
  pub started: bool,
  #[serde(default)]
  pub completed: bool,
  #[serde(default)]
  pub cached: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Progress of a sub-task of a vertex (e.g. a layer download).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexStatus {
  pub vertex: String,
  pub id: String,
  #[serde(default)]
  pub current: u64,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub completed: bool,
}

/// Output captured from a vertex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexLog {
  pub vertex: String,
  /// 1 for stdout, 2 for stderr.
  #[serde(default)]
  pub stream: u8,
  pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexWarning {
  pub vertex: String,
  pub short: String,
  #[serde(default)]
  pub detail: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

/// Render every event until the stream closes, then emit collected warnings.
///
/// An empty stream is not an error. Any display failure aborts reporting.
pub async fn report<D>(mut events: UnboundedReceiver<SolveStatus>, display: &mut D) -> io::Result<()>
where
  D: ProgressDisplay + ?Sized,
{
  let mut warnings: Vec<VertexWarning> = Vec::new();
  let mut seen: HashSet<(String, String)> = HashSet::new();
  let mut count = 0usize;

  while let Some(status) = events.recv().await {
    count += 1;
    display.update(&status)?;

    for warning in status.warnings {
      if seen.insert((warning.vertex.clone(), warning.short.clone())) {
        warnings.push(warning);
      }
    }
  }

  debug!(events = count, warnings = warnings.len(), "status stream closed");
  display.finish(&warnings)
}
