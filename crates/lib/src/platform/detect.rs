//! Platform selection from the backend's worker list.

use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{Backend, BackendError};

use super::Platform;

#[derive(Debug, Error)]
pub enum PlatformError {
  #[error("error detecting platform: {0}")]
  ListWorkers(#[source] BackendError),
}

/// Pick the platform a session builds for.
///
/// Returns the first platform of the first worker the backend reports. When
/// there are no workers, or the first worker advertises no platforms, the
/// host's default platform is used instead. This never fails on an empty
/// worker list; only a failed worker query is an error.
pub async fn detect(backend: &dyn Backend) -> Result<Platform, PlatformError> {
  let workers = backend.list_workers().await.map_err(PlatformError::ListWorkers)?;
  debug!(workers = workers.len(), "listed backend workers");

  if let Some(platform) = workers.first().and_then(|w| w.platforms.first()) {
    info!(platform = %platform, "using worker platform");
    return Ok(platform.clone());
  }

  let platform = Platform::host_default();
  info!(platform = %platform, "backend reported no platforms, using host default");
  Ok(platform)
}
