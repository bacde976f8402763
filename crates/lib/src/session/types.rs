//! Types shared between the session controller and build functions.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, RouterError};
use crate::backend::{BackendError, BoxError, FsId, Gateway};
use crate::inputs::{LocalDirs, ResolveError};
use crate::platform::{Platform, PlatformError};
use crate::secrets::SecretKey;

/// Everything a build function can see of its session.
///
/// References in `local_dirs`, and any the function obtains through `api` or
/// `gateway`, are only valid inside this session's build.
#[derive(Clone)]
pub struct BuildContext {
  /// Resolved local directories, by identifier.
  pub local_dirs: Arc<LocalDirs>,
  /// Secret identifier -> hash key. Plaintext is never exposed here.
  pub secrets: Arc<BTreeMap<String, SecretKey>>,
  pub platform: Platform,
  /// Client for the session's embedded API.
  pub api: ApiClient,
  pub gateway: Arc<dyn Gateway>,
  /// Fires when the session is being torn down.
  pub cancel: CancellationToken,
}

/// User-supplied build step run inside the session.
///
/// Returns the filesystem to solve as the session's output, or `None` (or
/// an empty [`FsId`]) for no output.
#[async_trait]
pub trait BuildFunction: Send + Sync {
  async fn call(&self, ctx: BuildContext) -> Result<Option<FsId>, BoxError>;
}

#[async_trait]
impl<F, Fut> BuildFunction for F
where
  F: Fn(BuildContext) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Option<FsId>, BoxError>> + Send + 'static,
{
  async fn call(&self, ctx: BuildContext) -> Result<Option<FsId>, BoxError> {
    (self)(ctx).await
  }
}

/// Session failure, tagged with the phase that failed.
#[derive(Debug, Error)]
pub enum SessionError {
  #[error("failed to connect to backend: {0}")]
  Connect(#[source] BackendError),

  #[error(transparent)]
  Platform(#[from] PlatformError),

  #[error("failed to set up api router: {0}")]
  Router(#[from] RouterError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error("build function failed: {0}")]
  Callback(#[source] BoxError),

  #[error("failed to solve output filesystem {fs}: {source}")]
  Submit {
    fs: FsId,
    #[source]
    source: BackendError,
  },

  #[error("build failed: {0}")]
  Solve(#[source] BackendError),

  #[error("failed to render progress: {0}")]
  Progress(#[source] io::Error),

  #[error("dev server on port {port} failed: {source}")]
  DevServer {
    port: u16,
    #[source]
    source: io::Error,
  },

  #[error("session task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  #[error("session cancelled")]
  Cancelled,
}

impl SessionError {
  /// Map a backend build failure back to the session error that caused it.
  ///
  /// Errors raised inside the build function travel through the backend
  /// boxed; they are unwrapped here so callers see the original phase.
  pub(crate) fn from_build(error: BackendError) -> Self {
    match error {
      BackendError::BuildFunction(inner) => match inner.downcast::<SessionError>() {
        Ok(session) => *session,
        Err(other) => SessionError::Callback(other),
      },
      BackendError::Cancelled => SessionError::Cancelled,
      other => SessionError::Solve(other),
    }
  }
}
