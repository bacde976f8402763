//! Build backend interface.
//!
//! The backend executes content-addressed build graphs. Sessions talk to it
//! through three layers:
//! - [`Backend`]: the connection handle (worker listing, starting a build)
//! - [`Gateway`]: the build-scoped handle a build function receives
//! - [`Container`] / [`Process`]: interactive containers started through a gateway
//!
//! [`http::HttpBackend`] is the network implementation.

pub mod http;
pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::progress::SolveStatus;
use crate::secrets::SecretSource;

pub use http::HttpBackend;
pub use types::*;

/// Boxed error crossing the build-function boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a build function.
pub type BuildFuture = BoxFuture<'static, Result<SolveResult, BoxError>>;

/// Client-side build function, run once the backend has opened the build.
pub type BuildFn = Box<dyn FnOnce(Arc<dyn Gateway>) -> BuildFuture + Send>;

/// Errors reported by a backend or its gateway.
#[derive(Debug, Error)]
pub enum BackendError {
  /// The backend could not be reached.
  #[error("failed to connect to backend at {addr}: {message}")]
  Connect { addr: String, message: String },

  /// The backend address is not a usable URL.
  #[error("invalid backend address '{0}'")]
  InvalidAddress(String),

  /// Transport-level request failure.
  #[error("backend request failed: {0}")]
  Request(#[from] reqwest::Error),

  /// The backend answered with a non-success status.
  #[error("backend returned {status}: {message}")]
  Status { status: u16, message: String },

  /// A backend message could not be decoded.
  #[error("malformed backend message: {0}")]
  Decode(#[from] serde_json::Error),

  /// A solve result was expected to carry exactly one reference.
  #[error("solve result has no single reference")]
  NoSingleRef,

  /// A container process exited unsuccessfully.
  #[error("process exited with code {0}")]
  ProcessExit(i32),

  /// Process stream I/O failed.
  #[error("process i/o failed: {0}")]
  Io(#[from] std::io::Error),

  /// The client-side build function failed.
  #[error("build function failed: {0}")]
  BuildFunction(#[source] BoxError),

  /// The build was cancelled and the backend asked to abort it.
  #[error("build cancelled")]
  Cancelled,
}

/// Options a build is started with.
#[derive(Clone)]
pub struct BuildOptions {
  /// Where the build result is exported to.
  pub exports: Vec<ExportEntry>,

  /// Local directory name -> host path, made available for `Definition::Local`.
  pub local_dirs: BTreeMap<String, PathBuf>,

  /// Session-scoped secret material, keyed by hash.
  pub secrets: Arc<dyn SecretSource>,

  /// Fires when the session is torn down. The backend must abort the build
  /// and return [`BackendError::Cancelled`].
  pub cancel: CancellationToken,
}

/// Connection to a build backend.
#[async_trait]
pub trait Backend: Send + Sync {
  /// List the backend's active workers.
  async fn list_workers(&self) -> Result<Vec<WorkerInfo>, BackendError>;

  /// Start a build and run `build_fn` inside it.
  ///
  /// Status events are sent on `status` in the order the backend emits them.
  /// The sender is dropped when the build ends, closing the stream. Every
  /// exit other than a successful finish aborts the build on the backend,
  /// including `options.cancel` firing and the returned future being dropped.
  async fn build(
    &self,
    options: BuildOptions,
    build_fn: BuildFn,
    status: UnboundedSender<SolveStatus>,
  ) -> Result<SolveResult, BackendError>;
}

/// Build-scoped access to the backend's build graph evaluator.
///
/// References produced here are only meaningful within the build that
/// issued the gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
  /// Obtain a filesystem reference for a definition without solving it.
  async fn reference(&self, definition: &Definition) -> Result<FsId, BackendError>;

  async fn solve(&self, request: SolveRequest) -> Result<SolveResult, BackendError>;

  async fn new_container(&self, request: NewContainerRequest) -> Result<Box<dyn Container>, BackendError>;
}

/// A backend-managed container.
#[async_trait]
pub trait Container: Send + Sync {
  /// Start a process with its standard streams wired to `io`.
  async fn start(&self, request: StartRequest, io: ProcessIo) -> Result<Box<dyn Process>, BackendError>;

  async fn release(&self) -> Result<(), BackendError>;
}

/// A process running in a [`Container`].
#[async_trait]
pub trait Process: Send {
  /// Wait for the process to exit. A non-zero exit is an error.
  async fn wait(self: Box<Self>) -> Result<(), BackendError>;
}

/// Local streams connected to a container process.
pub struct ProcessIo {
  pub stdin: Box<dyn AsyncRead + Send + Unpin>,
  pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
  pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ProcessIo {
  /// The standard streams of this process.
  pub fn stdio() -> Self {
    Self {
      stdin: Box::new(tokio::io::stdin()),
      stdout: Box::new(tokio::io::stdout()),
      stderr: Box::new(tokio::io::stderr()),
    }
  }
}
