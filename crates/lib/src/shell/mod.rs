//! Interactive shell attachment.
//!
//! Mounts a filesystem produced inside a build at `/output` on top of a
//! minimal base image and runs an interactive `/bin/sh` in it, with the local
//! terminal in raw mode for the lifetime of the process.

pub mod terminal;

use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{
  BackendError, Container, Definition, FsId, Gateway, Mount, NewContainerRequest, ProcessIo, ResultRef,
  SolveRequest, StartRequest,
};
use crate::consts::{SHELL_BASE_IMAGE, SHELL_COMMAND, SHELL_MOUNT_POINT};
use crate::platform::Platform;

pub use terminal::{CrosstermTerminal, RawModeGuard, RawTerminal};

#[derive(Debug, Error)]
pub enum ShellError {
  #[error("failed to solve shell base image: {0}")]
  BaseImage(#[source] BackendError),

  #[error("failed to solve filesystem {fs}: {source}")]
  Target {
    fs: FsId,
    #[source]
    source: BackendError,
  },

  #[error("failed to create shell container: {0}")]
  Container(#[source] BackendError),

  #[error("failed to start shell: {0}")]
  Start(#[source] BackendError),

  #[error("failed to switch terminal to raw mode: {0}")]
  Terminal(#[source] std::io::Error),

  #[error("shell exited with error: {0}")]
  Wait(#[source] BackendError),
}

/// Attach an interactive shell to `fs` using this process's terminal.
pub async fn attach(gateway: &dyn Gateway, platform: &Platform, fs: &FsId) -> Result<(), ShellError> {
  attach_with(gateway, platform, fs, ProcessIo::stdio(), &CrosstermTerminal).await
}

/// Attach an interactive shell to `fs`, wiring the process to `io` and
/// switching `terminal` to raw mode while it runs.
///
/// The container is released once the shell exits, whatever the outcome.
pub async fn attach_with(
  gateway: &dyn Gateway,
  platform: &Platform,
  fs: &FsId,
  io: ProcessIo,
  terminal: &dyn RawTerminal,
) -> Result<(), ShellError> {
  let base = solve_ref(
    gateway,
    Definition::Image {
      reference: SHELL_BASE_IMAGE.to_string(),
      platform: platform.clone(),
    },
  )
  .await
  .map_err(ShellError::BaseImage)?;

  let target = solve_ref(gateway, Definition::Filesystem { id: fs.clone() })
    .await
    .map_err(|source| ShellError::Target { fs: fs.clone(), source })?;

  let container = gateway
    .new_container(NewContainerRequest {
      mounts: vec![Mount::bind("/", base), Mount::bind(SHELL_MOUNT_POINT, target)],
      platform: Some(platform.clone()),
    })
    .await
    .map_err(ShellError::Container)?;

  info!(fs = %fs, mount = SHELL_MOUNT_POINT, "starting interactive shell");
  let outcome = run_shell(container.as_ref(), io, terminal).await;

  if let Err(e) = container.release().await {
    warn!(error = %e, "failed to release shell container");
  }
  outcome
}

async fn solve_ref(gateway: &dyn Gateway, definition: Definition) -> Result<ResultRef, BackendError> {
  let result = gateway
    .solve(SolveRequest {
      definition,
      evaluate: false,
    })
    .await?;
  result.single_ref().cloned()
}

async fn run_shell(container: &dyn Container, io: ProcessIo, terminal: &dyn RawTerminal) -> Result<(), ShellError> {
  let request = StartRequest {
    args: vec![SHELL_COMMAND.to_string()],
    cwd: SHELL_MOUNT_POINT.to_string(),
    tty: true,
    env: Vec::new(),
  };
  let process = container.start(request, io).await.map_err(ShellError::Start)?;

  let _raw = RawModeGuard::acquire(terminal).map_err(ShellError::Terminal)?;
  process.wait().await.map_err(ShellError::Wait)
}
