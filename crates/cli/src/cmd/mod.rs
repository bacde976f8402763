mod run;
mod shell;
mod workers;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use kiln_lib::backend::{ExportEntry, SolveResult};
use kiln_lib::progress::ConsoleDisplay;
use kiln_lib::session::{BuildFunction, Session, SessionConfig};

use crate::output::{format_duration, print_info, print_success};

pub use run::{DoArgs, cmd_do};
pub use shell::{ShellArgs, cmd_shell};
pub use workers::cmd_workers;

/// Flags shared by every command that runs a session.
#[derive(Args, Debug, Default)]
pub struct SessionArgs {
  /// JSON session file; flags are layered on top of it
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// Declare a local directory
  #[arg(long = "local", value_name = "NAME=PATH", value_parser = parse_pair::<PathBuf>)]
  pub locals: Vec<(String, PathBuf)>,

  /// Declare a secret read from an environment variable
  #[arg(long = "secret", value_name = "NAME=ENV_VAR", value_parser = parse_pair::<String>)]
  pub secrets: Vec<(String, String)>,

  /// Export the result, e.g. `local:./out` or `image:registry/app:latest`
  #[arg(long, value_name = "TYPE[:DEST]")]
  pub export: Option<ExportEntry>,

  /// Serve the API on this port until interrupted
  #[arg(long, value_name = "PORT")]
  pub dev_server: Option<u16>,
}

impl SessionArgs {
  /// Build the session configuration: the config file first, then flags.
  pub fn into_config(self) -> Result<SessionConfig> {
    let mut config = match &self.config {
      Some(path) => SessionConfig::load(path)?,
      None => SessionConfig::default(),
    };

    config.local_dirs.extend(self.locals);
    for (name, var) in self.secrets {
      let value = std::env::var(&var)
        .with_context(|| format!("secret '{}' reads environment variable {}, which is not set", name, var))?;
      config.secrets.insert(name, value);
    }
    if let Some(export) = self.export {
      config.export = Some(export);
    }
    if let Some(port) = self.dev_server {
      config.dev_server = Some(port);
    }

    debug!(config = ?config, "session config");
    Ok(config)
  }
}

/// Parse `NAME=VALUE`.
fn parse_pair<V: From<String>>(s: &str) -> Result<(String, V), String> {
  match s.split_once('=') {
    Some((name, value)) if !name.is_empty() && !value.is_empty() => Ok((name.to_string(), V::from(value.to_string()))),
    _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
  }
}

/// Run `future` on a fresh runtime that is shut down without waiting for
/// blocking tasks.
///
/// A shell session reads stdin on a blocking thread that only returns on the
/// next keypress, so a regular runtime drop would hang after the shell exits.
pub(crate) fn block_on<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let output = rt.block_on(future);
  rt.shutdown_background();
  output
}

/// Connect and run a session on a fresh runtime, cancelling it on Ctrl-C.
fn run_session(backend: &str, config: SessionConfig, build: Arc<dyn BuildFunction>) -> Result<SolveResult> {
  block_on(async {
    let session = Session::connect(backend, config)
      .await
      .context("Failed to connect to backend")?;

    let cancel = session.cancellation_token();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        cancel.cancel();
      }
    });

    session
      .run(Some(build), ConsoleDisplay::stderr())
      .await
      .context("Session failed")
  })
}

fn report_result(result: &SolveResult, started: Instant) {
  let elapsed = format_duration(started.elapsed());
  match &result.reference {
    Some(reference) => print_success(&format!("Solved {} in {}", reference, elapsed)),
    None => print_info(&format!("Session finished with no output in {}", elapsed)),
  }
}
