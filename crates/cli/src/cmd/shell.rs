//! Implementation of the `kiln shell` command.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use async_trait::async_trait;
use clap::Args;

use kiln_lib::backend::{BoxError, FsId};
use kiln_lib::session::{BuildContext, BuildFunction};
use kiln_lib::shell;

use super::{SessionArgs, report_result, run_session};

#[derive(Args, Debug)]
pub struct ShellArgs {
  /// Local directory to open the shell on (declared with --local)
  pub local: String,

  #[command(flatten)]
  pub session: SessionArgs,
}

/// Attaches a shell to one resolved local directory; produces no output.
struct ShellBuild {
  local: String,
}

#[async_trait]
impl BuildFunction for ShellBuild {
  async fn call(&self, ctx: BuildContext) -> Result<Option<FsId>, BoxError> {
    let fs = ctx
      .local_dirs
      .get(&self.local)
      .ok_or_else(|| format!("local directory '{}' was not resolved", self.local))?;
    shell::attach(ctx.gateway.as_ref(), &ctx.platform, fs).await?;
    Ok(None)
  }
}

pub fn cmd_shell(backend: &str, args: ShellArgs) -> Result<()> {
  let config = args.session.into_config()?;
  if !config.local_dirs.contains_key(&args.local) {
    bail!(
      "local directory '{}' is not declared; pass --local {}=PATH",
      args.local,
      args.local
    );
  }

  let started = Instant::now();
  let result = run_session(backend, config, Arc::new(ShellBuild { local: args.local }))?;
  report_result(&result, started);
  Ok(())
}
