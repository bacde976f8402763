//! Implementation of the `kiln do` command.
//!
//! Runs a session whose build function sends a single API request and solves
//! the filesystem id found in the response, e.g.
//! `kiln do core.image --var ref=alpine:3.15`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use serde_json::Value;

use kiln_lib::api::ApiRequest;
use kiln_lib::backend::{BoxError, FsId};
use kiln_lib::session::{BuildContext, BuildFunction};

use super::{SessionArgs, parse_pair, report_result, run_session};
use crate::output::print_json;

#[derive(Args, Debug)]
pub struct DoArgs {
  /// API field to query, e.g. `core.clientdir`
  pub field: String,

  /// Query variable
  #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_pair::<String>)]
  pub vars: Vec<(String, String)>,

  /// Print the response without solving its filesystem
  #[arg(long)]
  pub no_output: bool,

  #[command(flatten)]
  pub session: SessionArgs,
}

/// Queries one field and returns the `id` of its data as output.
struct FieldBuild {
  field: String,
  vars: Vec<(String, String)>,
  no_output: bool,
}

#[async_trait]
impl BuildFunction for FieldBuild {
  async fn call(&self, ctx: BuildContext) -> Result<Option<FsId>, BoxError> {
    let request = self
      .vars
      .iter()
      .fold(ApiRequest::new(&self.field), |request, (name, value)| {
        request.var(name.clone(), value.clone())
      });

    let data: Value = ctx.api.query(request).await?;
    print_json(&data).map_err(|e| e.to_string())?;
    if self.no_output {
      return Ok(None);
    }

    let id = data
      .get("id")
      .and_then(Value::as_str)
      .ok_or_else(|| format!("field '{}' returned no filesystem id", self.field))?;
    Ok(Some(FsId::new(id)))
  }
}

pub fn cmd_do(backend: &str, args: DoArgs) -> Result<()> {
  let config = args.session.into_config()?;
  let build = Arc::new(FieldBuild {
    field: args.field,
    vars: args.vars,
    no_output: args.no_output,
  });

  let started = Instant::now();
  let result = run_session(backend, config, build)?;
  report_result(&result, started);
  Ok(())
}
