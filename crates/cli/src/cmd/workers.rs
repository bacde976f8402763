//! Implementation of the `kiln workers` command.
//!
//! Lists the backend's workers and the platform a session would build for.

use anyhow::{Context, Result};
use serde_json::json;

use kiln_lib::backend::{Backend, HttpBackend};
use kiln_lib::platform;

use super::block_on;
use crate::output::{print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_workers(backend: &str, json: bool) -> Result<()> {
  let (workers, platform) = block_on(async {
    let backend = HttpBackend::connect(backend)
      .await
      .context("Failed to connect to backend")?;
    let workers = backend.list_workers().await.context("Failed to list workers")?;
    let platform = platform::detect(&backend).await?;
    anyhow::Ok((workers, platform))
  })?;

  if json {
    return print_json(&json!({ "platform": platform, "workers": workers }));
  }

  print_success(&format!("Build platform: {}", platform));
  if workers.is_empty() {
    print_warning("Backend reports no workers; builds target the host platform");
    return Ok(());
  }

  print_info(&format!("{} worker(s)", workers.len()));
  for worker in &workers {
    println!();
    println!("{} {}", symbols::ARROW, worker.id);
    let platforms: Vec<String> = worker.platforms.iter().map(ToString::to_string).collect();
    print_stat("Platforms", &platforms.join(", "));
    for (key, value) in &worker.labels {
      print_stat(key, value);
    }
  }
  Ok(())
}
