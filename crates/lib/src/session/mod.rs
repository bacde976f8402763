//! Session controller.
//!
//! A session drives one build on the backend:
//!
//! 1. Detect the build platform.
//! 2. Start the build, with the secret table attached, and concurrently
//!    render its status stream.
//! 3. Inside the build: serve the embedded API over the in-process bridge,
//!    resolve every declared local directory, invoke the build function and
//!    solve the filesystem it returns.
//! 4. Optionally keep serving the API on a TCP port until cancelled.
//!
//! The solve and reporting units share a [`CancellationToken`]. The first
//! error from either cancels the other and is the session's result.

pub mod config;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use futures::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{self, ApiClient, ApiRouter};
use crate::backend::{
  Backend, BoxError, BuildFn, BuildOptions, Definition, Gateway, HttpBackend, SolveRequest, SolveResult,
};
use crate::consts::BUILD_ABORT_GRACE;
use crate::inputs::resolve_local_dirs;
use crate::platform::{self, Platform};
use crate::progress::{ProgressDisplay, SolveStatus, report};
use crate::secrets::SecretTable;

pub use config::{ConfigError, SessionConfig};
pub use types::{BuildContext, BuildFunction, SessionError};

/// One build session against a backend.
pub struct Session {
  backend: Arc<dyn Backend>,
  config: SessionConfig,
  cancel: CancellationToken,
}

/// What the build function closure needs from the session.
struct BuildPlan {
  platform: Platform,
  local_dirs: Vec<String>,
  secrets: Arc<SecretTable>,
  build: Option<Arc<dyn BuildFunction>>,
  dev_server: Option<u16>,
  cancel: CancellationToken,
}

/// Result of one concurrently running session unit.
enum Unit {
  Solved(SolveResult),
  Reported,
}

impl Session {
  pub fn new(backend: Arc<dyn Backend>, config: SessionConfig) -> Self {
    Self {
      backend,
      config,
      cancel: CancellationToken::new(),
    }
  }

  /// Connect to the HTTP backend at `addr`.
  pub async fn connect(addr: &str, config: SessionConfig) -> Result<Self, SessionError> {
    let backend = HttpBackend::connect(addr).await.map_err(SessionError::Connect)?;
    Ok(Self::new(Arc::new(backend), config))
  }

  /// Token that cancels the session when fired.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub fn config(&self) -> &SessionConfig {
    &self.config
  }

  /// Run the session to completion.
  ///
  /// Without a build function the session only resolves its local
  /// directories and completes with an empty result.
  pub async fn run<D>(self, build: Option<Arc<dyn BuildFunction>>, display: D) -> Result<SolveResult, SessionError>
  where
    D: ProgressDisplay + 'static,
  {
    let Session {
      backend,
      config,
      cancel,
    } = self;
    info!(
      local_dirs = config.local_dirs.len(),
      secrets = config.secrets.len(),
      "starting session"
    );

    let platform = platform::detect(backend.as_ref()).await?;

    let secrets = Arc::new(SecretTable::new(&config.secrets));
    for (id, key) in secrets.id_map() {
      debug!(id = %id, key = key.short(), "registered secret");
    }

    let options = BuildOptions {
      exports: config.export.iter().cloned().collect(),
      local_dirs: config.local_dirs.clone(),
      secrets: secrets.clone(),
      cancel: cancel.clone(),
    };
    let plan = BuildPlan {
      platform,
      local_dirs: config.local_dirs.keys().cloned().collect(),
      secrets,
      build,
      dev_server: config.dev_server_port(),
      cancel: cancel.clone(),
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let mut units = JoinSet::new();
    units.spawn(solve_unit(backend, options, plan, tx, cancel.clone()));
    units.spawn(report_unit(rx, display));

    let mut solved = None;
    let mut first_error = None;
    while let Some(joined) = units.join_next().await {
      match joined.map_err(SessionError::from).and_then(|unit| unit) {
        Ok(Unit::Solved(result)) => solved = Some(result),
        Ok(Unit::Reported) => {}
        Err(e) if first_error.is_none() => {
          warn!(error = %e, "session unit failed, cancelling session");
          cancel.cancel();
          first_error = Some(e);
        }
        Err(e) => debug!(error = %e, "session unit failed after cancellation"),
      }
    }

    if let Some(e) = first_error {
      return Err(e);
    }
    let result = solved.ok_or(SessionError::Cancelled)?;
    info!(empty = result.is_empty(), "session complete");
    Ok(result)
  }
}

async fn solve_unit(
  backend: Arc<dyn Backend>,
  options: BuildOptions,
  plan: BuildPlan,
  status: UnboundedSender<SolveStatus>,
  cancel: CancellationToken,
) -> Result<Unit, SessionError> {
  let build_fn: BuildFn = Box::new(move |gateway| {
    async move { build_in_session(gateway, plan).await.map_err(|e| Box::new(e) as BoxError) }.boxed()
  });

  let build = backend.build(options, build_fn, status);
  tokio::pin!(build);

  tokio::select! {
    result = &mut build => result.map(Unit::Solved).map_err(SessionError::from_build),
    _ = cancel.cancelled() => {
      // The backend observes the same token; give it time to abort its side.
      if tokio::time::timeout(BUILD_ABORT_GRACE, build).await.is_err() {
        warn!("backend did not stop the build in time, dropping it");
      }
      Err(SessionError::Cancelled)
    }
  }
}

async fn report_unit<D: ProgressDisplay>(events: UnboundedReceiver<SolveStatus>, mut display: D) -> Result<Unit, SessionError> {
  report(events, &mut display).await.map_err(SessionError::Progress)?;
  Ok(Unit::Reported)
}

/// The session's build function, run by the backend with a live gateway.
async fn build_in_session(gateway: Arc<dyn Gateway>, plan: BuildPlan) -> Result<SolveResult, SessionError> {
  let mut router = ApiRouter::new();
  router.add(api::builtin::resolvers(gateway.clone(), plan.platform.clone()))?;
  let api = ApiClient::new(&router, plan.cancel.clone());

  let local_dirs = resolve_local_dirs(&api, plan.local_dirs.iter().map(String::as_str)).await?;

  let result = match &plan.build {
    None => SolveResult::empty(),
    Some(build) => {
      let ctx = BuildContext {
        local_dirs: Arc::new(local_dirs),
        secrets: Arc::new(plan.secrets.id_map().clone()),
        platform: plan.platform.clone(),
        api,
        gateway: gateway.clone(),
        cancel: plan.cancel.clone(),
      };

      match build.call(ctx).await.map_err(SessionError::Callback)? {
        Some(fs) if !fs.is_empty() => {
          info!(fs = %fs, "solving build output");
          let request = SolveRequest {
            definition: Definition::Filesystem { id: fs.clone() },
            evaluate: true,
          };
          gateway
            .solve(request)
            .await
            .map_err(|source| SessionError::Submit { fs, source })?
        }
        _ => {
          info!("build function returned no output");
          SolveResult::empty()
        }
      }
    }
  };

  if let Some(port) = plan.dev_server {
    serve_dev(&router, port, plan.cancel.clone()).await?;
  }
  Ok(result)
}

/// Serve the API router on `0.0.0.0:port` until `cancel` fires.
async fn serve_dev(router: &ApiRouter, port: u16, cancel: CancellationToken) -> Result<(), SessionError> {
  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = TcpListener::bind(addr)
    .await
    .map_err(|source| SessionError::DevServer { port, source })?;

  info!(%addr, "serving api");
  axum::serve(listener, router.service())
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .map_err(|source| SessionError::DevServer { port, source })
}
