//! HTTP client for a build backend daemon.
//!
//! The daemon exposes a small JSON API under `/v1`. A build is a server-side
//! session: it is opened with the exports, local directories and hash-keyed
//! secrets, driven through gateway calls scoped to the session id, and then
//! finished (or aborted). Status events stream back as newline-delimited JSON.
//! Interactive processes are attached over an upgraded connection that
//! carries the raw terminal stream in both directions.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONNECTION, UPGRADE};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::progress::SolveStatus;

use super::{
  Backend, BackendError, BuildFn, BuildOptions, Container, Definition, ExportEntry, FsId, Gateway,
  NewContainerRequest, Process, ProcessIo, SolveRequest, SolveResult, StartRequest, WorkerInfo,
};

const PROCESS_ID_HEADER: &str = "x-process-id";
const STDIO_PROTOCOL: &str = "kiln-stdio";

#[derive(Serialize)]
struct OpenSession<'a> {
  exports: &'a [ExportEntry],
  local_dirs: &'a BTreeMap<String, PathBuf>,
  secrets: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct ReferenceRequest<'a> {
  definition: &'a Definition,
}

#[derive(Serialize)]
struct FinishSession<'a> {
  result: &'a SolveResult,
}

#[derive(Deserialize)]
struct IdResponse {
  id: String,
}

#[derive(Deserialize)]
struct WaitResponse {
  exit_code: i32,
}

/// Backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
  client: Client,
  base: Url,
}

impl HttpBackend {
  /// Connect to the backend at `addr`, failing fast if it is unreachable.
  pub async fn connect(addr: &str) -> Result<Self, BackendError> {
    let base = Url::parse(addr).map_err(|_| BackendError::InvalidAddress(addr.to_string()))?;
    let backend = Self {
      client: Client::builder().build()?,
      base,
    };

    let response = backend
      .client
      .get(join(&backend.base, "v1/health")?)
      .send()
      .await
      .map_err(|e| BackendError::Connect {
        addr: addr.to_string(),
        message: e.to_string(),
      })?;
    expect_success(response).await?;

    info!(addr, "connected to backend");
    Ok(backend)
  }

  async fn open_session(&self, options: &BuildOptions) -> Result<String, BackendError> {
    // The session body is the only place secret plaintext leaves this process.
    let secrets = options
      .secrets
      .keys()
      .into_iter()
      .filter_map(|key| options.secrets.get(&key).map(|value| (key.0.clone(), value.to_string())))
      .collect();
    let body = OpenSession {
      exports: &options.exports,
      local_dirs: &options.local_dirs,
      secrets,
    };

    let response = self.client.post(join(&self.base, "v1/sessions")?).json(&body).send().await?;
    let opened: IdResponse = expect_success(response).await?.json().await?;
    debug!(session = %opened.id, "opened build session");
    Ok(opened.id)
  }

  async fn finish_session(&self, session: &SessionUrls, result: &SolveResult) -> Result<SolveResult, BackendError> {
    let response = self
      .client
      .post(session.path("finish")?)
      .json(&FinishSession { result })
      .send()
      .await?;
    Ok(expect_success(response).await?.json().await?)
  }

}

/// Aborts the server-side build session unless it was finished.
///
/// Explicit exits call [`abort`](Self::abort). If the build future is dropped
/// instead (the caller stopped polling it), `Drop` sends the abort from a
/// spawned task.
struct SessionAbort {
  client: Client,
  session: Option<SessionUrls>,
}

impl SessionAbort {
  fn new(client: Client, session: SessionUrls) -> Self {
    Self {
      client,
      session: Some(session),
    }
  }

  async fn abort(mut self) {
    if let Some(session) = self.session.take() {
      send_abort(self.client.clone(), session).await;
    }
  }

  fn disarm(mut self) {
    self.session = None;
  }
}

impl Drop for SessionAbort {
  fn drop(&mut self) {
    let Some(session) = self.session.take() else {
      return;
    };
    match tokio::runtime::Handle::try_current() {
      Ok(runtime) => {
        runtime.spawn(send_abort(self.client.clone(), session));
      }
      Err(_) => warn!(session = %session.id, "no runtime left to abort build session"),
    }
  }
}

async fn send_abort(client: Client, session: SessionUrls) {
  let outcome = match client.delete(session.root.clone()).send().await {
    Ok(response) => expect_success(response).await.map(|_| ()),
    Err(e) => Err(e.into()),
  };
  match outcome {
    Ok(()) => info!(session = %session.id, "build session aborted"),
    Err(e) => warn!(session = %session.id, error = %e, "failed to abort build session"),
  }
}

#[async_trait]
impl Backend for HttpBackend {
  async fn list_workers(&self) -> Result<Vec<WorkerInfo>, BackendError> {
    let response = self.client.get(join(&self.base, "v1/workers")?).send().await?;
    Ok(expect_success(response).await?.json().await?)
  }

  async fn build(
    &self,
    options: BuildOptions,
    build_fn: BuildFn,
    status: UnboundedSender<SolveStatus>,
  ) -> Result<SolveResult, BackendError> {
    let id = self.open_session(&options).await?;
    let session = SessionUrls::new(&self.base, id)?;
    let guard = SessionAbort::new(self.client.clone(), session.clone());

    // Dropping the build future also stops the pump.
    let pump = AbortOnDropHandle::new(tokio::spawn(pump_status(
      self.client.clone(),
      session.path("status")?,
      status,
    )));

    let gateway = Arc::new(HttpGateway {
      client: self.client.clone(),
      session: session.clone(),
    });

    let outcome = tokio::select! {
      biased;
      _ = options.cancel.cancelled() => Err(BackendError::Cancelled),
      result = build_fn(gateway) => result.map_err(BackendError::BuildFunction),
    };
    let result = match outcome {
      Ok(result) => result,
      Err(e) => {
        pump.abort();
        guard.abort().await;
        return Err(e);
      }
    };

    let finished = match self.finish_session(&session, &result).await {
      Ok(finished) => finished,
      Err(e) => {
        pump.abort();
        guard.abort().await;
        return Err(e);
      }
    };
    guard.disarm();

    match pump.await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(error = %e, "status stream ended with error"),
      Err(e) => warn!(error = %e, "status stream task failed"),
    }

    info!(session = %session.id, "build session finished");
    Ok(finished)
  }
}

/// URLs scoped to one server-side build session.
#[derive(Debug, Clone)]
struct SessionUrls {
  id: String,
  /// `v1/sessions/{id}`, the session resource itself.
  root: Url,
  /// `v1/sessions/{id}/`, the base for per-session paths.
  base: Url,
}

impl SessionUrls {
  fn new(base: &Url, id: String) -> Result<Self, BackendError> {
    let root = join(base, &format!("v1/sessions/{}", id))?;
    let base = join(base, &format!("v1/sessions/{}/", id))?;
    Ok(Self { id, root, base })
  }

  fn path(&self, rest: &str) -> Result<Url, BackendError> {
    join(&self.base, rest)
  }
}

struct HttpGateway {
  client: Client,
  session: SessionUrls,
}

#[async_trait]
impl Gateway for HttpGateway {
  async fn reference(&self, definition: &Definition) -> Result<FsId, BackendError> {
    let response = self
      .client
      .post(self.session.path("references")?)
      .json(&ReferenceRequest { definition })
      .send()
      .await?;
    let issued: IdResponse = expect_success(response).await?.json().await?;
    Ok(FsId(issued.id))
  }

  async fn solve(&self, request: SolveRequest) -> Result<SolveResult, BackendError> {
    let response = self.client.post(self.session.path("solve")?).json(&request).send().await?;
    Ok(expect_success(response).await?.json().await?)
  }

  async fn new_container(&self, request: NewContainerRequest) -> Result<Box<dyn Container>, BackendError> {
    let response = self
      .client
      .post(self.session.path("containers")?)
      .json(&request)
      .send()
      .await?;
    let created: IdResponse = expect_success(response).await?.json().await?;
    debug!(container = %created.id, mounts = request.mounts.len(), "created container");

    Ok(Box::new(HttpContainer {
      client: self.client.clone(),
      session: self.session.clone(),
      id: created.id,
    }))
  }
}

struct HttpContainer {
  client: Client,
  session: SessionUrls,
  id: String,
}

#[async_trait]
impl Container for HttpContainer {
  async fn start(&self, request: StartRequest, io: ProcessIo) -> Result<Box<dyn Process>, BackendError> {
    let url = self.session.path(&format!("containers/{}/processes", self.id))?;
    let response = self
      .client
      .post(url)
      .header(CONNECTION, "upgrade")
      .header(UPGRADE, STDIO_PROTOCOL)
      .json(&request)
      .send()
      .await?;

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
      expect_success(response).await?;
      return Err(BackendError::Status {
        status: StatusCode::SWITCHING_PROTOCOLS.as_u16(),
        message: "backend did not upgrade the process stream".to_string(),
      });
    }

    let process_id = response
      .headers()
      .get(PROCESS_ID_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string)
      .ok_or_else(|| BackendError::Status {
        status: StatusCode::SWITCHING_PROTOCOLS.as_u16(),
        message: format!("missing {} header", PROCESS_ID_HEADER),
      })?;

    let upgraded = response.upgrade().await?;
    let (mut remote_out, mut remote_in) = tokio::io::split(upgraded);

    // A tty process has a single combined output stream, so stderr stays unused.
    let ProcessIo {
      mut stdin, mut stdout, ..
    } = io;

    let stdin_task = tokio::spawn(async move {
      tokio::io::copy(&mut stdin, &mut remote_in).await?;
      remote_in.shutdown().await
    });
    let stdout_task = tokio::spawn(async move {
      tokio::io::copy(&mut remote_out, &mut stdout).await?;
      stdout.flush().await
    });

    debug!(container = %self.id, process = %process_id, args = ?request.args, "started process");

    Ok(Box::new(HttpProcess {
      client: self.client.clone(),
      wait_url: self.session.path(&format!("processes/{}/wait", process_id))?,
      stdin_task,
      stdout_task,
    }))
  }

  async fn release(&self) -> Result<(), BackendError> {
    let url = self.session.path(&format!("containers/{}", self.id))?;
    let response = self.client.delete(url).send().await?;
    expect_success(response).await?;
    Ok(())
  }
}

struct HttpProcess {
  client: Client,
  wait_url: Url,
  stdin_task: JoinHandle<std::io::Result<()>>,
  stdout_task: JoinHandle<std::io::Result<()>>,
}

#[async_trait]
impl Process for HttpProcess {
  async fn wait(self: Box<Self>) -> Result<(), BackendError> {
    let response = self.client.post(self.wait_url.clone()).send().await?;
    let exited: WaitResponse = expect_success(response).await?.json().await?;

    // Reading local stdin never finishes on its own.
    self.stdin_task.abort();
    match self.stdout_task.await {
      Ok(Err(e)) => return Err(BackendError::Io(e)),
      Err(e) => warn!(error = %e, "process output task failed"),
      Ok(Ok(())) => {}
    }

    match exited.exit_code {
      0 => Ok(()),
      code => Err(BackendError::ProcessExit(code)),
    }
  }
}

/// Forward NDJSON status events until the backend closes the stream.
///
/// Lines that do not decode are logged and skipped.
async fn pump_status(client: Client, url: Url, status: UnboundedSender<SolveStatus>) -> Result<(), BackendError> {
  let response = expect_success(client.get(url).send().await?).await?;
  let mut stream = response.bytes_stream();
  let mut buffer: Vec<u8> = Vec::new();

  while let Some(chunk) = stream.next().await {
    buffer.extend_from_slice(&chunk?);

    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
      let line: Vec<u8> = buffer.drain(..=newline).collect();
      let line = line.trim_ascii();
      if line.is_empty() {
        continue;
      }
      let event: SolveStatus = match serde_json::from_slice(line) {
        Ok(event) => event,
        Err(e) => {
          warn!(error = %e, line = %String::from_utf8_lossy(line), "skipping malformed status event");
          continue;
        }
      };
      if status.send(event).is_err() {
        debug!("status receiver dropped, stopping status stream");
        return Ok(());
      }
    }
  }

  Ok(())
}

fn join(base: &Url, path: &str) -> Result<Url, BackendError> {
  base
    .join(path)
    .map_err(|_| BackendError::InvalidAddress(format!("{}{}", base, path)))
}

async fn expect_success(response: Response) -> Result<Response, BackendError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let message = response.text().await.unwrap_or_default();
  Err(BackendError::Status {
    status: status.as_u16(),
    message,
  })
}
