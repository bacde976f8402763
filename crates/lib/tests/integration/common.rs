//! In-memory backend double shared by the integration tests.
//!
//! Every interesting call is appended to a shared log so tests can assert on
//! ordering across the backend, gateway, containers and terminal.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kiln_lib::backend::{
  Backend, BackendError, BuildFn, BuildOptions, Container, Definition, FsId, Gateway, NewContainerRequest, Process,
  ProcessIo, ResultRef, SolveRequest, SolveResult, StartRequest, WorkerInfo,
};
use kiln_lib::platform::Platform;
use kiln_lib::progress::{ProgressDisplay, SolveStatus, VertexWarning};
use kiln_lib::secrets::SecretKey;
use kiln_lib::shell::RawTerminal;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;

/// State shared by a backend double and everything it hands out.
#[derive(Default)]
pub struct FakeState {
  pub calls: Mutex<Vec<String>>,
  /// Secret material as received when the build was opened.
  pub secrets: Mutex<Option<BTreeMap<SecretKey, String>>>,
  pub containers: Mutex<Vec<NewContainerRequest>>,
  pub started: Mutex<Vec<StartRequest>>,
}

impl FakeState {
  pub fn record(&self, call: impl Into<String>) {
    self.calls.lock().unwrap().push(call.into());
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn position(&self, call: &str) -> Option<usize> {
    self.calls().iter().position(|c| c == call)
  }

  pub fn called(&self, prefix: &str) -> bool {
    self.calls().iter().any(|c| c.starts_with(prefix))
  }
}

#[derive(Clone)]
pub struct FakeBackend {
  pub workers: Result<Vec<WorkerInfo>, u16>,
  pub local_dirs: BTreeMap<String, FsId>,
  pub events: Vec<SolveStatus>,
  pub fail_solve: bool,
  pub exit_code: i32,
  pub state: Arc<FakeState>,
}

impl FakeBackend {
  /// One `linux/arm64` worker; local directory `src` resolves to `ref:abc`.
  pub fn new() -> Self {
    Self {
      workers: Ok(vec![WorkerInfo {
        id: "worker-0".to_string(),
        labels: BTreeMap::new(),
        platforms: vec![Platform::new("linux", "arm64")],
      }]),
      local_dirs: BTreeMap::from([("src".to_string(), FsId::new("ref:abc"))]),
      events: Vec::new(),
      fail_solve: false,
      exit_code: 0,
      state: Arc::new(FakeState::default()),
    }
  }

  pub fn gateway(&self) -> FakeGateway {
    FakeGateway {
      local_dirs: self.local_dirs.clone(),
      fail_solve: self.fail_solve,
      exit_code: self.exit_code,
      state: self.state.clone(),
    }
  }
}

#[async_trait]
impl Backend for FakeBackend {
  async fn list_workers(&self) -> Result<Vec<WorkerInfo>, BackendError> {
    self.state.record("list_workers");
    self.workers.clone().map_err(|status| BackendError::Status {
      status,
      message: "workers unavailable".to_string(),
    })
  }

  async fn build(
    &self,
    options: BuildOptions,
    build_fn: BuildFn,
    status: UnboundedSender<SolveStatus>,
  ) -> Result<SolveResult, BackendError> {
    self.state.record("build");
    let secrets = options
      .secrets
      .keys()
      .into_iter()
      .filter_map(|key| options.secrets.get(&key).map(|value| (key.clone(), value.to_string())))
      .collect();
    *self.state.secrets.lock().unwrap() = Some(secrets);

    for event in &self.events {
      let _ = status.send(event.clone());
    }

    tokio::select! {
      biased;
      _ = options.cancel.cancelled() => {
        self.state.record("abort build");
        Err(BackendError::Cancelled)
      }
      result = build_fn(Arc::new(self.gateway())) => result.map_err(BackendError::BuildFunction),
    }
  }
}

pub struct FakeGateway {
  local_dirs: BTreeMap<String, FsId>,
  fail_solve: bool,
  exit_code: i32,
  state: Arc<FakeState>,
}

fn describe(definition: &Definition) -> String {
  match definition {
    Definition::Local { name } => format!("local {}", name),
    Definition::Image { reference, .. } => format!("image {}", reference),
    Definition::Filesystem { id } => format!("filesystem {}", id),
  }
}

#[async_trait]
impl Gateway for FakeGateway {
  async fn reference(&self, definition: &Definition) -> Result<FsId, BackendError> {
    self.state.record(format!("reference {}", describe(definition)));
    match definition {
      Definition::Local { name } => self.local_dirs.get(name).cloned().ok_or(BackendError::Status {
        status: 404,
        message: format!("local directory '{}' not found", name),
      }),
      Definition::Image { reference, .. } => Ok(FsId::new(format!("image:{}", reference))),
      Definition::Filesystem { id } => Ok(id.clone()),
    }
  }

  async fn solve(&self, request: SolveRequest) -> Result<SolveResult, BackendError> {
    let description = describe(&request.definition);
    self.state.record(format!("solve {}", description));
    if self.fail_solve {
      return Err(BackendError::Status {
        status: 500,
        message: "solver crashed".to_string(),
      });
    }
    Ok(SolveResult::with_ref(ResultRef(format!("res:{}", description))))
  }

  async fn new_container(&self, request: NewContainerRequest) -> Result<Box<dyn Container>, BackendError> {
    self.state.record("new_container");
    self.state.containers.lock().unwrap().push(request);
    Ok(Box::new(FakeContainer {
      exit_code: self.exit_code,
      state: self.state.clone(),
    }))
  }
}

struct FakeContainer {
  exit_code: i32,
  state: Arc<FakeState>,
}

#[async_trait]
impl Container for FakeContainer {
  async fn start(&self, request: StartRequest, io: ProcessIo) -> Result<Box<dyn Process>, BackendError> {
    self.state.record("start");
    self.state.started.lock().unwrap().push(request);
    Ok(Box::new(FakeProcess {
      exit_code: self.exit_code,
      io,
      state: self.state.clone(),
    }))
  }

  async fn release(&self) -> Result<(), BackendError> {
    self.state.record("release");
    Ok(())
  }
}

struct FakeProcess {
  exit_code: i32,
  io: ProcessIo,
  state: Arc<FakeState>,
}

#[async_trait]
impl Process for FakeProcess {
  async fn wait(self: Box<Self>) -> Result<(), BackendError> {
    let FakeProcess { exit_code, mut io, state } = *self;
    state.record("wait");
    io.stdout.write_all(b"/output # exit\n").await?;
    io.stdout.flush().await?;
    match exit_code {
      0 => Ok(()),
      code => Err(BackendError::ProcessExit(code)),
    }
  }
}

/// Terminal double logging into the shared call log.
pub struct FakeTerminal {
  pub refuse: bool,
  pub state: Arc<FakeState>,
}

impl RawTerminal for FakeTerminal {
  fn enable_raw(&self) -> io::Result<()> {
    self.state.record("raw");
    if self.refuse {
      return Err(io::Error::other("not a terminal"));
    }
    Ok(())
  }

  fn restore(&self) -> io::Result<()> {
    self.state.record("restore");
    Ok(())
  }
}

/// Display that keeps everything it is shown.
#[derive(Clone, Default)]
pub struct RecordingDisplay {
  pub updates: Arc<Mutex<Vec<SolveStatus>>>,
  pub warnings: Arc<Mutex<Option<Vec<VertexWarning>>>>,
  pub fail: bool,
}

impl ProgressDisplay for RecordingDisplay {
  fn update(&mut self, status: &SolveStatus) -> io::Result<()> {
    if self.fail {
      return Err(io::Error::new(io::ErrorKind::BrokenPipe, "console closed"));
    }
    self.updates.lock().unwrap().push(status.clone());
    Ok(())
  }

  fn finish(&mut self, warnings: &[VertexWarning]) -> io::Result<()> {
    *self.warnings.lock().unwrap() = Some(warnings.to_vec());
    Ok(())
  }
}

/// Process streams that discard input and capture output.
pub fn captured_io() -> (ProcessIo, tokio::io::DuplexStream) {
  let (stdout, output) = tokio::io::duplex(4096);
  let io = ProcessIo {
    stdin: Box::new(tokio::io::empty()),
    stdout: Box::new(stdout),
    stderr: Box::new(tokio::io::sink()),
  };
  (io, output)
}
