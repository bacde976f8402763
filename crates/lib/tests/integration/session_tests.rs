//! End-to-end session runs against the in-memory backend.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_lib::api::ApiRequest;
use kiln_lib::backend::{BoxError, FsId, ResultRef, SolveResult};
use kiln_lib::platform::Platform;
use kiln_lib::progress::{SolveStatus, Vertex, VertexWarning};
use kiln_lib::secrets::SecretKey;
use kiln_lib::session::{BuildContext, BuildFunction, Session, SessionConfig, SessionError};
use serde::Deserialize;

use super::common::{FakeBackend, RecordingDisplay};

fn config(local_dirs: &[(&str, &str)], secrets: &[(&str, &str)]) -> SessionConfig {
  SessionConfig {
    local_dirs: local_dirs
      .iter()
      .map(|(id, path)| (id.to_string(), PathBuf::from(path)))
      .collect(),
    secrets: secrets
      .iter()
      .map(|(id, value)| (id.to_string(), value.to_string()))
      .collect(),
    ..Default::default()
  }
}

/// Build function returning a fixed output and remembering what it saw.
fn returning(
  output: Option<&str>,
  seen: Arc<Mutex<Option<BuildContext>>>,
  backend: &FakeBackend,
) -> Arc<dyn BuildFunction> {
  let output = output.map(FsId::new);
  let state = backend.state.clone();
  Arc::new(move |ctx: BuildContext| {
    let output = output.clone();
    let seen = seen.clone();
    let state = state.clone();
    async move {
      state.record("callback");
      *seen.lock().unwrap() = Some(ctx);
      Ok::<_, BoxError>(output)
    }
  })
}

async fn run(backend: &FakeBackend, config: SessionConfig, build: Option<Arc<dyn BuildFunction>>) -> Result<SolveResult, SessionError> {
  Session::new(Arc::new(backend.clone()), config)
    .run(build, RecordingDisplay::default())
    .await
}

#[tokio::test]
async fn resolves_inputs_hashes_secrets_and_submits_output() {
  let backend = FakeBackend::new();
  let seen = Arc::new(Mutex::new(None));
  let build = returning(Some("ref:out"), seen.clone(), &backend);

  let result = run(
    &backend,
    config(&[("src", "/host/project")], &[("token", "abc123")]),
    Some(build),
  )
  .await
  .unwrap();

  let ctx = seen.lock().unwrap().take().unwrap();
  assert_eq!(*ctx.local_dirs, BTreeMap::from([("src".to_string(), FsId::new("ref:abc"))]));
  assert_eq!(
    *ctx.secrets,
    BTreeMap::from([("token".to_string(), SecretKey::of("abc123"))])
  );
  assert_eq!(
    SecretKey::of("abc123").0,
    "6ca13d52ca70c883e0f0bb101e425a89e8624de51db2d2392593af6a84118090"
  );

  assert!(backend.state.called("solve filesystem ref:out"));
  assert_eq!(result.reference, Some(ResultRef("res:filesystem ref:out".to_string())));
}

#[tokio::test]
async fn secrets_reach_backend_only_by_hash() {
  let backend = FakeBackend::new();
  let seen = Arc::new(Mutex::new(None));
  let build = returning(None, seen.clone(), &backend);

  run(
    &backend,
    config(&[], &[("token", "abc123"), ("same", "abc123"), ("other", "xyz")]),
    Some(build),
  )
  .await
  .unwrap();

  let received = backend.state.secrets.lock().unwrap().clone().unwrap();
  assert_eq!(received.len(), 2);
  assert_eq!(received[&SecretKey::of("abc123")], "abc123");
  assert_eq!(received[&SecretKey::of("xyz")], "xyz");

  let ctx = seen.lock().unwrap().take().unwrap();
  assert_eq!(ctx.secrets["token"], ctx.secrets["same"]);
  for call in backend.state.calls() {
    assert!(!call.contains("abc123"), "plaintext leaked into call {:?}", call);
  }
}

#[tokio::test]
async fn callback_runs_after_local_dirs_resolve() {
  let mut backend = FakeBackend::new();
  backend.local_dirs.insert("docs".to_string(), FsId::new("ref:docs"));
  let build = returning(None, Arc::new(Mutex::new(None)), &backend);

  run(
    &backend,
    config(&[("src", "/host/src"), ("docs", "/host/docs")], &[]),
    Some(build),
  )
  .await
  .unwrap();

  let callback = backend.state.position("callback").unwrap();
  assert!(backend.state.position("reference local src").unwrap() < callback);
  assert!(backend.state.position("reference local docs").unwrap() < callback);
  assert!(backend.state.position("list_workers").unwrap() < backend.state.position("build").unwrap());
}

#[tokio::test]
async fn empty_output_completes_with_empty_result() {
  for output in [None, Some("")] {
    let backend = FakeBackend::new();
    let build = returning(output, Arc::new(Mutex::new(None)), &backend);

    let result = run(&backend, config(&[("src", "/host/src")], &[]), Some(build))
      .await
      .unwrap();

    assert!(result.is_empty());
    assert!(!backend.state.called("solve"));
  }
}

#[tokio::test]
async fn no_build_function_still_resolves_inputs() {
  let backend = FakeBackend::new();
  let result = run(&backend, config(&[("src", "/host/src")], &[]), None).await.unwrap();

  assert!(result.is_empty());
  assert!(backend.state.called("reference local src"));
}

#[tokio::test]
async fn missing_local_dir_aborts_before_callback() {
  let backend = FakeBackend::new();
  let build = returning(Some("ref:out"), Arc::new(Mutex::new(None)), &backend);

  let err = run(&backend, config(&[("missing", "/nope")], &[]), Some(build))
    .await
    .unwrap_err();

  assert!(matches!(err, SessionError::Resolve(_)));
  assert!(err.to_string().contains("'missing'"));
  assert!(!backend.state.called("callback"));
  assert!(!backend.state.called("solve"));
}

#[tokio::test]
async fn callback_error_is_propagated_without_submitting() {
  let backend = FakeBackend::new();
  let build: Arc<dyn BuildFunction> =
    Arc::new(|_ctx: BuildContext| async { Err::<Option<FsId>, BoxError>("compile step failed".into()) });

  let err = run(&backend, config(&[], &[]), Some(build)).await.unwrap_err();

  let SessionError::Callback(inner) = &err else {
    panic!("expected callback error, got {:?}", err);
  };
  assert_eq!(inner.to_string(), "compile step failed");
  assert!(!backend.state.called("solve"));
}

#[tokio::test]
async fn failed_submit_names_the_output() {
  let mut backend = FakeBackend::new();
  backend.fail_solve = true;
  let build = returning(Some("ref:out"), Arc::new(Mutex::new(None)), &backend);

  let err = run(&backend, config(&[], &[]), Some(build)).await.unwrap_err();
  assert!(matches!(&err, SessionError::Submit { fs, .. } if fs.as_str() == "ref:out"));
}

#[tokio::test]
async fn platform_comes_from_first_worker() {
  let backend = FakeBackend::new();
  let seen = Arc::new(Mutex::new(None));
  let build = returning(None, seen.clone(), &backend);

  run(&backend, config(&[], &[]), Some(build)).await.unwrap();
  let ctx = seen.lock().unwrap().take().unwrap();
  assert_eq!(ctx.platform, Platform::new("linux", "arm64"));
}

#[tokio::test]
async fn no_workers_falls_back_to_host_platform() {
  let mut backend = FakeBackend::new();
  backend.workers = Ok(Vec::new());
  let seen = Arc::new(Mutex::new(None));
  let build = returning(None, seen.clone(), &backend);

  run(&backend, config(&[], &[]), Some(build)).await.unwrap();
  let ctx = seen.lock().unwrap().take().unwrap();
  assert_eq!(ctx.platform, Platform::host_default());
}

#[tokio::test]
async fn worker_query_failure_fails_the_session() {
  let mut backend = FakeBackend::new();
  backend.workers = Err(503);

  let err = run(&backend, config(&[], &[]), None).await.unwrap_err();
  assert!(matches!(err, SessionError::Platform(_)));
  assert!(!backend.state.called("build"));
}

#[tokio::test]
async fn progress_events_are_rendered_with_warnings_last() {
  let mut backend = FakeBackend::new();
  let warning = VertexWarning {
    vertex: "sha256:a".to_string(),
    short: "deprecated base image".to_string(),
    ..Default::default()
  };
  backend.events = vec![
    SolveStatus {
      vertexes: vec![Vertex {
        digest: "sha256:a".to_string(),
        name: "pull alpine".to_string(),
        started: true,
        ..Default::default()
      }],
      warnings: vec![warning.clone()],
      ..Default::default()
    },
    SolveStatus {
      warnings: vec![warning.clone()],
      ..Default::default()
    },
  ];

  let display = RecordingDisplay::default();
  Session::new(Arc::new(backend.clone()), config(&[], &[]))
    .run(None, display.clone())
    .await
    .unwrap();

  assert_eq!(display.updates.lock().unwrap().len(), 2);
  assert_eq!(*display.warnings.lock().unwrap(), Some(vec![warning]));
}

#[tokio::test]
async fn empty_status_stream_still_completes() {
  let backend = FakeBackend::new();
  let display = RecordingDisplay::default();

  Session::new(Arc::new(backend.clone()), config(&[], &[]))
    .run(None, display.clone())
    .await
    .unwrap();

  assert!(display.updates.lock().unwrap().is_empty());
  assert_eq!(*display.warnings.lock().unwrap(), Some(Vec::new()));
}

#[tokio::test]
async fn display_failure_fails_the_session() {
  let mut backend = FakeBackend::new();
  backend.events = vec![SolveStatus::default()];
  let display = RecordingDisplay {
    fail: true,
    ..Default::default()
  };

  let err = Session::new(Arc::new(backend.clone()), config(&[], &[]))
    .run(None, display)
    .await
    .unwrap_err();
  assert!(matches!(err, SessionError::Progress(_)));
}

#[derive(Deserialize)]
struct Id {
  id: FsId,
}

#[tokio::test]
async fn callback_can_query_the_embedded_api() {
  let backend = FakeBackend::new();
  let build: Arc<dyn BuildFunction> = Arc::new(|ctx: BuildContext| async move {
    let image: Id = ctx
      .api
      .query(ApiRequest::new("core.image").var("ref", "alpine:3.15"))
      .await?;
    let platform: Platform = ctx.api.query(ApiRequest::new("core.platform")).await?;
    assert_eq!(platform, ctx.platform);
    Ok::<_, BoxError>(Some(image.id))
  });

  let result = run(&backend, config(&[], &[]), Some(build)).await.unwrap();
  assert_eq!(result.reference, Some(ResultRef("res:filesystem image:alpine:3.15".to_string())));
}

#[tokio::test]
async fn cancellation_stops_a_running_build() {
  let backend = FakeBackend::new();
  let session = Session::new(Arc::new(backend.clone()), config(&[], &[]));
  let cancel = session.cancellation_token();

  let build: Arc<dyn BuildFunction> = Arc::new(|_ctx: BuildContext| async {
    std::future::pending::<()>().await;
    Ok::<Option<FsId>, BoxError>(None)
  });

  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
  });

  let err = session.run(Some(build), RecordingDisplay::default()).await.unwrap_err();
  assert!(matches!(err, SessionError::Cancelled));
  assert!(backend.state.called("abort build"), "calls: {:?}", backend.state.calls());
}

#[tokio::test]
async fn dev_server_serves_api_until_cancelled() {
  let port = {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
  };

  let backend = FakeBackend::new();
  let config = SessionConfig {
    dev_server: Some(port),
    ..Default::default()
  };
  let session = Session::new(Arc::new(backend.clone()), config);
  let cancel = session.cancellation_token();
  let running = tokio::spawn(session.run(None, RecordingDisplay::default()));

  let client = reqwest::Client::new();
  let url = format!("http://127.0.0.1:{}/query", port);
  let mut platform = None;
  for _ in 0..100 {
    let sent = client
      .post(&url)
      .json(&serde_json::json!({ "query": "core.platform" }))
      .send()
      .await;
    if let Ok(response) = sent {
      platform = Some(response.json::<serde_json::Value>().await.unwrap());
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }

  assert_eq!(
    platform,
    Some(serde_json::json!({ "data": { "os": "linux", "architecture": "arm64" } }))
  );

  cancel.cancel();
  let result = running.await.unwrap();
  assert!(matches!(result, Ok(_) | Err(SessionError::Cancelled)));
}
