//! In-process transport to the API router.
//!
//! Build functions reach the router over HTTP/1.1, but the bytes never leave
//! the process: every dial creates an in-memory duplex pipe, hands the server
//! half to a [`SingleConnListener`] and serves it with the router until the
//! connection ends or the session is cancelled.

use std::io;
use std::sync::Mutex;

use axum::Router;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::consts::{API_QUERY_PATH, BRIDGE_AUTHORITY, BRIDGE_PIPE_CAPACITY};

use super::{ApiErrors, ApiRequest, ApiResponse, ApiRouter};

#[derive(Debug, Error)]
pub enum BridgeError {
  #[error("bridge connection failed: {0}")]
  Http(#[from] hyper::Error),

  #[error("invalid bridge request: {0}")]
  Request(#[from] axum::http::Error),

  #[error("malformed api message: {0}")]
  Json(#[from] serde_json::Error),

  #[error("api returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("{0}")]
  Api(#[from] ApiErrors),

  #[error("api returned no data for '{0}'")]
  NoData(String),
}

/// Listener that yields exactly one pre-established connection.
///
/// The first [`accept`](Self::accept) returns the connection; every later
/// call, and any call after [`close`](Self::close), fails with
/// `BrokenPipe`.
#[derive(Debug)]
pub struct SingleConnListener {
  conn: Mutex<Option<DuplexStream>>,
}

impl SingleConnListener {
  pub fn new(conn: DuplexStream) -> Self {
    Self {
      conn: Mutex::new(Some(conn)),
    }
  }

  pub fn accept(&self) -> io::Result<DuplexStream> {
    self
      .conn
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .take()
      .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "listener connection already taken"))
  }

  /// Drop the pending connection, if it was never accepted.
  pub fn close(&self) {
    self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
  }
}

/// Serve every connection the listener yields until it runs dry or `cancel`
/// fires.
async fn serve(listener: SingleConnListener, service: Router, cancel: CancellationToken) {
  while let Ok(conn) = listener.accept() {
    let connection = hyper::server::conn::http1::Builder::new()
      .timer(TokioTimer::new())
      .serve_connection(TokioIo::new(conn), TowerToHyperService::new(service.clone()));

    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        trace!("bridge connection cancelled");
        break;
      }
      result = connection => {
        if let Err(e) = result {
          debug!(error = %e, "bridge connection ended with error");
        }
      }
    }
  }
  listener.close();
}

/// Client for the embedded API, connected through in-memory pipes.
#[derive(Clone)]
pub struct ApiClient {
  service: Router,
  cancel: CancellationToken,
}

impl ApiClient {
  /// Client serving `router`. Connections stop being served once `cancel`
  /// fires.
  pub fn new(router: &ApiRouter, cancel: CancellationToken) -> Self {
    Self {
      service: router.service(),
      cancel,
    }
  }

  /// Open a fresh connection to the router.
  pub fn dial(&self) -> DuplexStream {
    let (client, server) = tokio::io::duplex(BRIDGE_PIPE_CAPACITY);
    let listener = SingleConnListener::new(server);
    tokio::spawn(serve(listener, self.service.clone(), self.cancel.child_token()));
    client
  }

  /// Send one request over a new connection.
  pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse, BridgeError> {
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(self.dial())).await?;
    tokio::spawn(async move {
      if let Err(e) = connection.await {
        debug!(error = %e, "bridge client connection failed");
      }
    });

    let body = serde_json::to_vec(request)?;
    let http_request = Request::builder()
      .method(Method::POST)
      .uri(API_QUERY_PATH)
      .header(HOST, BRIDGE_AUTHORITY)
      .header(CONTENT_TYPE, "application/json")
      .body(Full::new(Bytes::from(body)))?;

    let response = sender.send_request(http_request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();

    if !status.is_success() {
      return Err(BridgeError::Status {
        status: status.as_u16(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
      });
    }
    Ok(serde_json::from_slice(&bytes)?)
  }

  /// Query a field and decode its data.
  pub async fn query<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, BridgeError> {
    let field = request.query.clone();
    let data = self
      .request(&request)
      .await?
      .into_result()?
      .filter(|data| !data.is_null())
      .ok_or(BridgeError::NoData(field))?;
    Ok(serde_json::from_value(data)?)
  }
}
