//! Embedded API.
//!
//! Build functions talk to the session through a small request/response
//! protocol: a request names a field (`core.clientdir`) and carries
//! variables, the response carries JSON data or a list of errors.
//!
//! - [`router`] - field registry served as an `axum` router
//! - [`builtin`] - the `core.*` fields, backed by the build gateway
//! - [`bridge`] - in-process HTTP transport to the router (no socket)

pub mod bridge;
pub mod builtin;
pub mod router;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use bridge::{ApiClient, BridgeError, SingleConnListener};
pub use router::{ApiRouter, Resolver, RouterError};

/// A query for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
  pub query: String,
  #[serde(default)]
  pub variables: Map<String, Value>,
}

impl ApiRequest {
  pub fn new(query: impl Into<String>) -> Self {
    Self {
      query: query.into(),
      variables: Map::new(),
    }
  }

  pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.variables.insert(name.into(), value.into());
    self
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
  #[serde(default)]
  pub data: Option<Value>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub errors: Vec<ApiError>,
}

impl ApiResponse {
  pub fn data(data: Value) -> Self {
    Self {
      data: Some(data),
      errors: Vec::new(),
    }
  }

  pub fn error(error: ApiError) -> Self {
    Self {
      data: None,
      errors: vec![error],
    }
  }

  /// The data if the response carries no errors.
  pub fn into_result(self) -> Result<Option<Value>, ApiErrors> {
    if self.errors.is_empty() {
      Ok(self.data)
    } else {
      Err(ApiErrors(self.errors))
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ApiError {
  pub message: String,
}

impl ApiError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// All errors returned for one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ApiErrors(pub Vec<ApiError>);

impl fmt::Display for ApiErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let messages: Vec<&str> = self.0.iter().map(|e| e.message.as_str()).collect();
    write!(f, "{}", messages.join("; "))
  }
}
