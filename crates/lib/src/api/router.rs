//! Field registry for the embedded API.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::consts::API_QUERY_PATH;

use super::{ApiError, ApiRequest, ApiResponse};

/// Resolves one field of the API.
#[async_trait]
pub trait Resolver: Send + Sync {
  /// Dotted field path this resolver answers, e.g. `core.clientdir`.
  fn field(&self) -> &str;

  async fn resolve(&self, variables: &Map<String, Value>) -> Result<Value, ApiError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
  #[error("field '{0}' is already registered")]
  Duplicate(String),
}

/// Routes requests to registered resolvers.
#[derive(Clone, Default)]
pub struct ApiRouter {
  resolvers: HashMap<String, Arc<dyn Resolver>>,
}

impl ApiRouter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register resolvers. Fails without registering anything if a field is
  /// already taken.
  pub fn add(&mut self, resolvers: Vec<Arc<dyn Resolver>>) -> Result<(), RouterError> {
    let mut fields = HashSet::new();
    for resolver in &resolvers {
      let field = resolver.field();
      if self.resolvers.contains_key(field) || !fields.insert(field.to_string()) {
        return Err(RouterError::Duplicate(field.to_string()));
      }
    }

    for resolver in resolvers {
      self.resolvers.insert(resolver.field().to_string(), resolver);
    }
    Ok(())
  }

  pub fn fields(&self) -> Vec<&str> {
    let mut fields: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
    fields.sort_unstable();
    fields
  }

  /// Answer a request. Failures are reported in the response, never as an
  /// HTTP error.
  pub async fn execute(&self, request: ApiRequest) -> ApiResponse {
    let field = request.query.trim();
    let Some(resolver) = self.resolvers.get(field) else {
      return ApiResponse::error(ApiError::new(format!("unknown field '{}'", field)));
    };

    debug!(field, "resolving api field");
    match resolver.resolve(&request.variables).await {
      Ok(data) => ApiResponse::data(data),
      Err(e) => ApiResponse::error(e),
    }
  }

  /// The HTTP service for this router.
  pub fn service(&self) -> Router {
    Router::new()
      .route(API_QUERY_PATH, post(handle_query))
      .with_state(Arc::new(self.clone()))
  }
}

impl fmt::Debug for ApiRouter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ApiRouter").field("fields", &self.fields()).finish()
  }
}

async fn handle_query(State(router): State<Arc<ApiRouter>>, Json(request): Json<ApiRequest>) -> Json<ApiResponse> {
  Json(router.execute(request).await)
}

/// Read a required string variable.
pub fn required_str<'a>(variables: &'a Map<String, Value>, name: &str) -> Result<&'a str, ApiError> {
  match variables.get(name) {
    Some(Value::String(s)) => Ok(s),
    Some(other) => Err(ApiError::new(format!("variable '{}' must be a string, got {}", name, other))),
    None => Err(ApiError::new(format!("missing required variable '{}'", name))),
  }
}
