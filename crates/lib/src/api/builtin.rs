//! Core API fields, backed by the build gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::backend::{Definition, Gateway};
use crate::platform::Platform;

use super::router::required_str;
use super::{ApiError, Resolver};

/// Resolvers for the `core` namespace, seeded with the session's gateway
/// and platform.
pub fn resolvers(gateway: Arc<dyn Gateway>, platform: Platform) -> Vec<Arc<dyn Resolver>> {
  vec![
    Arc::new(ClientDir {
      gateway: gateway.clone(),
    }),
    Arc::new(Image {
      gateway,
      platform: platform.clone(),
    }),
    Arc::new(PlatformField { platform }),
  ]
}

/// `core.clientdir(id)`: filesystem reference for a declared local directory.
struct ClientDir {
  gateway: Arc<dyn Gateway>,
}

#[async_trait]
impl Resolver for ClientDir {
  fn field(&self) -> &str {
    "core.clientdir"
  }

  async fn resolve(&self, variables: &Map<String, Value>) -> Result<Value, ApiError> {
    let id = required_str(variables, "id")?;
    let definition = Definition::Local { name: id.to_string() };
    let fs = self
      .gateway
      .reference(&definition)
      .await
      .map_err(|e| ApiError::new(format!("failed to load local directory '{}': {}", id, e)))?;
    Ok(json!({ "id": fs }))
  }
}

/// `core.image(ref)`: filesystem reference for a container image on the
/// session platform.
struct Image {
  gateway: Arc<dyn Gateway>,
  platform: Platform,
}

#[async_trait]
impl Resolver for Image {
  fn field(&self) -> &str {
    "core.image"
  }

  async fn resolve(&self, variables: &Map<String, Value>) -> Result<Value, ApiError> {
    let reference = required_str(variables, "ref")?;
    let definition = Definition::Image {
      reference: reference.to_string(),
      platform: self.platform.clone(),
    };
    let fs = self
      .gateway
      .reference(&definition)
      .await
      .map_err(|e| ApiError::new(format!("failed to load image '{}': {}", reference, e)))?;
    Ok(json!({ "id": fs }))
  }
}

struct PlatformField {
  platform: Platform,
}

#[async_trait]
impl Resolver for PlatformField {
  fn field(&self) -> &str {
    "core.platform"
  }

  async fn resolve(&self, _variables: &Map<String, Value>) -> Result<Value, ApiError> {
    serde_json::to_value(&self.platform).map_err(|e| ApiError::new(e.to_string()))
  }
}
