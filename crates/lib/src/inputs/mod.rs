//! Local input resolution.
//!
//! Declared local directories are turned into backend filesystem references
//! by querying `core.clientdir` over the embedded API, one directory at a
//! time. The first failure aborts resolution.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiClient, ApiRequest, BridgeError};
use crate::backend::FsId;

/// Local directory identifier -> filesystem reference.
pub type LocalDirs = BTreeMap<String, FsId>;

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("failed to resolve local directory '{id}': {source}")]
  LocalDir {
    id: String,
    #[source]
    source: BridgeError,
  },
}

#[derive(Debug, Deserialize)]
struct ClientDir {
  id: FsId,
}

/// Resolve every identifier in `ids` to its filesystem reference.
pub async fn resolve_local_dirs<'a, I>(client: &ApiClient, ids: I) -> Result<LocalDirs, ResolveError>
where
  I: IntoIterator<Item = &'a str>,
{
  let mut resolved = LocalDirs::new();

  for id in ids {
    debug!(id, "resolving local directory");
    let dir: ClientDir = client
      .query(ApiRequest::new("core.clientdir").var("id", id))
      .await
      .map_err(|source| ResolveError::LocalDir {
        id: id.to_string(),
        source,
      })?;
    resolved.insert(id.to_string(), dir.id);
  }

  info!(count = resolved.len(), "resolved local directories");
  Ok(resolved)
}
