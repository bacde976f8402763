//! Secret indirection.
//!
//! Secrets declared for a session are never handed to build code by their
//! plaintext. Each value is keyed by the SHA-256 of its content and callers
//! only see `identifier -> hash key`. The plaintext is reachable solely
//! through [`SecretSource`], which the backend reads when the build session
//! is opened.
//!
//! Identical values collapse onto the same key, so two identifiers that share
//! a secret also share its hash.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consts::SECRET_KEY_LOG_LEN;
use crate::util::hash::hash_bytes;

/// Content-derived key standing in for a secret's plaintext.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(pub String);

impl SecretKey {
  /// Derive the key for a plaintext value.
  pub fn of(plaintext: &str) -> Self {
    SecretKey(hash_bytes(plaintext.as_bytes()).0)
  }

  /// Shortened form for log output.
  pub fn short(&self) -> &str {
    let len = self.0.len().min(SECRET_KEY_LOG_LEN);
    &self.0[..len]
  }
}

impl fmt::Display for SecretKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash-keyed view of secret material, as consumed by a backend.
pub trait SecretSource: Send + Sync {
  /// All hash keys with a stored plaintext.
  fn keys(&self) -> Vec<SecretKey>;

  /// Plaintext for a hash key.
  fn get(&self, key: &SecretKey) -> Option<&str>;
}

/// Per-session secret table.
///
/// Built once from the session's `identifier -> plaintext` map and read-only
/// afterwards.
#[derive(Clone, Default)]
pub struct SecretTable {
  plaintext: HashMap<SecretKey, String>,
  ids: BTreeMap<String, SecretKey>,
}

impl SecretTable {
  pub fn new<I, K, V>(secrets: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: AsRef<str>,
  {
    let mut table = SecretTable::default();
    for (id, value) in secrets {
      let value = value.as_ref();
      let key = SecretKey::of(value);
      table.plaintext.entry(key.clone()).or_insert_with(|| value.to_string());
      table.ids.insert(id.into(), key);
    }
    table
  }

  /// Hash key assigned to a secret identifier.
  pub fn key_for(&self, id: &str) -> Option<&SecretKey> {
    self.ids.get(id)
  }

  /// The `identifier -> hash key` mapping handed to build code.
  pub fn id_map(&self) -> &BTreeMap<String, SecretKey> {
    &self.ids
  }

  /// Number of declared identifiers.
  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }
}

impl SecretSource for SecretTable {
  fn keys(&self) -> Vec<SecretKey> {
    let mut keys: Vec<SecretKey> = self.plaintext.keys().cloned().collect();
    keys.sort();
    keys
  }

  fn get(&self, key: &SecretKey) -> Option<&str> {
    self.plaintext.get(key).map(String::as_str)
  }
}

impl fmt::Debug for SecretTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let ids: BTreeMap<&str, &str> = self.ids.iter().map(|(id, key)| (id.as_str(), key.short())).collect();
    f.debug_struct("SecretTable").field("ids", &ids).finish()
  }
}
