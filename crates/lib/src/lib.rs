//! kiln-lib: build session orchestration for kiln
//!
//! This crate drives builds on a content-addressed build backend:
//! - `Session`: one build, from platform detection to the solved output
//! - `Backend` / `Gateway`: the seam to the build backend (HTTP client included)
//! - `ApiRouter` / `ApiClient`: the embedded API, reachable over an in-memory bridge
//! - `SecretTable`: hash indirection so secret plaintext never enters the build graph
//! - `shell`: interactive shells attached to build output

pub mod api;
pub mod backend;
pub mod consts;
pub mod inputs;
pub mod platform;
pub mod progress;
pub mod secrets;
pub mod session;
pub mod shell;
pub mod util;
