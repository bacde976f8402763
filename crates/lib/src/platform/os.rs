//! Host operating system in OCI naming.

/// Map a Rust target OS name to its OCI name.
pub fn oci_os(rust_os: &str) -> &str {
  match rust_os {
    "macos" => "darwin",
    other => other,
  }
}

/// Returns the OCI operating system of the current host.
pub fn host() -> &'static str {
  oci_os(std::env::consts::OS)
}
