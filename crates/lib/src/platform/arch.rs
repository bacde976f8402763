//! Host CPU architecture in OCI naming.

/// Map a Rust target architecture name to its OCI architecture and variant.
///
/// Unknown architectures are passed through unchanged.
pub fn oci_arch(rust_arch: &str) -> (&str, Option<&'static str>) {
  match rust_arch {
    "x86_64" => ("amd64", None),
    "x86" => ("386", None),
    "aarch64" => ("arm64", None),
    "arm" => ("arm", Some("v7")),
    "powerpc64" if cfg!(target_endian = "little") => ("ppc64le", None),
    "loongarch64" => ("loong64", None),
    "mips64" if cfg!(target_endian = "little") => ("mips64le", None),
    other => (other, None),
  }
}

/// Returns the OCI architecture of the current host.
pub fn host() -> (&'static str, Option<&'static str>) {
  oci_arch(std::env::consts::ARCH)
}
