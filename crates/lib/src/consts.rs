//! Application-wide constants.

use std::time::Duration;

pub const APP_NAME: &str = "kiln";

/// Backend address used when neither `--backend` nor `KILN_BACKEND` is set.
pub const DEFAULT_BACKEND_ADDR: &str = "http://127.0.0.1:1234";

/// Environment variable overriding the backend address.
pub const BACKEND_ADDR_ENV: &str = "KILN_BACKEND";

/// Minimal image mounted as `/` for interactive shells.
pub const SHELL_BASE_IMAGE: &str = "alpine:3.15";

/// Where the inspected filesystem is mounted inside a shell container.
pub const SHELL_MOUNT_POINT: &str = "/output";

pub const SHELL_COMMAND: &str = "/bin/sh";

/// Path the embedded API router answers queries on.
pub const API_QUERY_PATH: &str = "/query";

/// Host header sent on requests over the in-process bridge.
pub const BRIDGE_AUTHORITY: &str = "kiln.internal";

/// Buffer size of each in-memory duplex pipe.
pub const BRIDGE_PIPE_CAPACITY: usize = 64 * 1024;

/// Number of hex characters shown when a secret hash key is logged.
pub const SECRET_KEY_LOG_LEN: usize = 12;

/// How long a cancelled build may take to abort on the backend before it is dropped.
pub const BUILD_ABORT_GRACE: Duration = Duration::from_secs(5);
