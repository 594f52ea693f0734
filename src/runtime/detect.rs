//! Container runtime discovery.

use std::env;
use std::io;
use std::path::PathBuf;

use which::which;

/// Locate the runtime binary: an explicit preference first, then podman, then docker.
pub fn container_runtime_path(preferred: Option<&str>) -> io::Result<PathBuf> {
    // Allow tests or callers to explicitly disable runtime detection to avoid hard failures
    if env::var("PROBOX_TEST_DISABLE_RUNTIME").ok().as_deref() == Some("1") {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Container runtime disabled by environment override.",
        ));
    }

    if let Some(p) = preferred.map(str::trim).filter(|p| !p.is_empty()) {
        return which(p).map_err(|_| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Configured container runtime '{p}' was not found in PATH."),
            )
        });
    }

    for candidate in ["podman", "docker"] {
        if let Ok(p) = which(candidate) {
            return Ok(p);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "podman (or docker) is required but was not found in PATH.",
    ))
}
