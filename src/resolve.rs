//! Token → box resolution.
//!
//! Rules
//! - No token: the current directory, treated as a path.
//! - Token containing a path separator: a path. It and then each ancestor (deepest first) is
//!   looked up in the path index, so any subdirectory of a bound project finds its box.
//! - Anything else: a literal name, exact match in the name index only. A bare token such
//!   as `proj` is never read as the relative path `./proj`.

use std::path::Path;

use tracing::debug;

use crate::directory::{ContainerDirectory, ContainerRecord};
use crate::errors::{ProboxError, Result};
use crate::naming::absolutize;

pub fn is_path_token(token: &str) -> bool {
    token.contains('/') || token.contains(std::path::MAIN_SEPARATOR)
}

/// Resolve `token` to exactly one box in `dir`.
pub fn resolve<'a>(
    token: Option<&str>,
    dir: &'a ContainerDirectory,
    cwd: &Path,
) -> Result<&'a ContainerRecord> {
    let token = token.map(str::trim).filter(|t| !t.is_empty());
    match token {
        None => resolve_path(cwd, dir, cwd, &cwd.display().to_string()),
        Some(t) if is_path_token(t) => resolve_path(Path::new(t), dir, cwd, t),
        Some(name) => dir.by_name.get(name).ok_or_else(|| ProboxError::NotFound {
            token: name.to_string(),
            known: dir.known_tokens(),
        }),
    }
}

fn resolve_path<'a>(
    path: &Path,
    dir: &'a ContainerDirectory,
    cwd: &Path,
    token: &str,
) -> Result<&'a ContainerRecord> {
    let deep = absolutize(path, cwd)?;
    debug!(path = %deep.display(), "resolving box by path");
    deep.ancestors()
        .find_map(|p| dir.by_path.get(p))
        .ok_or_else(|| ProboxError::NotFound {
            token: token.to_string(),
            known: dir.known_tokens(),
        })
}
