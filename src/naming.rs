//! Box naming: deterministic, human-readable, collision-free names derived from paths.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::errors::{ProboxError, Result};

/// Directory names too generic to identify a project on their own.
pub const GENERIC_NAMES: &[&str] = &[
    "src", "source", "code", "repo", "repos", "project", "projects", "git", "work", "dev", "app",
    "tmp", "home",
];

/// Suggest a unique name for a box bound to `path`.
///
/// Precedence: final segment, then `parent-final`, then `final-NNN` counting from 002.
/// Generic directory names are skipped in the first two steps only.
pub fn suggest_name(path: &Path, taken: &BTreeSet<String>, cwd: &Path) -> Result<String> {
    let abs = absolutize(path, cwd)?;
    let last = segment(abs.file_name().map(Path::new));
    let parent = segment(abs.parent().and_then(Path::file_name).map(Path::new));

    let unusable = |n: &str| taken.contains(n) || GENERIC_NAMES.contains(&n);

    // Root has no final segment; fall back to a fixed stem so we still return something.
    let last = if last.is_empty() { "root".to_string() } else { last };

    if !unusable(&last) {
        return Ok(last);
    }
    if !parent.is_empty() {
        let combo = format!("{parent}-{last}");
        if !unusable(&combo) {
            return Ok(combo);
        }
    }
    // Terminates: `taken` is finite, so some suffix is free.
    let mut i: u64 = 2;
    loop {
        let candidate = format!("{last}-{i:03}");
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        i += 1;
    }
}

/// A name usable as a container name: non-empty, no `.` and no path separator.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProboxError::config("box name must not be empty"));
    }
    if name.contains('.') || name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        return Err(ProboxError::config(format!(
            "invalid box name '{name}': must not contain '.' or '/'"
        )));
    }
    Ok(())
}

/// Random name for ephemeral boxes.
pub fn temp_name(taken: &BTreeSet<String>) -> String {
    loop {
        let candidate = format!("temp-{}", crate::util::id::random_hex(3));
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
}

/// Make `path` absolute against `cwd` and fold `.`/`..` lexically (no symlink resolution,
/// so paths of not-yet-existing or since-removed directories still work).
pub fn absolutize(path: &Path, cwd: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        if !cwd.is_absolute() {
            return Err(ProboxError::config(format!(
                "cannot make {} absolute: working directory {} is not absolute",
                path.display(),
                cwd.display()
            )));
        }
        cwd.join(path)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

// Sanitized path segment: container names cannot carry dots, so map them to dashes.
fn segment(p: Option<&Path>) -> String {
    p.map(|s| s.to_string_lossy().replace('.', "-"))
        .map(|s| s.trim_matches('-').to_string())
        .unwrap_or_default()
}
