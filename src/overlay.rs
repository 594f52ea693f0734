//! Home-directory overlay: host files mirrored into a box's home directory.
//!
//! The overlay directory is walked on the host; directories are created inside the box as
//! the box user, regular files and symlinks are copied with the runtime's copy verb and then
//! handed to the box user. Sockets, fifos and device nodes are skipped.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{ProboxError, Result};
use crate::labels::UserTriple;
use crate::runtime::{ExecSpec, Runtime};

// Keeps chown argv well under ARG_MAX.
const CHOWN_BATCH: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayPlan {
    /// Directories relative to the overlay root, parents before children.
    pub dirs: Vec<PathBuf>,
    /// Files (and symlinks) relative to the overlay root.
    pub files: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

impl OverlayPlan {
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }
}

/// Walk `root`; `None` when the overlay directory does not exist.
pub fn plan(root: &Path) -> Result<Option<OverlayPlan>> {
    if !root.is_dir() {
        return Ok(None);
    }
    let mut out = OverlayPlan::default();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            ProboxError::Other(anyhow::anyhow!("walking overlay {}: {e}", root.display()))
        })?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| entry.path().to_path_buf());
        let ft = entry.file_type();
        if ft.is_dir() {
            out.dirs.push(rel);
        } else if ft.is_file() || ft.is_symlink() {
            out.files.push(rel);
        } else {
            out.skipped.push(rel);
        }
    }
    Ok(Some(out))
}

/// Push the overlay into running box `container`. Returns the number of files copied.
pub fn push(
    runtime: &dyn Runtime,
    container: &str,
    user: &UserTriple,
    root: &Path,
) -> Result<usize> {
    let Some(plan) = plan(root)? else {
        debug!(overlay = %root.display(), "no overlay directory; nothing to push");
        return Ok(0);
    };
    for s in &plan.skipped {
        crate::warn_print(&format!(
            "overlay: skipping special file {}",
            root.join(s).display()
        ));
    }
    if plan.is_empty() {
        return Ok(0);
    }

    let home = PathBuf::from(user.home_dir());

    if !plan.dirs.is_empty() {
        let mut cmd = vec!["mkdir".to_string(), "-p".to_string()];
        cmd.extend(plan.dirs.iter().map(|d| home.join(d).display().to_string()));
        run_checked(runtime, container, Some(&user.username), cmd)?;
    }

    for f in &plan.files {
        runtime.copy_to_container(&root.join(f), container, &home.join(f))?;
    }

    let owner = format!("{}:{}", user.uid, user.gid);
    for chunk in plan.files.chunks(CHOWN_BATCH) {
        let mut cmd = vec!["chown".to_string(), "-h".to_string(), owner.clone()];
        cmd.extend(chunk.iter().map(|f| home.join(f).display().to_string()));
        run_checked(runtime, container, Some("root"), cmd)?;
    }

    let use_err = crate::color_enabled_stderr();
    crate::log_info_stderr(
        use_err,
        &format!(
            "probox: pushed {} overlay file(s) from {} into {}",
            plan.files.len(),
            root.display(),
            container
        ),
    );
    Ok(plan.files.len())
}

fn run_checked(
    runtime: &dyn Runtime,
    container: &str,
    user: Option<&str>,
    command: Vec<String>,
) -> Result<()> {
    let preview = command.join(" ");
    let code = runtime.exec(&ExecSpec {
        container: container.to_string(),
        command,
        user: user.map(str::to_string),
        ..ExecSpec::default()
    })?;
    if code == 0 {
        Ok(())
    } else {
        Err(ProboxError::ExternalTool {
            command: format!("overlay step `{preview}` in {container}"),
            code: Some(code),
            stderr: String::new(),
        })
    }
}
