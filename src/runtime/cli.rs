//! `Runtime` over the podman command line (`--format json` for every query).

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ContainerSummary, CreateSpec, ExecSpec, ImageSummary, Runtime};
use crate::errors::{ProboxError, Result};
use crate::util::{shell_join, ExecOutput, ExecRequest, ExecService};

#[derive(Debug, Clone)]
pub struct CliRuntime {
    program: PathBuf,
    exec: ExecService,
    verbose: bool,
}

impl CliRuntime {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            exec: ExecService::default(),
            verbose: false,
        }
    }

    /// Discover the runtime binary (see `container_runtime_path`).
    pub fn detect(preferred: Option<&str>) -> Result<Self> {
        let program =
            super::container_runtime_path(preferred).map_err(ProboxError::RuntimeNotFound)?;
        Ok(Self::new(program))
    }

    /// Per-call timeout; `None` blocks until the runtime answers.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exec = ExecService::new(timeout.unwrap_or(Duration::ZERO));
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn program_label(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn preview(&self, args: &[OsString]) -> String {
        let mut words = vec![self.program_label()];
        words.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
        shell_join(&words)
    }

    fn announce(&self, args: &[OsString]) {
        let preview = self.preview(args);
        debug!(command = %preview, "runtime call");
        if self.verbose {
            let use_err = crate::color_enabled_stderr();
            crate::log_info_stderr(
                use_err,
                &format!("probox: {}: {}", self.program_label(), preview),
            );
        }
    }

    fn invoke(&self, args: Vec<OsString>) -> Result<ExecOutput> {
        self.announce(&args);
        let request = ExecRequest::new(self.program.clone())
            .args(args)
            .capture_output(true);
        self.exec.run(request).map_err(from_exec_error)
    }

    /// Inherited stdio and no timeout. For calls whose duration belongs to
    /// the user (their command in the box, a pull's download).
    fn invoke_attached(&self, args: Vec<OsString>) -> Result<ExecOutput> {
        self.announce(&args);
        let request = ExecRequest::new(self.program.clone())
            .args(args)
            .timeout(Duration::ZERO);
        self.exec.run(request).map_err(from_exec_error)
    }

    /// Run a runtime verb with captured output; non-zero exit becomes `ExternalTool`.
    fn checked(&self, args: Vec<OsString>) -> Result<String> {
        let preview = self.preview(&args);
        let out = self.invoke(args)?;
        if !out.status.success() {
            return Err(ProboxError::ExternalTool {
                command: preview,
                code: out.status.code(),
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    fn query<T: DeserializeOwned>(&self, args: Vec<OsString>, what: &str) -> Result<Vec<T>> {
        let stdout = self.checked(args)?;
        decode_json_list(&stdout, what)
    }
}

fn os(s: impl Into<OsString>) -> OsString {
    s.into()
}

fn from_exec_error(e: anyhow::Error) -> ProboxError {
    match e.downcast::<io::Error>() {
        // Only the runtime binary itself is ever spawned here.
        Ok(ioe) if ioe.kind() == io::ErrorKind::NotFound => ProboxError::RuntimeNotFound(ioe),
        Ok(ioe) => ProboxError::Io(ioe),
        Err(other) => ProboxError::Other(other),
    }
}

/// Decode a JSON array; empty output counts as an empty list.
pub(crate) fn decode_json_list<T: DeserializeOwned>(raw: &str, what: &str) -> Result<Vec<T>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(|source| ProboxError::Decode {
        what: what.to_string(),
        source,
    })
}

/// Dockerfile `LABEL` instruction with a JSON-quoted value (safe for spaces and quotes).
fn label_change(key: &str, value: &str) -> String {
    let quoted = serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""));
    format!("LABEL {key}={quoted}")
}

fn last_line(s: &str) -> Option<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(str::to_string)
}

impl Runtime for CliRuntime {
    fn list_containers(&self, label_key: &str) -> Result<Vec<ContainerSummary>> {
        let args = vec![
            os("ps"),
            os("-a"),
            os("--filter"),
            os(format!("label={label_key}")),
            os("--format"),
            os("json"),
        ];
        self.query(args, "container list")
    }

    fn list_images(&self, filters: &[String]) -> Result<Vec<ImageSummary>> {
        let mut args = vec![os("images")];
        for f in filters {
            args.push(os("--filter"));
            args.push(os(f.as_str()));
        }
        args.push(os("--format"));
        args.push(os("json"));
        self.query(args, "image list")
    }

    fn pull_image(&self, reference: &str) -> Result<()> {
        // Inherit stdio so pull progress stays visible.
        let args = vec![os("pull"), os(reference)];
        let preview = self.preview(&args);
        let out = self.invoke_attached(args)?;
        if out.status.success() {
            Ok(())
        } else {
            Err(ProboxError::ExternalTool {
                command: preview,
                code: out.status.code(),
                stderr: String::new(),
            })
        }
    }

    fn create_container(&self, spec: &CreateSpec) -> Result<String> {
        let mut args = vec![os("create"), os("--name"), os(spec.name.as_str())];
        if !spec.hostname.is_empty() {
            args.push(os("--hostname"));
            args.push(os(spec.hostname.as_str()));
        }
        if spec.keep_user_namespace {
            args.push(os("--userns=keep-id"));
        }
        if spec.disable_label_isolation {
            args.push(os("--security-opt"));
            args.push(os("label=disable"));
        }
        if let Some(net) = spec.network.as_deref() {
            args.push(os("--network"));
            args.push(os(net));
        }
        for (k, v) in &spec.labels {
            args.push(os("--label"));
            args.push(os(format!("{k}={v}")));
        }
        for m in &spec.mounts {
            args.push(os("--volume"));
            args.push(os(m.volume_arg()));
        }
        args.push(os(spec.image.as_str()));
        args.extend(spec.command.iter().map(|c| os(c.as_str())));
        let stdout = self.checked(args)?;
        last_line(&stdout).ok_or_else(|| {
            ProboxError::Other(anyhow::anyhow!(
                "runtime did not report an id for container '{}'",
                spec.name
            ))
        })
    }

    fn start_container(&self, name: &str) -> Result<()> {
        self.checked(vec![os("start"), os(name)]).map(|_| ())
    }

    fn stop_container(&self, name: &str) -> Result<()> {
        self.checked(vec![os("stop"), os(name)]).map(|_| ())
    }

    fn remove_container(&self, name: &str) -> Result<()> {
        self.checked(vec![os("rm"), os(name)]).map(|_| ())
    }

    fn exec(&self, spec: &ExecSpec) -> Result<i32> {
        let mut args = vec![os("exec")];
        if spec.interactive {
            args.push(os("--interactive"));
        }
        if spec.tty {
            args.push(os("--tty"));
        }
        if let Some(user) = spec.user.as_deref() {
            args.push(os("--user"));
            args.push(os(user));
        }
        if let Some(dir) = spec.workdir.as_deref() {
            args.push(os("--workdir"));
            args.push(os(dir));
        }
        for (k, v) in &spec.env {
            args.push(os("--env"));
            args.push(os(format!("{k}={v}")));
        }
        if let Some(f) = spec.env_file.as_deref() {
            args.push(os("--env-file"));
            args.push(os(f));
        }
        args.push(os(spec.container.as_str()));
        args.extend(spec.command.iter().map(|c| os(c.as_str())));
        let out = self.invoke_attached(args)?;
        // Signal-terminated commands follow the shell convention 128+n; we only know "killed".
        Ok(out.status.code().unwrap_or(128 + 9))
    }

    fn commit_container(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<String> {
        let mut args = vec![os("commit"), os("--quiet"), os("--pause=true")];
        for (k, v) in labels {
            args.push(os("--change"));
            args.push(os(label_change(k, v)));
        }
        args.push(os(name));
        let stdout = self.checked(args)?;
        last_line(&stdout).ok_or_else(|| {
            ProboxError::Other(anyhow::anyhow!(
                "runtime did not report an image id when committing '{name}'"
            ))
        })
    }

    fn copy_to_container(&self, host: &Path, name: &str, dest: &Path) -> Result<()> {
        let target = format!("{name}:{}", dest.display());
        self.checked(vec![os("cp"), os(host), os(target)])
            .map(|_| ())
    }
}
