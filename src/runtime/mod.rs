#![allow(clippy::module_name_repetitions)]
//! Container runtime collaborator.
//!
//! `Runtime` is the seam between probox logic and the container engine. `CliRuntime`
//! drives the podman (or docker) binary; tests substitute an in-memory fake.

mod cli;
mod detect;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::Result;

pub use cli::CliRuntime;
pub use detect::container_runtime_path;

/// One container as reported by `ps -a --format json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Id", alias = "ID")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Labels", default, deserialize_with = "labels_or_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "State", default)]
    pub state: String,
}

impl ContainerSummary {
    pub fn name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// One image as reported by `images --format json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageSummary {
    #[serde(rename = "Id", alias = "ID")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
    #[serde(rename = "Labels", default, deserialize_with = "labels_or_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ImageSummary {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

// podman reports `"Labels": null` for unlabelled objects.
fn labels_or_empty<'de, D>(d: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
    /// Volume options (`rw`, `z`, ...), joined with commas.
    pub options: Vec<String>,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            options: Vec::new(),
        }
    }

    pub fn option(mut self, opt: &str) -> Self {
        self.options.push(opt.to_string());
        self
    }

    pub fn volume_arg(&self) -> String {
        let mut s = format!("{}:{}", self.host.display(), self.container.display());
        if !self.options.is_empty() {
            s.push(':');
            s.push_str(&self.options.join(","));
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateSpec {
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub network: Option<String>,
    /// Disable SELinux labeling for the whole container (`--security-opt label=disable`).
    pub disable_label_isolation: bool,
    pub keep_user_namespace: bool,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecSpec {
    pub container: String,
    pub command: Vec<String>,
    pub user: Option<String>,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub env_file: Option<PathBuf>,
    pub interactive: bool,
    pub tty: bool,
}

/// Verbs consumed from the container engine.
///
/// Every call blocks until the engine answers. Non-zero engine exits surface as
/// `ProboxError::ExternalTool`, except `exec`, which reports the command's own status.
pub trait Runtime {
    /// All containers (running or not) carrying `label_key`.
    fn list_containers(&self, label_key: &str) -> Result<Vec<ContainerSummary>>;

    /// Images matching every `label=...`/`reference=...` filter given.
    fn list_images(&self, filters: &[String]) -> Result<Vec<ImageSummary>>;

    fn pull_image(&self, reference: &str) -> Result<()>;

    /// Returns the new container id.
    fn create_container(&self, spec: &CreateSpec) -> Result<String>;

    fn start_container(&self, name: &str) -> Result<()>;

    fn stop_container(&self, name: &str) -> Result<()>;

    fn remove_container(&self, name: &str) -> Result<()>;

    /// Returns the exit code of the executed command.
    fn exec(&self, spec: &ExecSpec) -> Result<i32>;

    /// Snapshot a (paused) container into a new image with `labels`; returns the image id.
    fn commit_container(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<String>;

    fn copy_to_container(&self, host: &Path, name: &str, dest: &Path) -> Result<()>;
}
